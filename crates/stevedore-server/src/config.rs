//! Per-user state directory bootstrap.

use std::path::PathBuf;

pub const APP_NAME: &str = "stevedore";

/// Resolved configuration, data and log directories.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppConfig {
    /// Resolve directories under the user config dir, falling back to the
    /// working directory when the platform reports none.
    #[must_use]
    pub fn resolve() -> Self {
        let base = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME);
        Self::rooted_at(base)
    }

    /// Resolve directories under an explicit base (tests, packaging).
    #[must_use]
    pub fn rooted_at(base: PathBuf) -> Self {
        Self {
            data_dir: base.join("data"),
            log_dir: base.join("logs"),
            config_dir: base,
        }
    }

    /// Create any missing directories.
    ///
    /// # Errors
    /// Returns the underlying I/O error when a directory cannot be created.
    pub fn ensure_paths(&self) -> std::io::Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.log_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                tracing::info!(path = %dir.display(), "created state directory");
            }
        }
        Ok(())
    }

    /// Path of the connection-profile database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("data.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_nest_under_the_base() {
        let config = AppConfig::rooted_at(PathBuf::from("/tmp/stevedore-test"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/stevedore-test/data"));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/stevedore-test/logs"));
        assert_eq!(
            config.db_path(),
            PathBuf::from("/tmp/stevedore-test/data/data.db")
        );
    }
}
