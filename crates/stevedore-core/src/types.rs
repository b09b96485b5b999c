//! Shared data carriers for engine calls and the REST surface.

use serde::{Deserialize, Serialize};

/// Condensed container listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub command: String,
    pub image: String,
    pub created: String,
    pub state: String,
    pub status: String,
}

/// Point-in-time container state resolved via inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// Condensed image listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub repo: String,
    pub created: String,
    pub size: String,
}

/// Condensed volume listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub id: String,
    pub name: String,
    pub created: String,
    pub mount_point: String,
}

/// Condensed network listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
    pub created: String,
    pub ports: Vec<String>,
}

/// Filter for container listings.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
    /// Restrict to these ids (empty means no restriction).
    pub ids: Vec<String>,
    /// Restrict to a name.
    pub name: Option<String>,
    /// Include non-running containers.
    pub all: bool,
    /// Restrict to these states (e.g. `exited`, `paused`).
    pub statuses: Vec<String>,
}

impl ContainerFilter {
    /// Filter matching a single container id across all states.
    #[must_use]
    pub fn by_id<S: Into<String>>(id: S) -> Self {
        Self {
            ids: vec![id.into()],
            all: true,
            ..Self::default()
        }
    }
}

/// Creation request for a new container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default)]
    pub stderr: bool,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub auto_remove: bool,
}

/// Exec request against a running container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecSpec {
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default)]
    pub stderr: bool,
    #[serde(default)]
    pub detach: bool,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl ExecSpec {
    /// Whether the exec instance keeps a duplex stream attached.
    ///
    /// Only interactive terminals (tty + stdin) hold the stream open.
    #[must_use]
    pub const fn keep_alive(&self) -> bool {
        self.tty && self.stdin
    }
}

/// Options for a container log fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct LogOptions {
    #[serde(default = "default_true")]
    pub stdout: bool,
    #[serde(default = "default_true")]
    pub stderr: bool,
    #[serde(default)]
    pub follow: bool,
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default)]
    pub tail: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            tail: None,
            since: None,
            until: None,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Process listing (`top`) result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessList {
    pub titles: Vec<String>,
    pub processes: Vec<Vec<String>>,
}

/// A single filesystem change reported by a container diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsChange {
    /// 0 = modified, 1 = added, 2 = deleted.
    pub kind: u8,
    pub path: String,
}

/// Engine identity returned by a successful ping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub api_version: String,
    pub os_type: String,
}
