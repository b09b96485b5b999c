//! SQLite profile storage (feature-gated).

use std::{
    path::Path,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use sqlx::{
    Pool, Row, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use uuid::Uuid;

use super::{ConnectionProfile, NewProfile, ProfileStore, StoreError};

const MIGRATION: &str = "CREATE TABLE IF NOT EXISTS connection_profiles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    scheme TEXT NOT NULL,
    address TEXT NOT NULL,
    is_default INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)";

/// SQLite storage implementation backed by a connection pool.
///
/// Opens in WAL mode with a busy timeout, creating the database file and
/// schema on first use.
pub struct SqliteProfileStore {
    pool: Pool<Sqlite>,
}

impl SqliteProfileStore {
    /// Open or create the profile database at `path`.
    ///
    /// # Errors
    /// Returns [`StoreError::Internal`] when the pool or migration fails.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
                .map_err(|e| StoreError::Internal(e.to_string()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "profile database opened");
        Ok(store)
    }

    /// Open an in-memory database (tests).
    ///
    /// # Errors
    /// Returns [`StoreError::Internal`] when the pool or migration fails.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn row_to_profile(row: &SqliteRow) -> ConnectionProfile {
    ConnectionProfile {
        id: row.get("id"),
        name: row.get("name"),
        scheme: row.get("scheme"),
        address: row.get("address"),
        is_default: row.get::<i64, _>("is_default") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn internal(e: sqlx::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn save(&self, profile: NewProfile) -> Result<ConnectionProfile, StoreError> {
        let timestamp = now();
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO connection_profiles (id, name, scheme, address, is_default, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&id)
        .bind(&profile.name)
        .bind(&profile.scheme)
        .bind(&profile.address)
        .bind(i64::from(profile.is_default))
        .bind(timestamp)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        // Conflict-as-no-op: return whatever now holds the name.
        sqlx::query("SELECT * FROM connection_profiles WHERE name = ?")
            .bind(&profile.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .map(|row| row_to_profile(&row))
            .ok_or_else(|| StoreError::Internal("insert did not persist".to_string()))
    }

    async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>, StoreError> {
        Ok(sqlx::query("SELECT * FROM connection_profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .map(|row| row_to_profile(&row)))
    }

    async fn list(&self) -> Result<Vec<ConnectionProfile>, StoreError> {
        Ok(
            sqlx::query("SELECT * FROM connection_profiles ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?
                .iter()
                .map(row_to_profile)
                .collect(),
        )
    }

    async fn update(&self, profile: &ConnectionProfile) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE connection_profiles
             SET name = ?, scheme = ?, address = ?, is_default = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&profile.name)
        .bind(&profile.scheme)
        .bind(&profile.address)
        .bind(i64::from(profile.is_default))
        .bind(now())
        .bind(&profile.id)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(profile.id.clone()));
        }
        Ok(())
    }

    async fn set_default(&self, id: &str) -> Result<(), StoreError> {
        let timestamp = now();
        let result = sqlx::query(
            "UPDATE connection_profiles SET is_default = (id = ?), updated_at = ?",
        )
        .bind(id)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        // The blanket update touches every row; verify the target existed.
        if self.get(id).await?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get_default(&self) -> Result<Option<ConnectionProfile>, StoreError> {
        Ok(
            sqlx::query("SELECT * FROM connection_profiles WHERE is_default = 1 LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .map(|row| row_to_profile(&row)),
        )
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM connection_profiles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> NewProfile {
        NewProfile {
            name: name.to_string(),
            scheme: "tcp".to_string(),
            address: "127.0.0.1:2375".to_string(),
            is_default: false,
        }
    }

    #[tokio::test]
    async fn save_list_and_delete() {
        let store = SqliteProfileStore::open_in_memory().await.unwrap();
        let saved = store.save(profile("dev")).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.delete(&saved.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conflicting_name_returns_existing_row() {
        let store = SqliteProfileStore::open_in_memory().await.unwrap();
        let first = store.save(profile("dev")).await.unwrap();
        let second = store.save(profile("dev")).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn default_flag_moves_between_rows() {
        let store = SqliteProfileStore::open_in_memory().await.unwrap();
        let a = store.save(profile("a")).await.unwrap();
        let b = store.save(profile("b")).await.unwrap();

        store.set_default(&a.id).await.unwrap();
        store.set_default(&b.id).await.unwrap();

        let default = store.get_default().await.unwrap().unwrap();
        assert_eq!(default.id, b.id);
        assert!(!store.get(&a.id).await.unwrap().unwrap().is_default);
    }
}
