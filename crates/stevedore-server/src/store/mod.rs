//! Connection-profile persistence.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryProfileStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteProfileStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A saved engine endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
    #[serde(rename = "socket_type")]
    pub scheme: String,
    #[serde(rename = "socket_address")]
    pub address: String,
    pub is_default: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ConnectionProfile {
    /// Full endpoint string, `scheme://address`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}

/// Creation payload for a profile.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProfile {
    pub name: String,
    #[serde(rename = "socket_type")]
    pub scheme: String,
    #[serde(rename = "socket_address")]
    pub address: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Internal(String),
}

/// Trait for connection-profile storage backends.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Insert a new profile. A conflicting name is a no-op returning the
    /// existing profile.
    async fn save(&self, profile: NewProfile) -> Result<ConnectionProfile, StoreError>;

    /// Get a profile by id.
    async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>, StoreError>;

    /// List all profiles, oldest first.
    async fn list(&self) -> Result<Vec<ConnectionProfile>, StoreError>;

    /// Replace an existing profile's fields.
    async fn update(&self, profile: &ConnectionProfile) -> Result<(), StoreError>;

    /// Mark one profile as default, clearing the previous default.
    async fn set_default(&self, id: &str) -> Result<(), StoreError>;

    /// The current default profile, if any.
    async fn get_default(&self) -> Result<Option<ConnectionProfile>, StoreError>;

    /// Delete a profile. Returns whether one existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Seed the `default` profile from an endpoint string, first-or-create.
///
/// # Errors
/// Propagates store failures.
pub async fn seed_default(
    store: &dyn ProfileStore,
    endpoint: &str,
) -> Result<ConnectionProfile, StoreError> {
    if let Some(existing) = store
        .list()
        .await?
        .into_iter()
        .find(|p| p.name == "default")
    {
        return Ok(existing);
    }
    let (scheme, address) = split_endpoint(endpoint);
    store
        .save(NewProfile {
            name: "default".to_string(),
            scheme,
            address,
            is_default: true,
        })
        .await
}

fn split_endpoint(endpoint: &str) -> (String, String) {
    endpoint.split_once("://").map_or_else(
        || ("unix".to_string(), endpoint.to_string()),
        |(scheme, address)| (scheme.to_string(), address.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_splitting() {
        assert_eq!(
            split_endpoint("unix:///var/run/docker.sock"),
            ("unix".to_string(), "/var/run/docker.sock".to_string())
        );
        assert_eq!(
            split_endpoint("tcp://127.0.0.1:2375"),
            ("tcp".to_string(), "127.0.0.1:2375".to_string())
        );
        // Bare paths default to a unix socket.
        assert_eq!(
            split_endpoint("/var/run/docker.sock"),
            ("unix".to_string(), "/var/run/docker.sock".to_string())
        );
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = MemoryProfileStore::new();
        let first = seed_default(&store, "unix:///var/run/docker.sock")
            .await
            .unwrap();
        let second = seed_default(&store, "tcp://ignored:1234").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.endpoint(), "unix:///var/run/docker.sock");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
