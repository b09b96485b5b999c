//! In-memory profile storage.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use uuid::Uuid;

use super::{ConnectionProfile, NewProfile, ProfileStore, StoreError};

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, ConnectionProfile>>,
}

impl MemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn save(&self, profile: NewProfile) -> Result<ConnectionProfile, StoreError> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        if let Some(existing) = profiles.values().find(|p| p.name == profile.name) {
            return Ok(existing.clone());
        }

        let timestamp = now();
        let saved = ConnectionProfile {
            id: Uuid::new_v4().to_string(),
            name: profile.name,
            scheme: profile.scheme,
            address: profile.address,
            is_default: profile.is_default,
            created_at: timestamp,
            updated_at: timestamp,
        };
        profiles.insert(saved.id.clone(), saved.clone());
        Ok(saved)
    }

    async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>, StoreError> {
        Ok(self
            .profiles
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<ConnectionProfile>, StoreError> {
        let profiles = self
            .profiles
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut result: Vec<ConnectionProfile> = profiles.values().cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn update(&self, profile: &ConnectionProfile) -> Result<(), StoreError> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let existing = profiles
            .get_mut(&profile.id)
            .ok_or_else(|| StoreError::NotFound(profile.id.clone()))?;
        *existing = ConnectionProfile {
            updated_at: now(),
            created_at: existing.created_at,
            ..profile.clone()
        };
        Ok(())
    }

    async fn set_default(&self, id: &str) -> Result<(), StoreError> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if !profiles.contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        for profile in profiles.values_mut() {
            profile.is_default = profile.id == id;
            profile.updated_at = now();
        }
        Ok(())
    }

    async fn get_default(&self) -> Result<Option<ConnectionProfile>, StoreError> {
        Ok(self
            .profiles
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .values()
            .find(|p| p.is_default)
            .cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .profiles
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .remove(id)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> NewProfile {
        NewProfile {
            name: name.to_string(),
            scheme: "unix".to_string(),
            address: "/var/run/docker.sock".to_string(),
            is_default: false,
        }
    }

    #[tokio::test]
    async fn save_and_get() {
        let store = MemoryProfileStore::new();
        let saved = store.save(profile("dev")).await.unwrap();
        let fetched = store.get(&saved.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "dev");
        assert_eq!(fetched.endpoint(), "unix:///var/run/docker.sock");
    }

    #[tokio::test]
    async fn duplicate_name_is_a_no_op() {
        let store = MemoryProfileStore::new();
        let first = store.save(profile("dev")).await.unwrap();
        let second = store.save(profile("dev")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_default_clears_previous_default() {
        let store = MemoryProfileStore::new();
        let a = store.save(profile("a")).await.unwrap();
        let b = store.save(profile("b")).await.unwrap();

        store.set_default(&a.id).await.unwrap();
        assert_eq!(store.get_default().await.unwrap().unwrap().id, a.id);

        store.set_default(&b.id).await.unwrap();
        let default = store.get_default().await.unwrap().unwrap();
        assert_eq!(default.id, b.id);
        assert!(!store.get(&a.id).await.unwrap().unwrap().is_default);
    }

    #[tokio::test]
    async fn set_default_on_missing_profile_errors() {
        let store = MemoryProfileStore::new();
        assert!(matches!(
            store.set_default("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_preserves_created_at() {
        let store = MemoryProfileStore::new();
        let mut saved = store.save(profile("dev")).await.unwrap();
        saved.address = "/run/docker.sock".to_string();
        store.update(&saved).await.unwrap();

        let fetched = store.get(&saved.id).await.unwrap().unwrap();
        assert_eq!(fetched.address, "/run/docker.sock");
        assert_eq!(fetched.created_at, saved.created_at);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = MemoryProfileStore::new();
        let saved = store.save(profile("dev")).await.unwrap();
        assert!(store.delete(&saved.id).await.unwrap());
        assert!(!store.delete(&saved.id).await.unwrap());
        assert!(store.get(&saved.id).await.unwrap().is_none());
    }
}
