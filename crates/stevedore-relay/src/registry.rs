//! Live registry of remote subscribers and their room membership.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock, Weak},
};

use stevedore_core::{GLOBAL_LISTENER_KEY, RoomKey, RoomKeyError};

use crate::sink::EventSink;

struct Entry {
    connection_id: String,
    room: Option<RoomKey>,
    sink: Weak<dyn EventSink>,
}

#[derive(Default)]
struct Inner {
    subscribers: HashMap<String, Entry>,
    rooms: HashMap<RoomKey, HashSet<String>>,
}

/// Subscriber table keyed by client-supplied subscriber key.
///
/// The registry holds weak references only: connection lifetime belongs to
/// the transport layer. An entry whose connection has gone away resolves to
/// not-found, never to a dangling send.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `key`. Last write wins; duplicate
    /// subscriptions from the same logical client collapse to one entry.
    ///
    /// Returns the room the key joined, or `None` for the global listener.
    ///
    /// # Errors
    /// Returns [`RoomKeyError::IdTooShort`] for target ids too short to
    /// derive a room from.
    pub fn subscribe(
        &self,
        key: &str,
        connection_id: &str,
        sink: &Arc<dyn EventSink>,
    ) -> Result<Option<RoomKey>, RoomKeyError> {
        let room = if key == GLOBAL_LISTENER_KEY {
            None
        } else {
            Some(RoomKey::derive(key)?)
        };

        let mut inner = self.inner.write().unwrap();
        Self::remove_entry(&mut inner, key);
        if let Some(room) = &room {
            inner
                .rooms
                .entry(room.clone())
                .or_default()
                .insert(key.to_string());
        }
        inner.subscribers.insert(
            key.to_string(),
            Entry {
                connection_id: connection_id.to_string(),
                room: room.clone(),
                sink: Arc::downgrade(sink),
            },
        );
        Ok(room)
    }

    /// Resolve the live sink for `key`.
    ///
    /// "Key absent" and "key present but connection gone" both resolve to
    /// `None`; delivery code never distinguishes them.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Arc<dyn EventSink>> {
        let inner = self.inner.read().unwrap();
        inner
            .subscribers
            .get(key)
            .and_then(|entry| entry.sink.upgrade())
            .filter(|sink| sink.is_connected())
    }

    /// Remove the entry for `key`. No further events reach it.
    pub fn unsubscribe(&self, key: &str) {
        let mut inner = self.inner.write().unwrap();
        Self::remove_entry(&mut inner, key);
    }

    /// Remove every key bound to `connection_id` (transport disconnect path).
    pub fn unsubscribe_connection(&self, connection_id: &str) {
        let mut inner = self.inner.write().unwrap();
        let keys: Vec<String> = inner
            .subscribers
            .iter()
            .filter(|(_, entry)| entry.connection_id == connection_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            Self::remove_entry(&mut inner, &key);
        }
    }

    /// All live sinks subscribed to `room`. Stale entries are pruned as they
    /// are encountered.
    #[must_use]
    pub fn room_members(&self, room: &RoomKey) -> Vec<Arc<dyn EventSink>> {
        let mut stale = Vec::new();
        let members = {
            let inner = self.inner.read().unwrap();
            let Some(keys) = inner.rooms.get(room) else {
                return Vec::new();
            };
            let mut members = Vec::with_capacity(keys.len());
            for key in keys {
                match inner
                    .subscribers
                    .get(key)
                    .and_then(|entry| entry.sink.upgrade())
                    .filter(|sink| sink.is_connected())
                {
                    Some(sink) => members.push(sink),
                    None => stale.push(key.clone()),
                }
            }
            members
        };
        if !stale.is_empty() {
            let mut inner = self.inner.write().unwrap();
            for key in stale {
                Self::remove_entry(&mut inner, &key);
            }
        }
        members
    }

    /// Number of registered subscriber keys, live or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_entry(inner: &mut Inner, key: &str) {
        if let Some(entry) = inner.subscribers.remove(key) {
            if let Some(room) = entry.room {
                if let Some(keys) = inner.rooms.get_mut(&room) {
                    keys.remove(key);
                    if keys.is_empty() {
                        inner.rooms.remove(&room);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::sink::{DeliveryError, OutboundEvent};

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<OutboundEvent>>,
    }

    impl EventSink for RecordingSink {
        fn deliver(&self, event: &OutboundEvent) -> Result<(), DeliveryError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn sink() -> Arc<dyn EventSink> {
        Arc::new(RecordingSink::default())
    }

    #[test]
    fn lookup_finds_only_live_subscriptions() {
        let registry = SubscriptionRegistry::new();
        let s = sink();

        assert!(registry.lookup("aaaabbbbcccc").is_none());
        registry.subscribe("aaaabbbbcccc", "conn-1", &s).unwrap();
        assert!(registry.lookup("aaaabbbbcccc").is_some());

        registry.unsubscribe("aaaabbbbcccc");
        assert!(registry.lookup("aaaabbbbcccc").is_none());
    }

    #[test]
    fn dropped_connection_resolves_to_not_found() {
        let registry = SubscriptionRegistry::new();
        let s = sink();
        registry.subscribe("aaaabbbbcccc", "conn-1", &s).unwrap();

        drop(s);
        // Entry still exists but must never resolve to a dangling send.
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("aaaabbbbcccc").is_none());
    }

    #[test]
    fn resubscribe_is_last_write_wins() {
        let registry = SubscriptionRegistry::new();
        let first = sink();
        let second = sink();

        registry.subscribe("aaaabbbbcccc", "conn-1", &first).unwrap();
        registry.subscribe("aaaabbbbcccc", "conn-2", &second).unwrap();
        assert_eq!(registry.len(), 1);

        // The replacing connection owns the key now.
        registry.unsubscribe_connection("conn-1");
        assert!(registry.lookup("aaaabbbbcccc").is_some());
        registry.unsubscribe_connection("conn-2");
        assert!(registry.lookup("aaaabbbbcccc").is_none());
    }

    #[test]
    fn global_listener_has_no_room() {
        let registry = SubscriptionRegistry::new();
        let s = sink();
        let room = registry.subscribe(GLOBAL_LISTENER_KEY, "conn-1", &s).unwrap();
        assert!(room.is_none());
    }

    #[test]
    fn short_keys_are_rejected() {
        let registry = SubscriptionRegistry::new();
        let s = sink();
        assert!(registry.subscribe("abc", "conn-1", &s).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn rooms_group_subscribers_by_truncated_id() {
        let registry = SubscriptionRegistry::new();
        let a = sink();
        let b = sink();
        let other = sink();

        registry.subscribe("abcdef1234567", "conn-a", &a).unwrap();
        registry.subscribe("abcdef12", "conn-b", &b).unwrap();
        registry.subscribe("ffffeeee0000", "conn-c", &other).unwrap();

        let room = RoomKey::derive("abcdef1234567").unwrap();
        assert_eq!(registry.room_members(&room).len(), 2);

        let other_room = RoomKey::derive("ffffeeee0000").unwrap();
        assert_eq!(registry.room_members(&other_room).len(), 1);
    }

    #[test]
    fn room_members_prunes_stale_entries() {
        let registry = SubscriptionRegistry::new();
        let a = sink();
        registry.subscribe("abcdef1234567", "conn-a", &a).unwrap();
        drop(a);

        let room = RoomKey::derive("abcdef12").unwrap();
        assert!(registry.room_members(&room).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn disconnect_removes_every_key_of_the_connection() {
        let registry = SubscriptionRegistry::new();
        let s = sink();
        registry.subscribe("aaaa11112222", "conn-1", &s).unwrap();
        registry.subscribe("bbbb33334444", "conn-1", &s).unwrap();
        registry.subscribe(GLOBAL_LISTENER_KEY, "conn-1", &s).unwrap();

        registry.unsubscribe_connection("conn-1");
        assert!(registry.is_empty());
    }
}
