//! Room and global-listener fan-out.

use std::sync::Arc;

use stevedore_core::{GLOBAL_LISTENER_KEY, RoomKey};

use crate::registry::SubscriptionRegistry;
use crate::sink::{EventSink, OutboundEvent};

/// Resolves which live connections receive an event and delivers it.
///
/// Delivery is fire-and-forget: a missing subscriber is logged, not an
/// error. Per room, events are delivered in the order they are published
/// (the listener is the single publisher); no ordering holds across rooms.
#[derive(Clone)]
pub struct BroadcastRouter {
    registry: Arc<SubscriptionRegistry>,
}

impl BroadcastRouter {
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Deliver `event` to every member of the room for `target_id` and,
    /// independently, a global-scoped copy to the `"sub"` listener. The two
    /// legs are not mutually exclusive.
    pub fn publish(&self, target_id: &str, event: &OutboundEvent) {
        match RoomKey::derive(target_id) {
            Ok(room) => {
                let members = self.registry.room_members(&room);
                if members.is_empty() {
                    tracing::debug!(room = %room, event = %event.event, "no subscriber for room");
                }
                for sink in members {
                    Self::deliver(sink.as_ref(), event);
                }
            }
            Err(e) => {
                tracing::warn!(target_id, error = %e, "skipping room delivery");
            }
        }

        self.notify_global(&event.for_global());
    }

    /// Deliver an event to the global listener only.
    pub fn notify_global(&self, event: &OutboundEvent) {
        match self.registry.lookup(GLOBAL_LISTENER_KEY) {
            Some(sink) => Self::deliver(sink.as_ref(), event),
            None => {
                tracing::debug!(event = %event.event, "no global listener connected");
            }
        }
    }

    fn deliver(sink: &dyn EventSink, event: &OutboundEvent) {
        if let Err(e) = sink.deliver(event) {
            tracing::warn!(event = %event.event, target = %event.target, error = %e, "event delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::sink::{DeliveryError, EventName};

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<OutboundEvent>>,
    }

    impl RecordingSink {
        fn received(&self) -> Vec<OutboundEvent> {
            self.events.lock().unwrap().clone()
        }
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

    fn setup() -> (Arc<SubscriptionRegistry>, BroadcastRouter) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let router = BroadcastRouter::new(Arc::clone(&registry));
        (registry, router)
    }

    #[test]
    fn publish_reaches_room_and_global_listener() {
        let (registry, router) = setup();
        let room_sink = Arc::new(RecordingSink::default());
        let global_sink = Arc::new(RecordingSink::default());
        let room_dyn: Arc<dyn EventSink> = Arc::clone(&room_sink) as _;
        let global_dyn: Arc<dyn EventSink> = Arc::clone(&global_sink) as _;

        registry
            .subscribe("abcdef1234567890", "conn-room", &room_dyn)
            .unwrap();
        registry
            .subscribe(GLOBAL_LISTENER_KEY, "conn-global", &global_dyn)
            .unwrap();

        let event = OutboundEvent::new(EventName::Started, "web", "abcdef1234567890");
        router.publish("abcdef1234567890", &event);

        let room_events = room_sink.received();
        assert_eq!(room_events.len(), 1);
        assert_eq!(room_events[0].target, "abcdef1234567890");

        let global_events = global_sink.received();
        assert_eq!(global_events.len(), 1);
        assert_eq!(global_events[0].target, GLOBAL_LISTENER_KEY);
        assert_eq!(global_events[0].event, EventName::Started);
    }

    #[test]
    fn publish_does_not_leak_across_rooms() {
        let (registry, router) = setup();
        let other_sink = Arc::new(RecordingSink::default());
        let other_dyn: Arc<dyn EventSink> = Arc::clone(&other_sink) as _;
        registry
            .subscribe("ffff0000aaaa", "conn-other", &other_dyn)
            .unwrap();

        let event = OutboundEvent::new(EventName::Started, "web", "abcdef1234567890");
        router.publish("abcdef1234567890", &event);

        assert!(other_sink.received().is_empty());
    }

    #[test]
    fn short_target_still_reaches_global_listener() {
        let (registry, router) = setup();
        let global_sink = Arc::new(RecordingSink::default());
        let global_dyn: Arc<dyn EventSink> = Arc::clone(&global_sink) as _;
        registry
            .subscribe(GLOBAL_LISTENER_KEY, "conn-global", &global_dyn)
            .unwrap();

        let event = OutboundEvent::new(EventName::Removed, "web", "abc");
        router.publish("abc", &event);

        assert_eq!(global_sink.received().len(), 1);
    }

    #[test]
    fn missing_subscribers_are_not_an_error() {
        let (_registry, router) = setup();
        let event = OutboundEvent::new(EventName::Stopped, "web", "abcdef1234567890");
        // Fire-and-forget into the void.
        router.publish("abcdef1234567890", &event);
    }
}
