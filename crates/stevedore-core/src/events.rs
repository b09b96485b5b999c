//! Decoded lifecycle events from the engine's out-of-band stream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Entity class an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Container,
    Image,
    Network,
    Volume,
}

impl EventKind {
    /// Decode an engine kind string. Unknown kinds are filtered at the
    /// adapter boundary.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "container" => Some(Self::Container),
            "image" => Some(Self::Image),
            "network" => Some(Self::Network),
            "volume" => Some(Self::Volume),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Image => "image",
            Self::Network => "network",
            Self::Volume => "volume",
        }
    }
}

/// Lifecycle action carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Start,
    Die,
    Kill,
    Restart,
    Pause,
    Unpause,
    Rename,
    Destroy,
    Pull,
}

impl EventAction {
    /// Decode an engine action string. Unknown actions are filtered at the
    /// adapter boundary.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "die" => Some(Self::Die),
            "kill" => Some(Self::Kill),
            "restart" => Some(Self::Restart),
            "pause" => Some(Self::Pause),
            "unpause" => Some(Self::Unpause),
            "rename" => Some(Self::Rename),
            "destroy" => Some(Self::Destroy),
            "pull" => Some(Self::Pull),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Die => "die",
            Self::Kill => "kill",
            Self::Restart => "restart",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Rename => "rename",
            Self::Destroy => "destroy",
            Self::Pull => "pull",
        }
    }
}

/// Out-of-band lifecycle notification. Immutable, consumed once.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub kind: EventKind,
    pub action: EventAction,
    /// Id of the entity the event refers to.
    pub actor_id: String,
    /// Free-form attributes attached by the engine (e.g. `name`).
    pub attributes: HashMap<String, String>,
}

impl EngineEvent {
    /// Build an event with no attributes.
    #[must_use]
    pub fn new<S: Into<String>>(kind: EventKind, action: EventAction, actor_id: S) -> Self {
        Self {
            kind,
            action,
            actor_id: actor_id.into(),
            attributes: HashMap::new(),
        }
    }

    /// Attach an attribute.
    #[must_use]
    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute by key.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_actions() {
        assert_eq!(EventAction::parse("start"), Some(EventAction::Start));
        assert_eq!(EventAction::parse("destroy"), Some(EventAction::Destroy));
        assert_eq!(EventAction::parse("exec_start"), None);
    }

    #[test]
    fn action_strings_round_trip() {
        for action in [
            EventAction::Start,
            EventAction::Die,
            EventAction::Kill,
            EventAction::Restart,
            EventAction::Pause,
            EventAction::Unpause,
            EventAction::Rename,
            EventAction::Destroy,
            EventAction::Pull,
        ] {
            assert_eq!(EventAction::parse(action.as_str()), Some(action));
        }
    }

    #[test]
    fn event_attributes() {
        let ev = EngineEvent::new(EventKind::Container, EventAction::Destroy, "abc")
            .with_attribute("name", "web");
        assert_eq!(ev.attribute("name"), Some("web"));
        assert_eq!(ev.attribute("image"), None);
    }
}
