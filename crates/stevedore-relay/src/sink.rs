//! Delivery contract between the relay and the connection fabric.

use std::fmt;

use stevedore_core::GLOBAL_LISTENER_KEY;
use thiserror::Error;

/// Wire-level event name dispatched to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    Started,
    Stopped,
    Killed,
    Restarted,
    Paused,
    Unpaused,
    Renamed,
    Removed,
    Pulled,
    ApiError,
}

impl EventName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Killed => "killed",
            Self::Restarted => "restarted",
            Self::Paused => "paused",
            Self::Unpaused => "unpaused",
            Self::Renamed => "renamed",
            Self::Removed => "removed",
            Self::Pulled => "pulled",
            Self::ApiError => "apierror",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved event ready for delivery to one subscriber.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub event: EventName,
    /// Name of the entity the event refers to.
    pub container: String,
    /// Target id as presented to the subscriber; `"sub"` on the global leg.
    pub target: String,
    pub state: Option<String>,
    pub status: Option<String>,
}

impl OutboundEvent {
    #[must_use]
    pub fn new<C: Into<String>, T: Into<String>>(event: EventName, container: C, target: T) -> Self {
        Self {
            event,
            container: container.into(),
            target: target.into(),
            state: None,
            status: None,
        }
    }

    /// The mirrored copy delivered to the global listener: same event name,
    /// target replaced by the reserved key, state detail omitted.
    #[must_use]
    pub fn for_global(&self) -> Self {
        Self {
            event: self.event,
            container: self.container.clone(),
            target: GLOBAL_LISTENER_KEY.to_string(),
            state: None,
            status: None,
        }
    }

    /// Out-of-band engine failure notification for the global listener.
    #[must_use]
    pub fn api_error<M: Into<String>>(message: M) -> Self {
        Self {
            event: EventName::ApiError,
            container: message.into(),
            target: GLOBAL_LISTENER_KEY.to_string(),
            state: None,
            status: Some("500".to_string()),
        }
    }
}

/// Delivery failure reported by a sink.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("outbound buffer full")]
    Backlogged,
}

/// Live connection handle capable of receiving events.
///
/// Implementations must not block: delivery runs on the event listener's
/// task and a slow client must never stall event processing for everyone
/// else.
pub trait EventSink: Send + Sync {
    /// Queue an event for the remote client.
    ///
    /// # Errors
    /// Returns [`DeliveryError::Closed`] when the connection is gone and
    /// [`DeliveryError::Backlogged`] when its outbound buffer is full.
    fn deliver(&self, event: &OutboundEvent) -> Result<(), DeliveryError>;

    /// Whether the underlying connection is still open.
    fn is_connected(&self) -> bool;
}
