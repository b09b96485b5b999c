//! Single consumer of the engine's out-of-band event stream.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use stevedore_core::{
    EngineClient, EngineError, EngineEvent, EventAction, EventKind,
    engine::{EventFilter, EventStream},
    types::ContainerFilter,
};

use crate::router::BroadcastRouter;
use crate::sink::{EventName, OutboundEvent};

/// Bounded retry policy for re-opening the engine event stream.
///
/// A closed stream is not a silent permanent stop: the listener retries with
/// exponential backoff and only reaches its terminal state once the policy
/// is exhausted.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive failed connections tolerated before giving up.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Long-lived consumer task: decodes each engine event, re-resolves entity
/// state and hands the result to the broadcast router.
pub struct EventListener<E> {
    engine: Arc<E>,
    router: BroadcastRouter,
    policy: ReconnectPolicy,
}

impl<E> EventListener<E>
where
    E: EngineClient + 'static,
{
    #[must_use]
    pub fn new(engine: Arc<E>, router: BroadcastRouter) -> Self {
        Self {
            engine,
            router,
            policy: ReconnectPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Consume the event stream until the reconnect policy is exhausted.
    ///
    /// Spawn with `tokio::spawn(listener.run())`; the future completing is
    /// the listener's terminal state.
    pub async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            match self.connect().await {
                Ok(mut stream) => {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(event) => {
                                attempt = 0;
                                self.dispatch(event).await;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "event stream error");
                                break;
                            }
                        }
                    }
                    tracing::warn!("engine event stream closed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to open engine event stream");
                    self.router
                        .notify_global(&OutboundEvent::api_error(e.to_string()));
                }
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                tracing::error!(
                    attempts = attempt - 1,
                    "event listener stopped: reconnect attempts exhausted"
                );
                return;
            }
            let delay = self.policy.backoff(attempt);
            tracing::info!(attempt, ?delay, "reconnecting to engine event stream");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect(&self) -> Result<EventStream, EngineError> {
        let info = self.engine.ping().await?;
        tracing::info!(api_version = %info.api_version, os = %info.os_type, "engine reachable");
        self.engine.events(EventFilter::default()).await
    }

    /// Single dispatch point for every decoded event.
    async fn dispatch(&self, event: EngineEvent) {
        tracing::debug!(
            kind = event.kind.as_str(),
            action = event.action.as_str(),
            id = %event.actor_id,
            "engine event"
        );
        match event.kind {
            EventKind::Container => self.dispatch_container(&event).await,
            EventKind::Image => {
                if event.action == EventAction::Pull {
                    let repo = event.attribute("name").unwrap_or(&event.actor_id);
                    self.router.notify_global(&OutboundEvent::new(
                        EventName::Pulled,
                        repo,
                        stevedore_core::GLOBAL_LISTENER_KEY,
                    ));
                }
            }
            EventKind::Network | EventKind::Volume => {
                tracing::debug!(kind = event.kind.as_str(), "no dispatch for event kind");
            }
        }
    }

    async fn dispatch_container(&self, event: &EngineEvent) {
        let id = event.actor_id.as_str();

        if event.action == EventAction::Destroy {
            // No post-hoc inspect is possible, the entity is gone; the
            // event's own attributes carry what the clients get.
            let name = event.attribute("name").unwrap_or(id).to_string();
            self.router
                .publish(id, &OutboundEvent::new(EventName::Removed, name, id));
            return;
        }

        let Some(event_name) = lifecycle_event_name(event.action) else {
            tracing::debug!(action = event.action.as_str(), "ignoring container action");
            return;
        };

        // The event carries only an id; clients get freshly resolved state.
        let state = match self.engine.container_inspect(id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(id, error = %e, "dropping event: state resolution failed");
                return;
            }
        };
        let summary = match self.engine.container_list(ContainerFilter::by_id(id)).await {
            Ok(mut list) if !list.is_empty() => Some(list.remove(0)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(id, error = %e, "summary lookup failed, using inspect data");
                None
            }
        };

        let mut out = OutboundEvent::new(event_name, state.name.clone(), id);
        out.status = Some(
            summary
                .as_ref()
                .map_or_else(|| state.status.clone(), |s| s.status.clone()),
        );
        out.state = summary.map(|s| s.state);
        self.router.publish(id, &out);
    }
}

const fn lifecycle_event_name(action: EventAction) -> Option<EventName> {
    match action {
        EventAction::Start => Some(EventName::Started),
        EventAction::Die => Some(EventName::Stopped),
        EventAction::Kill => Some(EventName::Killed),
        EventAction::Restart => Some(EventName::Restarted),
        EventAction::Pause => Some(EventName::Paused),
        EventAction::Unpause => Some(EventName::Unpaused),
        EventAction::Rename => Some(EventName::Renamed),
        EventAction::Destroy | EventAction::Pull => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(4));
        assert_eq!(policy.backoff(8), Duration::from_secs(4));
    }

    #[test]
    fn lifecycle_names_cover_state_transitions() {
        assert_eq!(
            lifecycle_event_name(EventAction::Start),
            Some(EventName::Started)
        );
        assert_eq!(
            lifecycle_event_name(EventAction::Die),
            Some(EventName::Stopped)
        );
        assert_eq!(lifecycle_event_name(EventAction::Destroy), None);
    }
}
