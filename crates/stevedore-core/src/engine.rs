//! Capability traits over a container engine.
//!
//! The relay and session cores depend only on [`EngineClient`]; the REST
//! surface additionally requires [`EngineManager`]. Production deployments
//! supply an adapter for their engine; a deterministic in-process engine
//! ships with the server crate for development and tests.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::events::{EngineEvent, EventKind};
use crate::types::{
    ContainerFilter, ContainerSpec, ContainerState, ContainerSummary, EngineInfo, ExecSpec,
    FsChange, ImageSummary, LogOptions, NetworkSummary, ProcessList, VolumeSummary,
};

/// Engine call failure taxonomy.
///
/// None of these are fatal to the relay: callers log, forward a best-effort
/// notification, or surface the error to the remote client.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine endpoint cannot be reached at all.
    #[error("engine unreachable: {0}")]
    Unreachable(String),
    /// The referenced entity does not exist (or no longer exists).
    #[error("not found: {0}")]
    NotFound(String),
    /// The engine refused the request (bad spec, invalid state transition).
    #[error("rejected: {0}")]
    Rejected(String),
    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Stream of decoded lifecycle events.
pub type EventStream = BoxStream<'static, Result<EngineEvent, EngineError>>;

/// Filter narrowing which events an event stream yields.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to these entity kinds (empty means all).
    pub kinds: Vec<EventKind>,
}

/// Duplex byte stream attached to a running exec instance.
///
/// The read half interleaves stdout and stderr as length-prefixed frames
/// (see the session crate's demultiplexer); the write half carries raw
/// client input.
pub struct ExecConn {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ExecConn {
    /// Split a duplex stream into an exec connection.
    #[must_use]
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl fmt::Debug for ExecConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecConn").finish_non_exhaustive()
    }
}

/// Minimal engine capability required by the relay and session cores.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Probe the engine and return its identity.
    async fn ping(&self) -> Result<EngineInfo, EngineError>;

    /// Open the out-of-band lifecycle event stream.
    async fn events(&self, filter: EventFilter) -> Result<EventStream, EngineError>;

    /// Resolve current container state.
    async fn container_inspect(&self, id: &str) -> Result<ContainerState, EngineError>;

    /// List containers matching a filter.
    async fn container_list(
        &self,
        filter: ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError>;

    /// Create an exec instance inside a container; returns the exec id.
    async fn exec_create(&self, container_id: &str, spec: ExecSpec)
    -> Result<String, EngineError>;

    /// Start a created exec instance.
    async fn exec_start(&self, exec_id: &str, tty: bool) -> Result<(), EngineError>;

    /// Attach to a started exec instance, yielding its duplex stream.
    async fn exec_attach(&self, exec_id: &str) -> Result<ExecConn, EngineError>;
}

/// Full management surface used by the REST layer.
#[async_trait]
pub trait EngineManager: EngineClient {
    async fn container_create(&self, spec: ContainerSpec) -> Result<String, EngineError>;
    async fn container_start(&self, id: &str) -> Result<(), EngineError>;
    async fn container_stop(&self, id: &str, timeout_secs: Option<u32>)
    -> Result<(), EngineError>;
    async fn container_restart(&self, id: &str) -> Result<(), EngineError>;
    async fn container_kill(&self, id: &str, signal: &str) -> Result<(), EngineError>;
    async fn container_pause(&self, id: &str) -> Result<(), EngineError>;
    async fn container_unpause(&self, id: &str) -> Result<(), EngineError>;
    async fn container_rename(&self, id: &str, new_name: &str) -> Result<(), EngineError>;
    async fn container_remove(&self, id: &str, force: bool) -> Result<(), EngineError>;
    async fn container_logs(&self, id: &str, opts: LogOptions) -> Result<String, EngineError>;
    async fn container_processes(&self, id: &str) -> Result<ProcessList, EngineError>;
    /// One-shot stats sample, returned as the engine's raw JSON document.
    async fn container_stats(&self, id: &str) -> Result<String, EngineError>;
    async fn container_changes(&self, id: &str) -> Result<Vec<FsChange>, EngineError>;
    async fn container_export(&self, id: &str) -> Result<Vec<u8>, EngineError>;

    async fn image_list(&self) -> Result<Vec<ImageSummary>, EngineError>;
    async fn image_inspect(&self, id: &str) -> Result<serde_json::Value, EngineError>;
    async fn image_pull(&self, repo: &str, tag: Option<&str>) -> Result<String, EngineError>;

    async fn volume_list(&self) -> Result<Vec<VolumeSummary>, EngineError>;
    async fn volume_inspect(&self, id: &str) -> Result<serde_json::Value, EngineError>;

    async fn network_list(&self) -> Result<Vec<NetworkSummary>, EngineError>;
    async fn network_inspect(&self, id: &str) -> Result<serde_json::Value, EngineError>;
}

/// Probes candidate engine endpoints, used to test connection profiles.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Check whether an engine answers at `endpoint`.
    async fn probe(&self, endpoint: &str) -> Result<(), EngineError>;
}
