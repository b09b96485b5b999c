//! Core abstractions for the stevedore container-engine daemon.
//!
//! This crate provides the fundamental building blocks:
//! - `EngineClient` / `EngineManager` - capability traits over a container engine
//! - `EngineEvent` - decoded lifecycle notifications
//! - `RoomKey` - delivery-group derivation for event fan-out
//! - Shared summary and request types for the REST surface

pub mod engine;
pub mod events;
pub mod room;
pub mod types;

pub use engine::{EngineClient, EngineConnector, EngineError, EngineManager, ExecConn};
pub use events::{EngineEvent, EventAction, EventKind};
pub use room::{GLOBAL_LISTENER_KEY, RoomKey, RoomKeyError};
