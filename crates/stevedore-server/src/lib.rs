//! Management REST surface, connection-profile store and development engine.
//!
//! Provides:
//! - `create_api_router` - the REST surface over an `EngineManager`
//! - `ProfileStore` - connection-profile persistence (memory or SQLite)
//! - `LocalEngine` - deterministic in-process engine for development
//! - `AppConfig` - per-user state directory bootstrap

pub mod config;
pub mod error;
pub mod local;
pub mod routes;
pub mod store;

pub use config::AppConfig;
pub use error::ApiError;
pub use local::LocalEngine;
pub use routes::{AppState, create_api_router};
