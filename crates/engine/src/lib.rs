//! Yuume Engine
//!
//! Client-side session and message reconciliation engine for the Yuume
//! chat widget: persistent session storage, optimistic sends reconciled
//! against server snapshots, a self-healing realtime channel, and the
//! idle nudge scheduler. Hosts embed it through [`ChatClient`].

pub mod api;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod locale;
pub mod nudge;
pub mod reconcile;
pub mod store;
pub mod transition;

pub use api::{ApiClient, ApiError};
pub use channel::ConnectionStatus;
pub use config::{EngineConfig, NudgeConfig};
pub use engine::{ChatClient, EngineEvent, EngineSnapshot};
pub use error::EngineError;
pub use locale::Lang;
