//! Yuume Protocol
//!
//! Shared types for communication between the Yuume chat service and its
//! clients. These types are serialized as JSON over HTTP and WebSocket.

use uuid::Uuid;

// Re-exports
pub mod api;
pub mod client;
pub mod server;
pub mod types;

pub use api::*;
pub use client::ClientEvent;
pub use server::ChannelEvent;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
