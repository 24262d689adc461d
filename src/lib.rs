//! WebSocket client for the Koda signal server.
//!
//! Logs in, exchanges offer / answer / candidate signals with a remote peer and
//! hands the opaque payloads back to the caller's WebRTC stack.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;

pub use client::{ClientState, SignalClient};
pub use config::ClientConfig;
pub use error::{Result, SignalError};
pub use events::{SignalEvent, SignalObserver, TracingObserver};
pub use protocol::{LoginMessage, SignalKind, SignalMessage};
