use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type Result<T> = std::result::Result<T, SignalError>;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid signal server address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to dial signal server: {0}")]
    Dial(#[source] tungstenite::Error),

    #[error("signal server did not answer within {0:?}")]
    DialTimeout(Duration),

    #[error("failed to encode signal: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode inbound signal: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to send message: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("failed to receive message: {0}")]
    Receive(String),

    #[error("session deadline exceeded")]
    DeadlineExceeded,

    #[error("signal client is closed")]
    Closed,

    #[error("signal client is not connected")]
    NotConnected,

    #[error("signal client is already connected")]
    AlreadyConnected,
}
