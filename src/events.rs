use tracing::{debug, info, warn};

/// Protocol events reported by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Connecting { url: String },
    Connected { url: String },
    LoginSent { login: String },
    LoginReply { bytes: usize },
    SignalSent { kind: String, peer: String },
    MessageReceived { bytes: usize },
    ReceiveFailed { reason: String },
    Closed,
}

pub trait SignalObserver: Send + Sync {
    fn on_event(&self, event: &SignalEvent);
}

/// Default observer, forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SignalObserver for TracingObserver {
    fn on_event(&self, event: &SignalEvent) {
        match event {
            SignalEvent::Connecting { url } => info!(%url, "connecting to signal server"),
            SignalEvent::Connected { url } => info!(%url, "connected to signal server"),
            SignalEvent::LoginSent { login } => debug!(%login, "login sent"),
            SignalEvent::LoginReply { bytes } => debug!(bytes, "login reply received"),
            SignalEvent::SignalSent { kind, peer } => info!(%kind, %peer, "signal sent"),
            SignalEvent::MessageReceived { bytes } => debug!(bytes, "message received"),
            SignalEvent::ReceiveFailed { reason } => warn!(%reason, "read message error"),
            SignalEvent::Closed => info!("signal client closed"),
        }
    }
}
