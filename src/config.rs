use std::time::Duration;

use url::Url;

use crate::error::{Result, SignalError};

pub const DEFAULT_PATH: &str = "/signal";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables for [`SignalClient`](crate::SignalClient).
///
/// `connect_timeout` bounds the dial, the login write and the optional login
/// reply. The live session has no deadline unless `session_timeout` is set, in
/// which case every read after connect fails once it has elapsed.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub path: String,
    pub connect_timeout: Duration,
    pub session_timeout: Option<Duration>,
    /// Wait for the first server push after login before `connect` returns.
    pub await_login_reply: bool,
    /// Tag each offer with a fresh id and match the answer echoing it.
    pub correlate_offers: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_timeout: None,
            await_login_reply: true,
            correlate_offers: false,
        }
    }
}

impl ClientConfig {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_await_login_reply(mut self, enabled: bool) -> Self {
        self.await_login_reply = enabled;
        self
    }

    pub fn with_correlate_offers(mut self, enabled: bool) -> Self {
        self.correlate_offers = enabled;
        self
    }

    /// Builds `ws://<address><path>` from a `host:port` address.
    pub fn server_url(&self, address: &str) -> Result<Url> {
        let invalid = |reason: String| SignalError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        let mut url =
            Url::parse(&format!("ws://{address}")).map_err(|e| invalid(e.to_string()))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }
        if url.path() != "/" || url.query().is_some() {
            return Err(invalid("expected host:port only".to_string()));
        }
        url.set_path(&self.path);
        Ok(url)
    }
}
