use std::time::Duration;

use koda_signal_client::{ClientConfig, SignalClient};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = std::env::var("SIGNAL_SERVER").unwrap_or_else(|_| "localhost:8080".to_string());
    let login = std::env::var("SIGNAL_LOGIN").expect("SIGNAL_LOGIN must be set");
    let session_timeout = std::env::var("SIGNAL_SESSION_TIMEOUT_SECS")
        .ok()
        .map(|secs| secs.parse::<u64>().expect("SIGNAL_SESSION_TIMEOUT_SECS must be a number"))
        .map(Duration::from_secs);

    let client = SignalClient::new(ClientConfig::default().with_session_timeout(session_timeout));
    if let Err(e) = client.connect(&server, &login).await {
        error!("Failed to connect to {}: {}", server, e);
        return;
    }

    // Print every signal routed to us until ctrl-c or the server goes away
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            signal = client.wait_signal() => match signal {
                Ok(signal) => info!(kind = %signal.signal, peer = %signal.peer, data = %signal.data, "signal received"),
                Err(e) => {
                    error!("Signal channel failed: {}", e);
                    break;
                }
            },
        }
    }

    client.close().await;
}
