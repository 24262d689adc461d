//! In-process signal server used by the integration tests.

#![allow(dead_code)]

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use tokio::sync::{Mutex, mpsc};

pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

pub enum Push {
    Text(String),
    Close,
}

#[derive(Clone)]
struct MockState {
    responder: Responder,
    received: mpsc::UnboundedSender<String>,
    pushes: Arc<Mutex<Option<mpsc::UnboundedReceiver<Push>>>>,
}

pub struct MockServer {
    pub addr: String,
    received: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<Push>,
}

impl MockServer {
    /// Starts a server on an ephemeral port. `responder` is called for every
    /// text frame and returns the frames to send back.
    pub async fn start(responder: impl Fn(&str) -> Vec<String> + Send + Sync + 'static) -> Self {
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, push_rx) = mpsc::unbounded_channel();

        let state = MockState {
            responder: Arc::new(responder),
            received: received_tx,
            pushes: Arc::new(Mutex::new(Some(push_rx))),
        };

        let app = Router::new()
            .route("/signal", get(ws_handler))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            received,
            push,
        }
    }

    /// Replies to login with a welcome frame and stays silent otherwise.
    pub async fn welcoming() -> Self {
        Self::start(|text| {
            if is_kind(text, "login") {
                vec![r#"{"signal":"login","login":"ok"}"#.to_string()]
            } else {
                Vec::new()
            }
        })
        .await
    }

    pub fn push(&self, text: &str) {
        self.push.send(Push::Text(text.to_string())).unwrap();
    }

    pub fn close_connection(&self) {
        self.push.send(Push::Close).unwrap();
    }

    pub async fn next_received(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("mock server received nothing")
            .expect("mock server stopped")
    }

    pub fn try_received(&mut self) -> Option<String> {
        self.received.try_recv().ok()
    }
}

pub fn is_kind(text: &str, kind: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|value| value["signal"] == kind)
        .unwrap_or(false)
}

/// An address nothing listens on.
pub async fn dead_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<MockState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn next_push(pushes: &mut Option<mpsc::UnboundedReceiver<Push>>) -> Option<Push> {
    match pushes {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn handle_socket(mut socket: WebSocket, state: MockState) {
    let mut pushes = state.pushes.lock().await.take();

    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_owned();
                    let replies = (state.responder)(&text);
                    let _ = state.received.send(text);
                    for reply in replies {
                        if socket.send(Message::Text(reply.into())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let record = match frame {
                        Some(frame) => format!("close {} {}", frame.code, frame.reason.as_str()),
                        None => "close".to_string(),
                    };
                    let _ = state.received.send(record);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
            Some(push) = next_push(&mut pushes) => match push {
                Push::Text(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Push::Close => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "bye".into(),
                        })))
                        .await;
                    return;
                }
            },
        }
    }
}
