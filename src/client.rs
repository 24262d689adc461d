//! Signal server client.
//!
//! One [`SignalClient`] owns one WebSocket connection. A background reader
//! task drains the socket: frames answering a correlated offer are handed to
//! the waiting `write_offer` call, everything else is queued in arrival order
//! and consumed by the next `wait_*` (or uncorrelated `write_offer`) call.
//!
//! The queue holds at most [`INBOUND_CAPACITY`] frames. Once it is full the
//! reader stops draining the socket, so a server pushing to a client that never
//! waits is held back by TCP flow control. A correlated answer arriving behind
//! a full queue is only delivered after the caller consumes queued frames.

use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{Result, SignalError};
use crate::events::{SignalEvent, SignalObserver, TracingObserver};
use crate::protocol::{SignalKind, SignalMessage, correlation_id, encode_login, encode_signal};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<DashMap<String, oneshot::Sender<Vec<u8>>>>;

const CLOSE_REASON: &str = "done";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Connecting,
    Connected,
    Closed,
}

enum Phase {
    Unconnected,
    Connecting(Arc<watch::Sender<bool>>),
    Connected(Arc<Session>),
    Closed,
}

enum Inbound {
    Message(Vec<u8>),
    Failed(String),
}

pub struct SignalClient {
    config: ClientConfig,
    observer: Arc<dyn SignalObserver>,
    phase: Mutex<Phase>,
}

impl Default for SignalClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl SignalClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            observer: Arc::new(TracingObserver),
            phase: Mutex::new(Phase::Unconnected),
        }
    }

    /// Replaces the default `tracing` observer.
    pub fn with_observer(mut self, observer: Arc<dyn SignalObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn state(&self) -> ClientState {
        match &*self.phase.lock().await {
            Phase::Unconnected => ClientState::Unconnected,
            Phase::Connecting(_) => ClientState::Connecting,
            Phase::Connected(_) => ClientState::Connected,
            Phase::Closed => ClientState::Closed,
        }
    }

    /// Dials `ws://<address><path>`, sends the login signal and, unless
    /// disabled, waits for the server's first message. The whole step is
    /// bounded by `connect_timeout`. On failure the client stays unconnected.
    pub async fn connect(&self, address: &str, login: &str) -> Result<()> {
        let url = self.config.server_url(address)?;
        let shutdown = Arc::new(watch::channel(false).0);

        {
            let mut phase = self.phase.lock().await;
            match &*phase {
                Phase::Unconnected => *phase = Phase::Connecting(shutdown.clone()),
                Phase::Connecting(_) | Phase::Connected(_) => {
                    return Err(SignalError::AlreadyConnected);
                }
                Phase::Closed => return Err(SignalError::Closed),
            }
        }

        let established = self.establish(&url, login, shutdown).await;

        let mut phase = self.phase.lock().await;
        let still_ours = matches!(*phase, Phase::Connecting(_));
        match established {
            Ok(session) if still_ours => {
                *phase = Phase::Connected(session);
                drop(phase);
                self.observer.on_event(&SignalEvent::Connected {
                    url: url.to_string(),
                });
                Ok(())
            }
            Ok(session) => {
                // closed while connecting
                drop(phase);
                session.shutdown().await;
                Err(SignalError::Closed)
            }
            Err(err) => {
                if still_ours {
                    *phase = Phase::Unconnected;
                }
                Err(err)
            }
        }
    }

    async fn establish(
        &self,
        url: &Url,
        login: &str,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Result<Arc<Session>> {
        self.observer.on_event(&SignalEvent::Connecting {
            url: url.to_string(),
        });

        let timeout = self.config.connect_timeout;
        let connect_deadline = Instant::now() + timeout;

        let dialed = tokio::select! {
            biased;
            _ = cancelled(&shutdown) => return Err(SignalError::Closed),
            dialed = time::timeout_at(connect_deadline, connect_async(url.as_str())) => dialed,
        };
        let (socket, _) = dialed
            .map_err(|_| SignalError::DialTimeout(timeout))?
            .map_err(SignalError::Dial)?;

        let (sink, stream) = socket.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let pending: PendingMap = Arc::new(DashMap::new());
        let reader_done = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            stream,
            inbound_tx,
            pending.clone(),
            reader_done.clone(),
            shutdown.subscribe(),
        ));

        let session = Arc::new(Session {
            sink: Mutex::new(sink),
            inbound: Mutex::new(inbound_rx),
            pending,
            reader_done,
            shutdown,
            deadline: self.config.session_timeout.map(|t| Instant::now() + t),
            reader,
            observer: self.observer.clone(),
        });

        match self.login(&session, login, connect_deadline).await {
            Ok(()) => Ok(session),
            Err(err) => {
                session.shutdown().await;
                Err(match err {
                    SignalError::DeadlineExceeded => SignalError::DialTimeout(timeout),
                    other => other,
                })
            }
        }
    }

    async fn login(&self, session: &Session, login: &str, deadline: Instant) -> Result<()> {
        let text = encode_login(login)?;
        session.send_text(text, Some(deadline)).await?;
        self.observer.on_event(&SignalEvent::LoginSent {
            login: login.to_string(),
        });

        if self.config.await_login_reply {
            // Only proves the channel is live, the content is dropped
            let reply = session.next_message(Some(deadline)).await?;
            self.observer
                .on_event(&SignalEvent::LoginReply { bytes: reply.len() });
        }
        Ok(())
    }

    /// Sends a normal closure and releases the connection. Pending waits
    /// return [`SignalError::Closed`]. Safe to call in any state.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock().await, Phase::Closed);
        match previous {
            Phase::Connected(session) => {
                session.shutdown().await;
                self.observer.on_event(&SignalEvent::Closed);
            }
            Phase::Connecting(shutdown) => {
                shutdown.send_replace(true);
                self.observer.on_event(&SignalEvent::Closed);
            }
            Phase::Unconnected => self.observer.on_event(&SignalEvent::Closed),
            Phase::Closed => {}
        }
    }

    async fn session(&self) -> Result<Arc<Session>> {
        match &*self.phase.lock().await {
            Phase::Connected(session) => Ok(session.clone()),
            Phase::Unconnected | Phase::Connecting(_) => Err(SignalError::NotConnected),
            Phase::Closed => Err(SignalError::Closed),
        }
    }

    /// Waits for the next inbound message and returns its raw bytes.
    async fn wait_answer(&self) -> Result<Vec<u8>> {
        let session = self.session().await?;
        session.next_message(session.deadline).await
    }

    /// Waits for the next inbound signal of any kind.
    pub async fn wait_signal(&self) -> Result<SignalMessage> {
        let raw = self.wait_answer().await?;
        SignalMessage::decode(&raw)
    }

    /// Waits for the next inbound signal. The kind is not checked.
    pub async fn wait_offer(&self) -> Result<SignalMessage> {
        self.wait_signal().await
    }

    /// Waits for the next inbound signal. The kind is not checked.
    pub async fn wait_candidate(&self) -> Result<SignalMessage> {
        self.wait_signal().await
    }

    /// Sends an offer to `peer` and returns the raw bytes of its answer.
    ///
    /// Without offer correlation the answer is simply the next inbound
    /// message, so callers must not interleave other waits.
    pub async fn write_offer(&self, peer: &str, offer: &[u8]) -> Result<Vec<u8>> {
        let session = self.session().await?;

        if !self.config.correlate_offers {
            session
                .write_signal(SignalKind::Offer, peer, offer, None)
                .await?;
            return session.next_message(session.deadline).await;
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        session.pending.insert(id.clone(), tx);
        // the reader flags itself before dropping pending waiters
        if session.reader_done.load(Ordering::SeqCst) {
            session.pending.remove(&id);
            return Err(SignalError::Receive("connection closed".to_string()));
        }

        let answer = match session
            .write_signal(SignalKind::Offer, peer, offer, Some(&id))
            .await
        {
            Ok(()) => session.correlated_answer(rx).await,
            Err(err) => Err(err),
        };
        session.pending.remove(&id);
        answer
    }

    pub async fn write_answer(&self, peer: &str, answer: &[u8]) -> Result<()> {
        let session = self.session().await?;
        session
            .write_signal(SignalKind::Answer, peer, answer, None)
            .await
    }

    /// Sends one ICE candidate. Every call produces its own frame.
    pub async fn write_candidate(&self, peer: &str, candidate: &[u8]) -> Result<()> {
        let session = self.session().await?;
        session
            .write_signal(SignalKind::Candidate, peer, candidate, None)
            .await
    }
}

impl Drop for SignalClient {
    fn drop(&mut self) {
        match self.phase.get_mut() {
            Phase::Connected(session) => {
                session.shutdown.send_replace(true);
                session.reader.abort();
            }
            Phase::Connecting(shutdown) => {
                shutdown.send_replace(true);
            }
            Phase::Unconnected | Phase::Closed => {}
        }
    }
}

struct Session {
    sink: Mutex<SplitSink<WsStream, Message>>,
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    pending: PendingMap,
    reader_done: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
    reader: JoinHandle<()>,
    observer: Arc<dyn SignalObserver>,
}

impl Session {
    async fn send_text(&self, text: String, deadline: Option<Instant>) -> Result<()> {
        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(text))
                .await
                .map_err(SignalError::Send)
        };

        tokio::select! {
            biased;
            _ = cancelled(&self.shutdown) => Err(SignalError::Closed),
            _ = expired(deadline) => Err(SignalError::DeadlineExceeded),
            sent = send => sent,
        }
    }

    async fn write_signal(
        &self,
        kind: SignalKind,
        peer: &str,
        payload: &[u8],
        id: Option<&str>,
    ) -> Result<()> {
        let text = encode_signal(kind.clone(), peer, payload, id)?;
        self.send_text(text, self.deadline).await?;
        self.observer.on_event(&SignalEvent::SignalSent {
            kind: kind.as_str().to_string(),
            peer: peer.to_string(),
        });
        Ok(())
    }

    async fn next_message(&self, deadline: Option<Instant>) -> Result<Vec<u8>> {
        let recv = async {
            let mut inbound = self.inbound.lock().await;
            match inbound.recv().await {
                Some(Inbound::Message(raw)) => Ok(raw),
                Some(Inbound::Failed(reason)) => Err(SignalError::Receive(reason)),
                None => Err(SignalError::Receive("connection closed".to_string())),
            }
        };

        let received = tokio::select! {
            biased;
            _ = cancelled(&self.shutdown) => Err(SignalError::Closed),
            _ = expired(deadline) => Err(SignalError::DeadlineExceeded),
            received = recv => received,
        };
        self.report(&received);
        received
    }

    async fn correlated_answer(&self, rx: oneshot::Receiver<Vec<u8>>) -> Result<Vec<u8>> {
        let received = tokio::select! {
            biased;
            _ = cancelled(&self.shutdown) => Err(SignalError::Closed),
            _ = expired(self.deadline) => Err(SignalError::DeadlineExceeded),
            answer = rx => answer.map_err(|_| {
                SignalError::Receive("connection closed before answer".to_string())
            }),
        };
        self.report(&received);
        received
    }

    fn report(&self, received: &Result<Vec<u8>>) {
        let event = match received {
            Ok(raw) => SignalEvent::MessageReceived { bytes: raw.len() },
            Err(err) => SignalEvent::ReceiveFailed {
                reason: err.to_string(),
            },
        };
        self.observer.on_event(&event);
    }

    async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: CLOSE_REASON.into(),
        };
        let closing = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Close(Some(frame))).await
        };
        if let Ok(Err(err)) = time::timeout(CLOSE_TIMEOUT, closing).await {
            self.observer.on_event(&SignalEvent::ReceiveFailed {
                reason: format!("close: {err}"),
            });
        }
        self.reader.abort();
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    inbound: mpsc::Sender<Inbound>,
    pending: PendingMap,
    done: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let closed_early = *shutdown.borrow_and_update();
    if !closed_early {
        pump(&mut stream, &inbound, &pending, &mut shutdown).await;
    }

    done.store(true, Ordering::SeqCst);
    // wakes correlated waiters
    pending.clear();
}

async fn pump(
    stream: &mut SplitStream<WsStream>,
    inbound: &mpsc::Sender<Inbound>,
    pending: &PendingMap,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            frame = stream.next() => frame,
        };

        let raw = match frame {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(frame))) => {
                let reason = match frame {
                    Some(frame) => format!("closed by server: {} {}", frame.code, frame.reason),
                    None => "closed by server".to_string(),
                };
                let _ = inbound.send(Inbound::Failed(reason)).await;
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                let _ = inbound.send(Inbound::Failed(err.to_string())).await;
                break;
            }
            None => {
                let _ = inbound
                    .send(Inbound::Failed("connection closed".to_string()))
                    .await;
                break;
            }
        };

        if let Some(id) = correlation_id(&raw) {
            if let Some((_, waiter)) = pending.remove(&id) {
                let _ = waiter.send(raw);
                continue;
            }
        }
        if inbound.send(Inbound::Message(raw)).await.is_err() {
            break;
        }
    }
}

async fn cancelled(shutdown: &watch::Sender<bool>) {
    let mut rx = shutdown.subscribe();
    loop {
        let closed = *rx.borrow_and_update();
        if closed || rx.changed().await.is_err() {
            return;
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => pending::<()>().await,
    }
}
