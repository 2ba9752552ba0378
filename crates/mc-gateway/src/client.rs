use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use mc_core::RequestId;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::pending::PendingRequests;
use crate::protocol::{self, Inbound, Notification};
use crate::router::{EventRouter, GatewayEvent, ListenerId};
use crate::state::ConnectionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type AttemptOutcome = Option<Result<(), GatewayError>>;

/// Handle to the gateway connection. Cheap to clone; all clones share one
/// socket, one pending table and one listener registry.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: GatewayConfig,
    conn: Mutex<Connection>,
    pending: PendingRequests,
    router: EventRouter,
}

struct Connection {
    state: ConnectionState,
    /// Bumped whenever the socket is replaced or closed locally. A socket task
    /// whose generation is stale must not touch shared state.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    /// Shared by every `connect()` caller while a handshake is in flight.
    attempt: Option<watch::Sender<AttemptOutcome>>,
    socket_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    auto_reconnect: bool,
}

impl Connection {
    fn is_live(&self) -> bool {
        self.state == ConnectionState::Ready
            && self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn settle_attempt(&mut self, outcome: Result<(), GatewayError>) {
        if let Some(attempt) = self.attempt.take() {
            attempt.send_replace(Some(outcome));
        }
    }
}

/// How a socket task ended.
enum SocketEnd {
    /// The handshake failed for a known reason.
    Failed(GatewayError),
    /// The peer or the transport closed the socket.
    Closed(String),
    /// Closed locally, or superseded by a newer socket.
    Shutdown,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        let auto_reconnect = config.auto_reconnect;
        Self {
            inner: Arc::new(Inner {
                config,
                conn: Mutex::new(Connection {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    outbound: None,
                    attempt: None,
                    socket_task: None,
                    reconnect_timer: None,
                    auto_reconnect,
                }),
                pending: PendingRequests::new(),
                router: EventRouter::new(),
            }),
        }
    }

    pub fn from_env() -> Self {
        Self::new(GatewayConfig::from_env())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Open and authenticate the connection.
    ///
    /// Returns immediately when already ready. Concurrent callers share a
    /// single in-flight attempt and all observe its outcome.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let mut attempt = {
            let mut conn = self.inner.conn.lock();
            if conn.is_live() {
                return Ok(());
            }
            match &conn.attempt {
                Some(tx) => tx.subscribe(),
                None => self.start_attempt(&mut conn)?,
            }
        };

        let outcome = attempt
            .wait_for(Option::is_some)
            .await
            .map(|settled| (*settled).clone())
            .map_err(|_| GatewayError::ConnectionLost)?;
        outcome.unwrap_or(Err(GatewayError::ConnectionLost))
    }

    fn start_attempt(
        &self,
        conn: &mut Connection,
    ) -> Result<watch::Receiver<AttemptOutcome>, GatewayError> {
        let url = self.inner.config.connect_url()?;

        conn.generation += 1;
        if let Some(stale) = conn.socket_task.take() {
            stale.abort();
        }
        conn.outbound = None;
        conn.state = ConnectionState::Connecting;

        let (tx, rx) = watch::channel(None);
        conn.attempt = Some(tx);

        let generation = conn.generation;
        info!(
            url = %self.inner.config.redacted_url(),
            generation,
            "connecting to gateway"
        );
        conn.socket_task = Some(tokio::spawn(run_socket(
            Arc::clone(&self.inner),
            generation,
            url,
        )));
        Ok(rx)
    }

    /// Close the connection and stop reconnecting. Pending calls fail with
    /// [`GatewayError::ConnectionLost`]; no `disconnected` event is emitted.
    #[instrument(skip(self))]
    pub fn disconnect(&self) {
        {
            let mut conn = self.inner.conn.lock();
            conn.auto_reconnect = false;
            if let Some(timer) = conn.reconnect_timer.take() {
                timer.abort();
            }
            conn.state = ConnectionState::Closing;
            conn.generation += 1;
            match conn.outbound.take() {
                // The socket task sends the close frame and exits.
                Some(tx) if tx.send(Message::Close(None)).is_ok() => {
                    conn.socket_task = None;
                }
                _ => {
                    if let Some(task) = conn.socket_task.take() {
                        task.abort();
                    }
                }
            }
            conn.settle_attempt(Err(GatewayError::ConnectionLost));
            conn.state = ConnectionState::Disconnected;
        }
        let failed = self.inner.pending.fail_all(&GatewayError::ConnectionLost);
        info!(failed_requests = failed, "disconnected from gateway");
    }

    /// Issue a request and wait for its correlated response.
    ///
    /// Fails with [`GatewayError::NotConnected`] without writing anything when
    /// the connection is not ready.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let outbound = {
            let conn = self.inner.conn.lock();
            match &conn.outbound {
                Some(tx) if conn.is_live() => tx.clone(),
                _ => return Err(GatewayError::NotConnected),
            }
        };

        let id = RequestId::new();
        let text = protocol::encode_request(&id, method, &params)?;
        let deadline = Instant::now() + self.inner.config.request_timeout;
        let rx = self.inner.pending.register(id.clone(), method);
        // Removes the entry on every exit, including the caller dropping us.
        let _guard = self.inner.pending.guard(&id);

        if outbound.send(Message::Text(text.into())).is_err() {
            return Err(GatewayError::ConnectionLost);
        }
        debug!(id = %id, method, "gateway request sent");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(GatewayError::ConnectionLost),
            Err(_) => {
                warn!(
                    id = %id,
                    method,
                    timeout_ms = self.inner.config.request_timeout.as_millis() as u64,
                    "gateway request timed out"
                );
                Err(GatewayError::RequestTimeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// [`Self::call`] with the result decoded into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, GatewayError> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.lock().is_live()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.conn.lock().state
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether a reconnect timer is armed and waiting to fire.
    pub fn reconnect_scheduled(&self) -> bool {
        self.inner.conn.lock().reconnect_timer.is_some()
    }

    // Events

    pub fn on_connected(&self, f: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.inner.router.on_connected(f)
    }

    pub fn on_disconnected(&self, f: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.inner.router.on_disconnected(f)
    }

    pub fn on_notification(
        &self,
        f: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.router.on_notification(f)
    }

    pub fn on(
        &self,
        event: impl Into<String>,
        f: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.router.on(event, f)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.router.remove(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.router.subscribe()
    }
}

impl Inner {
    /// Run `f` only if `generation` still owns the connection.
    fn with_current<T>(&self, generation: u64, f: impl FnOnce(&mut Connection) -> T) -> Option<T> {
        let mut conn = self.conn.lock();
        (conn.generation == generation).then(|| f(&mut conn))
    }

    fn finish_socket(self: &Arc<Self>, generation: u64, end: SocketEnd) {
        let error = match end {
            SocketEnd::Failed(e) => e,
            SocketEnd::Closed(reason) => GatewayError::Socket(reason),
            SocketEnd::Shutdown => GatewayError::ConnectionLost,
        };
        let was_ready = self.with_current(generation, |conn| {
            let was_ready = conn.state == ConnectionState::Ready;
            conn.state = ConnectionState::Disconnected;
            conn.outbound = None;
            conn.socket_task = None;
            conn.settle_attempt(Err(error.clone()));
            was_ready
        });
        let Some(was_ready) = was_ready else {
            trace!(generation, "stale socket closed");
            return;
        };

        let failed = self.pending.fail_all(&GatewayError::ConnectionLost);
        if was_ready {
            warn!(error = %error, failed_requests = failed, "gateway connection lost");
        } else {
            warn!(error = %error, kind = error.error_kind(), "gateway connection attempt failed");
        }
        self.router.emit_disconnected();

        if was_ready {
            schedule_reconnect(self);
        }
    }
}

/// Arm the single reconnect timer unless one is armed or reconnect is off.
fn schedule_reconnect(inner: &Arc<Inner>) {
    let mut conn = inner.conn.lock();
    if conn.reconnect_timer.is_some() || !conn.auto_reconnect {
        return;
    }
    let delay = inner.config.reconnect_delay;
    info!(delay_ms = delay.as_millis() as u64, "scheduling gateway reconnect");

    let client = GatewayClient {
        inner: Arc::clone(inner),
    };
    conn.reconnect_timer = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        {
            let mut conn = client.inner.conn.lock();
            conn.reconnect_timer = None;
            if !conn.auto_reconnect {
                return;
            }
        }
        match client.connect().await {
            Ok(()) => info!("gateway reconnected"),
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "gateway reconnect failed");
                schedule_reconnect(&client.inner);
            }
        }
    }));
}

async fn run_socket(inner: Arc<Inner>, generation: u64, url: Url) {
    let deadline = Instant::now() + inner.config.connect_timeout;
    let end = match tokio::time::timeout_at(deadline, connect_async(url.as_str())).await {
        Err(_) => SocketEnd::Failed(GatewayError::ConnectionTimeout(inner.config.connect_timeout)),
        Ok(Err(e)) => SocketEnd::Failed(e.into()),
        Ok(Ok((ws, _response))) => {
            let (tx, rx) = mpsc::unbounded_channel();
            match inner.with_current(generation, |conn| conn.outbound = Some(tx)) {
                Some(()) => {
                    debug!(generation, "gateway socket open, awaiting challenge");
                    let (sink, stream) = ws.split();
                    SocketSession {
                        inner: Arc::clone(&inner),
                        generation,
                        sink,
                        stream,
                        outbound: rx,
                        auth_id: None,
                        ready: false,
                    }
                    .run(deadline)
                    .await
                }
                None => SocketEnd::Shutdown,
            }
        }
    };
    inner.finish_socket(generation, end);
}

struct SocketSession {
    inner: Arc<Inner>,
    generation: u64,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    outbound: mpsc::UnboundedReceiver<Message>,
    auth_id: Option<RequestId>,
    ready: bool,
}

enum Flow {
    Continue,
    End(SocketEnd),
}

impl SocketSession {
    async fn run(mut self, handshake_deadline: Instant) -> SocketEnd {
        let handshake_timer = tokio::time::sleep_until(handshake_deadline);
        tokio::pin!(handshake_timer);

        loop {
            tokio::select! {
                _ = &mut handshake_timer, if !self.ready => {
                    let timeout = self.inner.config.connect_timeout;
                    return self.abort_handshake(GatewayError::ConnectionTimeout(timeout)).await;
                }
                msg = self.outbound.recv() => {
                    let Some(msg) = msg else {
                        return SocketEnd::Shutdown;
                    };
                    let closing = matches!(msg, Message::Close(_));
                    if let Err(e) = self.sink.send(msg).await {
                        return SocketEnd::Closed(format!("write failed: {e}"));
                    }
                    if closing {
                        return SocketEnd::Shutdown;
                    }
                }
                frame = self.stream.next() => {
                    let flow = match frame {
                        Some(Ok(Message::Text(text))) => self.on_text(text.as_str()).await,
                        Some(Ok(Message::Close(frame))) => {
                            let reason = match frame {
                                Some(f) => format!(
                                    "closed by gateway ({}): {}",
                                    u16::from(f.code),
                                    f.reason.as_str()
                                ),
                                None => "closed by gateway".to_string(),
                            };
                            Flow::End(SocketEnd::Closed(reason))
                        }
                        // Pings are answered by tungstenite.
                        Some(Ok(_)) => Flow::Continue,
                        Some(Err(e)) => Flow::End(SocketEnd::Closed(e.to_string())),
                        None => Flow::End(SocketEnd::Closed("stream ended".to_string())),
                    };
                    if let Flow::End(end) = flow {
                        return end;
                    }
                }
            }
        }
    }

    async fn on_text(&mut self, text: &str) -> Flow {
        let frame = match Inbound::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed gateway frame");
                return Flow::Continue;
            }
        };

        match frame {
            Inbound::Challenge => self.answer_challenge().await,
            Inbound::Response(resp) if self.auth_id.as_ref() == Some(&resp.id) => {
                self.auth_id = None;
                match resp.outcome {
                    Ok(_) => self.become_ready(),
                    Err(message) => {
                        self.abort_handshake(GatewayError::AuthenticationFailed(message))
                            .await
                            .into()
                    }
                }
            }
            Inbound::Response(resp) => {
                let id = resp.id.clone();
                if !self
                    .inner
                    .pending
                    .resolve(&resp.id, resp.outcome.map_err(GatewayError::Remote))
                {
                    debug!(id = %id, "dropping response for unknown request");
                }
                Flow::Continue
            }
            Inbound::Notification(notification) => {
                trace!(name = %notification.name, "gateway notification");
                self.inner.router.dispatch(&notification);
                Flow::Continue
            }
            Inbound::Unrecognized => {
                debug!(len = text.len(), "ignoring unrecognized gateway frame");
                Flow::Continue
            }
        }
    }

    async fn answer_challenge(&mut self) -> Flow {
        if self.ready || self.auth_id.is_some() {
            debug!("ignoring challenge outside handshake");
            return Flow::Continue;
        }
        let id = RequestId::new();
        let text = match protocol::encode_connect(&id, &self.inner.config) {
            Ok(text) => text,
            Err(e) => return Flow::End(SocketEnd::Failed(e.into())),
        };
        let current = self.inner.with_current(self.generation, |conn| {
            conn.state = ConnectionState::Authenticating;
        });
        if current.is_none() {
            return Flow::End(SocketEnd::Shutdown);
        }
        debug!(id = %id, "answering gateway challenge");
        if let Err(e) = self.sink.send(Message::Text(text.into())).await {
            return Flow::End(SocketEnd::Closed(format!("write failed: {e}")));
        }
        self.auth_id = Some(id);
        Flow::Continue
    }

    fn become_ready(&mut self) -> Flow {
        let current = self.inner.with_current(self.generation, |conn| {
            conn.state = ConnectionState::Ready;
            if let Some(timer) = conn.reconnect_timer.take() {
                timer.abort();
            }
        });
        if current.is_none() {
            return Flow::End(SocketEnd::Shutdown);
        }
        self.ready = true;
        info!(generation = self.generation, "gateway connection ready");
        self.inner.router.emit_connected();
        self.inner.with_current(self.generation, |conn| conn.settle_attempt(Ok(())));
        Flow::Continue
    }

    async fn abort_handshake(&mut self, error: GatewayError) -> SocketEnd {
        self.inner.with_current(self.generation, |conn| {
            conn.state = ConnectionState::Closing;
        });
        let _ = self.sink.send(Message::Close(None)).await;
        SocketEnd::Failed(error)
    }
}

impl From<SocketEnd> for Flow {
    fn from(end: SocketEnd) -> Self {
        Flow::End(end)
    }
}
