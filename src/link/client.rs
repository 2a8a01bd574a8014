//! Persistent duplex client for the interpretation backend.
//!
//! Owns a single websocket connection on a background task. Outbound samples
//! go through the adaptive rate limiter; while disconnected they accumulate
//! in a bounded ring (oldest dropped first) and are flushed on reconnect.
//! Reconnection follows [`ReconnectPolicy`]; once the attempt budget is spent
//! the link stays down until [`InterpretationLink::reset_reconnect`].

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::LinkSettings;
use crate::interpreter::{Interpretation, MotionSample};

use super::backoff::ReconnectPolicy;
use super::models::{ClientMessage, LinkStatus, ServerMessage};
use super::payload_parser::parse_interpretation;
use super::rate_limiter::AdaptiveRateLimiter;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// How often the background task re-checks the buffered sample slot and the
/// outstanding-request timeout.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid interpretation backend URL: {0}")]
    InvalidUrl(String),
    #[error("invalid API key header value")]
    InvalidApiKey,
}

pub type InterpretationListener = Box<dyn Fn(&Interpretation) + Send + Sync>;
pub type LinkErrorListener = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    interpretation: Mutex<Vec<InterpretationListener>>,
    errors: Mutex<Vec<LinkErrorListener>>,
}

impl Listeners {
    /// Fan out to every listener, isolating each one so a panicking consumer
    /// cannot break the others.
    fn notify_interpretation(&self, interpretation: &Interpretation) {
        let listeners = self.interpretation.lock().expect("listener lock poisoned");
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(interpretation))).is_err() {
                error!("Interpretation listener panicked, continuing with remaining listeners");
            }
        }
    }

    fn notify_error(&self, message: &str) {
        let listeners = self.errors.lock().expect("listener lock poisoned");
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                error!("Error listener panicked, continuing with remaining listeners");
            }
        }
    }
}

enum LinkCommand {
    Sample(MotionSample),
    Boundary(ClientMessage),
    ResetReconnect,
    Shutdown,
}

/// Handle to the rate-limited interpretation link.
pub struct InterpretationLink {
    command_tx: mpsc::UnboundedSender<LinkCommand>,
    status: Arc<Mutex<LinkStatus>>,
    listeners: Arc<Listeners>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InterpretationLink {
    /// Spawn the link's background task and return the handle.
    pub fn start(
        url: &str,
        api_key: Option<&str>,
        session_id: &str,
        settings: LinkSettings,
    ) -> Result<Self, LinkError> {
        // Validate the request up front so misconfiguration surfaces at
        // startup instead of inside the reconnect loop.
        build_request(url, api_key)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(LinkStatus::default()));
        let listeners = Arc::new(Listeners::default());

        let runner = LinkRunner {
            url: url.to_string(),
            api_key: api_key.map(str::to_string),
            session_id: session_id.to_string(),
            settings: settings.clone(),
            limiter: AdaptiveRateLimiter::new(&settings),
            backoff: ReconnectPolicy::new(&settings),
            offline: VecDeque::new(),
            status: status.clone(),
            listeners: listeners.clone(),
        };
        let task = tokio::spawn(runner.run(command_rx));

        Ok(Self {
            command_tx,
            status,
            listeners,
            task: Mutex::new(Some(task)),
        })
    }

    /// Offer a sample for server-side interpretation.
    ///
    /// Never blocks: ineligible samples end up in the latest-wins slot or the
    /// offline ring.
    pub fn send(&self, sample: MotionSample) {
        let _ = self.command_tx.send(LinkCommand::Sample(sample));
    }

    /// Fire-and-forget session boundary notification.
    pub fn notify_session_start(&self, wallet_address: Option<String>, vibe_id: String) {
        let _ = self.command_tx.send(LinkCommand::Boundary(
            ClientMessage::SessionStart {
                wallet_address,
                vibe_id,
            },
        ));
    }

    /// Fire-and-forget session boundary notification.
    pub fn notify_session_end(&self, wallet_address: Option<String>, vibe_id: String) {
        let _ = self
            .command_tx
            .send(LinkCommand::Boundary(ClientMessage::SessionEnd {
                wallet_address,
                vibe_id,
            }));
    }

    /// Register an interpretation listener. Listeners are isolated from each
    /// other: one panicking does not prevent the rest from running.
    pub fn on_interpretation(&self, listener: InterpretationListener) {
        self.listeners
            .interpretation
            .lock()
            .expect("listener lock poisoned")
            .push(listener);
    }

    /// Register a listener for backend rejections and exhaustion reports.
    pub fn on_error(&self, listener: LinkErrorListener) {
        self.listeners
            .errors
            .lock()
            .expect("listener lock poisoned")
            .push(listener);
    }

    /// Allow reconnection again after the attempt budget was exhausted.
    pub fn reset_reconnect(&self) {
        let _ = self.command_tx.send(LinkCommand::ResetReconnect);
    }

    pub fn status(&self) -> LinkStatus {
        self.status.lock().expect("status lock poisoned").clone()
    }

    /// Stop the background task and close the connection. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(LinkCommand::Shutdown);
        let task = self.task.lock().expect("task lock poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Interpretation link task ended abnormally: {}", e);
            }
        }
    }
}

fn build_request(
    url: &str,
    api_key: Option<&str>,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, LinkError> {
    let mut request = url
        .into_client_request()
        .map_err(|_| LinkError::InvalidUrl(url.to_string()))?;
    if let Some(key) = api_key {
        let value: HeaderValue = key.parse().map_err(|_| LinkError::InvalidApiKey)?;
        request.headers_mut().insert("x-api-key", value);
    }
    Ok(request)
}

enum DisconnectedWake {
    Elapsed,
    Shutdown,
}

struct LinkRunner {
    url: String,
    api_key: Option<String>,
    session_id: String,
    settings: LinkSettings,
    limiter: AdaptiveRateLimiter,
    backoff: ReconnectPolicy,
    offline: VecDeque<MotionSample>,
    status: Arc<Mutex<LinkStatus>>,
    listeners: Arc<Listeners>,
}

impl LinkRunner {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<LinkCommand>) {
        loop {
            match self.connect().await {
                Ok(ws) => {
                    info!("Interpretation link connected to {}", self.url);
                    self.backoff.reset();
                    let (sink, stream) = ws.split();
                    match self.run_connected(sink, stream, &mut command_rx).await {
                        ConnectedOutcome::Shutdown => break,
                        ConnectedOutcome::Disconnected => {
                            warn!("Interpretation link lost, scheduling reconnect");
                        }
                    }
                }
                Err(e) => {
                    warn!("Interpretation link connection failed: {}", e);
                }
            }

            // The outstanding request (if any) died with the transport.
            self.limiter.clear();
            self.publish_status(false);

            match self.backoff.next_delay() {
                Some(delay) => {
                    debug!(
                        "Reconnecting interpretation link in {:?} (attempt {})",
                        delay,
                        self.backoff.attempts()
                    );
                    if let DisconnectedWake::Shutdown =
                        self.wait_disconnected(&mut command_rx, Some(delay)).await
                    {
                        break;
                    }
                }
                None => {
                    error!(
                        "Interpretation link gave up after {} attempts; waiting for explicit reset",
                        self.backoff.attempts()
                    );
                    self.listeners
                        .notify_error("interpretation link reconnect attempts exhausted");
                    self.publish_status(false);
                    if let DisconnectedWake::Shutdown =
                        self.wait_disconnected(&mut command_rx, None).await
                    {
                        break;
                    }
                }
            }
        }
        self.publish_status(false);
        debug!("Interpretation link task stopped");
    }

    async fn connect(&self) -> anyhow::Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let request = build_request(&self.url, self.api_key.as_deref())
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let connect_timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let (ws, _) = timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| anyhow::anyhow!("connection attempt timed out"))??;
        Ok(ws)
    }

    async fn run_connected(
        &mut self,
        mut sink: WsSink,
        mut stream: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<LinkCommand>,
    ) -> ConnectedOutcome {
        self.publish_status(true);

        // Flush the offline ring as a burst; these are historical samples so
        // they bypass the limiter and carry no response accounting.
        if !self.offline.is_empty() {
            info!(
                "Flushing {} samples queued while the link was down",
                self.offline.len()
            );
            while let Some(sample) = self.offline.pop_front() {
                if self.transmit(&mut sink, sample).await.is_err() {
                    return ConnectedOutcome::Disconnected;
                }
            }
            self.publish_status(true);
        }

        let mut tick = interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(LinkCommand::Sample(sample)) => {
                        if let Some(out) = self.limiter.offer(sample, Instant::now()) {
                            if self.transmit(&mut sink, out).await.is_err() {
                                return ConnectedOutcome::Disconnected;
                            }
                        }
                        self.publish_status(true);
                    }
                    Some(LinkCommand::Boundary(msg)) => {
                        // Best effort only; a failed boundary message must
                        // not take the session down with it.
                        if let Err(e) = self.send_message(&mut sink, &msg).await {
                            warn!("Failed to send session boundary message: {}", e);
                            return ConnectedOutcome::Disconnected;
                        }
                    }
                    Some(LinkCommand::ResetReconnect) => self.backoff.reset(),
                    Some(LinkCommand::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return ConnectedOutcome::Shutdown;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_server_text(text.as_str());
                        self.publish_status(true);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return ConnectedOutcome::Disconnected;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                    Some(Err(e)) => {
                        warn!("Interpretation link read error: {}", e);
                        return ConnectedOutcome::Disconnected;
                    }
                },
                _ = tick.tick() => {
                    let now = Instant::now();
                    if self.limiter.request_timed_out(now) {
                        warn!(
                            "Interpretation request timed out after {}s",
                            self.settings.request_timeout_secs
                        );
                        self.limiter.on_timeout();
                    }
                    if let Some(sample) = self.limiter.take_buffered(now) {
                        if self.transmit(&mut sink, sample).await.is_err() {
                            return ConnectedOutcome::Disconnected;
                        }
                    }
                    self.publish_status(true);
                }
            }
        }
    }

    async fn transmit(&mut self, sink: &mut WsSink, sample: MotionSample) -> anyhow::Result<()> {
        let message = ClientMessage::SensorData {
            timestamp: sample.timestamp,
            session_id: self.session_id.clone(),
            sensor_data: sample,
        };
        self.send_message(sink, &message).await
    }

    async fn send_message(&self, sink: &mut WsSink, message: &ClientMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(message)?;
        sink.send(Message::Text(json.into())).await?;
        Ok(())
    }

    fn handle_server_text(&mut self, text: &str) {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Unrecognized message from interpretation backend: {}", e);
                return;
            }
        };
        match message {
            ServerMessage::Interpretation { data } => {
                // Response accounting happens regardless of whether the
                // payload parses; the request round-trip did complete.
                self.limiter.on_response(Instant::now());
                match parse_interpretation(&data) {
                    Ok(interpretation) => {
                        self.listeners.notify_interpretation(&interpretation)
                    }
                    Err(e) => {
                        // The previous interpretation stays active.
                        warn!("Discarding unparseable interpretation payload: {}", e);
                    }
                }
            }
            ServerMessage::Error { message } => {
                warn!("Interpretation backend rejected request: {}", message);
                self.limiter.on_response(Instant::now());
                self.listeners.notify_error(&message);
            }
        }
    }

    /// Park while disconnected, still accepting commands. `None` waits
    /// indefinitely (exhausted state).
    async fn wait_disconnected(
        &mut self,
        command_rx: &mut mpsc::UnboundedReceiver<LinkCommand>,
        delay: Option<Duration>,
    ) -> DisconnectedWake {
        let deadline = delay.map(|d| tokio::time::Instant::now() + d);
        loop {
            let cmd = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, command_rx.recv()).await {
                        Ok(cmd) => cmd,
                        Err(_) => return DisconnectedWake::Elapsed,
                    }
                }
                None => command_rx.recv().await,
            };
            match cmd {
                Some(LinkCommand::Sample(sample)) => self.queue_offline(sample),
                Some(LinkCommand::Boundary(_)) => {
                    debug!("Dropping session boundary message while link is down")
                }
                Some(LinkCommand::ResetReconnect) => {
                    self.backoff.reset();
                    return DisconnectedWake::Elapsed;
                }
                Some(LinkCommand::Shutdown) | None => return DisconnectedWake::Shutdown,
            }
        }
    }

    fn queue_offline(&mut self, sample: MotionSample) {
        if self.offline.len() >= self.settings.offline_queue_size {
            self.offline.pop_front();
        }
        self.offline.push_back(sample);
        self.publish_status(false);
    }

    fn publish_status(&self, connected: bool) {
        let stats = self.limiter.stats();
        let mut status = self.status.lock().expect("status lock poisoned");
        *status = LinkStatus {
            connected,
            pending_response: stats.pending_response,
            measured_latency_ema_ms: stats.measured_latency_ema_ms,
            reconnect_attempts: self.backoff.attempts(),
            exhausted: self.backoff.is_exhausted(),
            queued_offline: self.offline.len(),
        };
    }
}

enum ConnectedOutcome {
    Disconnected,
    Shutdown,
}
