//! Generative-audio session manager.
//!
//! Holds the persistent duplex connection to the generative backend, pushes
//! interpreted control parameters onto the live session, and forwards
//! incoming audio frames to the registered consumers. Reconnects with a
//! fixed short delay, intentionally distinct from the interpretation link's
//! exponential backoff.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::SessionSettings;
use crate::interpreter::{GenerationConfig, Interpretation, WeightedStyle};

use super::envelope::{parse_envelope, EnvelopeContent};
use super::state::SessionState;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Engine -> generative backend control message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionClientMessage {
    #[serde(rename = "set-styles", rename_all = "camelCase")]
    SetStyles {
        weighted_styles: Vec<WeightedStyle>,
        generation_config: GenerationConfig,
    },
}

pub type FrameListener = Box<dyn Fn(&[u8]) + Send + Sync>;
pub type SessionErrorListener = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    frames: Mutex<Vec<FrameListener>>,
    errors: Mutex<Vec<SessionErrorListener>>,
}

impl Listeners {
    fn notify_frame(&self, frame: &[u8]) {
        let listeners = self.frames.lock().expect("listener lock poisoned");
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(frame))).is_err() {
                error!("Audio frame listener panicked, continuing with remaining listeners");
            }
        }
    }

    fn notify_error(&self, message: &str) {
        let listeners = self.errors.lock().expect("listener lock poisoned");
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                error!("Session error listener panicked, continuing with remaining listeners");
            }
        }
    }
}

enum SessionCommand {
    Apply(Box<Interpretation>),
    Shutdown,
}

/// Handle to the generative-audio session.
pub struct GenerativeSessionManager {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    state: Arc<Mutex<SessionState>>,
    listeners: Arc<Listeners>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GenerativeSessionManager {
    /// Spawn the session's background task and return the handle.
    pub fn start(url: &str, api_key: Option<&str>, settings: SessionSettings) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(SessionState::Disconnected));
        let listeners = Arc::new(Listeners::default());

        let runner = SessionRunner {
            url: url.to_string(),
            api_key: api_key.map(str::to_string),
            settings,
            state: state.clone(),
            listeners: listeners.clone(),
            latest_interpretation: None,
        };
        let task = tokio::spawn(runner.run(command_rx));

        Self {
            command_tx,
            state,
            listeners,
            task: Mutex::new(Some(task)),
        }
    }

    /// Push the style blend and generation config onto the live session.
    ///
    /// Non-blocking; while disconnected the latest interpretation is kept
    /// and re-applied on reconnect.
    pub fn apply_interpretation(&self, interpretation: Interpretation) {
        let _ = self
            .command_tx
            .send(SessionCommand::Apply(Box::new(interpretation)));
    }

    /// Register a consumer for raw audio frames, forwarded verbatim in
    /// arrival order. Listeners are isolated from each other.
    pub fn on_audio_frame(&self, listener: FrameListener) {
        self.listeners
            .frames
            .lock()
            .expect("listener lock poisoned")
            .push(listener);
    }

    /// Register a listener for non-fatal backend rejections.
    pub fn on_error(&self, listener: SessionErrorListener) {
        self.listeners
            .errors
            .lock()
            .expect("listener lock poisoned")
            .push(listener);
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Close the session and stop the background task. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown);
        let task = self.task.lock().expect("task lock poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Generative session task ended abnormally: {}", e);
            }
        }
    }
}

struct SessionRunner {
    url: String,
    api_key: Option<String>,
    settings: SessionSettings,
    state: Arc<Mutex<SessionState>>,
    listeners: Arc<Listeners>,
    /// Most recent interpretation, re-applied after every reconnect so the
    /// new session resumes with the current musical context.
    latest_interpretation: Option<Interpretation>,
}

enum ConnectedOutcome {
    Disconnected,
    Shutdown,
}

impl SessionRunner {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            self.transition(SessionState::Connecting);
            match self.connect().await {
                Ok(ws) => {
                    info!("Generative session connected to {}", self.url);
                    self.transition(SessionState::Connected);
                    let (sink, stream) = ws.split();
                    match self.run_connected(sink, stream, &mut command_rx).await {
                        ConnectedOutcome::Shutdown => {
                            self.transition(SessionState::Closed);
                            break;
                        }
                        ConnectedOutcome::Disconnected => {
                            self.transition(SessionState::Error);
                        }
                    }
                }
                Err(e) => {
                    warn!("Generative session connection failed: {}", e);
                    self.transition(SessionState::Error);
                }
            }

            let delay = Duration::from_secs(self.settings.reconnect_delay_secs);
            debug!("Reconnecting generative session in {:?}", delay);
            if self.wait_disconnected(&mut command_rx, delay).await {
                self.transition(SessionState::Closed);
                break;
            }
        }
        debug!("Generative session task stopped");
    }

    async fn connect(&self) -> anyhow::Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("invalid generation backend URL: {}", e))?;
        if let Some(key) = &self.api_key {
            let value: HeaderValue = key
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid API key header value"))?;
            request.headers_mut().insert("x-api-key", value);
        }
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
        command_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> ConnectedOutcome {
        // Resume musical context from before the disconnect.
        if let Some(interpretation) = self.latest_interpretation.clone() {
            if let Err(e) = self.send_interpretation(&mut sink, &interpretation).await {
                warn!("Failed to re-apply interpretation after reconnect: {}", e);
                return ConnectedOutcome::Disconnected;
            }
        }

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(SessionCommand::Apply(interpretation)) => {
                        let interpretation = *interpretation;
                        match self.send_interpretation(&mut sink, &interpretation).await {
                            Ok(()) => self.latest_interpretation = Some(interpretation),
                            Err(e) => {
                                // The transport is gone; keep the
                                // interpretation for the next session.
                                warn!("Failed to apply interpretation: {}", e);
                                self.latest_interpretation = Some(interpretation);
                                return ConnectedOutcome::Disconnected;
                            }
                        }
                    }
                    Some(SessionCommand::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return ConnectedOutcome::Shutdown;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_server_text(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => {
                        // Some server versions skip the JSON envelope and
                        // stream raw PCM directly.
                        self.mark_streaming();
                        self.listeners.notify_frame(&bytes);
                    }
                    Some(Ok(Message::Close(_))) | None => return ConnectedOutcome::Disconnected,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Generative session read error: {}", e);
                        return ConnectedOutcome::Disconnected;
                    }
                },
            }
        }
    }

    fn handle_server_text(&mut self, text: &str) {
        match parse_envelope(text) {
            Ok(EnvelopeContent::Audio(bytes)) => {
                self.mark_streaming();
                self.listeners.notify_frame(&bytes);
            }
            Ok(EnvelopeContent::Error(message)) => {
                // Backend rejection is surfaced but never tears the
                // session down on its own.
                warn!("Generative backend reported error: {}", message);
                self.listeners.notify_error(&message);
            }
            Ok(EnvelopeContent::Ignorable) => {}
            Err(e) => {
                warn!("Dropping unrecognized generative backend message: {}", e);
            }
        }
    }

    async fn send_interpretation(
        &self,
        sink: &mut WsSink,
        interpretation: &Interpretation,
    ) -> anyhow::Result<()> {
        let message = SessionClientMessage::SetStyles {
            weighted_styles: interpretation.weighted_styles.clone(),
            generation_config: interpretation.generation_config.clone(),
        };
        let json = serde_json::to_string(&message)?;
        sink.send(Message::Text(json.into())).await?;
        Ok(())
    }

    fn mark_streaming(&self) {
        // Connected -> Streaming happens on the first received frame.
        if *self.state.lock().expect("state lock poisoned") == SessionState::Connected {
            self.transition(SessionState::Streaming);
        }
    }

    fn transition(&self, next: SessionState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if state.can_transition_to(next) {
            debug!("Session state: {:?} -> {:?}", *state, next);
            *state = next;
        } else if *state != next {
            warn!("Ignoring illegal session transition {:?} -> {:?}", *state, next);
        }
    }

    /// Park while disconnected. Returns true on shutdown.
    async fn wait_disconnected(
        &mut self,
        command_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
        delay: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            match tokio::time::timeout_at(deadline, command_rx.recv()).await {
                Ok(Some(SessionCommand::Apply(interpretation))) => {
                    // Applied once the next connection is up.
                    self.latest_interpretation = Some(*interpretation);
                }
                Ok(Some(SessionCommand::Shutdown)) | Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }
}
