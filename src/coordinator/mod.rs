//! Top-level engine coordinator.
//!
//! Owns the interpreter, the interpretation link, the generative session
//! manager, the playback buffer and the chunk-storage handle, and wires the
//! data flow between them: sensor samples fan out to the local interpreter
//! (immediate response) and to the interpretation backend (server-side
//! refinement); audio frames fan out to playback and storage.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::interpreter::{Interpreter, MotionSample};
use crate::link::{InterpretationLink, LinkStatus};
use crate::playback::{AudioSink, BufferHealth, BufferManager, OutputClock};
use crate::session::{GenerativeSessionManager, SessionState};
use crate::storage::{ChannelChunkStorage, ChunkStorage, NoOpChunkStorage};

/// Point-in-time snapshot of the whole engine, for logging and diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub session_id: Option<String>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub session_state: SessionState,
    pub link: Option<LinkStatus>,
    pub buffer: BufferHealth,
    pub queued_frames: usize,
}

struct ActiveSession {
    session_id: String,
    vibe_id: String,
    started_at: DateTime<Utc>,
    link: InterpretationLink,
    session: Arc<GenerativeSessionManager>,
}

pub struct Coordinator {
    config: AppConfig,
    interpreter: Mutex<Interpreter>,
    playback: Arc<BufferManager>,
    storage: Arc<dyn ChunkStorage>,
    active: Mutex<Option<ActiveSession>>,
}

impl Coordinator {
    pub fn new(config: AppConfig, clock: Arc<dyn OutputClock>, sink: Arc<dyn AudioSink>) -> Self {
        let interpreter = Mutex::new(Interpreter::new(config.interpreter.clone()));
        let playback = Arc::new(BufferManager::new(config.playback.clone(), clock, sink));
        let storage: Arc<dyn ChunkStorage> = if config.storage.enabled {
            Arc::new(ChannelChunkStorage::new(
                config.storage.queue_size,
                config.storage.max_recording_bytes,
            ))
        } else {
            Arc::new(NoOpChunkStorage)
        };
        Self {
            config,
            interpreter,
            playback,
            storage,
            active: Mutex::new(None),
        }
    }

    /// Open both backend connections and start the playback loop.
    ///
    /// Returns the generated session id. Calling while a session is already
    /// active is a no-op returning the existing id.
    pub fn start_session(&self, vibe_id: &str) -> Result<String> {
        let mut active = self.active.lock().expect("session lock poisoned");
        if let Some(existing) = active.as_ref() {
            debug!("Session {} already active, ignoring start", existing.session_id);
            return Ok(existing.session_id.clone());
        }

        let session_id = Uuid::new_v4().to_string();
        info!("Starting session {} for vibe {}", session_id, vibe_id);

        let link = InterpretationLink::start(
            &self.config.interpretation_url,
            self.config.api_key.as_deref(),
            &session_id,
            self.config.link.clone(),
        )
        .context("failed to start interpretation link")?;

        let session = Arc::new(GenerativeSessionManager::start(
            &self.config.generation_url,
            self.config.api_key.as_deref(),
            self.config.session.clone(),
        ));

        // Server-side interpretations refine the live session and feed the
        // predictive buffer sizing.
        let session_for_link = Arc::clone(&session);
        let playback_for_link = Arc::clone(&self.playback);
        link.on_interpretation(Box::new(move |interpretation| {
            session_for_link.apply_interpretation(interpretation.clone());
            playback_for_link.apply_interpretation(interpretation);
        }));
        link.on_error(Box::new(|message| {
            warn!("Interpretation backend error: {}", message);
        }));

        // Audio frames go to playback and, in parallel, to the storage
        // collaborator. Neither path blocks the session task.
        let playback_for_frames = Arc::clone(&self.playback);
        let storage_for_frames = Arc::clone(&self.storage);
        session.on_audio_frame(Box::new(move |frame| {
            playback_for_frames.ingest(frame);
            storage_for_frames.add_audio_data(frame.to_vec());
        }));
        session.on_error(Box::new(|message| {
            warn!("Generative backend error: {}", message);
        }));

        self.playback.start();
        self.interpreter
            .lock()
            .expect("interpreter lock poisoned")
            .reset();

        // Best-effort boundary notification; the link queues it if offline.
        link.notify_session_start(self.config.wallet_address.clone(), vibe_id.to_string());

        *active = Some(ActiveSession {
            session_id: session_id.clone(),
            vibe_id: vibe_id.to_string(),
            started_at: Utc::now(),
            link,
            session,
        });
        Ok(session_id)
    }

    /// Tear the active session down: stop scheduling, discard queued frames
    /// and close both connections. Safe to call when no session is active,
    /// and safe to call repeatedly.
    pub async fn stop_session(&self) {
        let active = self.active.lock().expect("session lock poisoned").take();
        let Some(active) = active else {
            debug!("No active session to stop");
            return;
        };
        let elapsed = (Utc::now() - active.started_at).num_seconds();
        info!("Stopping session {} after {}s", active.session_id, elapsed);

        active
            .link
            .notify_session_end(self.config.wallet_address.clone(), active.vibe_id.clone());

        self.playback.stop();
        active.session.shutdown().await;
        active.link.shutdown().await;

        // Hand the assembled recording over at the collaborator boundary so
        // it does not accumulate across sessions. Upload is out of scope.
        let recording = self.storage.take_recording();
        if !recording.is_empty() {
            info!(
                "Session {} recording assembled: {} bytes",
                active.session_id,
                recording.len()
            );
        }
    }

    /// Route one motion sample through the pipeline. Samples arriving while
    /// no session is active are discarded.
    pub fn handle_sensor_data(&self, sample: MotionSample) {
        let active = self.active.lock().expect("session lock poisoned");
        let Some(active) = active.as_ref() else {
            debug!("Dropping motion sample, no active session");
            return;
        };

        let interpretation = self
            .interpreter
            .lock()
            .expect("interpreter lock poisoned")
            .interpret(&sample);

        // Immediate local response, then the throttled server round trip.
        active.session.apply_interpretation(interpretation.clone());
        self.playback.apply_interpretation(&interpretation);
        active.link.send(sample);
    }

    /// Clear the link's reconnect exhaustion so it starts dialing again.
    pub fn retry_link(&self) {
        if let Some(active) = self.active.lock().expect("session lock poisoned").as_ref() {
            active.link.reset_reconnect();
        }
    }

    pub fn set_volume(&self, volume: f64) {
        self.playback.set_volume(volume);
    }

    pub fn status(&self) -> EngineStatus {
        let active = self.active.lock().expect("session lock poisoned");
        EngineStatus {
            session_id: active.as_ref().map(|a| a.session_id.clone()),
            session_started_at: active.as_ref().map(|a| a.started_at),
            session_state: active
                .as_ref()
                .map(|a| a.session.state())
                .unwrap_or(SessionState::Disconnected),
            link: active.as_ref().map(|a| a.link.status()),
            buffer: self.playback.health(),
            queued_frames: self.playback.queued_frames(),
        }
    }

    /// Final teardown of engine-wide resources.
    pub async fn shutdown(&self) {
        self.stop_session().await;
        self.storage.shutdown().await;
    }
}
