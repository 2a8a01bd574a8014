//! Adaptive audio buffering and playback scheduling.
//!
//! Consumes raw PCM frames from the generative session, decodes them, and
//! schedules them onto the output timeline with crossfades so consecutive
//! frames sound continuous. Buffer depth and crossfade length adapt to
//! observed arrival jitter, optionally biased by the current musical context.

mod clock;
mod decode;
mod health;
mod scheduler;
mod sink;

pub use clock::{OutputClock, SystemClock, VirtualClock};
pub use decode::{AudioFrame, DecodeError};
pub use health::{BufferHealth, HealthTracker};
pub use scheduler::FrameScheduler;
pub use sink::{AudioSink, CollectingSink, NullSink, ScheduledFrame};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::PlaybackSettings;
use crate::interpreter::Interpretation;

/// How often the scheduling loop wakes when driven by the internal task.
const SCHEDULER_TICK: Duration = Duration::from_millis(25);
/// Cap for the jitter-scaled crossfade, as a multiple of the base length.
const MAX_CROSSFADE_SCALE: f64 = 2.0;

struct Inner {
    scheduler: FrameScheduler,
    health: HealthTracker,
}

/// The adaptive buffer manager.
///
/// All state mutation happens synchronously inside a single lock-guarded
/// call; neither `ingest` nor `tick` ever suspends while holding state.
pub struct BufferManager {
    inner: Mutex<Inner>,
    clock: Arc<dyn OutputClock>,
    sink: Arc<dyn AudioSink>,
    settings: PlaybackSettings,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BufferManager {
    pub fn new(
        settings: PlaybackSettings,
        clock: Arc<dyn OutputClock>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let scheduler = FrameScheduler::new(
            settings.lookahead_ms as f64 / 1000.0,
            settings.safety_epsilon_ms as f64 / 1000.0,
            settings.crossfade_ms as f64 / 1000.0,
        );
        let health = HealthTracker::new(&settings);
        Self {
            inner: Mutex::new(Inner { scheduler, health }),
            clock,
            sink,
            settings,
            task: Mutex::new(None),
        }
    }

    /// Ingest one raw PCM frame from the backend.
    ///
    /// A malformed frame is dropped and logged; playback continues with the
    /// frames around it.
    pub fn ingest(&self, raw: &[u8]) {
        let frame = match AudioFrame::decode_pcm(raw, self.settings.sample_rate, self.settings.channels)
        {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping undecodable audio frame: {}", e);
                return;
            }
        };

        let now = self.clock.now_secs();
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        inner.health.on_frame_arrival(now);
        inner.scheduler.enqueue(frame);
        Self::run_tick(&mut inner, now, self.sink.as_ref(), &self.settings);
    }

    /// One pass of the scheduling loop; also called internally on every
    /// ingest so frames never wait for the next timer tick.
    pub fn tick(&self) {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        Self::run_tick(&mut inner, now, self.sink.as_ref(), &self.settings);
    }

    fn run_tick(inner: &mut Inner, now: f64, sink: &dyn AudioSink, settings: &PlaybackSettings) {
        if inner.scheduler.is_starved(now) {
            warn!("Playback buffer ran dry");
            inner.health.on_dropout();
            inner.scheduler.acknowledge_starvation();
        }

        let depth = inner.health.target_depth();
        // Deeper buffers also get a longer crossfade to paper over jitter.
        let base = settings.crossfade_ms as f64 / 1000.0;
        let span = (settings.max_buffer_depth - settings.min_buffer_depth).max(1) as f64;
        let scale = 1.0 + (MAX_CROSSFADE_SCALE - 1.0)
            * (depth.saturating_sub(settings.min_buffer_depth) as f64 / span);
        inner.scheduler.set_crossfade(base * scale);

        let scheduled = inner.scheduler.tick(now, depth, sink);
        if scheduled > 0 {
            debug!(
                "Scheduled {} frame(s), cursor at {:.3}s, queue {}",
                scheduled,
                inner.scheduler.next_start_time(),
                inner.scheduler.queue_len()
            );
        }
    }

    /// Spawn the internal scheduling task. Safe to call once per manager.
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(SCHEDULER_TICK);
            loop {
                tick.tick().await;
                manager.tick();
            }
        });
        if let Some(previous) = self.task.lock().expect("task lock poisoned").replace(task) {
            previous.abort();
        }
    }

    /// Stop the scheduling loop and discard queued frames. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().expect("task lock poisoned").take() {
            task.abort();
        }
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        inner.scheduler.clear();
        inner.health.reset();
    }

    pub fn set_volume(&self, volume: f64) {
        self.sink.set_volume(volume.clamp(0.0, 1.0));
        self.inner
            .lock()
            .expect("buffer lock poisoned")
            .scheduler
            .set_volume(volume);
    }

    /// Advisory musical-context hint for predictive buffer sizing.
    pub fn apply_interpretation(&self, interpretation: &Interpretation) {
        self.inner
            .lock()
            .expect("buffer lock poisoned")
            .health
            .apply_musical_bias(interpretation);
    }

    pub fn health(&self) -> BufferHealth {
        self.inner
            .lock()
            .expect("buffer lock poisoned")
            .health
            .health()
    }

    pub fn queued_frames(&self) -> usize {
        self.inner
            .lock()
            .expect("buffer lock poisoned")
            .scheduler
            .queue_len()
    }
}
