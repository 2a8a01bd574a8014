//! Audio output boundary.
//!
//! The platform audio device is an external collaborator; the engine talks to
//! it through [`AudioSink`]. Tests use [`CollectingSink`] to assert on the
//! exact schedule the engine produced.

use std::sync::Mutex;

use super::decode::AudioFrame;

/// One scheduling instruction handed to the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledFrame {
    /// Output-timeline instant at which the frame begins.
    pub start_time: f64,
    pub duration_secs: f64,
    /// Gain ramps 0->1 over the first `crossfade_secs` and 1->0 over the
    /// last `crossfade_secs`; consecutive frames overlap by exactly this.
    pub crossfade_secs: f64,
    /// Master volume applied on top of the crossfade envelope.
    pub volume: f64,
}

/// Platform audio output seam.
pub trait AudioSink: Send + Sync {
    /// Queue a decoded frame for playback. The sink owns the frame from here
    /// on and releases its resources when playback completes.
    fn schedule(&self, frame: AudioFrame, spec: ScheduledFrame);

    /// Master volume in [0, 1], applied to frames scheduled afterwards.
    fn set_volume(&self, volume: f64);
}

/// Sink that discards audio; used when running headless.
pub struct NullSink;

impl AudioSink for NullSink {
    fn schedule(&self, _frame: AudioFrame, _spec: ScheduledFrame) {}
    fn set_volume(&self, _volume: f64) {}
}

/// Test sink recording every scheduling instruction.
#[derive(Default)]
pub struct CollectingSink {
    scheduled: Mutex<Vec<ScheduledFrame>>,
    volume: Mutex<f64>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self {
            scheduled: Mutex::new(Vec::new()),
            volume: Mutex::new(1.0),
        }
    }

    pub fn scheduled(&self) -> Vec<ScheduledFrame> {
        self.scheduled.lock().expect("sink lock poisoned").clone()
    }

    pub fn volume(&self) -> f64 {
        *self.volume.lock().expect("sink lock poisoned")
    }
}

impl AudioSink for CollectingSink {
    fn schedule(&self, _frame: AudioFrame, spec: ScheduledFrame) {
        self.scheduled.lock().expect("sink lock poisoned").push(spec);
    }

    fn set_volume(&self, volume: f64) {
        *self.volume.lock().expect("sink lock poisoned") = volume;
    }
}
