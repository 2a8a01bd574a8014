//! Frame scheduling onto the output timeline.
//!
//! Keeps the monotonic playback cursor and turns queued frames into
//! crossfaded scheduling instructions for the [`AudioSink`].

use std::collections::VecDeque;

use super::decode::AudioFrame;
use super::sink::{AudioSink, ScheduledFrame};

/// Monotonic playback cursor plus the lookahead frame queue.
pub struct FrameScheduler {
    queue: VecDeque<AudioFrame>,
    /// Output-timeline instant at which the next frame will begin.
    /// Non-decreasing for the lifetime of the scheduler.
    next_start_time: f64,
    /// Base lookahead window in seconds; scaled by the adaptive depth.
    lookahead_secs: f64,
    /// Frames are never scheduled earlier than now + epsilon.
    safety_epsilon_secs: f64,
    crossfade_secs: f64,
    volume: f64,
    /// True once at least one frame has been scheduled; dropouts are only
    /// meaningful after playback has started.
    started: bool,
}

impl FrameScheduler {
    pub fn new(lookahead_secs: f64, safety_epsilon_secs: f64, crossfade_secs: f64) -> Self {
        Self {
            queue: VecDeque::new(),
            next_start_time: 0.0,
            lookahead_secs,
            safety_epsilon_secs,
            crossfade_secs,
            volume: 1.0,
            started: false,
        }
    }

    pub fn enqueue(&mut self, frame: AudioFrame) {
        self.queue.push_back(frame);
    }

    /// Schedule all due frames; returns how many were handed to the sink.
    ///
    /// Runs the spec'd loop: while the queue is non-empty and the cursor is
    /// inside the lookahead window, pop the oldest frame, schedule it at
    /// `max(cursor, now + epsilon)`, and advance the cursor by
    /// `duration - crossfade` so consecutive frames overlap by exactly the
    /// crossfade.
    pub fn tick(&mut self, now: f64, depth: usize, sink: &dyn AudioSink) -> usize {
        let window = self.lookahead_secs * depth.max(1) as f64;
        let mut scheduled = 0;
        while !self.queue.is_empty() && self.next_start_time < now + window {
            let frame = self.queue.pop_front().expect("queue checked non-empty");
            // A crossfade longer than half the frame would make the gain
            // envelope overlap itself.
            let crossfade = self.crossfade_secs.min(frame.duration_secs / 2.0);
            let start_time = self.next_start_time.max(now + self.safety_epsilon_secs);
            let duration = frame.duration_secs;

            sink.schedule(
                frame,
                ScheduledFrame {
                    start_time,
                    duration_secs: duration,
                    crossfade_secs: crossfade,
                    volume: self.volume,
                },
            );
            self.next_start_time = start_time + duration - crossfade;
            self.started = true;
            scheduled += 1;
        }
        scheduled
    }

    /// True when playback has started but the queue ran dry behind the
    /// cursor, i.e. the output is about to go silent.
    pub fn is_starved(&self, now: f64) -> bool {
        self.started && self.queue.is_empty() && self.next_start_time <= now
    }

    /// Reset starvation detection after a dropout has been recorded, so a
    /// single starvation episode is counted once.
    pub fn acknowledge_starvation(&mut self) {
        self.started = false;
    }

    pub fn set_crossfade(&mut self, crossfade_secs: f64) {
        self.crossfade_secs = crossfade_secs;
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Discard queued frames. The cursor keeps its value so it stays
    /// monotonic even across a stop/start cycle.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.started = false;
    }
}
