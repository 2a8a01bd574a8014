//! Buffer health tracking and adaptive depth control.
//!
//! Inter-arrival jitter grows the buffer depth toward the cap; sustained calm
//! shrinks it back toward the low-latency floor. An optional predictive bias
//! nudges the target depth from the current musical context and degrades to
//! plain jitter-driven sizing when no interpretation is available.

use serde::Serialize;

use crate::config::PlaybackSettings;
use crate::interpreter::Interpretation;

/// Weight of the previous inter-arrival EMA when folding in a new interval.
const INTERVAL_EMA_RETAIN: f64 = 0.8;
/// Smooth arrivals in a row before the depth shrinks one step.
const SHRINK_STREAK: u32 = 8;

/// Observable buffer health, recomputed on every ingested frame.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BufferHealth {
    pub jitter_count: u64,
    pub dropout_count: u64,
    /// Fraction of arrivals that were within the jitter threshold.
    pub smoothness_score: f64,
    pub adaptive_depth: usize,
}

/// Tracks arrival timing and derives the adaptive buffer depth.
pub struct HealthTracker {
    jitter_threshold_secs: f64,
    min_depth: usize,
    max_depth: usize,
    predictive_enabled: bool,
    last_arrival: Option<f64>,
    interval_ema: f64,
    smooth_streak: u32,
    total_arrivals: u64,
    smooth_arrivals: u64,
    musical_bias: i64,
    health: BufferHealth,
}

impl HealthTracker {
    pub fn new(settings: &PlaybackSettings) -> Self {
        Self {
            jitter_threshold_secs: settings.jitter_threshold_ms as f64 / 1000.0,
            min_depth: settings.min_buffer_depth,
            max_depth: settings.max_buffer_depth,
            predictive_enabled: settings.predictive_sizing,
            last_arrival: None,
            interval_ema: 0.0,
            smooth_streak: 0,
            total_arrivals: 0,
            smooth_arrivals: 0,
            musical_bias: 0,
            health: BufferHealth {
                jitter_count: 0,
                dropout_count: 0,
                smoothness_score: 1.0,
                adaptive_depth: settings.min_buffer_depth,
            },
        }
    }

    /// Record one frame arrival at `now` on the output timeline.
    pub fn on_frame_arrival(&mut self, now: f64) {
        if let Some(last) = self.last_arrival {
            let interval = now - last;
            self.total_arrivals += 1;

            if self.interval_ema == 0.0 {
                self.interval_ema = interval;
                self.smooth_arrivals += 1;
            } else if (interval - self.interval_ema).abs() > self.jitter_threshold_secs {
                self.health.jitter_count += 1;
                self.smooth_streak = 0;
                self.grow();
            } else {
                self.smooth_arrivals += 1;
                self.smooth_streak += 1;
                if self.smooth_streak >= SHRINK_STREAK {
                    self.smooth_streak = 0;
                    self.shrink();
                }
            }

            self.interval_ema = self.interval_ema * INTERVAL_EMA_RETAIN
                + interval * (1.0 - INTERVAL_EMA_RETAIN);
            self.health.smoothness_score = if self.total_arrivals == 0 {
                1.0
            } else {
                self.smooth_arrivals as f64 / self.total_arrivals as f64
            };
        }
        self.last_arrival = Some(now);
    }

    /// Record that the scheduler ran dry while playback was expected.
    pub fn on_dropout(&mut self) {
        self.health.dropout_count += 1;
        self.smooth_streak = 0;
        self.grow();
    }

    /// Advisory bias from the current musical context: fast/dense styles get
    /// deeper buffers, sparse/slow ones shallower.
    pub fn apply_musical_bias(&mut self, interpretation: &Interpretation) {
        if !self.predictive_enabled {
            return;
        }
        let config = &interpretation.generation_config;
        self.musical_bias = if config.bpm >= 130 || config.density >= 0.7 {
            2
        } else if config.bpm <= 90 && config.density <= 0.4 {
            -1
        } else {
            0
        };
    }

    /// Depth the scheduler should aim for, bias included, always inside
    /// [min_depth, max_depth].
    pub fn target_depth(&self) -> usize {
        let biased = self.health.adaptive_depth as i64 + self.musical_bias;
        biased.clamp(self.min_depth as i64, self.max_depth as i64) as usize
    }

    pub fn health(&self) -> BufferHealth {
        BufferHealth {
            adaptive_depth: self.target_depth(),
            ..self.health.clone()
        }
    }

    /// Forget arrival history, e.g. across a session stop.
    pub fn reset(&mut self) {
        self.last_arrival = None;
        self.interval_ema = 0.0;
        self.smooth_streak = 0;
        self.musical_bias = 0;
        self.health.adaptive_depth = self.min_depth;
    }

    fn grow(&mut self) {
        self.health.adaptive_depth = (self.health.adaptive_depth + 1).min(self.max_depth);
    }

    fn shrink(&mut self) {
        self.health.adaptive_depth = self.health.adaptive_depth.saturating_sub(1).max(self.min_depth);
    }
}
