//! Sensor interpretation: maps raw motion samples to musical control
//! parameters.
//!
//! The interpreter is pure apart from a short rolling history used for
//! smoothing and transition detection. It never fails: a malformed sample
//! yields a fixed fallback interpretation so the pipeline keeps producing
//! music.

mod genres;
mod models;

pub use genres::{bucket_for_energy, GenreBucket, GENRE_BUCKETS};
pub use models::{GenerationConfig, Interpretation, MotionSample, MuteFlags, WeightedStyle};

use std::collections::VecDeque;

use tracing::warn;

use crate::config::InterpreterSettings;

use genres::{AXIS_X_TOKENS, AXIS_Y_TOKENS, AXIS_Z_TOKENS};

/// Axis intensity below this fraction of the ceiling contributes no token.
const TOKEN_SILENCE_THRESHOLD: f64 = 0.05;
/// Axis intensity tiers selecting the low/mid/high keyword of a category.
const TOKEN_TIER_MID: f64 = 0.2;
const TOKEN_TIER_HIGH: f64 = 0.5;

#[derive(Debug, Clone)]
struct HistoryEntry {
    energy: f64,
    style_text: String,
}

/// Maps motion samples to [`Interpretation`]s.
///
/// One instance per session; call [`Interpreter::reset`] between sessions so
/// smoothing state does not leak across them.
pub struct Interpreter {
    settings: InterpreterSettings,
    history: VecDeque<HistoryEntry>,
    smoothed_magnitude: f64,
}

impl Interpreter {
    pub fn new(settings: InterpreterSettings) -> Self {
        Self {
            settings,
            history: VecDeque::new(),
            smoothed_magnitude: 0.0,
        }
    }

    /// Clear smoothing and transition state.
    pub fn reset(&mut self) {
        self.history.clear();
        self.smoothed_magnitude = 0.0;
    }

    /// Derive the musical control signal for one sample.
    ///
    /// Deterministic given the rolling history. Malformed samples (non-finite
    /// axes) produce [`Interpretation::fallback`] instead of an error.
    pub fn interpret(&mut self, sample: &MotionSample) -> Interpretation {
        if !sample.is_well_formed() {
            warn!(
                "Malformed motion sample from {:?}, using fallback interpretation",
                sample.source_tag
            );
            return Interpretation::fallback(sample.timestamp);
        }

        // 1. Euclidean magnitude, low-passed against the previous value.
        let raw = (sample.axis_x.powi(2) + sample.axis_y.powi(2) + sample.axis_z.powi(2)).sqrt();
        self.smoothed_magnitude += self.settings.smoothing_alpha * (raw - self.smoothed_magnitude);

        // 2. Saturating normalize, then floor boost so minimal motion still
        // maps to a nonzero energy level.
        let normalized = (self.smoothed_magnitude / self.settings.magnitude_ceiling).clamp(0.0, 1.0);
        let floor = self.settings.energy_floor;
        let energy = floor + (1.0 - floor) * normalized;

        // 3./4. Bucket selection on the boosted energy; parameter
        // interpolation on the pre-boost normalized level, so idle motion sits
        // at the bottom of the lowest bucket instead of the middle of it.
        let bucket = bucket_for_energy(energy);
        let generation_config = GenerationConfig {
            bpm: lerp(bucket.bpm_min as f64, bucket.bpm_max as f64, normalized).round() as u32,
            density: lerp(bucket.density_min, bucket.density_max, normalized),
            brightness: lerp(bucket.brightness_min, bucket.brightness_max, normalized),
            temperature: 1.0 + 0.4 * normalized,
            guidance: 5.0 - 2.0 * normalized,
            mute_flags: MuteFlags::default(),
        };

        // 5. Per-axis keyword correlation.
        let mut tokens: Vec<&str> = Vec::new();
        for (axis, category) in [
            (sample.axis_x, &AXIS_X_TOKENS),
            (sample.axis_y, &AXIS_Y_TOKENS),
            (sample.axis_z, &AXIS_Z_TOKENS),
        ] {
            if let Some(token) = self.axis_token(axis, category) {
                if !tokens.contains(&token) {
                    tokens.push(token);
                }
            }
        }
        let style_text = if tokens.is_empty() {
            bucket.name.to_string()
        } else {
            format!("{}, {}", bucket.name, tokens.join(", "))
        };

        // 6. Transition blend when the style changed and the energy moved
        // past the transition threshold.
        let previous = self.history.back();
        let has_transition = previous.is_some_and(|prev| {
            prev.style_text != style_text
                && (energy - prev.energy).abs() > self.settings.transition_threshold
        });
        let weighted_styles = if has_transition {
            let prev = previous.expect("transition requires a previous entry");
            // Bias toward the new style proportionally to the energy level.
            let new_weight = (0.5 + 0.5 * energy).min(0.95);
            vec![
                WeightedStyle {
                    text: prev.style_text.clone(),
                    weight: 1.0 - new_weight,
                },
                WeightedStyle {
                    text: style_text.clone(),
                    weight: new_weight,
                },
            ]
        } else {
            vec![WeightedStyle {
                text: style_text.clone(),
                weight: 1.0,
            }]
        };

        self.history.push_back(HistoryEntry {
            energy,
            style_text: style_text.clone(),
        });
        while self.history.len() > self.settings.history_len {
            self.history.pop_front();
        }

        Interpretation {
            style_text,
            weighted_styles,
            generation_config,
            magnitude: energy,
            has_transition,
            timestamp: sample.timestamp,
        }
    }

    fn axis_token(&self, axis: f64, category: &[&'static str; 3]) -> Option<&'static str> {
        let intensity = (axis.abs() / self.settings.magnitude_ceiling).clamp(0.0, 1.0);
        if intensity < TOKEN_SILENCE_THRESHOLD {
            None
        } else if intensity < TOKEN_TIER_MID {
            Some(category[0])
        } else if intensity < TOKEN_TIER_HIGH {
            Some(category[1])
        } else {
            Some(category[2])
        }
    }
}

fn lerp(min: f64, max: f64, fraction: f64) -> f64 {
    min + (max - min) * fraction.clamp(0.0, 1.0)
}
