//! Data types for motion samples and the interpretations derived from them.

use serde::{Deserialize, Serialize};

/// A single motion/pointer sample from a platform sensor adapter.
///
/// Ephemeral: consumed immediately by the interpreter, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MotionSample {
    pub axis_x: f64,
    pub axis_y: f64,
    pub axis_z: f64,
    /// Milliseconds since epoch, as stamped by the sensor adapter.
    pub timestamp: i64,
    /// Identifies the producing sensor ("accelerometer", "pointer", ...).
    pub source_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
}

impl MotionSample {
    pub fn new(axis_x: f64, axis_y: f64, axis_z: f64, timestamp: i64, source_tag: &str) -> Self {
        Self {
            axis_x,
            axis_y,
            axis_z,
            timestamp,
            source_tag: source_tag.to_string(),
            velocity: None,
            acceleration: None,
            pressure: None,
        }
    }

    /// True when every axis carries a usable finite value.
    pub fn is_well_formed(&self) -> bool {
        self.axis_x.is_finite() && self.axis_y.is_finite() && self.axis_z.is_finite()
    }
}

/// A style descriptor with its blend weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightedStyle {
    pub text: String,
    pub weight: f64,
}

/// Per-part mute switches forwarded to the generative backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MuteFlags {
    pub mute_bass: bool,
    pub mute_drums: bool,
    pub only_bass_and_drums: bool,
}

/// Numeric generation parameters sent to the generative-audio backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub bpm: u32,
    /// Note density in [0, 1].
    pub density: f64,
    /// Timbral brightness in [0, 1].
    pub brightness: f64,
    pub temperature: f64,
    pub guidance: f64,
    #[serde(default)]
    pub mute_flags: MuteFlags,
}

/// The structured musical control signal derived from a motion sample.
///
/// Immutable once produced; each new sample (or smoothing window) supersedes
/// the previous interpretation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interpretation {
    pub style_text: String,
    /// Ordered blend; weights sum to 1 when a transition is active.
    pub weighted_styles: Vec<WeightedStyle>,
    pub generation_config: GenerationConfig,
    /// Normalized energy level in [0, 1].
    pub magnitude: f64,
    pub has_transition: bool,
    pub timestamp: i64,
}

impl Interpretation {
    /// Fixed fallback used whenever interpretation cannot proceed; the
    /// pipeline must keep producing music rather than fail.
    pub fn fallback(timestamp: i64) -> Self {
        let style = "ambient soundscape, warm pads".to_string();
        Self {
            style_text: style.clone(),
            weighted_styles: vec![WeightedStyle {
                text: style,
                weight: 1.0,
            }],
            generation_config: GenerationConfig {
                bpm: 80,
                density: 0.4,
                brightness: 0.5,
                temperature: 1.1,
                guidance: 4.0,
                mute_flags: MuteFlags::default(),
            },
            magnitude: 0.3,
            has_transition: false,
            timestamp,
        }
    }
}
