use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub interpretation_url: Option<String>,
    pub generation_url: Option<String>,
    pub api_key: Option<String>,
    pub wallet_address: Option<String>,

    // Feature configs
    pub interpreter: Option<InterpreterConfig>,
    pub link: Option<LinkConfig>,
    pub session: Option<SessionConfig>,
    pub playback: Option<PlaybackConfig>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct InterpreterConfig {
    pub smoothing_alpha: Option<f64>,
    pub magnitude_ceiling: Option<f64>,
    pub energy_floor: Option<f64>,
    pub transition_threshold: Option<f64>,
    pub history_len: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LinkConfig {
    pub min_interval_ms: Option<u64>,
    pub max_interval_ms: Option<u64>,
    pub offline_queue_size: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub reconnect_max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_timeout_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub lookahead_ms: Option<u64>,
    pub safety_epsilon_ms: Option<u64>,
    pub crossfade_ms: Option<u64>,
    pub min_buffer_depth: Option<usize>,
    pub max_buffer_depth: Option<usize>,
    pub jitter_threshold_ms: Option<u64>,
    pub predictive_sizing: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: Option<bool>,
    pub queue_size: Option<usize>,
    pub max_recording_bytes: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
