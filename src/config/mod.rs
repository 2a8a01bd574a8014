mod file_config;

pub use file_config::{
    FileConfig, InterpreterConfig, LinkConfig, PlaybackConfig, SessionConfig, StorageConfig,
};

use anyhow::{bail, Result};

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub interpretation_url: Option<String>,
    pub generation_url: Option<String>,
    pub api_key: Option<String>,
    pub wallet_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub interpretation_url: String,
    pub generation_url: String,
    pub api_key: Option<String>,
    pub wallet_address: Option<String>,

    // Feature configs (with defaults)
    pub interpreter: InterpreterSettings,
    pub link: LinkSettings,
    pub session: SessionSettings,
    pub playback: PlaybackSettings,
    pub storage: StorageSettings,
}

/// Tunables for the sensor interpreter.
///
/// The numeric defaults are representative, not bit-exact requirements;
/// deployments tune them via the TOML config.
#[derive(Debug, Clone)]
pub struct InterpreterSettings {
    /// Single-pole low-pass smoothing factor applied to the raw magnitude.
    pub smoothing_alpha: f64,
    /// Raw magnitude value that maps to a normalized energy of 1.0.
    pub magnitude_ceiling: f64,
    /// Minimum energy level after the floor boost, so minimal motion still
    /// produces music.
    pub energy_floor: f64,
    /// Magnitude delta above which a style change emits a weighted blend.
    pub transition_threshold: f64,
    /// Capacity of the rolling history used for smoothing.
    pub history_len: usize,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.5,
            magnitude_ceiling: 20.0,
            energy_floor: 0.3,
            transition_threshold: 0.08,
            history_len: 16,
        }
    }
}

/// Tunables for the rate-limited interpretation link.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Lower clamp for the adaptive send interval.
    pub min_interval_ms: u64,
    /// Upper clamp for the adaptive send interval.
    pub max_interval_ms: u64,
    /// Capacity of the offline sample ring (oldest dropped first).
    pub offline_queue_size: usize,
    /// Outstanding request timeout; on expiry the request resolves as a
    /// failure and `pending_response` is cleared.
    pub request_timeout_secs: u64,
    /// Connection attempt timeout; expiry counts as a connection failure.
    pub connect_timeout_secs: u64,
    /// Initial reconnect backoff delay.
    pub reconnect_initial_ms: u64,
    /// Cap for the exponential reconnect backoff.
    pub reconnect_max_ms: u64,
    /// Attempts before the link gives up until explicitly reset.
    pub reconnect_max_attempts: u32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
            max_interval_ms: 10_000,
            offline_queue_size: 100,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 30_000,
            reconnect_max_attempts: 10,
        }
    }
}

/// Tunables for the generative-audio session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout_secs: u64,
    /// Fixed auto-reconnect delay, intentionally distinct from the link's
    /// exponential backoff.
    pub reconnect_delay_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            reconnect_delay_secs: 4,
        }
    }
}

/// Tunables for the adaptive playback buffer.
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// How far ahead of the output clock frames are scheduled.
    pub lookahead_ms: u64,
    /// Frames are never scheduled earlier than now + epsilon.
    pub safety_epsilon_ms: u64,
    /// Overlap between consecutive frames.
    pub crossfade_ms: u64,
    /// Lower bound for the adaptive buffer depth.
    pub min_buffer_depth: usize,
    /// Upper bound for the adaptive buffer depth.
    pub max_buffer_depth: usize,
    /// Inter-arrival delta above which an arrival counts as jittery.
    pub jitter_threshold_ms: u64,
    /// Whether the musical-context predictive sizing strategy is consulted.
    pub predictive_sizing: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            lookahead_ms: 100,
            safety_epsilon_ms: 5,
            crossfade_ms: 50,
            min_buffer_depth: 2,
            max_buffer_depth: 12,
            jitter_threshold_ms: 150,
            predictive_sizing: true,
        }
    }
}

/// Tunables for the chunk-storage hand-off.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub enabled: bool,
    pub queue_size: usize,
    /// Upper bound on the in-memory session recording; frames past the cap
    /// are dropped, not accumulated.
    pub max_recording_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_size: 256,
            max_recording_bytes: 256 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let interpretation_url = file
            .interpretation_url
            .or_else(|| cli.interpretation_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "interpretation_url must be specified via --interpretation-url or in config file"
                )
            })?;

        let generation_url = file
            .generation_url
            .or_else(|| cli.generation_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "generation_url must be specified via --generation-url or in config file"
                )
            })?;

        for url in [&interpretation_url, &generation_url] {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                bail!("Backend URL must be a ws:// or wss:// URL, got: {}", url);
            }
        }

        let api_key = file.api_key.or_else(|| cli.api_key.clone());
        let wallet_address = file.wallet_address.or_else(|| cli.wallet_address.clone());

        // Interpreter settings - merge file config with defaults
        let it_file = file.interpreter.unwrap_or_default();
        let it_defaults = InterpreterSettings::default();
        let interpreter = InterpreterSettings {
            smoothing_alpha: it_file.smoothing_alpha.unwrap_or(it_defaults.smoothing_alpha),
            magnitude_ceiling: it_file
                .magnitude_ceiling
                .unwrap_or(it_defaults.magnitude_ceiling),
            energy_floor: it_file.energy_floor.unwrap_or(it_defaults.energy_floor),
            transition_threshold: it_file
                .transition_threshold
                .unwrap_or(it_defaults.transition_threshold),
            history_len: it_file.history_len.unwrap_or(it_defaults.history_len),
        };
        if !(0.0..=1.0).contains(&interpreter.smoothing_alpha) {
            bail!(
                "interpreter.smoothing_alpha must be in [0, 1], got {}",
                interpreter.smoothing_alpha
            );
        }
        if !(0.0..1.0).contains(&interpreter.energy_floor) {
            bail!(
                "interpreter.energy_floor must be in [0, 1), got {}",
                interpreter.energy_floor
            );
        }

        let link_file = file.link.unwrap_or_default();
        let link_defaults = LinkSettings::default();
        let link = LinkSettings {
            min_interval_ms: link_file
                .min_interval_ms
                .unwrap_or(link_defaults.min_interval_ms),
            max_interval_ms: link_file
                .max_interval_ms
                .unwrap_or(link_defaults.max_interval_ms),
            offline_queue_size: link_file
                .offline_queue_size
                .unwrap_or(link_defaults.offline_queue_size),
            request_timeout_secs: link_file
                .request_timeout_secs
                .unwrap_or(link_defaults.request_timeout_secs),
            connect_timeout_secs: link_file
                .connect_timeout_secs
                .unwrap_or(link_defaults.connect_timeout_secs),
            reconnect_initial_ms: link_file
                .reconnect_initial_ms
                .unwrap_or(link_defaults.reconnect_initial_ms),
            reconnect_max_ms: link_file
                .reconnect_max_ms
                .unwrap_or(link_defaults.reconnect_max_ms),
            reconnect_max_attempts: link_file
                .reconnect_max_attempts
                .unwrap_or(link_defaults.reconnect_max_attempts),
        };
        if link.min_interval_ms > link.max_interval_ms {
            bail!(
                "link.min_interval_ms ({}) must not exceed link.max_interval_ms ({})",
                link.min_interval_ms,
                link.max_interval_ms
            );
        }

        let session_file = file.session.unwrap_or_default();
        let session_defaults = SessionSettings::default();
        let session = SessionSettings {
            connect_timeout_secs: session_file
                .connect_timeout_secs
                .unwrap_or(session_defaults.connect_timeout_secs),
            reconnect_delay_secs: session_file
                .reconnect_delay_secs
                .unwrap_or(session_defaults.reconnect_delay_secs),
        };

        let pb_file = file.playback.unwrap_or_default();
        let pb_defaults = PlaybackSettings::default();
        let playback = PlaybackSettings {
            sample_rate: pb_file.sample_rate.unwrap_or(pb_defaults.sample_rate),
            channels: pb_file.channels.unwrap_or(pb_defaults.channels),
            lookahead_ms: pb_file.lookahead_ms.unwrap_or(pb_defaults.lookahead_ms),
            safety_epsilon_ms: pb_file
                .safety_epsilon_ms
                .unwrap_or(pb_defaults.safety_epsilon_ms),
            crossfade_ms: pb_file.crossfade_ms.unwrap_or(pb_defaults.crossfade_ms),
            min_buffer_depth: pb_file
                .min_buffer_depth
                .unwrap_or(pb_defaults.min_buffer_depth),
            max_buffer_depth: pb_file
                .max_buffer_depth
                .unwrap_or(pb_defaults.max_buffer_depth),
            jitter_threshold_ms: pb_file
                .jitter_threshold_ms
                .unwrap_or(pb_defaults.jitter_threshold_ms),
            predictive_sizing: pb_file
                .predictive_sizing
                .unwrap_or(pb_defaults.predictive_sizing),
        };
        if playback.sample_rate == 0 {
            bail!("playback.sample_rate must be at least 1");
        }
        if playback.channels == 0 {
            bail!("playback.channels must be at least 1");
        }
        if playback.min_buffer_depth > playback.max_buffer_depth {
            bail!(
                "playback.min_buffer_depth ({}) must not exceed playback.max_buffer_depth ({})",
                playback.min_buffer_depth,
                playback.max_buffer_depth
            );
        }

        let st_file = file.storage.unwrap_or_default();
        let st_defaults = StorageSettings::default();
        let storage = StorageSettings {
            enabled: st_file.enabled.unwrap_or(st_defaults.enabled),
            queue_size: st_file.queue_size.unwrap_or(st_defaults.queue_size),
            max_recording_bytes: st_file
                .max_recording_bytes
                .unwrap_or(st_defaults.max_recording_bytes),
        };

        Ok(Self {
            interpretation_url,
            generation_url,
            api_key,
            wallet_address,
            interpreter,
            link,
            session,
            playback,
            storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_urls() -> CliConfig {
        CliConfig {
            interpretation_url: Some("ws://localhost:9001/interpret".to_string()),
            generation_url: Some("ws://localhost:9002/generate".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&cli_with_urls(), None).unwrap();

        assert_eq!(config.interpretation_url, "ws://localhost:9001/interpret");
        assert_eq!(config.link.min_interval_ms, 1000);
        assert_eq!(config.link.reconnect_max_ms, 30_000);
        assert_eq!(config.playback.sample_rate, 48_000);
        assert_eq!(config.playback.lookahead_ms, 100);
        assert_eq!(config.interpreter.energy_floor, 0.3);
    }

    #[test]
    fn test_resolve_missing_urls_fails() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_rejects_non_ws_url() {
        let cli = CliConfig {
            interpretation_url: Some("http://localhost:9001".to_string()),
            generation_url: Some("ws://localhost:9002".to_string()),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_file_overrides_cli() {
        let file = FileConfig {
            interpretation_url: Some("ws://other:9001".to_string()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli_with_urls(), Some(file)).unwrap();
        assert_eq!(config.interpretation_url, "ws://other:9001");
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let file = FileConfig {
            playback: Some(PlaybackConfig {
                sample_rate: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_with_urls(), Some(file)).is_err());
    }

    #[test]
    fn test_invalid_interval_bounds_rejected() {
        let file = FileConfig {
            link: Some(LinkConfig {
                min_interval_ms: Some(5000),
                max_interval_ms: Some(1000),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_with_urls(), Some(file)).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
            interpretation_url = "ws://host:1/i"
            generation_url = "ws://host:2/g"

            [link]
            min_interval_ms = 500

            [playback]
            crossfade_ms = 80
        "#;
        let file: FileConfig = toml::from_str(toml_str).unwrap();
        let config = AppConfig::resolve(&CliConfig::default(), Some(file)).unwrap();
        assert_eq!(config.link.min_interval_ms, 500);
        assert_eq!(config.playback.crossfade_ms, 80);
        // Untouched fields keep defaults
        assert_eq!(config.link.max_interval_ms, 10_000);
    }
}
