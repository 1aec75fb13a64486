//! Server settings (JSON file, overridable from the environment).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use omnivox_core::{BufferingMode, EngineConfig, VoiceChannel};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 22222;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Settings {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: u32,
    pub queue_capacity: usize,
    pub buffering: BufferingMode,
    pub ring_capacity_frames: usize,
    pub stream_write_timeout_ms: u64,
    pub voice_channel: VoiceChannel,
    pub dump_dir: Option<PathBuf>,
    pub preferred_output_device: Option<String>,
    pub rate_wpm: u32,
    pub sync_timeout_ms: u64,
    /// Accept commands over TCP in addition to stdin.
    pub listen: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            sample_rate: engine.sample_rate,
            channels: engine.channels,
            frames_per_buffer: engine.frames_per_buffer,
            queue_capacity: engine.queue_capacity,
            buffering: engine.buffering,
            ring_capacity_frames: engine.ring_capacity_frames,
            stream_write_timeout_ms: engine.stream_write_timeout.as_millis() as u64,
            voice_channel: engine.voice_channel,
            dump_dir: None,
            preferred_output_device: None,
            rate_wpm: 180,
            sync_timeout_ms: 30_000,
            listen: false,
            bind_address: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.channels = self.channels.clamp(1, 2);
        self.frames_per_buffer = self.frames_per_buffer.clamp(32, 8_192);
        self.queue_capacity = self.queue_capacity.clamp(1, 64);
        self.ring_capacity_frames = self.ring_capacity_frames.clamp(1_024, 1 << 22);
        self.stream_write_timeout_ms = self.stream_write_timeout_ms.min(60_000);
        self.rate_wpm = self.rate_wpm.clamp(75, 600);
        self.sync_timeout_ms = self.sync_timeout_ms.clamp(100, 600_000);
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        self.bind_address = self.bind_address.trim().to_string();
        if self.bind_address.is_empty() {
            self.bind_address = "0.0.0.0".into();
        }
        self.preferred_output_device = self
            .preferred_output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.dump_dir = self
            .dump_dir
            .take()
            .filter(|d| !d.as_os_str().is_empty());
    }

    /// `OMNIVOX_LISTEN` (any non-empty value other than `0`/`false`) turns the
    /// TCP listener on; `OMNIVOX_PORT` picks its port.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("OMNIVOX_LISTEN").ok(),
            std::env::var("OMNIVOX_PORT").ok(),
        );
    }

    fn apply_overrides(&mut self, listen: Option<String>, port: Option<String>) {
        if let Some(raw) = listen {
            let raw = raw.trim().to_ascii_lowercase();
            self.listen = !(raw.is_empty() || raw == "0" || raw == "false");
        }
        if let Some(raw) = port {
            match raw.trim().parse::<u16>() {
                Ok(p) if p != 0 => self.port = p,
                _ => tracing::warn!("ignoring invalid OMNIVOX_PORT value '{raw}'"),
            }
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frames_per_buffer: self.frames_per_buffer,
            queue_capacity: self.queue_capacity,
            buffering: self.buffering,
            ring_capacity_frames: self.ring_capacity_frames,
            stream_write_timeout: Duration::from_millis(self.stream_write_timeout_ms),
            voice_channel: self.voice_channel,
            dump_dir: self.dump_dir.clone(),
            preferred_output_device: self.preferred_output_device.clone(),
            ..EngineConfig::default()
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

/// `OMNIVOX_CONFIG` if set, otherwise the platform data directory.
pub fn settings_path() -> PathBuf {
    std::env::var_os("OMNIVOX_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path)
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Omnivox")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("omnivox")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> Settings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| match serde_json::from_str::<Settings>(&raw) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(path = %path.display(), "invalid settings file, using defaults: {e}");
                None
            }
        })
        .unwrap_or_default();
    settings.normalize();
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let s: Settings =
            serde_json::from_str(r#"{"queueCapacity": 8, "voiceChannel": "both"}"#).unwrap();
        assert_eq!(s.queue_capacity, 8);
        assert_eq!(s.voice_channel, VoiceChannel::Both);
        assert_eq!(s.sample_rate, 11_025);
        assert_eq!(s.port, DEFAULT_PORT);
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut s = Settings {
            channels: 6,
            queue_capacity: 0,
            rate_wpm: 2_000,
            port: 0,
            preferred_output_device: Some("   ".into()),
            ..Settings::default()
        };
        s.normalize();
        assert_eq!(s.channels, 2);
        assert_eq!(s.queue_capacity, 1);
        assert_eq!(s.rate_wpm, 600);
        assert_eq!(s.port, DEFAULT_PORT);
        assert!(s.preferred_output_device.is_none());
    }

    #[test]
    fn env_overrides_enable_listener() {
        let mut s = Settings::default();
        s.apply_overrides(Some("1".into()), Some("4000".into()));
        assert!(s.listen);
        assert_eq!(s.port, 4000);

        s.apply_overrides(Some("false".into()), Some("not-a-port".into()));
        assert!(!s.listen);
        assert_eq!(s.port, 4000);
    }

    #[test]
    fn engine_config_carries_buffering_mode() {
        let s: Settings = serde_json::from_str(r#"{"buffering": "stream"}"#).unwrap();
        let config = s.engine_config();
        assert_eq!(config.buffering, BufferingMode::Stream);
        assert_eq!(config.stream_write_timeout, Duration::from_secs(2));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let s = load_settings(Path::new("/nonexistent/omnivox/settings.json"));
        assert_eq!(s.queue_capacity, 5);
    }
}
