use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::{Direction, StreamSpec, DEFAULT_PREBUFFER_FRAMES, DEFAULT_RING_BUFFER_FRAMES};

/// Returns the path to the settings file: `~/.config/audiobridge-rs/settings.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("audiobridge-rs");
    path.push("settings.json");
    path
}

/// Persisted stream settings.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Stream
    pub stream_name: String,
    pub description: String,
    pub channel_names: Vec<String>,
    pub channels: u16,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub direction: Direction,

    // Latency
    pub prebuffer_frames: usize,
    pub ring_buffer_frames: usize,

    // Demo
    pub tone_frequency: f32,
    pub tone_gain: f32,
    pub duration_secs: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stream_name: "audiobridge".to_string(),
            description: "Audio Bridge".to_string(),
            channel_names: vec!["FL".to_string(), "FR".to_string()],
            channels: 2,
            sample_rate: 48000,
            buffer_size: 256,
            direction: Direction::Output,

            prebuffer_frames: DEFAULT_PREBUFFER_FRAMES,
            ring_buffer_frames: DEFAULT_RING_BUFFER_FRAMES,

            tone_frequency: 440.0,
            tone_gain: 0.2,
            duration_secs: 5.0,
        }
    }
}

impl Settings {
    /// Load settings from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::load_from(&settings_path())
    }

    /// Load settings from `path`, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to disk as pretty JSON.
    pub fn save(&self) {
        if let Err(e) = self.save_to(&settings_path()) {
            log::warn!("Failed to write settings: {}", e);
        }
    }

    /// Save settings to `path` as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    /// Stream description for a transport
    pub fn stream_spec(&self) -> StreamSpec {
        StreamSpec::new(
            self.stream_name.clone(),
            self.channels,
            self.sample_rate,
            self.buffer_size,
        )
        .direction(self.direction)
        .channel_names(self.channel_names.iter().cloned())
        .description(self.description.clone())
    }
}
