//! Configuration file and command line.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use clap::Parser;
use serde::{Deserialize, Serialize};
use voxlink_network::ClientConfig;
use voxlink_utils::signal::{Gain, NoiseGate};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Settings of the local audio collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Frequency of the synthesized capture signal.
    pub tone_hz: f64,
    /// Noise gate threshold applied to captured samples, `0` disables it.
    pub noise_gate: u32,
    /// Gain applied to played back samples.
    pub gain: f32,
    /// Raw PCM output file, played back audio is discarded if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            tone_hz: 440.,
            noise_gate: NoiseGate::DEFAULT_THRESHOLD,
            gain: Gain::DEFAULT,
            output: None,
        }
    }
}

/// Everything a configuration file may contain.
///
/// Transport settings live at the top level, audio settings in an `[audio]` table:
///
/// ```toml
/// uri = "ws://10.0.0.2:8080/websocket/1"
/// reconnect_delay_ms = 2000
///
/// [audio]
/// gain = 2.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(flatten)]
    pub client: ClientConfig,
    pub audio: AudioSettings,
}

impl Settings {
    pub fn from_toml(s: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;

        Self::from_toml(&contents)
    }
}

/// Streams a test tone to a voxlink audio server, and plays back its response.
#[derive(Debug, Default, Parser)]
#[command(version, about)]
pub struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server URI, `ws://host[:port][/path]`.
    #[arg(short, long)]
    pub uri: Option<String>,

    /// Write played back audio (raw 32-bit little endian PCM) to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Frequency of the test tone, in Hz.
    #[arg(long)]
    pub tone_hz: Option<f64>,

    /// Noise gate threshold, 0 disables the gate.
    #[arg(long)]
    pub noise_gate: Option<u32>,

    /// Playback gain, between 0 and 5.
    #[arg(long)]
    pub gain: Option<f32>,

    /// Validate the server's upgrade response.
    #[arg(long)]
    pub strict_handshake: bool,

    /// Stop after this many seconds instead of running forever.
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    pub dump_config: bool,
}

impl Args {
    /// Loads the configuration file, if any, and applies command line overrides.
    pub fn settings(&self) -> Result<Settings, SettingsError> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };

        self.apply(&mut settings);

        Ok(settings)
    }

    fn apply(&self, settings: &mut Settings) {
        if let Some(uri) = &self.uri {
            settings.client.uri.clone_from(uri);
        }

        if self.strict_handshake {
            settings.client.strict_handshake = true;
        }

        let audio = &mut settings.audio;

        if let Some(output) = &self.output {
            audio.output = Some(output.clone());
        }

        if let Some(tone_hz) = self.tone_hz {
            audio.tone_hz = tone_hz;
        }

        if let Some(noise_gate) = self.noise_gate {
            audio.noise_gate = noise_gate;
        }

        if let Some(gain) = self.gain {
            audio.gain = gain;
        }
    }
}
