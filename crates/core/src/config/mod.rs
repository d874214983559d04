use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, TessellationError, TransformKind};

/// Deepest subdivision a session accepts. Vertex counts grow as `3·4^(c-1)`,
/// so depth 8 already yields 49 152 vertices.
pub const MAX_COMPLEXITY: u32 = 8;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pattern: PatternConfig,
    pub frame: FrameConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Parses a (possibly partial) JSON document. Missing sections fall back
    /// to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.session.validate()
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Geometry parameters for the pattern engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Edge length of the base triangle.
    pub base_size: f64,
    /// Radians of rotation per second of wall-clock time.
    pub rotation_rate: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            base_size: 0.8,
            rotation_rate: 1.0,
        }
    }
}

/// Frame pacing thresholds, in frames per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub target_fps: f64,
    pub min_fps: f64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            min_fps: 30.0,
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate reported by the offline backend.
    pub sample_rate: u32,
    pub master_gain: f32,
    pub base_frequency: f32,
    pub ratios: Vec<f32>,
    pub envelope: EnvelopeConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            master_gain: 0.5,
            // A3
            base_frequency: 220.0,
            ratios: vec![1.0, 1.125, 1.25, 1.5, 1.667],
            envelope: EnvelopeConfig::default(),
        }
    }
}

/// Amplitude envelope applied to every tone event. Times are in seconds
/// relative to the tone's start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub attack: f64,
    pub peak: f32,
    pub floor: f32,
    pub duration: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack: 0.1,
            peak: 0.1,
            floor: 0.001,
            duration: 0.5,
        }
    }
}

/// Initial control values for a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub complexity: u32,
    pub transform: TransformKind,
    pub muted: bool,
}

impl SessionConfig {
    /// Checks that the initial complexity lies in `1..=MAX_COMPLEXITY`.
    pub fn validate(&self) -> Result<()> {
        if (1..=MAX_COMPLEXITY).contains(&self.complexity) {
            Ok(())
        } else {
            Err(TessellationError::InvalidComplexity(self.complexity))
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            complexity: 3,
            transform: TransformKind::Rotation,
            muted: false,
        }
    }
}
