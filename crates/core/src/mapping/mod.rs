use serde::{Deserialize, Serialize};

use crate::config::AudioConfig;

/// Maps a vertex's position in a [`crate::VertexSet`] to a tone frequency.
///
/// The frequency depends only on the index: `base * ratios[index % len]`.
/// Vertex coordinates do not participate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneMapping {
    base_frequency: f32,
    ratios: Vec<f32>,
}

impl ToneMapping {
    /// Builds a mapping. An empty ratio set degrades to the unison ratio.
    pub fn new(base_frequency: f32, ratios: Vec<f32>) -> Self {
        let ratios = if ratios.is_empty() { vec![1.0] } else { ratios };
        Self {
            base_frequency,
            ratios,
        }
    }

    /// Builds a mapping from the audio section of the configuration.
    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.base_frequency, config.ratios.clone())
    }

    pub fn base_frequency(&self) -> f32 {
        self.base_frequency
    }

    pub fn ratios(&self) -> &[f32] {
        &self.ratios
    }

    /// Returns the frequency for the vertex at `index`.
    pub fn frequency_for(&self, index: usize) -> f32 {
        self.base_frequency * self.ratios[index % self.ratios.len()]
    }
}

impl Default for ToneMapping {
    fn default() -> Self {
        Self::from_config(&AudioConfig::default())
    }
}
