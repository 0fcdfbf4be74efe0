//! Provider capability model.
//!
//! Each backend declares which analytical features it supports; the registry
//! uses the declaration to pick a provider and callers can fail fast before
//! building a backend-specific request.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::TranscriptionError;

/// A named analytical function a transcription backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Transcription,
    Diarization,
    Sentiment,
    Topics,
    Entities,
    Highlights,
    Chapters,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Transcription => "transcription",
            Feature::Diarization => "diarization",
            Feature::Sentiment => "sentiment",
            Feature::Topics => "topics",
            Feature::Entities => "entities",
            Feature::Highlights => "highlights",
            Feature::Chapters => "chapters",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The static set of features a provider declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Self {
        let mut set = Self::default();
        for feature in features {
            if !set.has(feature) {
                set.features.push(feature);
            }
        }
        set
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Features in `required` this set does not cover.
    pub fn missing(&self, required: &[Feature]) -> Vec<Feature> {
        required
            .iter()
            .copied()
            .filter(|f| !self.has(*f))
            .collect()
    }

    pub fn is_superset_of(&self, required: &[Feature]) -> bool {
        self.missing(required).is_empty()
    }

    /// Errors with the full list of unsupported features, never silently
    /// degrading the request.
    pub fn validate(&self, provider: &str, required: &[Feature]) -> Result<(), TranscriptionError> {
        let missing = self.missing(required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TranscriptionError::UnsupportedFeatures {
                provider: provider.to_string(),
                missing,
            })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.features.iter().copied()
    }
}
