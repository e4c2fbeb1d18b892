//! Face-match decision over extracted feature vectors.
//!
//! Feature extraction happens upstream; this module only decides, given the
//! vectors found in a frame and the profiles associated with a camera, which
//! faces are known and whether anyone unknown was seen.

use serde::{Deserialize, Serialize};

use crate::state::FamilyMemberProfile;

/// Conventional distance threshold for 128-d face encodings.
pub const DEFAULT_TOLERANCE: f64 = 0.6;

/// Face matching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// Maximum euclidean distance at which two vectors are the same person.
    pub tolerance: f64,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Decides whether two feature vectors belong to the same person.
pub trait FaceComparator: Send + Sync {
    fn matches(&self, known: &[f64], candidate: &[f64]) -> bool;
}

/// Matches when the euclidean distance is within `tolerance`.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanComparator {
    tolerance: f64,
}

impl EuclideanComparator {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl Default for EuclideanComparator {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl FaceComparator for EuclideanComparator {
    fn matches(&self, known: &[f64], candidate: &[f64]) -> bool {
        // Vectors from different models are never comparable.
        if known.len() != candidate.len() || known.is_empty() {
            return false;
        }
        let distance = known
            .iter()
            .zip(candidate)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        distance <= self.tolerance
    }
}

/// Outcome of matching one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceVerdict {
    /// Name of the matched profile for every recognized face, in face order.
    pub recognized_names: Vec<String>,
    /// Whether at least one face matched no profile.
    pub unknown_detected: bool,
}

impl FaceVerdict {
    pub fn recognized(&self) -> bool {
        !self.recognized_names.is_empty()
    }
}

/// Match every face against `known`, taking the first profile that matches.
pub fn decide(
    comparator: &dyn FaceComparator,
    faces: &[Vec<f64>],
    known: &[FamilyMemberProfile],
) -> FaceVerdict {
    let mut verdict = FaceVerdict::default();
    for face in faces {
        match known
            .iter()
            .find(|profile| comparator.matches(&profile.feature_vector, face))
        {
            Some(profile) => verdict.recognized_names.push(profile.name.clone()),
            None => verdict.unknown_detected = true,
        }
    }
    verdict
}
