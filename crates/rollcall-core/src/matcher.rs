//! Nearest-neighbor matching over enrolled face signatures.
//!
//! Ranks a probe descriptor against every enrolled identity by Euclidean
//! distance. An identity with several enrolled descriptors is scored by
//! its best one. An exact distance tie between two identities rejects
//! the match: this is an authentication boundary and an ambiguous
//! winner must never be picked silently.

use crate::types::{Descriptor, DescriptorError, EnrolledIdentity};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("probe rejected: {0}")]
    InvalidProbe(#[from] DescriptorError),
    #[error("probe has {actual} values but a descriptor enrolled for {identity_id} has {expected}")]
    DimensionMismatch {
        identity_id: Uuid,
        expected: usize,
        actual: usize,
    },
}

/// Result of matching a probe against the enrolled gallery. Transient,
/// never persisted.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Identity of the accepted match. `None` when unmatched, including
    /// the rejected-tie case.
    pub identity_id: Option<Uuid>,
    /// Best distance seen across the whole gallery; `+inf` for an empty
    /// gallery.
    pub distance: f32,
    /// Whether the best distance was inside the acceptance radius. Can
    /// be true while `matched` is false when a tie was rejected.
    pub below_threshold: bool,
}

/// Strategy for ranking a probe descriptor against enrolled identities.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Descriptor,
        candidates: &[EnrolledIdentity],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean nearest-neighbor matcher with tie rejection.
///
/// Deterministic: the winner is decided by value comparison alone, so
/// candidate order never changes the outcome. Every gallery entry is
/// visited; there is no early exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborMatcher;

impl Matcher for NearestNeighborMatcher {
    fn compare(
        &self,
        probe: &Descriptor,
        candidates: &[EnrolledIdentity],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        // Non-finite probe values would poison the distance comparisons
        // below, so reject them here even though the boundary validates.
        for (index, value) in probe.values.iter().enumerate() {
            if !value.is_finite() {
                return Err(DescriptorError::NotFinite { index }.into());
            }
        }

        let mut best_distance = f32::INFINITY;
        let mut best_identity: Option<Uuid> = None;
        let mut tied = false;

        for candidate in candidates {
            // Best-of-N: an identity may carry descriptors from several
            // enrollments; its score is the closest of them.
            let mut identity_best = f32::INFINITY;
            for enrolled in &candidate.descriptors {
                if enrolled.len() != probe.len() {
                    return Err(MatchError::DimensionMismatch {
                        identity_id: candidate.id,
                        expected: enrolled.len(),
                        actual: probe.len(),
                    });
                }
                let distance = probe.euclidean_distance(enrolled);
                if distance < identity_best {
                    identity_best = distance;
                }
            }

            if identity_best < best_distance {
                best_distance = identity_best;
                best_identity = Some(candidate.id);
                tied = false;
            } else if identity_best == best_distance
                && best_identity.is_some()
                && best_identity != Some(candidate.id)
            {
                tied = true;
            }
        }

        let below_threshold = best_distance <= threshold;
        let matched = below_threshold && !tied && best_identity.is_some();

        Ok(MatchResult {
            matched,
            identity_id: if matched { best_identity } else { None },
            distance: best_distance,
            below_threshold,
        })
    }
}
