use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation failures for descriptors crossing the system boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor has {actual} values, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("descriptor value at index {index} is not finite")]
    NotFinite { index: usize },
}

/// Face signature vector (typically 128-dimensional, a property of the
/// upstream extraction model).
///
/// Produced externally and treated as an opaque comparable value here.
/// Immutable once produced; comparable only against descriptors of the
/// same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check the descriptor against the configured model dimension.
    ///
    /// Rejects wrong-length vectors and non-finite values before they
    /// reach the matcher or the store.
    pub fn validate(&self, expected_len: usize) -> Result<(), DescriptorError> {
        if self.values.len() != expected_len {
            return Err(DescriptorError::WrongLength {
                expected: expected_len,
                actual: self.values.len(),
            });
        }
        for (index, value) in self.values.iter().enumerate() {
            if !value.is_finite() {
                return Err(DescriptorError::NotFinite { index });
            }
        }
        Ok(())
    }

    /// Compute Euclidean distance to another descriptor.
    ///
    /// Callers must have checked that both descriptors have the same
    /// length; see [`NearestNeighborMatcher`](crate::matcher::NearestNeighborMatcher).
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled person.
///
/// `email` is the enrollment uniqueness key; `descriptor_count` reflects
/// how many signatures have been enrolled (initial enrollment plus
/// explicit re-enrollments).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub descriptor_count: usize,
}

/// A matching candidate: an identity together with every descriptor
/// enrolled for it. Only identities with at least one descriptor are
/// eligible for matching.
#[derive(Debug, Clone)]
pub struct EnrolledIdentity {
    pub id: Uuid,
    pub display_name: String,
    pub descriptors: Vec<Descriptor>,
}

/// Attendance status. The ledger only ever records presence; absence is
/// the lack of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
}

/// One attendance event: at most one exists per (identity, day).
///
/// Never mutated and never deleted by normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_id: Uuid,
    pub day: NaiveDate,
    pub status: AttendanceStatus,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![1.0, 0.0, 0.0]);
        let b = Descriptor::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance_known() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let d = Descriptor::new(vec![0.25, -1.5, 3.0]);
        assert!(d.validate(3).is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        let d = Descriptor::new(vec![1.0, 2.0]);
        assert_eq!(
            d.validate(3),
            Err(DescriptorError::WrongLength {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let d = Descriptor::new(vec![1.0, f32::NAN, 0.0]);
        assert_eq!(d.validate(3), Err(DescriptorError::NotFinite { index: 1 }));

        let d = Descriptor::new(vec![f32::INFINITY]);
        assert_eq!(d.validate(1), Err(DescriptorError::NotFinite { index: 0 }));
    }
}
