//! rollcall-core — descriptor types and face-signature matching.
//!
//! Consumes fixed-length face descriptors produced by an external
//! extraction model and ranks a probe against enrolled identities by
//! Euclidean distance, with deterministic tie rejection.

pub mod matcher;
pub mod types;

pub use matcher::{MatchError, MatchResult, Matcher, NearestNeighborMatcher};
pub use types::{
    AttendanceRecord, AttendanceStatus, Descriptor, DescriptorError, EnrolledIdentity, Identity,
};
