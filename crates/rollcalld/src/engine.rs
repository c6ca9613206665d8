use crate::config::Config;
use chrono::{NaiveDate, Utc};
use rollcall_core::matcher::{MatchError, Matcher, NearestNeighborMatcher};
use rollcall_core::types::{AttendanceRecord, Descriptor, DescriptorError, Identity};
use rollcall_store::registry::NewIdentity;
use rollcall_store::{ledger, registry, StoreError, StoreResult};
use std::time::Duration;
use thiserror::Error;
use tokio_rusqlite::Connection;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
    #[error("match rejected: {0}")]
    Matcher(#[from] MatchError),
    #[error("identity with email `{0}` already enrolled")]
    DuplicateIdentity(String),
    #[error("identity not found: {0}")]
    IdentityNotFound(Uuid),
    /// Store failure. Safe to retry with backoff; `context` carries the
    /// idempotency key (identity and day for attendance recording).
    #[error("store operation `{operation}` failed ({context}); safe to retry: {source}")]
    Infrastructure {
        operation: &'static str,
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("store operation `{operation}` timed out ({context}); safe to retry")]
    Timeout {
        operation: &'static str,
        context: String,
    },
}

/// Outcome of an attendance attempt. All three are successful results;
/// `NoMatch` is a business outcome, never an error.
#[derive(Debug, Clone)]
pub enum AttendanceOutcome {
    NoMatch,
    Recorded(Identity),
    AlreadyRecorded(Identity),
}

pub struct EngineStatus {
    pub enrolled: u64,
    pub present_today: u64,
}

/// Clone-safe handle to the attendance engine.
///
/// Matching is pure CPU over a registry snapshot and runs on the calling
/// task, so independent requests match in parallel; only store
/// operations hop to the connection worker, each bounded by the
/// configured timeout.
#[derive(Clone)]
pub struct Engine {
    conn: Connection,
    matcher: NearestNeighborMatcher,
    threshold: f32,
    descriptor_len: usize,
    store_timeout: Duration,
}

impl Engine {
    pub fn new(conn: Connection, config: &Config) -> Self {
        Self {
            conn,
            matcher: NearestNeighborMatcher,
            threshold: config.match_threshold,
            descriptor_len: config.descriptor_len,
            store_timeout: Duration::from_secs(config.store_timeout_secs),
        }
    }

    /// Enroll a new identity from an extracted descriptor.
    pub async fn enroll(
        &self,
        display_name: String,
        email: String,
        descriptor: Descriptor,
    ) -> Result<Identity, EngineError> {
        descriptor.validate(self.descriptor_len)?;

        let context = format!("email={email}");
        let now = Utc::now();
        let new = NewIdentity {
            display_name,
            email,
            descriptor,
        };
        let identity = self
            .with_store("create_identity", context, move |conn| {
                registry::create_identity(conn, &new, now)
            })
            .await?;

        tracing::info!(identity = %identity.id, email = %identity.email, "identity enrolled");
        Ok(identity)
    }

    /// Append a descriptor to an existing identity (explicit re-enrollment).
    pub async fn add_descriptor(
        &self,
        identity_id: Uuid,
        descriptor: Descriptor,
    ) -> Result<(), EngineError> {
        descriptor.validate(self.descriptor_len)?;

        let now = Utc::now();
        self.with_store("add_descriptor", format!("identity={identity_id}"), move |conn| {
            registry::add_descriptor(conn, identity_id, &descriptor, now)
        })
        .await?;

        tracing::info!(identity = %identity_id, "descriptor appended");
        Ok(())
    }

    /// Match a probe against the enrolled registry and record today's
    /// presence for the winner.
    ///
    /// The registry snapshot is not transactionally consistent with
    /// concurrent enrollments (eventual visibility). The ledger write is
    /// the only durable side effect and is atomic by construction, so a
    /// retry after an unconfirmed success simply observes
    /// `AlreadyRecorded`.
    pub async fn mark_attendance(
        &self,
        probe: Descriptor,
        today: NaiveDate,
    ) -> Result<AttendanceOutcome, EngineError> {
        probe.validate(self.descriptor_len)?;

        let candidates = self
            .with_store("list_enrolled", String::from("registry snapshot"), |conn| {
                registry::list_enrolled(conn)
            })
            .await?;

        let result = self.matcher.compare(&probe, &candidates, self.threshold)?;
        if !result.matched {
            tracing::info!(
                distance = result.distance,
                below_threshold = result.below_threshold,
                candidates = candidates.len(),
                "no match"
            );
            return Ok(AttendanceOutcome::NoMatch);
        }
        let Some(identity_id) = result.identity_id else {
            return Ok(AttendanceOutcome::NoMatch);
        };

        let now = Utc::now();
        let context = format!("identity={identity_id} day={today}");
        let (identity, outcome) = self
            .with_store("record_presence", context, move |conn| {
                let identity = registry::get_identity(conn, identity_id)?
                    .ok_or(StoreError::IdentityNotFound(identity_id))?;
                let outcome = ledger::record_presence(conn, identity_id, today, now)?;
                Ok((identity, outcome))
            })
            .await?;

        if outcome.created {
            tracing::info!(
                identity = %identity_id,
                day = %today,
                distance = result.distance,
                "attendance recorded"
            );
            Ok(AttendanceOutcome::Recorded(identity))
        } else {
            tracing::info!(identity = %identity_id, day = %today, "attendance already recorded");
            Ok(AttendanceOutcome::AlreadyRecorded(identity))
        }
    }

    /// Attendance history for an identity, most recent day first.
    pub async fn history(&self, identity_id: Uuid) -> Result<Vec<AttendanceRecord>, EngineError> {
        self.with_store("history", format!("identity={identity_id}"), move |conn| {
            if registry::get_identity(conn, identity_id)?.is_none() {
                return Err(StoreError::IdentityNotFound(identity_id));
            }
            ledger::history(conn, identity_id)
        })
        .await
    }

    pub async fn list_identities(&self) -> Result<Vec<Identity>, EngineError> {
        self.with_store("list_identities", String::from("registry"), |conn| {
            registry::list_identities(conn)
        })
        .await
    }

    pub async fn remove_identity(&self, identity_id: Uuid) -> Result<(), EngineError> {
        self.with_store("remove_identity", format!("identity={identity_id}"), move |conn| {
            registry::remove_identity(conn, identity_id)
        })
        .await?;
        tracing::info!(identity = %identity_id, "identity removed");
        Ok(())
    }

    pub async fn status(&self, today: NaiveDate) -> Result<EngineStatus, EngineError> {
        self.with_store("status", format!("day={today}"), move |conn| {
            Ok(EngineStatus {
                enrolled: registry::count_identities(conn)?,
                present_today: ledger::count_for_day(conn, today)?,
            })
        })
        .await
    }

    /// Run one store operation on the connection worker with a bounded
    /// wait, classifying failures along the retry boundary.
    async fn with_store<T, F>(
        &self,
        operation: &'static str,
        context: String,
        f: F,
    ) -> Result<T, EngineError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let call = self.conn.call(move |conn| Ok(f(conn)));
        let store_result = match tokio::time::timeout(self.store_timeout, call).await {
            Err(_) => return Err(EngineError::Timeout { operation, context }),
            Ok(Err(err)) => {
                return Err(EngineError::Infrastructure {
                    operation,
                    context,
                    source: Box::new(err),
                })
            }
            Ok(Ok(result)) => result,
        };

        store_result.map_err(|err| match err {
            StoreError::DuplicateIdentity(email) => EngineError::DuplicateIdentity(email),
            StoreError::IdentityNotFound(id) => EngineError::IdentityNotFound(id),
            other => EngineError::Infrastructure {
                operation,
                context,
                source: Box::new(other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_store::schema;

    async fn test_engine(threshold: f32) -> Engine {
        let conn = Connection::open_in_memory().await.unwrap();
        conn.call(|c| Ok(schema::init(c, 5000))).await.unwrap().unwrap();
        Engine {
            conn,
            matcher: NearestNeighborMatcher,
            threshold,
            descriptor_len: 3,
            store_timeout: Duration::from_secs(5),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_mark_attendance_records_once_per_day() {
        let engine = test_engine(0.05).await;
        let enrolled = engine
            .enroll(
                "U1".into(),
                "u1@example.com".into(),
                Descriptor::new(vec![1.0, 0.0, 0.0]),
            )
            .await
            .unwrap();

        let probe = Descriptor::new(vec![1.0, 0.0, 0.01]);
        let first = engine
            .mark_attendance(probe.clone(), day(2024, 1, 1))
            .await
            .unwrap();
        assert!(matches!(&first, AttendanceOutcome::Recorded(i) if i.id == enrolled.id));

        let second = engine
            .mark_attendance(probe.clone(), day(2024, 1, 1))
            .await
            .unwrap();
        assert!(matches!(&second, AttendanceOutcome::AlreadyRecorded(i) if i.id == enrolled.id));

        let records = engine.history(enrolled.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].day, day(2024, 1, 1));

        // A new calendar day records again.
        let next_day = engine.mark_attendance(probe, day(2024, 1, 2)).await.unwrap();
        assert!(matches!(next_day, AttendanceOutcome::Recorded(_)));
    }

    #[tokio::test]
    async fn test_far_probe_is_no_match_not_error() {
        let engine = test_engine(0.05).await;
        let enrolled = engine
            .enroll(
                "U1".into(),
                "u1@example.com".into(),
                Descriptor::new(vec![1.0, 0.0, 0.0]),
            )
            .await
            .unwrap();

        let outcome = engine
            .mark_attendance(Descriptor::new(vec![0.0, 0.0, 1.0]), day(2024, 1, 1))
            .await
            .unwrap();
        assert!(matches!(outcome, AttendanceOutcome::NoMatch));
        assert!(engine.history(enrolled.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_registry_is_no_match() {
        let engine = test_engine(0.6).await;
        let outcome = engine
            .mark_attendance(Descriptor::new(vec![1.0, 0.0, 0.0]), day(2024, 1, 1))
            .await
            .unwrap();
        assert!(matches!(outcome, AttendanceOutcome::NoMatch));
    }

    #[tokio::test]
    async fn test_ambiguous_match_records_nothing() {
        let engine = test_engine(2.0).await;
        let a = engine
            .enroll("A".into(), "a@example.com".into(), Descriptor::new(vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        let b = engine
            .enroll("B".into(), "b@example.com".into(), Descriptor::new(vec![-1.0, 0.0, 0.0]))
            .await
            .unwrap();

        // Equidistant from both enrolled identities.
        let outcome = engine
            .mark_attendance(Descriptor::new(vec![0.0, 0.0, 0.0]), day(2024, 1, 1))
            .await
            .unwrap();
        assert!(matches!(outcome, AttendanceOutcome::NoMatch));
        assert!(engine.history(a.id).await.unwrap().is_empty());
        assert!(engine.history(b.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_length_probe_rejected_at_boundary() {
        let engine = test_engine(0.6).await;
        let err = engine
            .mark_attendance(Descriptor::new(vec![1.0, 0.0]), day(2024, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDescriptor(_)));
    }

    #[tokio::test]
    async fn test_duplicate_email_enrollment_rejected() {
        let engine = test_engine(0.6).await;
        engine
            .enroll("U1".into(), "u1@example.com".into(), Descriptor::new(vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        let err = engine
            .enroll("U2".into(), "u1@example.com".into(), Descriptor::new(vec![0.0, 1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateIdentity(email) if email == "u1@example.com"));
    }

    #[tokio::test]
    async fn test_history_for_unknown_identity() {
        let engine = test_engine(0.6).await;
        let err = engine.history(Uuid::from_u128(9)).await.unwrap_err();
        assert!(matches!(err, EngineError::IdentityNotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_marks_create_exactly_one_record() {
        let engine = test_engine(0.05).await;
        let enrolled = engine
            .enroll(
                "U1".into(),
                "u1@example.com".into(),
                Descriptor::new(vec![1.0, 0.0, 0.0]),
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .mark_attendance(Descriptor::new(vec![1.0, 0.0, 0.01]), day(2024, 1, 1))
                    .await
                    .unwrap()
            }));
        }

        let mut recorded = 0;
        let mut already = 0;
        for handle in handles {
            match handle.await.unwrap() {
                AttendanceOutcome::Recorded(_) => recorded += 1,
                AttendanceOutcome::AlreadyRecorded(_) => already += 1,
                AttendanceOutcome::NoMatch => panic!("unexpected NoMatch"),
            }
        }
        assert_eq!(recorded, 1);
        assert_eq!(already, 7);
        assert_eq!(engine.history(enrolled.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let engine = test_engine(0.05).await;
        engine
            .enroll("U1".into(), "u1@example.com".into(), Descriptor::new(vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        engine
            .mark_attendance(Descriptor::new(vec![1.0, 0.0, 0.01]), day(2024, 1, 1))
            .await
            .unwrap();

        let status = engine.status(day(2024, 1, 1)).await.unwrap();
        assert_eq!(status.enrolled, 1);
        assert_eq!(status.present_today, 1);

        let other_day = engine.status(day(2024, 1, 2)).await.unwrap();
        assert_eq!(other_day.present_today, 0);
    }
}
