//! Identity registry: the only write path for identities and their
//! enrolled descriptors.
//!
//! Descriptors are stored as little-endian f32 BLOBs so they round-trip
//! bit-for-bit. Eligibility for matching requires at least one
//! descriptor; `list_enrolled` enforces that by construction (inner
//! join).

use crate::error::{is_unique_violation, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rollcall_core::types::{Descriptor, EnrolledIdentity, Identity};
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Enrollment input. Descriptor validity (length, finiteness) is checked
/// at the engine boundary before the store is touched.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub display_name: String,
    pub email: String,
    pub descriptor: Descriptor,
}

/// Create an identity with its first descriptor.
///
/// The identity row and the descriptor row commit together; a partially
/// enrolled identity (no descriptor) is never visible.
pub fn create_identity(
    conn: &mut Connection,
    new: &NewIdentity,
    now: DateTime<Utc>,
) -> StoreResult<Identity> {
    let id = Uuid::new_v4();
    let tx = conn.transaction()?;

    let inserted = tx.execute(
        "INSERT INTO identities (id, display_name, email, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            id.to_string(),
            new.display_name,
            new.email,
            now.to_rfc3339()
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err, "identities.email") => {
            return Err(StoreError::DuplicateIdentity(new.email.clone()));
        }
        Err(err) => return Err(err.into()),
    }

    tx.execute(
        "INSERT INTO descriptors (identity_id, vector, created_at)
         VALUES (?1, ?2, ?3)",
        params![
            id.to_string(),
            descriptor_to_blob(&new.descriptor),
            now.to_rfc3339()
        ],
    )?;
    tx.commit()?;

    Ok(Identity {
        id,
        display_name: new.display_name.clone(),
        email: new.email.clone(),
        created_at: now,
        descriptor_count: 1,
    })
}

/// Append a descriptor to an existing identity (explicit re-enrollment).
pub fn add_descriptor(
    conn: &Connection,
    identity_id: Uuid,
    descriptor: &Descriptor,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    if get_identity(conn, identity_id)?.is_none() {
        return Err(StoreError::IdentityNotFound(identity_id));
    }
    conn.execute(
        "INSERT INTO descriptors (identity_id, vector, created_at)
         VALUES (?1, ?2, ?3)",
        params![
            identity_id.to_string(),
            descriptor_to_blob(descriptor),
            now.to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Every identity eligible for matching, with all of its descriptors.
///
/// Ordered by identity id, so the matcher sees a stable candidate order
/// across calls.
pub fn list_enrolled(conn: &Connection) -> StoreResult<Vec<EnrolledIdentity>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.display_name, d.vector
         FROM identities i
         JOIN descriptors d ON d.identity_id = i.id
         ORDER BY i.id, d.id",
    )?;
    let mut rows = stmt.query([])?;
    let mut enrolled: Vec<EnrolledIdentity> = Vec::new();

    while let Some(row) = rows.next()? {
        let id = parse_uuid(&row.get::<_, String>(0)?, "identities.id")?;
        let descriptor = descriptor_from_blob(&row.get::<_, Vec<u8>>(2)?)?;
        match enrolled.last_mut() {
            Some(last) if last.id == id => last.descriptors.push(descriptor),
            _ => enrolled.push(EnrolledIdentity {
                id,
                display_name: row.get(1)?,
                descriptors: vec![descriptor],
            }),
        }
    }

    Ok(enrolled)
}

pub fn get_identity(conn: &Connection, identity_id: Uuid) -> StoreResult<Option<Identity>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.display_name, i.email, i.created_at,
                (SELECT COUNT(*) FROM descriptors d WHERE d.identity_id = i.id)
         FROM identities i
         WHERE i.id = ?1",
    )?;
    let mut rows = stmt.query(params![identity_id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(identity_from_row(row)?)),
        None => Ok(None),
    }
}

pub fn list_identities(conn: &Connection) -> StoreResult<Vec<Identity>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.display_name, i.email, i.created_at,
                (SELECT COUNT(*) FROM descriptors d WHERE d.identity_id = i.id)
         FROM identities i
         ORDER BY i.created_at, i.id",
    )?;
    let mut rows = stmt.query([])?;
    let mut identities = Vec::new();
    while let Some(row) = rows.next()? {
        identities.push(identity_from_row(row)?);
    }
    Ok(identities)
}

pub fn count_identities(conn: &Connection) -> StoreResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Remove an identity. Enrolled descriptors and attendance history go
/// with it (ON DELETE CASCADE).
pub fn remove_identity(conn: &Connection, identity_id: Uuid) -> StoreResult<()> {
    let changed = conn.execute(
        "DELETE FROM identities WHERE id = ?1",
        params![identity_id.to_string()],
    )?;
    if changed == 0 {
        return Err(StoreError::IdentityNotFound(identity_id));
    }
    Ok(())
}

fn identity_from_row(row: &rusqlite::Row<'_>) -> StoreResult<Identity> {
    let id = parse_uuid(&row.get::<_, String>(0)?, "identities.id")?;
    let created_at = parse_timestamp(&row.get::<_, String>(3)?, "identities.created_at")?;
    let descriptor_count: i64 = row.get(4)?;
    Ok(Identity {
        id,
        display_name: row.get(1)?,
        email: row.get(2)?,
        created_at,
        descriptor_count: descriptor_count as usize,
    })
}

pub(crate) fn parse_uuid(text: &str, column: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(text)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{text}` in {column}")))
}

pub(crate) fn parse_timestamp(text: &str, column: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidData(format!("invalid timestamp `{text}` in {column}")))
}

fn descriptor_to_blob(descriptor: &Descriptor) -> Vec<u8> {
    let mut blob = Vec::with_capacity(descriptor.values.len() * 4);
    for value in &descriptor.values {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn descriptor_from_blob(blob: &[u8]) -> StoreResult<Descriptor> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidData(format!(
            "descriptor blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    let values = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(Descriptor::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init(&conn, 5000).unwrap();
        conn
    }

    fn new_identity(email: &str, values: Vec<f32>) -> NewIdentity {
        NewIdentity {
            display_name: "Dana Test".into(),
            email: email.into(),
            descriptor: Descriptor::new(values),
        }
    }

    #[test]
    fn test_create_and_get_identity() {
        let mut conn = test_conn();
        let created =
            create_identity(&mut conn, &new_identity("dana@example.com", vec![1.0, 2.0]), Utc::now())
                .unwrap();
        assert_eq!(created.descriptor_count, 1);

        let fetched = get_identity(&conn, created.id).unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.email, "dana@example.com");
        assert_eq!(fetched.descriptor_count, 1);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let mut conn = test_conn();
        create_identity(&mut conn, &new_identity("dana@example.com", vec![1.0]), Utc::now())
            .unwrap();
        let err = create_identity(&mut conn, &new_identity("dana@example.com", vec![2.0]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentity(email) if email == "dana@example.com"));
    }

    #[test]
    fn test_descriptor_round_trips_bit_for_bit() {
        let mut conn = test_conn();
        // Values chosen to exercise sign, subnormal-ish and non-round floats.
        let values = vec![0.1f32, -3.25, 1.0e-7, 12345.678, -0.0];
        let created = create_identity(
            &mut conn,
            &new_identity("bits@example.com", values.clone()),
            Utc::now(),
        )
        .unwrap();

        let enrolled = list_enrolled(&conn).unwrap();
        assert_eq!(enrolled.len(), 1);
        assert_eq!(enrolled[0].id, created.id);
        let stored = &enrolled[0].descriptors[0].values;
        assert_eq!(stored.len(), values.len());
        for (stored, original) in stored.iter().zip(values.iter()) {
            assert_eq!(stored.to_bits(), original.to_bits());
        }
    }

    #[test]
    fn test_add_descriptor_appends() {
        let mut conn = test_conn();
        let created =
            create_identity(&mut conn, &new_identity("dana@example.com", vec![1.0]), Utc::now())
                .unwrap();
        add_descriptor(&conn, created.id, &Descriptor::new(vec![2.0]), Utc::now()).unwrap();

        let enrolled = list_enrolled(&conn).unwrap();
        assert_eq!(enrolled[0].descriptors.len(), 2);
        let fetched = get_identity(&conn, created.id).unwrap().unwrap();
        assert_eq!(fetched.descriptor_count, 2);
    }

    #[test]
    fn test_add_descriptor_unknown_identity() {
        let conn = test_conn();
        let err = add_descriptor(&conn, Uuid::from_u128(9), &Descriptor::new(vec![1.0]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::IdentityNotFound(_)));
    }

    #[test]
    fn test_list_enrolled_empty_registry() {
        let conn = test_conn();
        assert!(list_enrolled(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_remove_identity_cascades() {
        let mut conn = test_conn();
        let created =
            create_identity(&mut conn, &new_identity("dana@example.com", vec![1.0]), Utc::now())
                .unwrap();
        crate::ledger::record_presence(
            &conn,
            created.id,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            Utc::now(),
        )
        .unwrap();

        remove_identity(&conn, created.id).unwrap();

        assert!(get_identity(&conn, created.id).unwrap().is_none());
        assert!(list_enrolled(&conn).unwrap().is_empty());
        let descriptors: i64 = conn
            .query_row("SELECT COUNT(*) FROM descriptors", [], |row| row.get(0))
            .unwrap();
        let attendance: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))
            .unwrap();
        assert_eq!(descriptors, 0);
        assert_eq!(attendance, 0);
    }

    #[test]
    fn test_remove_unknown_identity() {
        let conn = test_conn();
        let err = remove_identity(&conn, Uuid::from_u128(9)).unwrap_err();
        assert!(matches!(err, StoreError::IdentityNotFound(_)));
    }
}
