use crate::config::Config;
use crate::engine::{AttendanceOutcome, Engine, EngineError};
use rollcall_core::Descriptor;
use uuid::Uuid;
use zbus::interface;

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
///
/// Descriptors cross the wire as JSON float arrays, exactly as emitted
/// by the external extraction tool.
pub struct RollcallService {
    engine: Engine,
    config: Config,
}

impl RollcallService {
    pub fn new(engine: Engine, config: Config) -> Self {
        Self { engine, config }
    }
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Enroll a new identity from an extracted descriptor.
    async fn enroll(
        &self,
        display_name: &str,
        email: &str,
        descriptor_json: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(email, "enroll requested");
        let descriptor = parse_descriptor(descriptor_json)?;
        let identity = self
            .engine
            .enroll(display_name.to_string(), email.to_string(), descriptor)
            .await
            .map_err(to_fdo)?;
        to_json(&identity)
    }

    /// Append a descriptor to an existing identity (re-enrollment).
    async fn add_descriptor(
        &self,
        identity_id: &str,
        descriptor_json: &str,
    ) -> zbus::fdo::Result<()> {
        tracing::info!(identity_id, "re-enrollment requested");
        let id = parse_identity_id(identity_id)?;
        let descriptor = parse_descriptor(descriptor_json)?;
        self.engine.add_descriptor(id, descriptor).await.map_err(to_fdo)
    }

    /// Match a probe descriptor and record today's attendance.
    ///
    /// Replies with a JSON object whose `outcome` is one of `recorded`,
    /// `already_recorded` or `no_match`; the first two carry the matched
    /// identity. All three are successful replies.
    async fn mark_attendance(&self, descriptor_json: &str) -> zbus::fdo::Result<String> {
        let probe = parse_descriptor(descriptor_json)?;
        let today = self.config.today();
        let outcome = self
            .engine
            .mark_attendance(probe, today)
            .await
            .map_err(to_fdo)?;

        let payload = match outcome {
            AttendanceOutcome::NoMatch => serde_json::json!({ "outcome": "no_match" }),
            AttendanceOutcome::Recorded(identity) => {
                serde_json::json!({ "outcome": "recorded", "identity": identity })
            }
            AttendanceOutcome::AlreadyRecorded(identity) => {
                serde_json::json!({ "outcome": "already_recorded", "identity": identity })
            }
        };
        Ok(payload.to_string())
    }

    /// Attendance history for an identity, most recent day first.
    async fn history(&self, identity_id: &str) -> zbus::fdo::Result<String> {
        let id = parse_identity_id(identity_id)?;
        let records = self.engine.history(id).await.map_err(to_fdo)?;
        to_json(&records)
    }

    /// List enrolled identities.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self.engine.list_identities().await.map_err(to_fdo)?;
        to_json(&identities)
    }

    /// Remove an enrolled identity, its descriptors and its history.
    async fn remove_identity(&self, identity_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(identity_id, "removal requested");
        let id = parse_identity_id(identity_id)?;
        self.engine.remove_identity(id).await.map_err(to_fdo)?;
        Ok(true)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let today = self.config.today();
        let status = self.engine.status(today).await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "db_path": self.config.db_path.display().to_string(),
            "match_threshold": self.config.match_threshold,
            "descriptor_len": self.config.descriptor_len,
            "today": today.to_string(),
            "enrolled": status.enrolled,
            "present_today": status.present_today,
        })
        .to_string())
    }
}

fn parse_descriptor(payload: &str) -> zbus::fdo::Result<Descriptor> {
    let values: Vec<f32> = serde_json::from_str(payload)
        .map_err(|err| zbus::fdo::Error::InvalidArgs(format!("descriptor payload: {err}")))?;
    Ok(Descriptor::new(values))
}

fn parse_identity_id(text: &str) -> zbus::fdo::Result<Uuid> {
    Uuid::parse_str(text)
        .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("invalid identity id `{text}`")))
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value)
        .map_err(|err| zbus::fdo::Error::Failed(format!("serialize reply: {err}")))
}

/// Caller errors map to InvalidArgs; everything else is a Failed reply
/// whose message keeps the engine taxonomy (retriable failures say so).
fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match &err {
        EngineError::InvalidDescriptor(_) | EngineError::Matcher(_) => {
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}
