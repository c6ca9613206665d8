use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from a captured descriptor
    Enroll {
        /// Display name for the new identity
        #[arg(short, long)]
        name: String,
        /// Email, the enrollment uniqueness key
        #[arg(short, long)]
        email: String,
        /// Descriptor JSON from the capture tool (`-` for stdin)
        descriptor: PathBuf,
    },
    /// Append a descriptor to an existing identity (re-enrollment)
    AddDescriptor {
        /// Identity ID to re-enroll
        id: String,
        /// Descriptor JSON from the capture tool (`-` for stdin)
        descriptor: PathBuf,
    },
    /// Match a captured descriptor and record today's attendance
    Mark {
        /// Descriptor JSON from the capture tool (`-` for stdin)
        descriptor: PathBuf,
    },
    /// Show attendance history for an identity
    History {
        /// Identity ID
        id: String,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Identity ID to remove
        id: String,
    },
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    fn enroll(
        &self,
        display_name: &str,
        email: &str,
        descriptor_json: &str,
    ) -> zbus::Result<String>;
    fn add_descriptor(&self, identity_id: &str, descriptor_json: &str) -> zbus::Result<()>;
    fn mark_attendance(&self, descriptor_json: &str) -> zbus::Result<String>;
    fn history(&self, identity_id: &str) -> zbus::Result<String>;
    fn list_identities(&self) -> zbus::Result<String>;
    fn remove_identity(&self, identity_id: &str) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connect to session bus")?;
    let proxy = RollcallProxy::new(&connection)
        .await
        .context("connect to rollcalld")?;

    match cli.command {
        Commands::Enroll {
            name,
            email,
            descriptor,
        } => {
            let descriptor_json = read_descriptor_json(&descriptor)?;
            let reply = proxy.enroll(&name, &email, &descriptor_json).await?;
            let identity: serde_json::Value = serde_json::from_str(&reply)?;
            println!(
                "Enrolled {} <{}> as {}",
                identity["display_name"].as_str().unwrap_or("?"),
                identity["email"].as_str().unwrap_or("?"),
                identity["id"].as_str().unwrap_or("?"),
            );
        }
        Commands::AddDescriptor { id, descriptor } => {
            let descriptor_json = read_descriptor_json(&descriptor)?;
            proxy.add_descriptor(&id, &descriptor_json).await?;
            println!("Descriptor added to {id}");
        }
        Commands::Mark { descriptor } => {
            let descriptor_json = read_descriptor_json(&descriptor)?;
            let reply = proxy.mark_attendance(&descriptor_json).await?;
            let outcome: serde_json::Value = serde_json::from_str(&reply)?;
            let who = outcome["identity"]["display_name"].as_str().unwrap_or("?");
            match outcome["outcome"].as_str() {
                Some("recorded") => println!("Attendance recorded for {who}"),
                Some("already_recorded") => {
                    println!("Attendance already recorded today for {who}")
                }
                Some("no_match") => println!("Face not recognized; no attendance recorded"),
                other => bail!("unexpected outcome in daemon reply: {other:?}"),
            }
        }
        Commands::History { id } => {
            let reply = proxy.history(&id).await?;
            let records: Vec<serde_json::Value> = serde_json::from_str(&reply)?;
            if records.is_empty() {
                println!("No attendance records");
            }
            for record in records {
                println!(
                    "{}  {}  (recorded {})",
                    record["day"].as_str().unwrap_or("?"),
                    record["status"].as_str().unwrap_or("?"),
                    record["recorded_at"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::List => {
            let reply = proxy.list_identities().await?;
            let identities: Vec<serde_json::Value> = serde_json::from_str(&reply)?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for identity in identities {
                println!(
                    "{}  {} <{}>  descriptors={}",
                    identity["id"].as_str().unwrap_or("?"),
                    identity["display_name"].as_str().unwrap_or("?"),
                    identity["email"].as_str().unwrap_or("?"),
                    identity["descriptor_count"],
                );
            }
        }
        Commands::Remove { id } => {
            proxy.remove_identity(&id).await?;
            println!("Removed {id}");
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            let status: serde_json::Value = serde_json::from_str(&reply)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// Read the capture tool's descriptor output and pass it through as-is.
///
/// Capture tools emit `null` (or nothing) when no face was found in the
/// image; that failure is the extraction collaborator's and is
/// propagated unchanged rather than reinterpreted.
fn read_descriptor_json(path: &Path) -> Result<String> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read descriptor from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("read descriptor file {}", path.display()))?
    };

    let parsed: serde_json::Value = serde_json::from_str(raw.trim())
        .context("descriptor file is not valid JSON")?;
    if parsed.is_null() || parsed.as_array().is_some_and(|a| a.is_empty()) {
        bail!("no face detected in capture output");
    }

    Ok(raw.trim().to_string())
}
