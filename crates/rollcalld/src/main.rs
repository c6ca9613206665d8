use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();
    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    // Open the store and apply the schema synchronously (fail-fast).
    let conn = tokio_rusqlite::Connection::open(&config.db_path).await?;
    let busy_timeout_ms = config.busy_timeout_ms;
    conn.call(move |c| Ok(rollcall_store::schema::init(c, busy_timeout_ms)))
        .await??;
    tracing::info!(
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        descriptor_len = config.descriptor_len,
        "store ready"
    );

    let engine = engine::Engine::new(conn, &config);
    let service = dbus_interface::RollcallService::new(engine, config);

    let _conn = zbus::connection::Builder::session()?
        .name("org.rollcall.Rollcall1")?
        .serve_at("/org/rollcall/Rollcall1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
