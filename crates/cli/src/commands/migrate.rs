//! `conclave migrate` — Create or upgrade the SQLite schema.
//!
//! Migrations are idempotent, so running this against an up-to-date
//! database is a no-op.

use std::path::{Path, PathBuf};

pub async fn run(
    config_path: Option<&Path>,
    db: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let path = db.unwrap_or_else(|| config.storage.resolved_path());

    println!("🔄 Migrating {}", path.display());
    let store = super::open_store(&path).await?;
    store.run_migrations().await?;
    println!("✅ Schema is up to date");

    Ok(())
}
