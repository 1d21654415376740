//! `agentdock sessions` — list known session records.

use ad_domain::config::Config;
use ad_sessions::{SessionStatus, SessionStore};

pub fn list(config: &Config) -> anyhow::Result<()> {
    let store = SessionStore::new(&config.workspace.state_path, &config.workspace.path)?;
    let records = store.list();

    if records.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8}  {:<20}  {}",
        "ID", "STATUS", "UPDATED", "NAME"
    );
    for record in records {
        let status = match record.status {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Deleted => "deleted",
        };
        println!(
            "{:<36}  {:<8}  {:<20}  {}",
            record.id,
            status,
            record.updated_at.format("%Y-%m-%d %H:%M:%S"),
            record.name.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
