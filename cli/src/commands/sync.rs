use anyhow::{Context, Result, bail};
use std::io::{self, Read};
use std::path::Path;

use kenko_core::db::Database;
use kenko_core::holder::StoreHolder;
use kenko_core::sync::{MergeSummary, SyncPayload};

use super::helpers::parse_since;

fn require_remote(db: &Database) -> Result<()> {
    if !db.sync_mode().is_remote() {
        bail!("Sync is disabled. Set \"sync_container\" in config.json to enable it");
    }
    Ok(())
}

pub(crate) fn cmd_sync_export(db: &Database, since: Option<String>, out: Option<&Path>) -> Result<()> {
    require_remote(db)?;
    let since = parse_since(since)?;
    let payload = db.changes_since(since)?;
    let body = serde_json::to_string_pretty(&payload)?;

    match out {
        Some(path) => {
            std::fs::write(path, &body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            let records = payload.records.len();
            let tombstones = payload.tombstones.len();
            eprintln!(
                "Exported {records} records and {tombstones} deletions to {}",
                path.display()
            );
        }
        None => println!("{body}"),
    }
    Ok(())
}

pub(crate) fn cmd_sync_apply(
    db: &Database,
    holder: &StoreHolder,
    file: &Path,
    json: bool,
) -> Result<()> {
    require_remote(db)?;
    let raw = if file == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };
    let payload: SyncPayload = serde_json::from_str(&raw).context("Invalid sync payload")?;

    let own_id = db.device_id()?;
    if payload.device_id == own_id {
        bail!("Payload was exported by this store; nothing to merge");
    }

    let summary = db.apply_remote_changes(&payload)?;
    holder.notify_remote_merge(summary);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&payload.device_id, &summary);
    }
    Ok(())
}

fn print_summary(device: &str, summary: &MergeSummary) {
    let MergeSummary {
        inserted,
        merged,
        unchanged,
        deleted,
        skipped,
    } = summary;
    println!("Merged changes from {device}");
    println!("  new: {inserted}  merged: {merged}  unchanged: {unchanged}  deleted: {deleted}");
    if *skipped > 0 {
        println!("  skipped {skipped} unreadable records");
    }
}
