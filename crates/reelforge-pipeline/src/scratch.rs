//! Startup sweep for artifacts left behind by a crash mid-cleanup.

use reelforge_core::error::Result;
use reelforge_core::traits::Ledger;
use reelforge_synthesis::task_id_of;
use std::path::Path;

/// Remove scratch files whose owning task is terminal. Files of tasks that
/// are still in flight, unknown, or not ours are left alone.
pub async fn sweep_orphans(ledger: &dyn Ledger, scratch_dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(scratch_dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(task_id) = task_id_of(&name) else {
            continue;
        };
        let terminal = ledger
            .get_task(task_id)?
            .map(|t| t.status.is_terminal())
            .unwrap_or(false);
        if !terminal {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                removed += 1;
                tracing::debug!("🧹 Removed orphaned {name}");
            }
            Err(e) => tracing::warn!("⚠️ Could not remove {name}: {e}"),
        }
    }
    if removed > 0 {
        tracing::info!("🧹 Scratch sweep removed {removed} orphaned artifact(s)");
    }
    Ok(removed)
}
