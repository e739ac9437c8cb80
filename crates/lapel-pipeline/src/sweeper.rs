//! Temp directory sweeper.
//!
//! Sessions clean up after themselves, but crashes and kills leave
//! orphans. The sweeper periodically walks the temp root and removes
//! entries that are old enough to be safely declared abandoned. It decides
//! by timestamp and by the registry's live-session list — it never touches
//! a directory a running session still owns, nor the download store's own
//! directory (the store handles its expiries itself).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use lapel_core::settings::Settings;

use crate::downloads::{DownloadStore, DOWNLOADS_DIR};
use crate::registry::SessionRegistry;

/// Spawn the periodic sweeper task.
pub fn spawn(
    settings: Arc<Settings>,
    registry: Arc<SessionRegistry>,
    downloads: Arc<DownloadStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            downloads.sweep_expired().await;
            sweep_orphans(&settings, &registry, settings.sweep_max_age).await;
        }
    })
}

/// Remove abandoned entries under the temp root older than `max_age`.
///
/// Returns how many entries were removed.
pub async fn sweep_orphans(
    settings: &Settings,
    registry: &SessionRegistry,
    max_age: Duration,
) -> usize {
    let mut removed = 0usize;

    let mut entries = match tokio::fs::read_dir(&settings.temp_dir).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(error = %err, "sweeper could not read temp root");
            return 0;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == DOWNLOADS_DIR {
            continue;
        }
        if registry.is_live(name).await {
            continue;
        }

        let age = entry
            .metadata()
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|modified| modified.elapsed().ok());
        let Some(age) = age else { continue };
        if age < max_age {
            continue;
        }

        let path = entry.path();
        let result = if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => {
                tracing::info!(path = %path.display(), "swept orphaned temp entry");
                removed += 1;
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "sweep failed");
            }
        }
    }

    removed
}
