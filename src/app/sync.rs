use anyhow::{Context, Result};

use super::{lock, Dashboard, ViewStatePatch};
use crate::service::{SyncRequest, SyncStatus, SyncTrigger};

impl Dashboard {
    /// Poll the server's sync progress and mirror it into the view state.
    ///
    /// When a running sync finishes, every cached result is dropped since
    /// the underlying data changed.
    pub async fn refresh_sync_status(&self) -> Result<SyncStatus> {
        let status = self
            .backend
            .sync_status()
            .await
            .context("Failed to fetch sync status")?;

        let was_syncing = self.view().is_syncing;
        self.update(ViewStatePatch::default().syncing(status.is_syncing));

        if was_syncing && !status.is_syncing {
            if status.cancelled {
                tracing::info!("Sync cancelled, clearing cached results");
            } else {
                tracing::info!(
                    "Sync finished ({} videos), clearing cached results",
                    status.total_videos
                );
            }
            self.invalidate_caches();
        }

        Ok(status)
    }

    pub async fn trigger_sync(&self, full_sync: bool) -> Result<SyncTrigger> {
        let request = SyncRequest {
            api_key: None,
            full_sync,
            channels: None,
        };

        let trigger = self.backend.trigger_sync(&request).await?;
        match trigger {
            SyncTrigger::Started => tracing::info!("Started {} sync", if full_sync { "full" } else { "incremental" }),
            SyncTrigger::AlreadyRunning => tracing::info!("Sync already running"),
        }

        self.update(
            ViewStatePatch::default()
                .syncing(true)
                .initial_sync_triggered(true),
        );
        Ok(trigger)
    }

    /// Trigger one incremental sync per session.
    ///
    /// Returns `None` if this session already triggered one. The flag is
    /// set before the request goes out, so a failed trigger is not retried.
    pub async fn ensure_initial_sync(&self) -> Result<Option<SyncTrigger>> {
        let first = {
            let mut store = lock(&self.store);
            if store.read().has_triggered_initial_sync {
                false
            } else {
                store.update(ViewStatePatch::default().initial_sync_triggered(true));
                true
            }
        };

        if !first {
            return Ok(None);
        }

        self.trigger_sync(false).await.map(Some)
    }

    pub async fn cancel_sync(&self) -> Result<()> {
        self.backend.cancel_sync().await?;
        tracing::info!("Sync cancel requested");
        Ok(())
    }
}
