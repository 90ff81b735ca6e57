//! In-process tick trigger.
//!
//! Stands in for an external cron. Missed ticks are skipped rather than bunched up,
//! and ticks never overlap within one scheduler.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;

pub struct TickScheduler {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl TickScheduler {
    /// Spawn the tick loop. The first tick fires immediately.
    pub fn start(dispatcher: Arc<Dispatcher>, every: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = every.as_secs(), "Dispatch scheduler started");
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = dispatcher.tick().await {
                            tracing::error!(error = %e, "Dispatch tick failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Dispatch scheduler shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the loop and wait for it to exit. Commits already spawned keep running.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Dispatch scheduler task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::Committer;
    use crate::reaper::StaleJobReaper;
    use bytes::Bytes;
    use chrono::Utc;
    use ferry_core::models::{FileStatus, NewFile};
    use ferry_core::{CommitPolicy, DispatchPolicy};
    use ferry_db::{ClaimLimits, FileStore, InMemoryFileStore};
    use ferry_storage::test_helpers::{MockNetwork, MockStorage};
    use uuid::Uuid;

    #[tokio::test]
    async fn ticks_until_shutdown() {
        let files = Arc::new(InMemoryFileStore::new());
        let staging = Arc::new(MockStorage::new());
        let network = Arc::new(MockNetwork::new());
        let committer = Arc::new(
            Committer::new(
                files.clone(),
                staging.clone(),
                network.clone(),
                CommitPolicy::default(),
                ClaimLimits::unbounded(),
            )
            .unwrap(),
        );
        let reaper = StaleJobReaper::new(files.clone(), Duration::from_secs(900));
        let dispatcher = Arc::new(Dispatcher::new(
            files.clone(),
            committer,
            reaper,
            DispatchPolicy::default(),
        ));

        let owner_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let key = ferry_storage::staging_key(owner_id, id);
        staging.set_file(&key, Bytes::from_static(b"tick tock"));
        files
            .insert(
                NewFile {
                    id,
                    placeholder_id: id.to_string(),
                    staging_key: key,
                    owner_id,
                    filename: "clock.txt".to_string(),
                    content_type: "text/plain".to_string(),
                    size_bytes: 9,
                    content_sha256: None,
                    encrypted: false,
                    retention_units: 1,
                    created_at: Utc::now(),
                    upload_deadline: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let scheduler = TickScheduler::start(dispatcher, Duration::from_millis(20));
        for _ in 0..100 {
            if files.get(id).await.unwrap().unwrap().status == FileStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.shutdown().await;

        assert_eq!(
            files.get(id).await.unwrap().unwrap().status,
            FileStatus::Completed
        );
    }
}
