//! Dispatcher: one idempotent scheduling pass over the file table.
//!
//! A tick reaps stale claims, releases presigned uploads that have landed, recounts
//! in-flight work, plans which candidates fit under the caps and spawns one
//! committer per selected file. Nothing is remembered
//! between ticks; overlapping or repeated ticks are safe because the claim itself
//! enforces exclusivity and the caps.

use anyhow::Result;
use ferry_core::models::{FileRecord, FileStatus};
use ferry_core::DispatchPolicy;
use ferry_db::{CandidateQuery, FileStore, InFlightCounts};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::committer::{CommitReport, Committer};
use crate::janitor::StagingJanitor;
use crate::reaper::StaleJobReaper;
use crate::uploads::UploadWatcher;

/// Strict priority: small pending, then large pending, then retryable failed.
fn priority(record: &FileRecord, policy: &DispatchPolicy) -> Option<u8> {
    match record.status {
        FileStatus::Pending if record.upload_deadline.is_some() => None,
        FileStatus::Pending if record.size_bytes < policy.small_file_threshold_bytes => Some(0),
        FileStatus::Pending => Some(1),
        FileStatus::Failed if record.attempts < policy.max_attempts => Some(2),
        _ => None,
    }
}

/// Select the files to commit this tick from a snapshot of the table.
///
/// Candidates are ordered by priority class, then ascending size, then ascending
/// age. Failed files are only considered when the snapshot holds no pending file.
/// Slots are filled greedily; an owner at its cap is skipped without blocking the
/// rest of the scan.
pub fn plan_dispatch(
    candidates: &[FileRecord],
    in_flight: &InFlightCounts,
    policy: &DispatchPolicy,
) -> Vec<FileRecord> {
    let mut slots = policy.max_global.saturating_sub(in_flight.global);
    if slots == 0 {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut ranked: Vec<(u8, &FileRecord)> = candidates
        .iter()
        .filter(|record| seen.insert(record.id))
        .filter_map(|record| priority(record, policy).map(|p| (p, record)))
        .collect();
    ranked.sort_by(|(pa, a), (pb, b)| {
        pa.cmp(pb)
            .then(a.size_bytes.cmp(&b.size_bytes))
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
    if ranked.iter().any(|(p, _)| *p < 2) {
        ranked.retain(|(p, _)| *p < 2);
    }

    let mut per_owner: HashMap<Uuid, usize> = in_flight.per_owner.clone();
    let mut plan = Vec::new();
    for (_, record) in ranked {
        if slots == 0 {
            break;
        }
        let owner = per_owner.entry(record.owner_id).or_default();
        if *owner >= policy.max_per_owner {
            continue;
        }
        *owner += 1;
        slots -= 1;
        plan.push(record.clone());
    }
    plan
}

/// Outcome of one tick. Commits keep running after the tick returns; `commits`
/// lets a caller wait for them.
#[derive(Debug, Default)]
pub struct TickReport {
    pub reaped: Vec<Uuid>,
    pub uploads_released: usize,
    pub in_flight: usize,
    pub available_slots: usize,
    pub dispatched: Vec<Uuid>,
    pub staging_cleared: usize,
    pub commits: Vec<JoinHandle<Option<CommitReport>>>,
}

/// Serializable view of a [`TickReport`].
#[derive(Debug, Clone, Serialize)]
pub struct TickSummary {
    pub reaped: usize,
    pub uploads_released: usize,
    pub in_flight: usize,
    pub available_slots: usize,
    pub dispatched: Vec<Uuid>,
    pub staging_cleared: usize,
}

impl TickReport {
    pub fn summary(&self) -> TickSummary {
        TickSummary {
            reaped: self.reaped.len(),
            uploads_released: self.uploads_released,
            in_flight: self.in_flight,
            available_slots: self.available_slots,
            dispatched: self.dispatched.clone(),
            staging_cleared: self.staging_cleared,
        }
    }

    /// Wait for every commit spawned by this tick.
    pub async fn wait(self) -> Vec<CommitReport> {
        let mut reports = Vec::with_capacity(self.commits.len());
        for handle in self.commits {
            match handle.await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Commit task panicked"),
            }
        }
        reports
    }
}

pub struct Dispatcher {
    files: Arc<dyn FileStore>,
    committer: Arc<Committer>,
    reaper: StaleJobReaper,
    uploads: Option<UploadWatcher>,
    janitor: Option<StagingJanitor>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        files: Arc<dyn FileStore>,
        committer: Arc<Committer>,
        reaper: StaleJobReaper,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            files,
            committer,
            reaper,
            uploads: None,
            janitor: None,
            policy,
        }
    }

    /// Check outstanding presigned uploads before planning each tick.
    pub fn with_upload_watcher(mut self, uploads: UploadWatcher) -> Self {
        self.uploads = Some(uploads);
        self
    }

    /// Run the staging janitor after every tick.
    pub fn with_janitor(mut self, janitor: StagingJanitor) -> Self {
        self.janitor = Some(janitor);
        self
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickReport> {
        let start = Instant::now();
        let mut report = TickReport::default();

        match self.reaper.reap().await {
            Ok(reaped) => report.reaped = reaped,
            Err(e) => tracing::error!(error = %e, "Stale job reaper failed"),
        }

        if let Some(uploads) = &self.uploads {
            match uploads.run_once().await {
                Ok(released) => report.uploads_released = released,
                Err(e) => tracing::error!(error = %e, "Upload watcher failed"),
            }
        }

        let in_flight = self.files.in_flight().await?;
        report.in_flight = in_flight.global;
        report.available_slots = self.policy.max_global.saturating_sub(in_flight.global);

        if report.available_slots == 0 {
            tracing::debug!(in_flight = in_flight.global, "No free commit slots");
        } else {
            let candidates = self
                .files
                .dispatch_candidates(CandidateQuery::from(&self.policy))
                .await?;
            for record in plan_dispatch(&candidates, &in_flight, &self.policy) {
                report.dispatched.push(record.id);
                report.commits.push(self.spawn_commit(record.id));
            }
        }

        if let Some(janitor) = &self.janitor {
            match janitor.run_once().await {
                Ok(cleared) => report.staging_cleared = cleared,
                Err(e) => tracing::error!(error = %e, "Staging janitor failed"),
            }
        }

        tracing::info!(
            reaped = report.reaped.len(),
            uploads_released = report.uploads_released,
            in_flight = report.in_flight,
            available_slots = report.available_slots,
            dispatched = report.dispatched.len(),
            staging_cleared = report.staging_cleared,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Dispatch tick finished"
        );

        Ok(report)
    }

    fn spawn_commit(&self, file_id: Uuid) -> JoinHandle<Option<CommitReport>> {
        let committer = self.committer.clone();
        tokio::spawn(async move {
            match committer.run(file_id).await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::error!(error = %e, file_id = %file_id, "Commit aborted by store error");
                    None
                }
            }
        })
    }
}
