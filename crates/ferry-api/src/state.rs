//! Application state shared by all handlers.

use anyhow::Result;
use ferry_core::Config;
use ferry_db::{ClaimLimits, FileStore};
use ferry_services::{
    ExpirationSweeper, IngestionGateway, PaymentGate, RetentionService, RetrievalService,
};
use ferry_storage::{DurableStore, Storage};
use ferry_worker::{Committer, Dispatcher, StagingJanitor, StaleJobReaper, UploadWatcher};
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub files: Arc<dyn FileStore>,
    pub staging: Arc<dyn Storage>,
    pub gateway: IngestionGateway,
    pub retrieval: RetrievalService,
    pub retention: RetentionService,
    pub sweeper: ExpirationSweeper,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Wire every service from its collaborators. Used by setup and by tests.
    pub fn build(
        config: Config,
        files: Arc<dyn FileStore>,
        staging: Arc<dyn Storage>,
        network: Arc<dyn DurableStore>,
        payments: Arc<dyn PaymentGate>,
    ) -> Result<Arc<Self>> {
        let gateway = IngestionGateway::new(
            files.clone(),
            staging.clone(),
            payments,
            config.retention,
            config.max_file_size_bytes(),
            config.presigned_upload_ttl(),
        );
        let retrieval = RetrievalService::new(
            files.clone(),
            staging.clone(),
            network.clone(),
            config.retrieval,
        );
        let retention = RetentionService::new(files.clone(), network.clone(), config.retention);
        let sweeper = ExpirationSweeper::new(files.clone(), staging.clone(), config.retention);

        let committer = Committer::new(
            files.clone(),
            staging.clone(),
            network,
            config.commit,
            ClaimLimits::from(&config.dispatch),
        )?;
        let dispatcher = Dispatcher::new(
            files.clone(),
            Arc::new(committer),
            StaleJobReaper::new(files.clone(), config.stale_threshold()),
            config.dispatch,
        )
        .with_upload_watcher(UploadWatcher::new(
            files.clone(),
            staging.clone(),
            config.dispatch.scan_limit,
        ))
        .with_janitor(StagingJanitor::new(
            files.clone(),
            staging.clone(),
            config.staging_grace(),
            config.staging_janitor_batch,
        ));

        Ok(Arc::new(Self {
            config,
            files,
            staging,
            gateway,
            retrieval,
            retention,
            sweeper,
            dispatcher: Arc::new(dispatcher),
        }))
    }
}
