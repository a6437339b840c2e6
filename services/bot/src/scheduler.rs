//! Cron-driven maintenance jobs

use anyhow::Result;
use dispatch::sweep::MaintenanceService;
use std::{future::Future, sync::Arc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::AppConfig;

pub struct MaintenanceScheduler {
    maintenance: Arc<MaintenanceService>,
}

impl MaintenanceScheduler {
    pub fn new(maintenance: Arc<MaintenanceService>) -> Self {
        Self { maintenance }
    }

    /// Register the pending, stale-driver and retention jobs and start them
    ///
    /// The returned scheduler must be shut down by the caller.
    pub async fn start(&self, config: &AppConfig) -> Result<JobScheduler> {
        let scheduler = JobScheduler::new().await?;

        scheduler
            .add(self.job(&config.pending_sweep_schedule, |maintenance| async move {
                if let Err(e) = maintenance.expire_pending_rides().await {
                    error!("Pending ride sweep failed: {}", e);
                }
            })?)
            .await?;

        scheduler
            .add(self.job(&config.driver_sweep_schedule, |maintenance| async move {
                if let Err(e) = maintenance.purge_stale_drivers().await {
                    error!("Stale driver sweep failed: {}", e);
                }
            })?)
            .await?;

        scheduler
            .add(self.job(&config.retention_schedule, |maintenance| async move {
                if let Err(e) = maintenance.purge_archived_rides().await {
                    error!("Ride retention sweep failed: {}", e);
                }
                if let Err(e) = maintenance.purge_inactive_users().await {
                    error!("User retention sweep failed: {}", e);
                }
            })?)
            .await?;

        scheduler.start().await?;

        info!(
            "Started maintenance scheduler (pending: {}, drivers: {}, retention: {})",
            config.pending_sweep_schedule, config.driver_sweep_schedule, config.retention_schedule
        );
        Ok(scheduler)
    }

    fn job<F, Fut>(&self, schedule: &str, pass: F) -> Result<Job>
    where
        F: Fn(Arc<MaintenanceService>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let maintenance = self.maintenance.clone();
        let job = Job::new_async(schedule, move |_, _| {
            let maintenance = maintenance.clone();
            Box::pin(pass(maintenance))
        })?;
        Ok(job)
    }
}
