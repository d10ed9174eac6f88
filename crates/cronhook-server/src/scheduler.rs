//! Scheduler wiring.
//!
//! Builds the [`Scheduler`] from configuration at server startup and creates
//! the seed jobs.

use std::path::Path;
use std::sync::Arc;

use cronhook_core::{AppConfig, JobDescriptor};
use cronhook_scheduler::{
    HttpDispatcher, QueuePublisher, ReqwestDispatcher, Scheduler, SchedulerSettings, SqsPublisher,
};

/// Builds and starts the job scheduler.
///
/// The SQS publisher is only wired when credentials are configured; queue
/// jobs are rejected otherwise.
///
/// # Errors
///
/// Returns an error if a base client URL is invalid, an HTTP client cannot
/// be built, or the cron scheduler fails to start.
pub async fn build_scheduler(config: &AppConfig) -> anyhow::Result<Scheduler> {
    let settings = SchedulerSettings::from_app_config(config)?;

    let http: Arc<dyn HttpDispatcher> = Arc::new(ReqwestDispatcher::new(
        config.http_timeout_secs,
        &config.http_user_agent,
    )?);

    let queue = match &config.sqs {
        Some(sqs) => {
            tracing::info!(region = %sqs.region, "scheduler: SQS publisher configured");
            Some(Arc::new(SqsPublisher::new(sqs)?) as Arc<dyn QueuePublisher>)
        }
        None => {
            tracing::warn!("scheduler: SQS credentials not set; queue jobs are disabled");
            None
        }
    };

    Ok(Scheduler::new(settings, http, queue).await?)
}

/// Create and start every job in the seed file.
///
/// A file that can't be loaded, or a job that fails validation, is logged and
/// skipped; the server still starts.
pub async fn seed_jobs(scheduler: &Scheduler, path: &Path) -> usize {
    let seeds = match cronhook_core::load_seed_jobs(path) {
        Ok(seeds) => seeds,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "scheduler: failed to load seed jobs");
            return 0;
        }
    };

    create_all(scheduler, &seeds.jobs).await
}

async fn create_all(scheduler: &Scheduler, jobs: &[JobDescriptor]) -> usize {
    let mut started = 0;
    for desc in jobs {
        match scheduler.create_job(desc).await {
            Ok(view) => {
                started += 1;
                tracing::info!(
                    job = %view.name,
                    next_run_at = view.next_run_at.as_deref().unwrap_or("-"),
                    "scheduler: seed job started"
                );
            }
            Err(e) => {
                tracing::error!(job = %desc.name, error = %e, "scheduler: skipping seed job");
            }
        }
    }

    tracing::info!(started, total = jobs.len(), "scheduler: seed jobs loaded");
    started
}
