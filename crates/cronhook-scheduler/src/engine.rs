//! The scheduler service the control plane holds.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use chrono::Utc;
use chrono_tz::Tz;
use cronhook_core::{AppConfig, JobDescriptor, JobEdit, SearchCriteria};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use crate::error::{DispatchError, ErrorReport, SchedulerError};
use crate::http::{BaseClient, HttpDispatcher};
use crate::job::{ClockPlan, DispatchAction, Job, JobKind, JobState, JobVariant, JobView};
use crate::queue::QueuePublisher;
use crate::registry::{Clock, JobEntry, Registry};
use crate::search;
use crate::similarity::DEFAULT_THRESHOLD;

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Timezone cron expressions are evaluated in and timestamps rendered in.
    pub timezone: Tz,
    /// Maximum edit distance for fuzzy search.
    pub similarity_threshold: usize,
    pub base_clients: BTreeMap<String, BaseClient>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone: cronhook_core::DEFAULT_TIMEZONE,
            similarity_threshold: DEFAULT_THRESHOLD,
            base_clients: BTreeMap::new(),
        }
    }
}

impl SchedulerSettings {
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` if a configured base client URL is
    /// not absolute.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, SchedulerError> {
        let base_clients = config
            .http_base_clients
            .iter()
            .map(|(name, url)| {
                let headers = config.http_base_client_headers.get(name);
                BaseClient::new(url).map(|client| {
                    let client = headers
                        .into_iter()
                        .flatten()
                        .fold(client, |client, (header, value)| {
                            client.with_header(header.as_str(), value.as_str())
                        });
                    (name.clone(), client)
                })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Self {
            timezone: config.timezone,
            similarity_threshold: config.similarity_threshold,
            base_clients,
        })
    }
}

pub type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks invoked with the job name when a job starts or stops.
#[derive(Clone, Default)]
pub struct JobHooks {
    pub on_start: Option<Hook>,
    pub on_stop: Option<Hook>,
}

struct Inner {
    registry: Registry,
    cron: JobScheduler,
    settings: SchedulerSettings,
    http: Arc<dyn HttpDispatcher>,
    queue: Option<Arc<dyn QueuePublisher>>,
    hooks: JobHooks,
}

/// Creates, starts, edits, stops and searches jobs.
///
/// Cheap to clone; clones share one registry and one cron scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.inner.settings)
            .field("jobs", &self.inner.registry.len())
            .field("queue_configured", &self.inner.queue.is_some())
            .finish_non_exhaustive()
    }
}

/// A registered job. Stays usable after the job stops.
#[derive(Clone)]
pub struct JobHandle {
    scheduler: Scheduler,
    entry: Arc<JobEntry>,
}

impl JobHandle {
    #[must_use]
    pub fn name(&self) -> String {
        self.entry.job().name().to_string()
    }

    #[must_use]
    pub fn view(&self) -> JobView {
        self.scheduler.view_of(&self.entry)
    }

    /// Install the job's clock and register it as running.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` if the job was already started or
    /// stopped, and `SchedulerError::Clock` if the clock can't be installed
    /// (the job is then stopped).
    pub async fn start(&self) -> Result<JobView, SchedulerError> {
        self.scheduler.start_entry(&self.entry).await
    }

    /// Tear the job down. Calling it again is a no-op.
    pub async fn stop(&self) {
        self.scheduler.stop_entry(&self.entry).await;
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Build a scheduler and start its cron clock.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Clock` if the cron scheduler can't start.
    pub async fn new(
        settings: SchedulerSettings,
        http: Arc<dyn HttpDispatcher>,
        queue: Option<Arc<dyn QueuePublisher>>,
    ) -> Result<Self, SchedulerError> {
        Self::with_hooks(settings, http, queue, JobHooks::default()).await
    }

    /// Like [`Scheduler::new`], invoking `hooks` on every job start and stop.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Clock` if the cron scheduler can't start.
    pub async fn with_hooks(
        settings: SchedulerSettings,
        http: Arc<dyn HttpDispatcher>,
        queue: Option<Arc<dyn QueuePublisher>>,
        hooks: JobHooks,
    ) -> Result<Self, SchedulerError> {
        let cron = JobScheduler::new().await?;
        cron.start().await?;

        tracing::info!(
            timezone = %settings.timezone,
            similarity_threshold = settings.similarity_threshold,
            base_clients = settings.base_clients.len(),
            queue_configured = queue.is_some(),
            "scheduler: started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                registry: Registry::default(),
                cron,
                settings,
                http,
                queue,
                hooks,
            }),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    /// Validate a descriptor and register the job as created, unscheduled.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` for invalid descriptors and
    /// `SchedulerError::DuplicateName` if the name is taken.
    pub fn construct(&self, desc: &JobDescriptor) -> Result<JobHandle, SchedulerError> {
        if desc.has_queue_fields() && !desc.has_http_fields() && self.inner.queue.is_none() {
            return Err(SchedulerError::validation(
                "queue dispatch is not configured; set SQS_ACCESS_KEY and SQS_SECRET_KEY",
            ));
        }

        let job = Job::from_descriptor(desc, &self.inner.settings.base_clients, Utc::now())?;
        let kind = job.kind();
        let entry = self.inner.registry.insert(job)?;

        tracing::debug!(job = %desc.name.trim(), ?kind, "scheduler: job created");
        Ok(JobHandle {
            scheduler: self.clone(),
            entry,
        })
    }

    /// Construct and start a job.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::construct`] and [`JobHandle::start`].
    pub async fn create_job(&self, desc: &JobDescriptor) -> Result<JobView, SchedulerError> {
        let handle = self.construct(desc)?;
        handle.start().await
    }

    /// # Errors
    ///
    /// Returns `SchedulerError::NotFound` if no registered job has this name.
    pub fn job_handle(&self, name: &str) -> Result<JobHandle, SchedulerError> {
        let entry = self.find(name)?;
        Ok(JobHandle {
            scheduler: self.clone(),
            entry,
        })
    }

    #[must_use]
    pub fn list_running_jobs(&self) -> Vec<JobView> {
        self.views(&self.inner.registry.running())
    }

    /// Every registered job, started or not.
    #[must_use]
    pub fn list_created_jobs(&self) -> Vec<JobView> {
        self.views(&self.inner.registry.entries())
    }

    /// # Errors
    ///
    /// Returns `SchedulerError::NotFound` if no registered job has this name.
    pub fn get_job_by_name(&self, name: &str) -> Result<JobView, SchedulerError> {
        let entry = self.find(name)?;
        Ok(self.view_of(&entry))
    }

    /// The running job whose name is closest to `name`, optionally restricted
    /// to one variant.
    #[must_use]
    pub fn find_most_similar(&self, name: &str, kind: Option<JobKind>) -> Option<JobView> {
        let jobs: Vec<JobView> = self
            .list_running_jobs()
            .into_iter()
            .filter(|job| kind.is_none_or(|kind| job.kind == kind))
            .collect();
        search::find_most_similar(&jobs, name).cloned()
    }

    /// Running jobs matching `criteria`: HTTP hits first, then queue hits.
    #[must_use]
    pub fn find_similar_jobs(&self, criteria: &SearchCriteria) -> Vec<JobView> {
        let jobs = self.list_running_jobs();
        let threshold = self.inner.settings.similarity_threshold;

        let mut found: Vec<JobView> =
            search::find_similar(&jobs, JobKind::Http, criteria, threshold)
                .into_iter()
                .cloned()
                .collect();
        found.extend(
            search::find_similar(&jobs, JobKind::Queue, criteria, threshold)
                .into_iter()
                .cloned(),
        );
        found
    }

    /// Apply a partial update; rescheduling happens immediately.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotFound` for unknown names,
    /// `SchedulerError::DuplicateName` if renaming onto another job, and
    /// `SchedulerError::Validation` for any other violated invariant. A
    /// rejected edit changes nothing.
    pub async fn edit_job(&self, name: &str, edit: &JobEdit) -> Result<JobView, SchedulerError> {
        let entry = self.find(name)?;
        let now = Utc::now();
        let tz = self.inner.settings.timezone;

        let plan = self
            .inner
            .registry
            .with_unique_name(&entry, edit.name.as_deref(), |job| {
                if job.state() == JobState::Stopped {
                    return Err(SchedulerError::NotFound {
                        name: name.to_string(),
                    });
                }
                job.apply_edit(edit, now, tz)
            })?;

        if let Some(plan) = plan {
            self.reschedule(&entry, plan).await?;
        }

        let view = self.view_of(&entry);
        tracing::info!(job = %view.name, previous = %name, "scheduler: job edited");
        Ok(view)
    }

    /// # Errors
    ///
    /// Returns `SchedulerError::NotFound` if no registered job has this name.
    pub async fn stop_job(&self, name: &str) -> Result<(), SchedulerError> {
        let entry = self.find(name)?;
        self.stop_entry(&entry).await;
        Ok(())
    }

    /// Stop every job and shut the cron clock down.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Clock` if the cron scheduler fails to shut down.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let entries = self.inner.registry.entries();
        let mut stopped = 0usize;
        for entry in &entries {
            if self.stop_entry(entry).await {
                stopped += 1;
            }
        }

        let mut cron = self.inner.cron.clone();
        cron.shutdown().await?;

        tracing::info!(stopped, "scheduler: shut down");
        Ok(())
    }

    fn find(&self, name: &str) -> Result<Arc<JobEntry>, SchedulerError> {
        self.inner
            .registry
            .find(name)
            .ok_or_else(|| SchedulerError::NotFound {
                name: name.to_string(),
            })
    }

    fn view_of(&self, entry: &JobEntry) -> JobView {
        entry.job().view(Utc::now(), self.inner.settings.timezone)
    }

    fn views(&self, entries: &[Arc<JobEntry>]) -> Vec<JobView> {
        entries.iter().map(|entry| self.view_of(entry)).collect()
    }

    async fn start_entry(&self, entry: &Arc<JobEntry>) -> Result<JobView, SchedulerError> {
        let (name, plan) = {
            let mut job = entry.job();
            job.mark_running(Utc::now(), self.inner.settings.timezone)?;
            (job.name().to_string(), job.clock_plan())
        };

        let generation = entry.next_generation();
        if let Err(e) = self.install(entry, plan, generation).await {
            tracing::error!(job = %name, error = %e, "scheduler: failed to install clock");
            self.stop_entry(entry).await;
            return Err(e);
        }

        if let Some(hook) = &self.inner.hooks.on_start {
            hook(&name);
        }

        let view = self.view_of(entry);
        tracing::info!(
            job = %name,
            next_run_at = view.next_run_at.as_deref().unwrap_or("-"),
            "scheduler: job started"
        );
        Ok(view)
    }

    async fn reschedule(&self, entry: &Arc<JobEntry>, plan: ClockPlan) -> Result<(), SchedulerError> {
        let generation = entry.next_generation();
        if let Err(e) = self.install(entry, plan, generation).await {
            let name = entry.job().name().to_string();
            tracing::error!(job = %name, error = %e, "scheduler: failed to reschedule, stopping job");
            self.stop_entry(entry).await;
            return Err(e);
        }
        Ok(())
    }

    /// Install a clock for `plan` and swap it in, tearing down the previous one.
    async fn install(
        &self,
        entry: &Arc<JobEntry>,
        plan: ClockPlan,
        generation: u64,
    ) -> Result<(), SchedulerError> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let target = Arc::clone(entry);

        let clock = match plan {
            ClockPlan::Cron(expression) => {
                let cron_job = CronJob::new_async_tz(
                    expression.as_str(),
                    self.inner.settings.timezone,
                    move |_uuid, _lock| {
                        let weak = weak.clone();
                        let target = Arc::clone(&target);
                        Box::pin(async move {
                            if let Some(inner) = weak.upgrade() {
                                Scheduler { inner }.fire(target, generation).await;
                            }
                        })
                    },
                )?;
                Clock::Cron(self.inner.cron.add(cron_job).await?)
            }
            ClockPlan::Timer(delay) => Clock::Timer(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(Scheduler { inner }.fire(target, generation));
                }
            })),
        };

        if let Some(previous) = entry.replace_clock(Some(clock)) {
            self.teardown(previous).await;
        }

        // A trigger may have stopped the job while the clock was installed.
        let stopped = entry.job().state() == JobState::Stopped;
        if stopped {
            if let Some(orphan) = entry.replace_clock(None) {
                self.teardown(orphan).await;
            }
        }
        Ok(())
    }

    async fn teardown(&self, clock: Clock) {
        match clock {
            Clock::Cron(uuid) => {
                if let Err(e) = self.inner.cron.remove(&uuid).await {
                    tracing::warn!(clock = %uuid, error = %e, "scheduler: failed to remove cron clock");
                }
            }
            Clock::Timer(handle) => handle.abort(),
        }
    }

    /// Returns `false` if the job was already stopped.
    async fn stop_entry(&self, entry: &Arc<JobEntry>) -> bool {
        let name = {
            let mut job = entry.job();
            if !job.mark_stopped() {
                return false;
            }
            job.name().to_string()
        };

        entry.next_generation();
        self.inner.registry.remove(entry);
        if let Some(clock) = entry.replace_clock(None) {
            self.teardown(clock).await;
        }

        if let Some(hook) = &self.inner.hooks.on_stop {
            hook(&name);
        }
        tracing::info!(job = %name, "scheduler: job stopped");
        true
    }

    /// Handle one trigger: account for it, stop the job if it is exhausted,
    /// then dispatch and record the outcome.
    async fn fire(self, entry: Arc<JobEntry>, generation: u64) {
        let now = Utc::now();
        let (name, execution, trigger) = {
            let mut job = entry.job();
            if entry.generation() != generation {
                return;
            }
            let Some(trigger) = job.record_trigger(now, self.inner.settings.timezone) else {
                return;
            };
            (job.name().to_string(), job.execution_times(), trigger)
        };

        tracing::info!(job = %name, execution, "scheduler: running job");

        if trigger.exhausted {
            self.stop_entry(&entry).await;
        }

        match trigger.action {
            DispatchAction::Http(request) => {
                let outcome = self.inner.http.send(request).await;
                if let JobVariant::Http(http) = entry.job().variant_mut() {
                    http.record(trigger.run_at, &outcome);
                }
                match outcome {
                    Ok(response) => {
                        tracing::info!(job = %name, status = response.status, "scheduler: HTTP dispatch succeeded");
                    }
                    Err(e) => ErrorReport::classify(&e, Some(name.as_str())).log(),
                }
            }
            DispatchAction::Queue(message) => {
                let outcome = match &self.inner.queue {
                    Some(publisher) => publisher.publish(message).await,
                    None => Err(DispatchError::Other(
                        "queue dispatch is not configured".to_string(),
                    )),
                };
                match outcome {
                    Ok(receipt) => {
                        tracing::info!(job = %name, message_id = %receipt.message_id, "scheduler: message published");
                    }
                    Err(e) => ErrorReport::classify(&e, Some(name.as_str())).log(),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
