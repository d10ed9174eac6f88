//! The set of created and running jobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::SchedulerError;
use crate::job::{Job, JobState};

/// Handle to the clock currently driving a job.
#[derive(Debug)]
pub(crate) enum Clock {
    Cron(uuid::Uuid),
    Timer(tokio::task::JoinHandle<()>),
}

/// One registered job plus the clock that drives it.
#[derive(Debug)]
pub(crate) struct JobEntry {
    job: Mutex<Job>,
    clock: Mutex<Option<Clock>>,
    /// Bumped whenever the clock is replaced or torn down; triggers carrying
    /// an older generation are ignored.
    generation: AtomicU64,
}

impl JobEntry {
    pub(crate) fn new(job: Job) -> Self {
        Self {
            job: Mutex::new(job),
            clock: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn job(&self) -> MutexGuard<'_, Job> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate the current clock generation and return the new one.
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn replace_clock(&self, clock: Option<Clock>) -> Option<Clock> {
        let mut slot = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, clock)
    }
}

/// Created and running jobs in insertion order.
///
/// The name check and the insert happen under one lock, so two concurrent
/// registrations of the same name cannot both succeed. Lock order is always
/// registry first, then a job.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Mutex<Vec<Arc<JobEntry>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<JobEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a constructed job, rejecting a name already in use.
    pub(crate) fn insert(&self, job: Job) -> Result<Arc<JobEntry>, SchedulerError> {
        let mut entries = self.lock();
        if name_taken(&entries, job.name(), None) {
            return Err(SchedulerError::DuplicateName {
                name: job.name().to_string(),
            });
        }
        let entry = Arc::new(JobEntry::new(job));
        entries.push(Arc::clone(&entry));
        Ok(entry)
    }

    pub(crate) fn find(&self, name: &str) -> Option<Arc<JobEntry>> {
        self.lock()
            .iter()
            .find(|entry| entry.job().name() == name)
            .cloned()
    }

    /// Snapshot of every registered entry, in insertion order.
    pub(crate) fn entries(&self) -> Vec<Arc<JobEntry>> {
        self.lock().clone()
    }

    /// Snapshot of running entries, in insertion order.
    pub(crate) fn running(&self) -> Vec<Arc<JobEntry>> {
        self.lock()
            .iter()
            .filter(|entry| entry.job().state() == JobState::Running)
            .cloned()
            .collect()
    }

    /// Run `f` on an entry's job while holding the registry lock, after
    /// checking that `new_name` (if any) is not used by another entry.
    pub(crate) fn with_unique_name<T>(
        &self,
        entry: &Arc<JobEntry>,
        new_name: Option<&str>,
        f: impl FnOnce(&mut Job) -> Result<T, SchedulerError>,
    ) -> Result<T, SchedulerError> {
        let entries = self.lock();
        if let Some(name) = new_name.map(str::trim) {
            if name_taken(&entries, name, Some(entry)) {
                return Err(SchedulerError::DuplicateName {
                    name: name.to_string(),
                });
            }
        }
        let mut job = entry.job();
        f(&mut job)
    }

    /// Returns `false` if the entry was not registered.
    pub(crate) fn remove(&self, entry: &Arc<JobEntry>) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|existing| !Arc::ptr_eq(existing, entry));
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

fn name_taken(entries: &[Arc<JobEntry>], name: &str, except: Option<&Arc<JobEntry>>) -> bool {
    entries.iter().any(|existing| {
        except.is_none_or(|except| !Arc::ptr_eq(existing, except)) && existing.job().name() == name
    })
}
