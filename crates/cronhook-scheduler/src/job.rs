//! The job: shared scheduling state plus a variant payload.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cronhook_core::{JobDescriptor, JobEdit};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::http::{BaseClient, HttpDispatch, HttpRequest, HttpView};
use crate::queue::{QueueDispatch, QueueMessage, QueueView};
use crate::schedule::{
    format_timestamp, resolve_fire_at, validate_repetitions, Countdown, CronExpression,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Http,
    Queue,
}

#[derive(Debug, Clone)]
pub(crate) enum JobSchedule {
    Recurring {
        cron: CronExpression,
        repetitions: Option<u32>,
        remaining: Option<u32>,
    },
    OneShot {
        delay_ms: u64,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum JobVariant {
    Http(HttpDispatch),
    Queue(QueueDispatch),
}

/// The clock a job needs installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClockPlan {
    /// Six-field cron expression.
    Cron(String),
    Timer(Duration),
}

/// What a trigger dispatches.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DispatchAction {
    Http(HttpRequest),
    Queue(QueueMessage),
}

/// Result of the accounting done when a trigger fires.
#[derive(Debug)]
pub(crate) struct Trigger {
    pub action: DispatchAction,
    pub run_at: DateTime<Utc>,
    /// The job must stop: one-shot fired, or repetitions ran out.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Job {
    name: String,
    description: String,
    schedule: JobSchedule,
    variant: JobVariant,
    state: JobState,
    execution_times: u32,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn from_descriptor(
        desc: &JobDescriptor,
        base_clients: &BTreeMap<String, BaseClient>,
        now: DateTime<Utc>,
    ) -> Result<Self, SchedulerError> {
        let name = validate_name(&desc.name)?;

        let schedule = match (&desc.cron, &desc.timer) {
            (None, None) => {
                return Err(SchedulerError::validation(
                    "a job must have either a cron expression or a timer",
                ))
            }
            (Some(_), Some(_)) => {
                return Err(SchedulerError::validation(
                    "a job can't have both a cron expression and a timer",
                ))
            }
            (Some(cron), None) => {
                let cron = CronExpression::parse(cron)?;
                let repetitions = desc.repetitions.map(validate_repetitions).transpose()?;
                JobSchedule::Recurring {
                    cron,
                    repetitions,
                    remaining: repetitions,
                }
            }
            (None, Some(timer)) => {
                if desc.repetitions.is_some() {
                    return Err(SchedulerError::validation(
                        "one-shot jobs can't have repetitions",
                    ));
                }
                JobSchedule::OneShot {
                    delay_ms: resolve_fire_at(timer, now)?,
                }
            }
        };

        let variant = match (desc.has_http_fields(), desc.has_queue_fields()) {
            (true, true) => {
                return Err(SchedulerError::validation(
                    "a job dispatches either over HTTP or to a queue, not both",
                ))
            }
            (true, false) => JobVariant::Http(HttpDispatch::from_descriptor(desc, base_clients)?),
            (false, true) => JobVariant::Queue(QueueDispatch::from_descriptor(desc)?),
            (false, false) => {
                return Err(SchedulerError::validation(
                    "a job needs an HTTP target (url and method) or a queue target (queue_url and queue_kind)",
                ))
            }
        };

        Ok(Self {
            name,
            description: desc.description.clone(),
            schedule,
            variant,
            state: JobState::Created,
            execution_times: 0,
            next_run_at: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> JobState {
        self.state
    }

    pub(crate) fn kind(&self) -> JobKind {
        match self.variant {
            JobVariant::Http(_) => JobKind::Http,
            JobVariant::Queue(_) => JobKind::Queue,
        }
    }

    pub(crate) fn execution_times(&self) -> u32 {
        self.execution_times
    }

    /// The clock this job needs for its current schedule.
    pub(crate) fn clock_plan(&self) -> ClockPlan {
        match &self.schedule {
            JobSchedule::Recurring { cron, .. } => ClockPlan::Cron(cron.normalized().to_string()),
            JobSchedule::OneShot { delay_ms } => ClockPlan::Timer(Duration::from_millis(*delay_ms)),
        }
    }

    /// Transition `Created -> Running`; the caller installs the clock next.
    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>, tz: Tz) -> Result<(), SchedulerError> {
        match self.state {
            JobState::Created => {}
            JobState::Running => {
                return Err(SchedulerError::validation(format!(
                    "job '{}' is already running",
                    self.name
                )))
            }
            JobState::Stopped => {
                return Err(SchedulerError::validation(format!(
                    "job '{}' was stopped and can't be restarted",
                    self.name
                )))
            }
        }

        match &mut self.schedule {
            JobSchedule::Recurring {
                cron,
                repetitions,
                remaining,
            } => {
                *remaining = *repetitions;
                self.next_run_at = cron.next_after(now, tz);
            }
            JobSchedule::OneShot { delay_ms } => {
                self.next_run_at = now.checked_add_signed(chrono_delay(*delay_ms));
            }
        }
        self.state = JobState::Running;
        Ok(())
    }

    /// Accounting for one trigger. Returns `None` when the job is not running.
    pub(crate) fn record_trigger(&mut self, now: DateTime<Utc>, tz: Tz) -> Option<Trigger> {
        if self.state != JobState::Running {
            return None;
        }

        self.execution_times = self.execution_times.saturating_add(1);
        self.last_run_at = Some(now);

        let exhausted = match &mut self.schedule {
            JobSchedule::Recurring { cron, remaining, .. } => {
                if let Some(left) = remaining {
                    *left = left.saturating_sub(1);
                }
                let exhausted = *remaining == Some(0);
                self.next_run_at = if exhausted {
                    None
                } else {
                    cron.next_after(now, tz)
                };
                exhausted
            }
            JobSchedule::OneShot { .. } => {
                self.next_run_at = None;
                true
            }
        };

        let action = match &self.variant {
            JobVariant::Http(http) => DispatchAction::Http(http.request()),
            JobVariant::Queue(queue) => DispatchAction::Queue(queue.message()),
        };

        Some(Trigger {
            action,
            run_at: now,
            exhausted,
        })
    }

    pub(crate) fn variant_mut(&mut self) -> &mut JobVariant {
        &mut self.variant
    }

    /// Returns `false` if the job was already stopped.
    pub(crate) fn mark_stopped(&mut self) -> bool {
        if self.state == JobState::Stopped {
            return false;
        }
        self.state = JobState::Stopped;
        self.next_run_at = None;
        true
    }

    /// Validate and apply `edit` atomically: on error `self` is untouched.
    ///
    /// Returns the clock to install when a running job's schedule changed.
    /// Name uniqueness is the registry's concern.
    pub(crate) fn apply_edit(
        &mut self,
        edit: &JobEdit,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Result<Option<ClockPlan>, SchedulerError> {
        let mut next = self.clone();
        let mut rescheduled = false;

        if let Some(name) = &edit.name {
            next.name = validate_name(name)?;
        }
        if let Some(description) = &edit.description {
            next.description.clone_from(description);
        }

        match &mut next.schedule {
            JobSchedule::Recurring {
                cron,
                repetitions,
                remaining,
            } => {
                if edit.timer.is_some() {
                    return Err(SchedulerError::validation(
                        "recurring jobs can't be given a timer; supply a cron expression",
                    ));
                }
                if let Some(expression) = &edit.cron {
                    *cron = CronExpression::parse(expression)?;
                    rescheduled = true;
                }
                if let Some(requested) = edit.repetitions {
                    let requested = validate_repetitions(requested)?;
                    if requested <= self.execution_times {
                        return Err(SchedulerError::validation(format!(
                            "repetitions ({requested}) must exceed the {} executions already run",
                            self.execution_times
                        )));
                    }
                    *repetitions = Some(requested);
                    *remaining = Some(requested - self.execution_times);
                }
                if rescheduled && next.state == JobState::Running {
                    next.next_run_at = cron.next_after(now, tz);
                }
            }
            JobSchedule::OneShot { delay_ms } => {
                if edit.cron.is_some() {
                    return Err(SchedulerError::validation(
                        "one-shot jobs can't be given a cron expression; supply a timer",
                    ));
                }
                if edit.repetitions.is_some() {
                    return Err(SchedulerError::validation(
                        "one-shot jobs can't have repetitions",
                    ));
                }
                if let Some(timer) = &edit.timer {
                    *delay_ms = resolve_fire_at(timer, now)?;
                    rescheduled = true;
                    if next.state == JobState::Running {
                        next.next_run_at = now.checked_add_signed(chrono_delay(*delay_ms));
                    }
                }
            }
        }

        next.variant = match &self.variant {
            JobVariant::Http(http) => JobVariant::Http(http.edited(edit)?),
            JobVariant::Queue(queue) => JobVariant::Queue(queue.edited(edit)?),
        };

        next.updated_at = now;
        let plan = (rescheduled && next.state == JobState::Running).then(|| next.clock_plan());
        *self = next;
        Ok(plan)
    }

    pub(crate) fn view(&self, now: DateTime<Utc>, tz: Tz) -> JobView {
        let (cron, timer, repetitions, remaining_repetitions) = match &self.schedule {
            JobSchedule::Recurring {
                cron,
                repetitions,
                remaining,
            } => (Some(cron.as_str().to_string()), None, *repetitions, *remaining),
            JobSchedule::OneShot { delay_ms } => (None, Some(*delay_ms), None, None),
        };

        let dispatch = match &self.variant {
            JobVariant::Http(http) => DispatchView::Http(http.view()),
            JobVariant::Queue(queue) => DispatchView::Queue(queue.view()),
        };

        JobView {
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind(),
            state: self.state,
            cron,
            timer,
            repetitions,
            remaining_repetitions,
            execution_times: self.execution_times,
            next_run_at: self.next_run_at.map(|at| format_timestamp(at, tz)),
            next_run_countdown: self.next_run_at.map(|at| Countdown::until(at, now)),
            last_run_at: self.last_run_at.map(|at| format_timestamp(at, tz)),
            created_at: format_timestamp(self.created_at, tz),
            updated_at: format_timestamp(self.updated_at, tz),
            dispatch,
        }
    }
}

/// Serialized form of a job. Never exposes clients or clock handles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub name: String,
    pub description: String,
    pub kind: JobKind,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// One-shot delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<u64>,
    pub repetitions: Option<u32>,
    pub remaining_repetitions: Option<u32>,
    pub execution_times: u32,
    pub next_run_at: Option<String>,
    pub next_run_countdown: Option<Countdown>,
    pub last_run_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub dispatch: DispatchView,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DispatchView {
    Http(HttpView),
    Queue(QueueView),
}

fn validate_name(name: &str) -> Result<String, SchedulerError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SchedulerError::validation("job name must be non-empty"));
    }
    Ok(trimmed.to_string())
}

fn chrono_delay(delay_ms: u64) -> chrono::TimeDelta {
    i64::try_from(delay_ms)
        .ok()
        .and_then(chrono::TimeDelta::try_milliseconds)
        .unwrap_or(chrono::TimeDelta::MAX)
}

#[cfg(test)]
#[path = "job_test.rs"]
mod tests;
