use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Failures of control-plane operations (construct, start, edit, stop, get).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A construction or edit invariant was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// Another job, of either variant, already uses this name.
    #[error("validation error: a job named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("job not found: {name}")]
    NotFound { name: String },

    /// The cron scheduler refused to add or remove a clock.
    #[error("clock error: {0}")]
    Clock(#[from] JobSchedulerError),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl SchedulerError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        SchedulerError::Validation(message.into())
    }

    /// Whether the caller supplied bad input (as opposed to an internal fault).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::Validation(_) | SchedulerError::DuplicateName { .. }
        )
    }
}

/// An error reported by the queue service, or a failure to reach it.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct QueueServiceError {
    pub code: String,
    pub message: String,
    /// HTTP status returned by the service, when a response was received.
    pub status: Option<u16>,
}

/// Failures of a dispatch action at trigger time. These are classified and
/// logged, never propagated to the control plane.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The remote endpoint answered with a non-success status.
    #[error("HTTP {status} {reason}")]
    Http {
        status: u16,
        reason: String,
        body: Value,
    },

    /// The request never produced a response (connect, timeout, TLS, decode).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("queue service error: {0}")]
    Queue(#[from] QueueServiceError),

    #[error("{0}")]
    Other(String),
}

/// Normalized shape of any dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub name: String,
    pub message: String,
    pub status: u16,
    pub stack: String,
    pub job: Option<String>,
}

const INTERNAL_ERROR: u16 = 500;

impl ErrorReport {
    /// Classify a dispatch failure. Never fails.
    #[must_use]
    pub fn classify(error: &DispatchError, job: Option<&str>) -> Self {
        let (name, message, status) = match error {
            DispatchError::Http { status, reason, .. } => {
                ("Axios Error", reason.clone(), *status)
            }
            DispatchError::Transport(e) => (
                "Axios Error",
                e.to_string(),
                e.status().map_or(INTERNAL_ERROR, |s| s.as_u16()),
            ),
            DispatchError::Queue(e) => (
                "Queue Service Exception",
                e.message.clone(),
                e.status.unwrap_or(INTERNAL_ERROR),
            ),
            DispatchError::Other(message) => ("Error", message.clone(), INTERNAL_ERROR),
        };

        Self {
            name: name.to_string(),
            message,
            status,
            stack: error_chain(error),
            job: job.map(ToOwned::to_owned),
        }
    }

    pub fn log(&self) {
        tracing::error!(
            job = self.job.as_deref().unwrap_or("-"),
            name = %self.name,
            status = self.status,
            stack = %self.stack,
            "{}",
            self.message
        );
    }
}

/// Render an error and its `source()` chain, one cause per line.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str("\ncaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
