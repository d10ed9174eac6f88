//! Job scheduling engine: cron and one-shot clocks driving HTTP requests and
//! SQS messages.

pub mod engine;
pub mod error;
pub mod http;
mod job;
pub mod queue;
mod registry;
pub mod schedule;
mod search;
mod sigv4;
pub mod similarity;

pub use engine::{Hook, JobHandle, JobHooks, Scheduler, SchedulerSettings};
pub use error::{DispatchError, ErrorReport, QueueServiceError, SchedulerError};
pub use http::{BaseClient, HttpDispatcher, HttpRequest, HttpResponse, LastResponse, ReqwestDispatcher};
pub use job::{DispatchView, JobKind, JobState, JobView};
pub use queue::{PublishReceipt, QueueMessage, QueuePublisher, SqsPublisher};
