//! Queue dispatch: the `Queue` job payload and an SQS publisher.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cronhook_core::{JobDescriptor, JobEdit, QueueKind, SqsConfig};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DispatchError, QueueServiceError, SchedulerError};
use crate::sigv4::{sign_post, SigningParams};

const SQS_TARGET_SEND_MESSAGE: &str = "AmazonSQS.SendMessage";
const SQS_CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const SQS_TIMEOUT_SECS: u64 = 30;

/// Payload of a queue-publishing job.
#[derive(Debug, Clone)]
pub struct QueueDispatch {
    queue_url: Url,
    kind: QueueKind,
    body: Value,
    message_group_id: Option<String>,
    message_deduplication_id: Option<String>,
}

impl QueueDispatch {
    pub(crate) fn from_descriptor(desc: &JobDescriptor) -> Result<Self, SchedulerError> {
        let queue_url = desc
            .queue_url
            .as_deref()
            .ok_or_else(|| SchedulerError::validation("queue jobs require a queue_url"))?;
        let kind = desc
            .queue_kind
            .ok_or_else(|| SchedulerError::validation("queue jobs require a queue_kind"))?;

        Self::validated(
            queue_url,
            kind,
            desc.body.clone().unwrap_or(Value::Null),
            desc.message_group_id.clone(),
            desc.message_deduplication_id.clone(),
        )
    }

    /// The payload after applying `edit`; invariants are checked against the
    /// merged result.
    pub(crate) fn edited(&self, edit: &JobEdit) -> Result<Self, SchedulerError> {
        if edit.has_http_fields() {
            return Err(SchedulerError::validation(
                "HTTP fields can't be set on a queue job",
            ));
        }
        if edit.queue_url.is_some() && edit.queue_kind.is_none() {
            return Err(SchedulerError::validation(
                "changing queue_url requires queue_kind",
            ));
        }

        let kind = edit.queue_kind.unwrap_or(self.kind);
        let queue_url = edit
            .queue_url
            .clone()
            .unwrap_or_else(|| self.queue_url.to_string());
        let body = edit.body.clone().unwrap_or_else(|| self.body.clone());

        // Ids are carried over only while the queue stays FIFO.
        let (group, dedup) = match kind {
            QueueKind::Fifo => (
                edit.message_group_id
                    .clone()
                    .or_else(|| self.message_group_id.clone()),
                edit.message_deduplication_id
                    .clone()
                    .or_else(|| self.message_deduplication_id.clone()),
            ),
            QueueKind::Standard => (
                edit.message_group_id.clone(),
                edit.message_deduplication_id.clone(),
            ),
        };

        Self::validated(&queue_url, kind, body, group, dedup)
    }

    fn validated(
        queue_url: &str,
        kind: QueueKind,
        body: Value,
        message_group_id: Option<String>,
        message_deduplication_id: Option<String>,
    ) -> Result<Self, SchedulerError> {
        let queue_url = Url::parse(queue_url.trim()).map_err(|e| {
            SchedulerError::validation(format!("invalid queue_url '{queue_url}': {e}"))
        })?;
        if !matches!(queue_url.scheme(), "http" | "https") {
            return Err(SchedulerError::validation(format!(
                "invalid queue_url '{queue_url}': scheme must be http or https"
            )));
        }

        match kind {
            QueueKind::Fifo => {
                if !queue_url.path().trim_end_matches('/').ends_with(".fifo") {
                    return Err(SchedulerError::validation(
                        "fifo queue URLs must end with '.fifo'",
                    ));
                }
                if message_group_id.is_none() || message_deduplication_id.is_none() {
                    return Err(SchedulerError::validation(
                        "fifo queue jobs require message_group_id and message_deduplication_id",
                    ));
                }
            }
            QueueKind::Standard => {
                if message_group_id.is_some() || message_deduplication_id.is_some() {
                    return Err(SchedulerError::validation(
                        "message_group_id and message_deduplication_id are only allowed for fifo queues",
                    ));
                }
            }
        }

        Ok(Self {
            queue_url,
            kind,
            body,
            message_group_id,
            message_deduplication_id,
        })
    }

    pub(crate) fn message(&self) -> QueueMessage {
        QueueMessage {
            queue_url: self.queue_url.to_string(),
            body: self.body.to_string(),
            message_group_id: self.message_group_id.clone(),
            message_deduplication_id: self.message_deduplication_id.clone(),
        }
    }

    #[must_use]
    pub fn queue_url(&self) -> &Url {
        &self.queue_url
    }

    #[must_use]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub(crate) fn view(&self) -> QueueView {
        QueueView {
            queue_url: self.queue_url.to_string(),
            queue_kind: self.kind,
            body: self.body.clone(),
            message_group_id: self.message_group_id.clone(),
            message_deduplication_id: self.message_deduplication_id.clone(),
        }
    }
}

/// Serialized fields of a queue job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueView {
    pub queue_url: String,
    pub queue_kind: QueueKind,
    pub body: Value,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

/// One message as published on trigger; `body` is the JSON-serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub queue_url: String,
    pub body: String,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: String,
}

/// Publishes the message of a queue job.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// # Errors
    ///
    /// Returns `DispatchError::Queue` when the service rejects the message or
    /// cannot be reached.
    async fn publish(&self, message: QueueMessage) -> Result<PublishReceipt, DispatchError>;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageRequest<'a> {
    queue_url: &'a str,
    message_body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_group_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_deduplication_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    #[serde(rename = "MessageId")]
    message_id: String,
}

#[derive(Deserialize)]
struct ServiceErrorBody {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

/// SQS publisher speaking the JSON protocol, signed with SigV4.
pub struct SqsPublisher {
    client: Client,
    region: String,
    access_key: String,
    secret_key: String,
    endpoint: Option<Url>,
}

impl std::fmt::Debug for SqsPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsPublisher")
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[redacted]")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl SqsPublisher {
    /// # Errors
    ///
    /// Returns `SchedulerError` if the endpoint override is not a URL or the
    /// HTTP client cannot be built.
    pub fn new(config: &SqsConfig) -> Result<Self, SchedulerError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| {
                    SchedulerError::validation(format!("invalid SQS endpoint '{raw}': {e}"))
                })
            })
            .transpose()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(SQS_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            region: config.region.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            endpoint,
        })
    }

    /// The endpoint a queue URL is published through: the override, or the
    /// queue URL's own origin.
    fn endpoint_for(&self, queue_url: &str) -> Result<Url, DispatchError> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        let mut url = Url::parse(queue_url).map_err(|e| {
            DispatchError::Other(format!("invalid queue_url '{queue_url}': {e}"))
        })?;
        url.set_path("/");
        url.set_query(None);
        Ok(url)
    }

    /// Region for the credential scope: the one in an AWS queue host, else
    /// the configured one. An endpoint override always uses the configured
    /// region.
    fn signing_region<'a>(&'a self, endpoint: &'a Url) -> &'a str {
        if self.endpoint.is_some() {
            return &self.region;
        }
        endpoint
            .host_str()
            .and_then(region_from_host)
            .unwrap_or(self.region.as_str())
    }
}

/// `sqs.<region>.amazonaws.com` (or the legacy `<region>.queue.amazonaws.com`)
/// to `<region>`.
fn region_from_host(host: &str) -> Option<&str> {
    let (region, rest) = match host.strip_prefix("sqs.") {
        Some(rest) => rest.split_once('.')?,
        None => {
            let (region, rest) = host.split_once('.')?;
            (region, rest.strip_prefix("queue.")?)
        }
    };
    (!region.is_empty() && rest.starts_with("amazonaws.com")).then_some(region)
}

#[async_trait]
impl QueuePublisher for SqsPublisher {
    async fn publish(&self, message: QueueMessage) -> Result<PublishReceipt, DispatchError> {
        let endpoint = self.endpoint_for(&message.queue_url)?;
        let region = self.signing_region(&endpoint).to_string();
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(DispatchError::Other(format!(
                    "queue endpoint '{endpoint}' has no host"
                )))
            }
        };

        let payload = serde_json::to_vec(&SendMessageRequest {
            queue_url: &message.queue_url,
            message_body: &message.body,
            message_group_id: message.message_group_id.as_deref(),
            message_deduplication_id: message.message_deduplication_id.as_deref(),
        })
        .map_err(|e| DispatchError::Other(format!("failed to encode SendMessage: {e}")))?;

        let signed = sign_post(
            &SigningParams {
                access_key: &self.access_key,
                secret_key: &self.secret_key,
                region: &region,
                service: "sqs",
            },
            &host,
            endpoint.path(),
            &[
                ("content-type", SQS_CONTENT_TYPE),
                ("x-amz-target", SQS_TARGET_SEND_MESSAGE),
            ],
            &payload,
            Utc::now(),
        );

        let response = self
            .client
            .post(endpoint)
            .header("content-type", SQS_CONTENT_TYPE)
            .header("x-amz-target", SQS_TARGET_SEND_MESSAGE)
            .header("x-amz-date", &signed.amz_date)
            .header("authorization", &signed.authorization)
            .body(payload)
            .send()
            .await
            .map_err(|e| QueueServiceError {
                code: "NetworkingError".to_string(),
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| QueueServiceError {
            code: "NetworkingError".to_string(),
            message: e.to_string(),
            status: Some(status.as_u16()),
        })?;

        if !status.is_success() {
            return Err(service_error(status.as_u16(), &text).into());
        }

        let parsed: SendMessageResponse =
            serde_json::from_str(&text).map_err(|e| QueueServiceError {
                code: "InvalidResponse".to_string(),
                message: format!("unexpected SendMessage response: {e}"),
                status: Some(status.as_u16()),
            })?;

        Ok(PublishReceipt {
            message_id: parsed.message_id,
        })
    }
}

/// Build a `QueueServiceError` from an SQS JSON error response.
fn service_error(status: u16, text: &str) -> QueueServiceError {
    let parsed: Option<ServiceErrorBody> = serde_json::from_str(text).ok();
    let (error_type, message) = parsed
        .map(|body| (body.error_type, body.message))
        .unwrap_or_default();

    // "com.amazonaws.sqs#QueueDoesNotExist" -> "QueueDoesNotExist"
    let code = error_type
        .as_deref()
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "UnknownError".to_string());
    let message = message.unwrap_or_else(|| text.trim().to_string());

    QueueServiceError {
        code,
        message,
        status: Some(status),
    }
}
