//! Job descriptors shared by the scheduler engine, the HTTP control plane and
//! the seed-jobs file.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// When a one-shot job fires: a delay in milliseconds from "now", or an
/// absolute timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FireAt {
    Delay(u64),
    At(DateTime<FixedOffset>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Fifo,
    Standard,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKind::Fifo => write!(f, "fifo"),
            QueueKind::Standard => write!(f, "standard"),
        }
    }
}

/// Everything needed to construct a job.
///
/// Exactly one of `cron` or `timer` selects the schedule. The HTTP fields
/// (`url` or `base_client` + `path`, `method`, `headers`, `query`) and the
/// queue fields (`queue_url`, `queue_kind`, ids) are mutually exclusive; `body`
/// is shared by both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cron: Option<String>,
    pub repetitions: Option<i64>,
    pub timer: Option<FireAt>,

    pub url: Option<String>,
    pub base_client: Option<String>,
    pub path: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers: Option<BTreeMap<String, String>>,
    pub query: Option<BTreeMap<String, String>>,

    pub queue_url: Option<String>,
    pub queue_kind: Option<QueueKind>,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,

    pub body: Option<Value>,
}

impl JobDescriptor {
    #[must_use]
    pub fn has_http_fields(&self) -> bool {
        self.url.is_some()
            || self.base_client.is_some()
            || self.path.is_some()
            || self.method.is_some()
            || self.headers.is_some()
            || self.query.is_some()
    }

    #[must_use]
    pub fn has_queue_fields(&self) -> bool {
        self.queue_url.is_some()
            || self.queue_kind.is_some()
            || self.message_group_id.is_some()
            || self.message_deduplication_id.is_some()
    }
}

/// A partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cron: Option<String>,
    pub repetitions: Option<i64>,
    pub timer: Option<FireAt>,

    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers: Option<BTreeMap<String, String>>,
    pub query: Option<BTreeMap<String, String>>,

    pub queue_url: Option<String>,
    pub queue_kind: Option<QueueKind>,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,

    pub body: Option<Value>,
}

impl JobEdit {
    #[must_use]
    pub fn has_http_fields(&self) -> bool {
        self.url.is_some() || self.method.is_some() || self.headers.is_some() || self.query.is_some()
    }

    #[must_use]
    pub fn has_queue_fields(&self) -> bool {
        self.queue_url.is_some()
            || self.queue_kind.is_some()
            || self.message_group_id.is_some()
            || self.message_deduplication_id.is_some()
    }
}

/// Fuzzy search criteria. Text fields match by edit distance, `repetitions`,
/// `method` and `queue_kind` match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cron: Option<String>,
    pub repetitions: Option<u32>,
    pub next_run_at: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,

    pub url: Option<String>,
    pub method: Option<HttpMethod>,

    pub queue_url: Option<String>,
    pub queue_kind: Option<QueueKind>,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_deserializes_recurring_http_job() {
        let json = serde_json::json!({
            "name": "daily-sync",
            "description": "sync the CRM",
            "cron": "0 17 * * *",
            "repetitions": 3,
            "url": "https://crm.example/sync",
            "method": "POST",
            "query": { "full": "true" },
            "body": { "dry_run": false }
        });
        let desc: JobDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(desc.cron.as_deref(), Some("0 17 * * *"));
        assert_eq!(desc.repetitions, Some(3));
        assert_eq!(desc.method, Some(HttpMethod::Post));
        assert!(desc.has_http_fields());
        assert!(!desc.has_queue_fields());
    }

    #[test]
    fn fire_at_accepts_delay_or_timestamp() {
        let delay: FireAt = serde_json::from_value(serde_json::json!(60_000)).unwrap();
        assert_eq!(delay, FireAt::Delay(60_000));

        let at: FireAt =
            serde_json::from_value(serde_json::json!("2030-01-01T10:00:00-03:00")).unwrap();
        assert!(matches!(at, FireAt::At(ts) if ts.offset().local_minus_utc() == -3 * 3600));
    }

    #[test]
    fn descriptor_rejects_unknown_fields() {
        let json = serde_json::json!({ "name": "x", "instance": "crm" });
        assert!(serde_json::from_value::<JobDescriptor>(json).is_err());
    }

    #[test]
    fn queue_kind_is_lowercase() {
        let kind: QueueKind = serde_json::from_value(serde_json::json!("fifo")).unwrap();
        assert_eq!(kind, QueueKind::Fifo);
        assert_eq!(QueueKind::Standard.to_string(), "standard");
    }
}
