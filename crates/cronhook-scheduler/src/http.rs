//! HTTP dispatch: the `Http` job payload and the client that performs it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronhook_core::{HttpMethod, JobDescriptor, JobEdit};
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;

use crate::error::{DispatchError, SchedulerError};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// A named base URL (plus default headers) that HTTP jobs may reference by
/// name instead of carrying an absolute URL.
#[derive(Debug, Clone)]
pub struct BaseClient {
    pub base_url: Url,
    pub headers: BTreeMap<String, String>,
}

impl BaseClient {
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` if `base_url` is not an absolute URL.
    pub fn new(base_url: &str) -> Result<Self, SchedulerError> {
        let base_url = parse_absolute_url(base_url)?;
        Ok(Self {
            base_url,
            headers: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn resolve(&self, path: &str) -> Result<Url, SchedulerError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        parse_absolute_url(&joined)
    }
}

/// The most recent response (or error response) an HTTP job received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastResponse {
    pub run_at: DateTime<Utc>,
    pub status: u16,
    pub body: Value,
}

/// Payload of an HTTP-dispatching job.
#[derive(Debug, Clone)]
pub struct HttpDispatch {
    url: Url,
    base_client: Option<String>,
    /// Default headers of the base client; sent but never shown.
    client_headers: BTreeMap<String, String>,
    method: HttpMethod,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    body: Option<Value>,
    last_response: Option<LastResponse>,
}

impl HttpDispatch {
    pub(crate) fn from_descriptor(
        desc: &JobDescriptor,
        base_clients: &BTreeMap<String, BaseClient>,
    ) -> Result<Self, SchedulerError> {
        let method = desc
            .method
            .ok_or_else(|| SchedulerError::validation("HTTP jobs require a method"))?;

        let mut client_headers = BTreeMap::new();
        let (mut url, base_client) = match (&desc.url, &desc.base_client, &desc.path) {
            (Some(url), None, None) => (parse_absolute_url(url)?, None),
            (None, Some(client_name), Some(path)) => {
                let client = base_clients.get(client_name).ok_or_else(|| {
                    SchedulerError::validation(format!("unknown base client '{client_name}'"))
                })?;
                client_headers.clone_from(&client.headers);
                (client.resolve(path)?, Some(client_name.clone()))
            }
            (None, None, Some(_)) => {
                return Err(SchedulerError::validation(
                    "a path requires a base_client to resolve against",
                ))
            }
            (None, Some(_), None) => {
                return Err(SchedulerError::validation(
                    "a base_client requires a path",
                ))
            }
            (None, None, None) => {
                return Err(SchedulerError::validation(
                    "HTTP jobs require a url or a base_client and path",
                ))
            }
            (Some(_), _, _) => {
                return Err(SchedulerError::validation(
                    "url can't be combined with base_client or path",
                ))
            }
        };

        let headers = desc.headers.clone().unwrap_or_default();

        if let Some(query) = &desc.query {
            append_query(&mut url, query);
        }
        let query = query_of(&url);

        Ok(Self {
            url,
            base_client,
            client_headers,
            method,
            headers,
            query,
            body: desc.body.clone(),
            last_response: None,
        })
    }

    /// The payload after applying `edit`, leaving `self` untouched.
    pub(crate) fn edited(&self, edit: &JobEdit) -> Result<Self, SchedulerError> {
        if edit.has_queue_fields() {
            return Err(SchedulerError::validation(
                "queue fields can't be set on an HTTP job",
            ));
        }

        let mut next = self.clone();

        if let Some(url) = &edit.url {
            let mut url = parse_absolute_url(url)?;
            let existing: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
            let carried: BTreeMap<String, String> = next
                .query
                .iter()
                .filter(|(k, _)| !existing.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            append_query(&mut url, &carried);
            next.query = query_of(&url);
            next.url = url;
            next.base_client = None;
            next.client_headers.clear();
        }

        if let Some(query) = &edit.query {
            next.url.set_query(None);
            append_query(&mut next.url, query);
            next.query = query_of(&next.url);
        }

        if let Some(method) = edit.method {
            next.method = method;
        }
        if let Some(headers) = &edit.headers {
            next.headers = headers.clone();
        }
        if let Some(body) = &edit.body {
            next.body = Some(body.clone());
        }

        Ok(next)
    }

    pub(crate) fn request(&self) -> HttpRequest {
        let mut headers = self.client_headers.clone();
        headers.extend(self.headers.clone());
        HttpRequest {
            method: self.method,
            url: self.url.clone(),
            headers,
            body: self.body.clone(),
        }
    }

    /// Cache the outcome of a run. Transport failures carry no response and
    /// leave the previous one in place.
    pub(crate) fn record(&mut self, run_at: DateTime<Utc>, outcome: &Result<HttpResponse, DispatchError>) {
        match outcome {
            Ok(response) => {
                self.last_response = Some(LastResponse {
                    run_at,
                    status: response.status,
                    body: response.body.clone(),
                });
            }
            Err(DispatchError::Http { status, body, .. }) => {
                self.last_response = Some(LastResponse {
                    run_at,
                    status: *status,
                    body: body.clone(),
                });
            }
            Err(_) => {}
        }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    #[must_use]
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    #[must_use]
    pub fn last_response(&self) -> Option<&LastResponse> {
        self.last_response.as_ref()
    }

    pub(crate) fn view(&self) -> HttpView {
        HttpView {
            url: self.url.to_string(),
            base_client: self.base_client.clone(),
            method: self.method,
            headers: self.headers.clone(),
            query: self.query.clone(),
            body: self.body.clone(),
            last_response: self.last_response.clone(),
        }
    }
}

/// Serialized fields of an HTTP job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpView {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_client: Option<String>,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub last_response: Option<LastResponse>,
}

fn parse_absolute_url(raw: &str) -> Result<Url, SchedulerError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| SchedulerError::validation(format!("invalid url '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SchedulerError::validation(format!(
            "invalid url '{raw}': scheme must be http or https"
        )));
    }
    Ok(url)
}

/// Every query parameter of `url`; a repeated key keeps its last value.
fn query_of(url: &Url) -> BTreeMap<String, String> {
    url.query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

fn append_query(url: &mut Url, query: &BTreeMap<String, String>) {
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
}

/// One HTTP call as performed on trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

/// Performs the HTTP call of an HTTP job.
#[async_trait]
pub trait HttpDispatcher: Send + Sync {
    /// # Errors
    ///
    /// Returns `DispatchError::Http` for non-success statuses and
    /// `DispatchError::Transport` when no response was received.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DispatchError>;
}

/// `reqwest`-backed dispatcher.
#[derive(Debug, Clone)]
pub struct ReqwestDispatcher {
    client: Client,
}

impl ReqwestDispatcher {
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be built.
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpDispatcher for ReqwestDispatcher {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DispatchError> {
        let mut builder = self.client.request(to_reqwest_method(request.method), request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = parse_body(&text);

        if status.is_success() {
            Ok(HttpResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(DispatchError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown Status").to_string(),
                body,
            })
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// JSON when the body parses as JSON, a JSON string otherwise.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
