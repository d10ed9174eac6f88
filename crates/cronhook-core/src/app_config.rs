use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Credentials and endpoint for the SQS-compatible queue publisher.
#[derive(Clone)]
pub struct SqsConfig {
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Overrides the endpoint derived from each queue URL (local stacks, tests).
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for SqsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsConfig")
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[redacted]")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub timezone: chrono_tz::Tz,
    pub similarity_threshold: usize,
    pub http_timeout_secs: u64,
    pub http_user_agent: String,
    /// Named base URLs that HTTP jobs may reference instead of an absolute URL.
    pub http_base_clients: BTreeMap<String, String>,
    /// Default headers per base client, keyed by client name then header name.
    pub http_base_client_headers: BTreeMap<String, BTreeMap<String, String>>,
    pub jobs_path: Option<PathBuf>,
    pub sqs: Option<SqsConfig>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("timezone", &self.timezone)
            .field("similarity_threshold", &self.similarity_threshold)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("http_user_agent", &self.http_user_agent)
            .field("http_base_clients", &self.http_base_clients)
            .field(
                "http_base_client_headers",
                &self
                    .http_base_client_headers
                    .iter()
                    .map(|(client, headers)| (client, headers.keys().collect::<Vec<_>>()))
                    .collect::<BTreeMap<_, _>>(),
            )
            .field("jobs_path", &self.jobs_path)
            .field("sqs", &self.sqs)
            .finish()
    }
}
