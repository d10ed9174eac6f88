use std::collections::BTreeMap;

use crate::app_config::{AppConfig, Environment, SqsConfig};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so tests can drive it with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>().map_err(|e| invalid(var, e.to_string()))
    };

    let env = parse_environment(&or_default("CRONHOOK_ENV", "development"))?;

    let bind_addr = or_default("CRONHOOK_BIND_ADDR", "0.0.0.0:3000")
        .parse::<SocketAddr>()
        .map_err(|e| invalid("CRONHOOK_BIND_ADDR", e.to_string()))?;
    let log_level = or_default("CRONHOOK_LOG_LEVEL", "info");

    let timezone = match optional("CRONHOOK_TIMEZONE") {
        Some(raw) => raw
            .parse::<chrono_tz::Tz>()
            .map_err(|e| invalid("CRONHOOK_TIMEZONE", e.to_string()))?,
        None => crate::DEFAULT_TIMEZONE,
    };

    let similarity_threshold = parse_usize("CRONHOOK_SIMILARITY_THRESHOLD", "6")?;

    let http_timeout_secs = parse_u64("CRONHOOK_HTTP_TIMEOUT_SECS", "30")?;
    if http_timeout_secs == 0 {
        return Err(invalid(
            "CRONHOOK_HTTP_TIMEOUT_SECS",
            "must be greater than zero".to_string(),
        ));
    }
    let http_user_agent = or_default("CRONHOOK_HTTP_USER_AGENT", "cronhook/0.1 (job-dispatch)");
    let http_base_clients = match optional("CRONHOOK_HTTP_BASE_CLIENTS") {
        Some(raw) => parse_base_clients(&raw)?,
        None => BTreeMap::new(),
    };
    let http_base_client_headers = match optional("CRONHOOK_HTTP_BASE_CLIENT_HEADERS") {
        Some(raw) => parse_base_client_headers(&raw, &http_base_clients)?,
        None => BTreeMap::new(),
    };

    let jobs_path = optional("CRONHOOK_JOBS_PATH").map(PathBuf::from);

    let sqs = match (optional("SQS_ACCESS_KEY"), optional("SQS_SECRET_KEY")) {
        (Some(access_key), Some(secret_key)) => Some(SqsConfig {
            region: or_default("SQS_REGION", "sa-east-1"),
            access_key,
            secret_key,
            endpoint: optional("SQS_ENDPOINT"),
        }),
        (None, None) => None,
        (Some(_), None) => return Err(ConfigError::MissingEnvVar("SQS_SECRET_KEY".to_string())),
        (None, Some(_)) => return Err(ConfigError::MissingEnvVar("SQS_ACCESS_KEY".to_string())),
    };

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        timezone,
        similarity_threshold,
        http_timeout_secs,
        http_user_agent,
        http_base_clients,
        http_base_client_headers,
        jobs_path,
        sqs,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "CRONHOOK_ENV".to_string(),
            reason: format!("expected development, test or production, got '{other}'"),
        }),
    }
}

/// Parse `name=url,name=url` pairs into a map of base clients.
fn parse_base_clients(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut clients = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((name, url)) = entry.split_once('=') else {
            return Err(ConfigError::InvalidEnvVar {
                var: "CRONHOOK_HTTP_BASE_CLIENTS".to_string(),
                reason: format!("expected name=url, got '{entry}'"),
            });
        };
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(ConfigError::InvalidEnvVar {
                var: "CRONHOOK_HTTP_BASE_CLIENTS".to_string(),
                reason: format!("empty name or url in '{entry}'"),
            });
        }
        if clients.insert(name.to_string(), url.to_string()).is_some() {
            return Err(ConfigError::InvalidEnvVar {
                var: "CRONHOOK_HTTP_BASE_CLIENTS".to_string(),
                reason: format!("duplicate base client '{name}'"),
            });
        }
    }
    Ok(clients)
}

/// Parse `client.header=value` pairs; every client must be a configured base client.
fn parse_base_client_headers(
    raw: &str,
    clients: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, BTreeMap<String, String>>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar {
        var: "CRONHOOK_HTTP_BASE_CLIENT_HEADERS".to_string(),
        reason,
    };

    let mut headers: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(invalid(format!("expected client.header=value, got '{entry}'")));
        };
        let key = key.trim();
        let Some((client, header)) = key.split_once('.') else {
            return Err(invalid(format!("expected client.header before '=', got '{key}'")));
        };
        let (client, header) = (client.trim(), header.trim());
        if header.is_empty() {
            return Err(invalid(format!("empty header name in '{key}'")));
        }
        if !clients.contains_key(client) {
            return Err(invalid(format!("unknown base client '{client}'")));
        }
        headers
            .entry(client.to_string())
            .or_default()
            .insert(header.to_ascii_lowercase(), value.trim().to_string());
    }
    Ok(headers)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
