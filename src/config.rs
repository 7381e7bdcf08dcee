use std::env;
use std::fmt;
use std::str::FromStr;
use std::string::String;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::metrics::path::{FieldPath, PathError};

pub const DEFAULT_METRIC_TYPE: &str = "custom.googleapis.com/partner/mocked";
pub const DEFAULT_MONITORING_ENDPOINT: &str = "https://monitoring.googleapis.com";
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const NOW_SENTINEL: &str = "now";

#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    pub metric_type: String,
    pub source_id_path: FieldPath,
    pub value_path: FieldPath,
    pub time_source: TimeSource,
    pub monitoring_endpoint: String,
    pub monitoring_auth: MonitoringAuth,
    pub request_timeout: Duration,
    pub random_label: bool,
    /// Names of the variables that fell back to their default.
    pub defaults_used: Vec<&'static str>,
}

/// Where the point's timestamp comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSource {
    Now,
    Field(FieldPath),
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum MonitoringAuth {
    Google,
    None,
}

impl FromStr for MonitoringAuth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "google" => Ok(MonitoringAuth::Google),
            "none" => Ok(MonitoringAuth::None),
            other => Err(format!("Invalid or Unsupported monitoring auth {}", other)),
        }
    }
}

impl fmt::Display for MonitoringAuth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for TimeSource {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, PathError> {
        if s.trim().eq_ignore_ascii_case(NOW_SENTINEL) {
            return Ok(TimeSource::Now);
        }
        s.parse().map(TimeSource::Field)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{name} is not a valid field path - {source}")]
    InvalidPath {
        name: &'static str,
        source: PathError,
    },
    #[error("Error parsing {name} - {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("Failed to resolve the project id from the metadata server at {uri}. Set PROJECT_ID explicitly when not running on Google Cloud. Error: {reason}")]
    Metadata { uri: String, reason: String },
}

/// Reads `name`, treating an empty or blank value as absent.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    var(name).ok_or(ConfigError::Missing(name))
}

fn path(name: &'static str, value: &str) -> Result<FieldPath, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::InvalidPath { name, source })
}

impl Config {
    /// Resolves the configuration once at startup. When `PROJECT_ID` is unset the project
    /// is looked up on the metadata server, and a failed lookup is an error like any
    /// other missing required value.
    pub async fn load_from_env() -> Result<Config, ConfigError> {
        let mut defaults_used = Vec::new();
        let mut or_default = |name: &'static str, default: &str| -> String {
            var(name).unwrap_or_else(|| {
                info!("{} not set, using default {:?}", name, default);
                defaults_used.push(name);
                default.to_string()
            })
        };

        let metric_type = or_default("METRIC_TYPE", DEFAULT_METRIC_TYPE);
        let time_path = or_default("TIME_PATH", NOW_SENTINEL);
        let monitoring_endpoint = or_default("MONITORING_ENDPOINT", DEFAULT_MONITORING_ENDPOINT);
        let monitoring_auth = or_default("MONITORING_AUTH", "google");
        let metadata_host = or_default("GCE_METADATA_HOST", DEFAULT_METADATA_HOST);
        let request_timeout = or_default("REQUEST_TIMEOUT", "30");
        let random_label = or_default("RANDOM_LABEL", "false");

        let source_id_path = path("SOURCE_ID_PATH", &required("SOURCE_ID_PATH")?)?;
        let value_path = path("VALUE_PATH", &required("VALUE_PATH")?)?;
        let time_source = time_path
            .parse::<TimeSource>()
            .map_err(|source| ConfigError::InvalidPath {
                name: "TIME_PATH",
                source,
            })?;

        let monitoring_auth = monitoring_auth
            .parse::<MonitoringAuth>()
            .map_err(|reason| ConfigError::Invalid {
                name: "MONITORING_AUTH",
                reason,
            })?;
        let request_timeout = request_timeout
            .trim()
            .parse::<u64>()
            .map_err(|e| e.to_string())
            .and_then(|secs| match secs {
                0 => Err("must be at least 1 second".to_string()),
                secs => Ok(Duration::from_secs(secs)),
            })
            .map_err(|reason| ConfigError::Invalid {
                name: "REQUEST_TIMEOUT",
                reason,
            })?;
        let random_label = random_label
            .trim()
            .to_lowercase()
            .parse::<bool>()
            .map_err(|e| ConfigError::Invalid {
                name: "RANDOM_LABEL",
                reason: e.to_string(),
            })?;

        let project_id = match var("PROJECT_ID") {
            Some(project_id) => project_id,
            None => {
                info!("PROJECT_ID not set, resolving it from the metadata server");
                defaults_used.push("PROJECT_ID");
                get_project_id_from_metadata(&metadata_host, request_timeout).await?
            }
        };

        Ok(Config {
            project_id,
            metric_type,
            source_id_path,
            value_path,
            time_source,
            monitoring_endpoint,
            monitoring_auth,
            request_timeout,
            random_label,
            defaults_used,
        })
    }
}

fn metadata_uri(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}/computeMetadata/v1/project/project-id", host)
    } else {
        format!("http://{}/computeMetadata/v1/project/project-id", host)
    }
}

pub async fn get_project_id_from_metadata(
    host: &str,
    timeout: Duration,
) -> Result<String, ConfigError> {
    let uri = metadata_uri(host);
    let metadata_error = |reason: String| ConfigError::Metadata {
        uri: uri.clone(),
        reason,
    };

    let response = reqwest::Client::new()
        .get(&uri)
        .header("Metadata-Flavor", "Google")
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| metadata_error(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(metadata_error(format!("unexpected status {}", status)));
    }

    let project_id = response
        .text()
        .await
        .map_err(|e| metadata_error(e.to_string()))?
        .trim()
        .to_string();
    if project_id.is_empty() {
        return Err(metadata_error("empty project id".to_string()));
    }

    info!("resolved project id {} from metadata server", project_id);
    Ok(project_id)
}
