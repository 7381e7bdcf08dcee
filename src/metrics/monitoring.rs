use crate::config::{Config, MonitoringAuth};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const MONITORING_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/monitoring.write";

#[derive(thiserror::Error, Debug)]
pub enum MonitoringError {
    #[error("failed to obtain monitoring credentials: {0}")]
    Auth(#[from] gcp_auth::Error),
    #[error("monitoring request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("monitoring API returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTimeSeriesRequest {
    pub time_series: Vec<TimeSeries>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub metric: Metric,
    pub resource: MonitoredResource,
    pub points: Vec<Point>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Metric {
    #[serde(rename = "type")]
    pub metric_type: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Point {
    pub interval: TimeInterval,
    pub value: TypedValue,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    #[serde(serialize_with = "rfc3339")]
    pub start_time: DateTime<Utc>,
    #[serde(serialize_with = "rfc3339")]
    pub end_time: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum TypedValue {
    DoubleValue(f64),
    // int64 travels as a decimal string in the JSON mapping
    Int64Value(#[serde(serialize_with = "int64_string")] i64),
}

fn rfc3339<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn int64_string<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// A sink for time series points.
#[async_trait]
pub trait TimeSeriesWriter: Send + Sync {
    async fn create_time_series(
        &self,
        project_id: &str,
        series: TimeSeries,
    ) -> Result<(), MonitoringError>;
}

pub type DynTimeSeriesWriter = Arc<dyn TimeSeriesWriter>;

/// Writes points through the Cloud Monitoring v3 REST API.
pub struct MonitoringClient {
    http: reqwest::Client,
    endpoint: String,
    token_provider: Option<Arc<dyn gcp_auth::TokenProvider>>,
}

impl MonitoringClient {
    pub async fn new(config: &Config) -> Result<Self, MonitoringError> {
        let token_provider = match config.monitoring_auth {
            MonitoringAuth::Google => Some(gcp_auth::provider().await?),
            MonitoringAuth::None => None,
        };

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(MonitoringClient {
            http,
            endpoint: config.monitoring_endpoint.trim_end_matches('/').to_string(),
            token_provider,
        })
    }
}

#[async_trait]
impl TimeSeriesWriter for MonitoringClient {
    async fn create_time_series(
        &self,
        project_id: &str,
        series: TimeSeries,
    ) -> Result<(), MonitoringError> {
        let uri = format!("{}/v3/projects/{}/timeSeries", self.endpoint, project_id);
        let request = CreateTimeSeriesRequest {
            time_series: vec![series],
        };
        debug!("sending time series to uri: {:?}", uri);

        let mut builder = self.http.post(&uri).json(&request);
        if let Some(provider) = &self.token_provider {
            let token = provider.token(&[MONITORING_WRITE_SCOPE]).await?;
            builder = builder.bearer_auth(token.as_str());
        }

        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status();

        info!(
            status = %status,
            elapsed_ms = start.elapsed().as_millis(),
            uri = %uri,
            "time series request completed"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitoringError::Api { status, body });
        }
        Ok(())
    }
}
