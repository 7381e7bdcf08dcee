use crate::config::{Config, TimeSource};
use crate::metrics::monitoring::{
    Metric, MonitoredResource, MonitoringError, Point, TimeInterval, TimeSeries, TimeSeriesWriter,
    TypedValue,
};
use crate::metrics::path::{FieldPath, Lookup};
use chrono::{DateTime, Utc};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const SOURCE_ID_LABEL: &str = "source_id";
pub const NONCE_LABEL: &str = "nonce";
const GLOBAL_RESOURCE: &str = "global";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("failed to create monitoring client: {0}")]
    ClientInit(Arc<MonitoringError>),
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("field {path} not found in payload")]
    MissingField { path: String },
    #[error("field {path} must be a {expected}, found {found}")]
    UnexpectedType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("field {path} value {value:?} is not an RFC 3339 timestamp: {source}")]
    InvalidTimestamp {
        path: String,
        value: String,
        source: chrono::ParseError,
    },
    #[error("field {path} has unsupported value type {found}, expected a double or int64")]
    UnsupportedValueType { path: String, found: &'static str },
    #[error(transparent)]
    Publish(#[from] MonitoringError),
}

impl PipelineError {
    /// Fatal errors leave the process unable to serve any further event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::ClientInit(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Double(f64),
    Int64(i64),
}

impl MetricValue {
    /// Integers that fit in i64 stay integers. Floats and larger unsigned integers become
    /// doubles. `None` for anything without a finite f64 form.
    pub fn from_number(number: &Number) -> Option<Self> {
        if let Some(i) = number.as_i64() {
            return Some(MetricValue::Int64(i));
        }
        number
            .as_f64()
            .filter(|v| v.is_finite())
            .map(MetricValue::Double)
    }
}

impl From<MetricValue> for TypedValue {
    fn from(value: MetricValue) -> Self {
        match value {
            MetricValue::Double(v) => TypedValue::DoubleValue(v),
            MetricValue::Int64(v) => TypedValue::Int64Value(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMetric {
    pub source_id: String,
    pub value: MetricValue,
    pub timestamp: DateTime<Utc>,
}

fn extract_source_id(path: &FieldPath, document: &Value) -> Result<String, PipelineError> {
    match path.lookup(document) {
        Lookup::String(s) => Ok(s.to_owned()),
        Lookup::NotFound => Err(PipelineError::MissingField {
            path: path.to_string(),
        }),
        other => Err(PipelineError::UnexpectedType {
            path: path.to_string(),
            expected: "string",
            found: other.kind(),
        }),
    }
}

fn extract_value(path: &FieldPath, document: &Value) -> Result<MetricValue, PipelineError> {
    match path.lookup(document) {
        Lookup::Number(n) => {
            MetricValue::from_number(n).ok_or_else(|| PipelineError::UnsupportedValueType {
                path: path.to_string(),
                found: "non-finite number",
            })
        }
        Lookup::NotFound => Err(PipelineError::MissingField {
            path: path.to_string(),
        }),
        other => Err(PipelineError::UnsupportedValueType {
            path: path.to_string(),
            found: other.kind(),
        }),
    }
}

fn extract_timestamp(
    source: &TimeSource,
    document: &Value,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, PipelineError> {
    let path = match source {
        TimeSource::Now => return Ok(now),
        TimeSource::Field(path) => path,
    };

    match path.lookup(document) {
        Lookup::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|source| PipelineError::InvalidTimestamp {
                path: path.to_string(),
                value: s.to_owned(),
                source,
            }),
        Lookup::NotFound => Err(PipelineError::MissingField {
            path: path.to_string(),
        }),
        other => Err(PipelineError::UnexpectedType {
            path: path.to_string(),
            expected: "string",
            found: other.kind(),
        }),
    }
}

/// extract - parses the payload and resolves the configured fields into a metric.
/// No network call happens here, so every failure costs nothing outbound.
pub fn extract(
    config: &Config,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<ExtractedMetric, PipelineError> {
    let document: Value = serde_json::from_slice(payload)?;
    debug!("Payload: {}", document);

    let source_id = extract_source_id(&config.source_id_path, &document)?;
    let value = extract_value(&config.value_path, &document)?;
    let timestamp = extract_timestamp(&config.time_source, &document, now)?;

    debug!(
        source_id = %source_id,
        value = ?value,
        timestamp = %timestamp,
        "extracted metric"
    );

    Ok(ExtractedMetric {
        source_id,
        value,
        timestamp,
    })
}

/// build_time_series - a single point series labeled with the source id
pub fn build_time_series(config: &Config, metric: &ExtractedMetric) -> TimeSeries {
    let mut labels = BTreeMap::from([(SOURCE_ID_LABEL.to_string(), metric.source_id.clone())]);
    if config.random_label {
        // keeps points landing in the same sampling window from being rejected as duplicates
        labels.insert(NONCE_LABEL.to_string(), uuid::Uuid::new_v4().to_string());
    }

    TimeSeries {
        metric: Metric {
            metric_type: config.metric_type.clone(),
            labels,
        },
        resource: MonitoredResource {
            resource_type: GLOBAL_RESOURCE.to_string(),
            labels: BTreeMap::from([("project_id".to_string(), config.project_id.clone())]),
        },
        points: vec![Point {
            interval: TimeInterval {
                start_time: metric.timestamp,
                end_time: metric.timestamp,
            },
            value: metric.value.into(),
        }],
    }
}

/// process_event - runs one payload through extraction and publishes the resulting point.
pub async fn process_event(
    config: &Config,
    writer: &dyn TimeSeriesWriter,
    payload: &[u8],
) -> Result<ExtractedMetric, PipelineError> {
    let metric = extract(config, payload, Utc::now())?;
    let series = build_time_series(config, &metric);

    writer
        .create_time_series(&config.project_id, series)
        .await?;

    info!(
        source_id = %metric.source_id,
        metric_type = %config.metric_type,
        "published metric point"
    );
    Ok(metric)
}
