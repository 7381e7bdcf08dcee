use base64::prelude::*;
use lambda_runtime::{Context, LambdaEvent};
use pubsub_custom_metrics::clients::ClientProvider;
use pubsub_custom_metrics::config::{Config, ConfigError};
use pubsub_custom_metrics::events;
use pubsub_custom_metrics::metrics::process::PipelineError;
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::Mutex;

const TIME_SERIES_PATH: &str = "/v3/projects/test-project/timeSeries";

fn pubsub_event(payload: &str) -> LambdaEvent<events::Combined> {
    let raw = json!({
        "message": {
            "attributes": {"key": "value"},
            "data": BASE64_STANDARD.encode(payload),
            "messageId": "2070443601311540",
            "message_id": "2070443601311540",
            "publishTime": "2021-02-26T19:13:55.749Z",
            "publish_time": "2021-02-26T19:13:55.749Z",
        },
        "subscription": "projects/test-project/subscriptions/metrics",
    });
    let evt: events::Combined = serde_json::from_value(raw).unwrap();
    LambdaEvent::new(evt, Context::default())
}

async fn recording_server(status: u16) -> (wiremock::MockServer, Arc<Mutex<Vec<Value>>>) {
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let recorded = bodies.clone();

    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path(TIME_SERIES_PATH))
        .and(move |r: &wiremock::Request| -> bool {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            recorded.lock().unwrap().push(body);
            true
        })
        .respond_with(wiremock::ResponseTemplate::new(status).set_body_string("{}"))
        .mount(&server)
        .await;

    (server, bodies)
}

async fn handle(payload: &str) -> Result<(), PipelineError> {
    let config = Config::load_from_env().await.unwrap();
    let clients = ClientProvider::from_config(&config);
    pubsub_custom_metrics::function_handler(&clients, &config, pubsub_event(payload)).await
}

fn env<'a>(
    endpoint: &'a str,
    time_path: Option<&'a str>,
) -> Vec<(&'static str, Option<&'a str>)> {
    vec![
        ("PROJECT_ID", Some("test-project")),
        ("SOURCE_ID_PATH", Some("source_id")),
        ("VALUE_PATH", Some("metric_value")),
        ("TIME_PATH", time_path),
        ("METRIC_TYPE", Some("custom.googleapis.com/test/metric")),
        ("MONITORING_ENDPOINT", Some(endpoint)),
        ("MONITORING_AUTH", Some("none")),
        ("RANDOM_LABEL", None),
    ]
}

#[tokio::test]
async fn test_pubsub_event_round_trip() {
    let (server, bodies) = recording_server(200).await;
    let uri = server.uri();

    let result = temp_env::async_with_vars(
        env(&uri, Some("event_ts")),
        handle(r#"{"source_id":"s1","event_ts":"2024-01-01T00:00:00Z","metric_value":42}"#),
    )
    .await;
    result.unwrap();

    let bodies = bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0],
        json!({
            "timeSeries": [{
                "metric": {
                    "type": "custom.googleapis.com/test/metric",
                    "labels": {"source_id": "s1"}
                },
                "resource": {"type": "global", "labels": {"project_id": "test-project"}},
                "points": [{
                    "interval": {
                        "startTime": "2024-01-01T00:00:00Z",
                        "endTime": "2024-01-01T00:00:00Z"
                    },
                    "value": {"int64Value": "42"}
                }]
            }]
        })
    );
}

#[tokio::test]
async fn test_float_metric_with_now_timestamp() {
    let (server, bodies) = recording_server(200).await;
    let uri = server.uri();

    let before = chrono::Utc::now();
    let result = temp_env::async_with_vars(
        env(&uri, None),
        handle(r#"{"source_id":"test-client","label":"comp-stats","metric_value":20.5}"#),
    )
    .await;
    let after = chrono::Utc::now();
    result.unwrap();

    let bodies = bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    let point = &bodies[0]["timeSeries"][0]["points"][0];
    assert_eq!(point["value"], json!({"doubleValue": 20.5}));

    let end_time = point["interval"]["endTime"].as_str().unwrap();
    let end_time = chrono::DateTime::parse_from_rfc3339(end_time)
        .unwrap()
        .with_timezone(&chrono::Utc);
    // the wire format keeps sub-second precision, so the window check is exact
    assert!(end_time >= before && end_time <= after);
    assert_eq!(point["interval"]["startTime"], point["interval"]["endTime"]);
}

#[tokio::test]
async fn test_unsupported_value_sends_nothing() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::any())
        .respond_with(wiremock::ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let uri = server.uri();

    let err = temp_env::async_with_vars(
        env(&uri, None),
        handle(r#"{"source_id":"s1","metric_value":"not a number"}"#),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::UnsupportedValueType { .. }));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_invalid_timestamp_sends_nothing() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::any())
        .respond_with(wiremock::ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let uri = server.uri();

    let err = temp_env::async_with_vars(
        env(&uri, Some("event_ts")),
        handle(r#"{"source_id":"s1","event_ts":"01/01/2024","metric_value":1}"#),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidTimestamp { .. }));
}

#[tokio::test]
async fn test_backend_rejection_is_reported() {
    let (server, bodies) = recording_server(400).await;
    let uri = server.uri();

    let err = temp_env::async_with_vars(
        env(&uri, None),
        handle(r#"{"source_id":"s1","metric_value":1}"#),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Publish(_)));
    assert!(err.to_string().contains("400"));
    assert!(!err.is_fatal());
    // one attempt, no retry
    assert_eq!(bodies.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_client_is_shared_across_invocations() {
    let (server, bodies) = recording_server(200).await;
    let uri = server.uri();

    temp_env::async_with_vars(env(&uri, None), async {
        let config = Config::load_from_env().await.unwrap();
        let clients = ClientProvider::from_config(&config);

        let first = clients.get().await.unwrap();
        for i in 0..3 {
            let payload = format!(r#"{{"source_id":"s{}","metric_value":{}}}"#, i, i);
            pubsub_custom_metrics::function_handler(&clients, &config, pubsub_event(&payload))
                .await
                .unwrap();
        }
        let last = clients.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &last));
    })
    .await;

    let bodies = bodies.lock().unwrap();
    let sources: Vec<&str> = bodies
        .iter()
        .map(|b| b["timeSeries"][0]["metric"]["labels"]["source_id"].as_str().unwrap())
        .collect();
    assert_eq!(sources, vec!["s0", "s1", "s2"]);
}

#[tokio::test]
async fn test_project_id_from_metadata_server() {
    let metadata = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path(
            "/computeMetadata/v1/project/project-id",
        ))
        .and(wiremock::matchers::header("Metadata-Flavor", "Google"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("metadata-project"))
        .expect(1)
        .mount(&metadata)
        .await;
    let metadata_uri = metadata.uri();

    let config = temp_env::async_with_vars(
        [
            ("PROJECT_ID", None),
            ("GCE_METADATA_HOST", Some(metadata_uri.as_str())),
            ("SOURCE_ID_PATH", Some("source_id")),
            ("VALUE_PATH", Some("metric_value")),
        ],
        Config::load_from_env(),
    )
    .await
    .unwrap();

    assert_eq!(config.project_id, "metadata-project");
    assert!(config.defaults_used.contains(&"PROJECT_ID"));
}

#[tokio::test]
async fn test_metadata_server_failure_is_a_config_error() {
    let metadata = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::any())
        .respond_with(wiremock::ResponseTemplate::new(404))
        .mount(&metadata)
        .await;
    let metadata_uri = metadata.uri();

    let err = temp_env::async_with_vars(
        [
            ("PROJECT_ID", None),
            ("GCE_METADATA_HOST", Some(metadata_uri.as_str())),
            ("SOURCE_ID_PATH", Some("source_id")),
            ("VALUE_PATH", Some("metric_value")),
        ],
        Config::load_from_env(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ConfigError::Metadata { .. }));
}
