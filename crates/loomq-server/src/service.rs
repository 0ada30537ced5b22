use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use loomq_core::{Broker, Message, MessageId, MessageState, TopicConfig, TopicStats};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ApiError, IntoHttpError};

const WORKER_ID_HEADER: &str = "x-worker-id";

/// Shared handler state: the broker and how long a pull may wait.
#[derive(Clone)]
pub struct AppState {
    broker: Arc<Broker>,
    pull_timeout: Duration,
}

impl AppState {
    pub fn new(broker: Arc<Broker>) -> Self {
        let pull_timeout = Duration::from_millis(broker.config().server.pull_timeout_ms);
        Self {
            broker,
            pull_timeout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/topics", get(list_topics).post(create_topic))
        .route("/topics/{topic}/messages", post(push_message))
        .route(
            "/topics/{topic}/messages/{id}",
            get(inspect_message).delete(finish_message),
        )
        .route("/topics/{topic}/messages/{id}/results", put(record_results))
        .route("/topics/{topic}/pull", post(pull_message))
        .route("/workers/{worker_id}/reclaim", post(reclaim_worker))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct MessageCreated {
    id: MessageId,
    created: u64,
    state: MessageState,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    id: MessageId,
    topic: String,
    created: u64,
    state: MessageState,
    payload: Value,
    delivery_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Value>,
}

impl MessageBody {
    fn new(msg: Message, results: Option<Value>) -> Self {
        Self {
            payload: payload_json(&msg.payload),
            worker_id: msg.assignment.map(|a| a.worker_id),
            id: msg.id,
            topic: msg.topic,
            created: msg.created_at,
            state: msg.state,
            delivery_count: msg.delivery_count,
            results,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTopicRequest {
    name: String,
    pending_timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ReclaimResponse {
    requeued: usize,
}

/// Payloads are accepted as JSON only, so they decode back to JSON. Anything
/// else is shown as text.
fn payload_json(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

fn validate_topic(topic: &str) -> Result<(), ApiError> {
    TopicConfig::validate_name(topic).map_err(ApiError::bad_request)
}

/// Run a broker call that writes to storage on the blocking pool. RocksDB
/// calls are synchronous and would otherwise stall an async worker thread.
async fn run_blocking<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    F: FnOnce(&Broker) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let broker = Arc::clone(&state.broker);
    tokio::task::spawn_blocking(move || call(&broker))
        .await
        .map_err(|e| ApiError::internal(format!("broker call failed: {e}")))?
}

fn parse_id(id: &str) -> Result<MessageId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid message id: {id}")))
}

fn parse_json(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("body must be JSON: {e}")))
}

fn worker_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(WORKER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn push_message(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<MessageCreated>), ApiError> {
    validate_topic(&topic)?;
    parse_json(&body)?;

    let msg = run_blocking(&state, move |broker| {
        broker
            .push(&topic, body.to_vec())
            .map_err(IntoHttpError::into_http_error)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageCreated {
            id: msg.id,
            created: msg.created_at,
            state: msg.state,
        }),
    ))
}

async fn inspect_message(
    State(state): State<AppState>,
    Path((topic, id)): Path<(String, String)>,
) -> Result<Json<MessageBody>, ApiError> {
    let id = parse_id(&id)?;
    let view = run_blocking(&state, move |broker| {
        broker
            .inspect(&topic, &id)
            .map_err(IntoHttpError::into_http_error)
    })
    .await?;
    Ok(Json(MessageBody::new(view.message, view.results)))
}

async fn finish_message(
    State(state): State<AppState>,
    Path((topic, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let worker_id = worker_id(&headers);
    run_blocking(&state, move |broker| {
        broker
            .finish(&topic, worker_id.as_deref(), &id)
            .map_err(IntoHttpError::into_http_error)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn record_results(
    State(state): State<AppState>,
    Path((topic, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let results = parse_json(&body)?;
    run_blocking(&state, move |broker| {
        broker
            .record_results(&topic, &id, &results)
            .map_err(IntoHttpError::into_http_error)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pull_message(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_topic(&topic)?;
    let worker_id = worker_id(&headers)
        .ok_or_else(|| ApiError::bad_request(format!("{WORKER_ID_HEADER} header is required")))?;

    let pulled = state
        .broker
        .pull(&topic, &worker_id, Some(state.pull_timeout))
        .await
        .map_err(IntoHttpError::into_http_error)?;

    match pulled {
        Some(msg) => Ok(Json(MessageBody::new(msg, None)).into_response()),
        None => {
            debug!(topic = %topic, worker_id = %worker_id, "pull timed out");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

async fn reclaim_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> Result<Json<ReclaimResponse>, ApiError> {
    let requeued = state
        .broker
        .reclaim_worker(&worker_id)
        .await
        .map_err(IntoHttpError::into_http_error)?;
    Ok(Json(ReclaimResponse { requeued }))
}

async fn list_topics(State(state): State<AppState>) -> Json<Vec<TopicStats>> {
    Json(state.broker.list_topics())
}

async fn create_topic(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<TopicStats>), ApiError> {
    let request: CreateTopicRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid topic request: {e}")))?;
    validate_topic(&request.name)?;

    let mut config = TopicConfig::new(request.name);
    if let Some(timeout) = request.pending_timeout_ms {
        config = config.with_pending_timeout_ms(timeout);
    }
    let stats = run_blocking(&state, move |broker| {
        broker
            .create_topic(config)
            .map(|topic| topic.stats())
            .map_err(IntoHttpError::into_http_error)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(stats)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomq_core::{BrokerConfig, RocksDbStorage};
    use serde_json::json;

    struct TestServer {
        base_url: String,
        client: reqwest::Client,
        _broker: Arc<Broker>,
        _dir: tempfile::TempDir,
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base_url)
        }

        async fn push(&self, topic: &str, body: Value) -> Value {
            let resp = self
                .client
                .post(self.url(&format!("/topics/{topic}/messages")))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
            resp.json().await.unwrap()
        }

        async fn pull(&self, topic: &str, worker_id: &str) -> reqwest::Response {
            self.client
                .post(self.url(&format!("/topics/{topic}/pull")))
                .header(WORKER_ID_HEADER, worker_id)
                .send()
                .await
                .unwrap()
        }
    }

    async fn start_test_server() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
        let mut config = BrokerConfig::default();
        config.server.pull_timeout_ms = 100;
        let broker = Broker::start(config, storage).unwrap();

        // Bind to port 0 to let the OS assign an available port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState::new(Arc::clone(&broker)));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            _broker: broker,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn job_goes_from_push_to_finished() {
        let server = start_test_server().await;

        let created = server.push("jobs", json!({"job": "A"})).await;
        assert_eq!(created["state"], "enqueued");
        let id = created["id"].as_str().unwrap().to_string();

        let inspected: Value = server
            .client
            .get(server.url(&format!("/topics/jobs/messages/{id}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(inspected["state"], "enqueued");
        assert_eq!(inspected["payload"], json!({"job": "A"}));

        let resp = server.pull("jobs", "w1").await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let pulled: Value = resp.json().await.unwrap();
        assert_eq!(pulled["id"], id.as_str());
        assert_eq!(pulled["state"], "dequeued");
        assert_eq!(pulled["worker_id"], "w1");
        assert_eq!(pulled["delivery_count"], 1);

        let resp = server
            .client
            .put(server.url(&format!("/topics/jobs/messages/{id}/results")))
            .json(&json!({"status": "done"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

        let resp = server
            .client
            .delete(server.url(&format!("/topics/jobs/messages/{id}")))
            .header(WORKER_ID_HEADER, "w1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

        let finished: Value = server
            .client
            .get(server.url(&format!("/topics/jobs/messages/{id}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(finished["state"], "finished");
        assert_eq!(finished["results"], json!({"status": "done"}));
        assert!(finished.get("worker_id").is_none());
    }

    #[tokio::test]
    async fn pull_on_empty_topic_answers_no_content() {
        let server = start_test_server().await;
        let resp = server
            .client
            .post(server.url("/topics"))
            .json(&json!({"name": "jobs"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

        let resp = server.pull("jobs", "w1").await;
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn pull_on_unknown_topic_is_not_found() {
        let server = start_test_server().await;
        let resp = server.pull("jbos", "w1").await;
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        let topics: Value = server
            .client
            .get(server.url("/topics"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(topics, json!([]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_all_reach_storage() {
        let server = Arc::new(start_test_server().await);

        let pushers: Vec<_> = (0..16)
            .map(|i| {
                let server = Arc::clone(&server);
                tokio::spawn(async move { server.push("jobs", json!({"n": i})).await })
            })
            .collect();
        let mut ids = Vec::new();
        for pusher in pushers {
            ids.push(pusher.await.unwrap()["id"].as_str().unwrap().to_string());
        }

        for id in &ids {
            let resp = server
                .client
                .delete(server.url(&format!("/topics/jobs/messages/{id}")))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
        }
        for id in &ids {
            let inspected: Value = server
                .client
                .get(server.url(&format!("/topics/jobs/messages/{id}")))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(inspected["state"], "finished");
        }
    }

    #[tokio::test]
    async fn pull_requires_a_worker_id() {
        let server = start_test_server().await;
        let resp = server
            .client
            .post(server.url("/topics/jobs/pull"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains(WORKER_ID_HEADER));
    }

    #[tokio::test]
    async fn push_rejects_non_json_bodies() {
        let server = start_test_server().await;
        let resp = server
            .client
            .post(server.url("/topics/jobs/messages"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lookups_distinguish_bad_ids_from_missing_messages() {
        let server = start_test_server().await;

        let resp = server
            .client
            .get(server.url(&format!("/topics/jobs/messages/{}", MessageId::new())))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND, "unknown topic");

        server.push("jobs", json!(1)).await;
        let resp = server
            .client
            .get(server.url(&format!("/topics/jobs/messages/{}", MessageId::new())))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND, "unknown message");

        let resp = server
            .client
            .get(server.url("/topics/jobs/messages/not-an-id"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let resp = server
            .client
            .delete(server.url(&format!("/topics/jobs/messages/{}", MessageId::new())))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reclaim_hands_held_messages_to_other_workers() {
        let server = start_test_server().await;
        let created = server.push("jobs", json!({"job": "B"})).await;
        assert_eq!(server.pull("jobs", "w1").await.status(), reqwest::StatusCode::OK);

        let resp = server
            .client
            .post(server.url("/workers/w1/reclaim"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["requeued"], 1);

        let pulled: Value = server.pull("jobs", "w2").await.json().await.unwrap();
        assert_eq!(pulled["id"], created["id"]);
        assert_eq!(pulled["worker_id"], "w2");
        assert_eq!(pulled["delivery_count"], 2);
    }

    #[tokio::test]
    async fn topics_can_be_created_and_listed() {
        let server = start_test_server().await;

        let resp = server
            .client
            .post(server.url("/topics"))
            .json(&json!({"name": "slow", "pending_timeout_ms": 90000}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

        let resp = server
            .client
            .post(server.url("/topics"))
            .json(&json!({"name": "slow"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

        server.push("jobs", json!(1)).await;
        let topics: Value = server
            .client
            .get(server.url("/topics"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            topics,
            json!([
                {"name": "jobs", "ready": 1, "parked_workers": 0, "pending_timeout_ms": 30000},
                {"name": "slow", "ready": 0, "parked_workers": 0, "pending_timeout_ms": 90000},
            ])
        );
    }
}
