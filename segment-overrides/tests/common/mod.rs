use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;

pub const FEATURE_ID: i64 = 7;
pub const PROJECT_ID: i64 = 1;
pub const BROKEN_ENVIRONMENT: &str = "broken";

pub static FEATURE_SEGMENTS: Lazy<Value> = Lazy::new(|| {
    json!([
        {"id": 100, "uuid": "0190a6c1-0000-7000-8000-000000000001", "segment": 1,
         "segment_name": "internal", "priority": 0},
        {"id": 200, "uuid": "0190a6c1-0000-7000-8000-000000000002", "segment": 2,
         "segment_name": "beta", "priority": 1}
    ])
});

pub static FEATURE_STATES: Lazy<Value> = Lazy::new(|| {
    json!([
        {"id": 1, "enabled": true, "feature_state_value": {"type": "unicode", "string_value": "control"},
         "multivariate_feature_state_values": [
            {"multivariate_feature_option": 5, "percentage_allocation": 25.0}
         ]},
        {"id": 11, "feature_segment": 100, "enabled": false},
        {"id": 12, "feature_segment": 200, "enabled": true,
         "feature_state_value": {"type": "bool", "boolean_value": true}},
        {"id": 13, "identity": 4242, "enabled": true}
    ])
});

pub static SEGMENTS: Lazy<Value> = Lazy::new(|| {
    json!([
        {"id": 1, "name": "internal"},
        {"id": 2, "name": "beta"},
        {"id": 3, "name": "beta-users"}
    ])
});

fn page(results: &Value) -> Json<Value> {
    let count = results.as_array().map_or(0, Vec::len);
    Json(json!({"count": count, "next": null, "previous": null, "results": results}))
}

#[derive(Clone, Default)]
pub struct MockApiState {
    pub segment_requests: Arc<AtomicUsize>,
    pub authorization: Arc<Mutex<Option<String>>>,
}

impl MockApiState {
    pub fn segment_requests(&self) -> usize {
        self.segment_requests.load(Ordering::SeqCst)
    }

    pub fn authorization(&self) -> Option<String> {
        self.authorization.lock().unwrap().clone()
    }
}

async fn feature_segments(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    if params.get("feature") != Some(&FEATURE_ID.to_string()) {
        return page(&json!([]));
    }
    page(&FEATURE_SEGMENTS)
}

async fn feature_states(Path(environment): Path<String>) -> Response {
    if environment == BROKEN_ENVIRONMENT {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response();
    }
    page(&FEATURE_STATES).into_response()
}

async fn segments(
    State(state): State<MockApiState>,
    Path(_project): Path<i64>,
    headers: HeaderMap,
) -> Json<Value> {
    state.segment_requests.fetch_add(1, Ordering::SeqCst);
    *state.authorization.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    page(&SEGMENTS)
}

pub struct MockApiHandle {
    pub addr: SocketAddr,
    pub state: MockApiState,
    shutdown: Arc<Notify>,
}

impl MockApiHandle {
    pub async fn start() -> MockApiHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();
        let state = MockApiState::default();

        let router = Router::new()
            .route("/api/v1/features/feature-segments/", get(feature_segments))
            .route(
                "/api/v1/environments/:environment/featurestates/",
                get(feature_states),
            )
            .route("/api/v1/projects/:project/segments/", get(segments))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { notify.notified().await })
                .await
        });

        MockApiHandle {
            addr,
            state,
            shutdown,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }
}

impl Drop for MockApiHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}
