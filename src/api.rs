use crate::connector::PutResponse;
use crate::daemon::KvDaemon;
use crate::error::Error;
use crate::types::{PutAck, PutRequest, Timestamp};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

pub fn create_router(daemon: Arc<KvDaemon>) -> Router {
    let cors = cors_layer(&daemon.config().cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/kv/:namespace/:key", get(read_value).post(write_value))
        .route("/peers", get(list_peers).post(add_peer))
        .route("/peer/:namespace/:key", get(peer_get).post(peer_put))
        .route("/friends", get(friends))
        .route("/data/:since", get(bulk_data))
        .layer(cors)
        .with_state(daemon)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Ignoring invalid CORS origin {:?}: {}", origin, e);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_LENGTH])
}

fn error_response(e: Error) -> Response {
    let status = match &e {
        Error::StaleWrite { .. } => StatusCode::NOT_ACCEPTABLE,
        Error::InvalidPeerUri { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not found" })),
    )
        .into_response()
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_status(State(daemon): State<Arc<KvDaemon>>) -> Response {
    match daemon.status() {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

async fn read_value(
    State(daemon): State<Arc<KvDaemon>>,
    Path((namespace, key)): Path<(String, String)>,
) -> Response {
    match daemon.node().read(&namespace, &key).await {
        Ok(Some(value)) => Json(value).into_response(),
        Ok(None) => not_found(),
        Err(e) => error_response(e),
    }
}

async fn write_value(
    State(daemon): State<Arc<KvDaemon>>,
    Path((namespace, key)): Path<(String, String)>,
    Json(req): Json<PutRequest>,
) -> Response {
    match daemon
        .node()
        .write(&namespace, &key, &req.value, req.timestamp)
        .await
    {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_peers(State(daemon): State<Arc<KvDaemon>>) -> impl IntoResponse {
    Json(daemon.node().list_peers())
}

#[derive(Deserialize)]
struct AddPeerRequest {
    uri: String,
}

async fn add_peer(
    State(daemon): State<Arc<KvDaemon>>,
    Json(req): Json<AddPeerRequest>,
) -> Response {
    match daemon.node().add_peer(&req.uri) {
        Ok(added) => {
            let status = if added {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(serde_json::json!({ "added": added }))).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct SinceQuery {
    since: Option<Timestamp>,
}

async fn peer_get(
    State(daemon): State<Arc<KvDaemon>>,
    Path((namespace, key)): Path<(String, String)>,
    Query(query): Query<SinceQuery>,
) -> Response {
    match daemon.node().local_get(&namespace, &key, query.since) {
        Ok(Some(value)) => Json(value).into_response(),
        Ok(None) => not_found(),
        Err(e) => error_response(e),
    }
}

async fn peer_put(
    State(daemon): State<Arc<KvDaemon>>,
    Path((namespace, key)): Path<(String, String)>,
    Json(req): Json<PutRequest>,
) -> Response {
    let Some(timestamp) = req.timestamp else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "timestamp is required" })),
        )
            .into_response();
    };

    match daemon
        .node()
        .local_put(&namespace, &key, &req.value, timestamp)
    {
        Ok(PutAck::Accepted { timestamp }) => Json(PutResponse { timestamp }).into_response(),
        Ok(PutAck::Stale) => (
            StatusCode::NOT_ACCEPTABLE,
            Json(serde_json::json!({ "error": "stale write" })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct FriendsQuery {
    friend_uri: Option<String>,
}

async fn friends(
    State(daemon): State<Arc<KvDaemon>>,
    Query(query): Query<FriendsQuery>,
) -> Response {
    match daemon.node().friends(query.friend_uri.as_deref()) {
        Ok(friends) => Json(friends).into_response(),
        Err(e) => error_response(e),
    }
}

async fn bulk_data(
    State(daemon): State<Arc<KvDaemon>>,
    Path(since): Path<Timestamp>,
) -> Response {
    match daemon.node().bulk_export(since) {
        Ok(batches) => Json(batches).into_response(),
        Err(e) => error_response(e),
    }
}
