//! HTTP API: discovery, the call path, streams, and the admin surface.

use std::str::FromStr;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use gridgate_client::http::REQUEST_HEADER;
use gridgate_types::{
    AddressType, ApiRequest, ApiResponse, BarrierToken, DiscoveryRequest, DiscoveryResponse,
    ErrorCode, GatewayError, LogEntry,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::access::AclEntry;
use crate::dynconfig::DynamicConfig;
use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/discovery", post(discover))
        .route("/v1/call", post(call))
        .route("/v1/streams/read", post(stream_read))
        .route("/v1/streams/write", post(stream_write))
        .route("/v1/proxies", get(list_proxies))
        .route("/v1/proxies/{address}/banned", put(set_banned))
        .route("/v1/proxies/{address}/role", put(set_role))
        .route("/v1/roles/{role}/acl", put(set_role_acl))
        .route("/v1/users/{user}/queue-limit", put(set_queue_limit))
        .route("/v1/config", get(get_config).put(put_config))
        .route("/v1/log/barrier", post(write_barrier))
        .route("/v1/log", get(query_log))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON error envelope; the body is the `GatewayError` itself so
/// clients decode one taxonomy from every endpoint.
pub struct ErrorResponse(pub GatewayError);

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidAddressType => StatusCode::BAD_REQUEST,
        ErrorCode::AccessDenied => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::QueueSizeLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::ProxyBanned | ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (status_for(self.0.code), Json(self.0)).into_response()
    }
}

impl From<GatewayError> for ErrorResponse {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Wire form of a discovery request. The address type arrives as a raw
/// string so an unknown type maps to the taxonomy's input error rather
/// than a generic deserialization rejection.
#[derive(Debug, Default, Deserialize)]
struct RawDiscoveryRequest {
    address_type: Option<String>,
    network_name: Option<String>,
    role: Option<String>,
}

async fn discover(
    State(state): State<AppState>,
    Json(raw): Json<RawDiscoveryRequest>,
) -> Result<Json<DiscoveryResponse>, ErrorResponse> {
    let address_type = match raw.address_type.as_deref() {
        Some(name) => AddressType::from_str(name)
            .map_err(|_| GatewayError::invalid_address_type(name))?,
        None => AddressType::default(),
    };
    let request = DiscoveryRequest {
        address_type,
        network_name: raw.network_name.unwrap_or_else(|| "default".to_string()),
        role: raw.role,
    };

    let proxies = state.registry().discover(&request).await;
    Ok(Json(DiscoveryResponse { proxies }))
}

async fn call(
    State(state): State<AppState>,
    Json(request): Json<ApiRequest>,
) -> Result<Json<ApiResponse>, ErrorResponse> {
    let response = state.node().handle(request).await?;
    Ok(Json(response))
}

async fn stream_read(
    State(state): State<AppState>,
    Json(request): Json<ApiRequest>,
) -> Result<Response, ErrorResponse> {
    let stream = state.node().read_stream(request).await?;
    Ok(Body::from_stream(stream).into_response())
}

async fn stream_write(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ErrorResponse> {
    let envelope = headers
        .get(REQUEST_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| GatewayError::internal("missing request envelope header"))?;
    let request: ApiRequest = serde_json::from_str(envelope)
        .map_err(|error| GatewayError::internal(format!("bad request envelope: {error}")))?;

    let stream = futures_util::TryStreamExt::map_err(body.into_data_stream(), |error| {
        GatewayError::unavailable(format!("request body error: {error}"))
    });
    state
        .node()
        .write_stream(request, Box::pin(stream))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Admin view of one registry record.
#[derive(Debug, Serialize)]
struct ProxyView {
    address: String,
    role: Option<String>,
    banned: bool,
    ban_message: Option<String>,
    registered_at: chrono::DateTime<chrono::Utc>,
}

async fn list_proxies(State(state): State<AppState>) -> Json<Vec<ProxyView>> {
    let records = state.registry().list().await;
    Json(
        records
            .into_iter()
            .map(|record| ProxyView {
                address: record.address,
                role: record.role,
                banned: record.banned,
                ban_message: record.ban_message,
                registered_at: record.registered_at,
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
struct SetBannedRequest {
    banned: bool,
    #[serde(default)]
    message: Option<String>,
}

async fn set_banned(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(body): Json<SetBannedRequest>,
) -> Result<StatusCode, ErrorResponse> {
    if !state
        .registry()
        .set_banned(&address, body.banned, body.message)
        .await
    {
        return Err(GatewayError::not_found(format!("no such proxy: {address}")).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SetRoleRequest {
    role: Option<String>,
}

async fn set_role(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(body): Json<SetRoleRequest>,
) -> Result<StatusCode, ErrorResponse> {
    if !state.registry().set_role(&address, body.role).await {
        return Err(GatewayError::not_found(format!("no such proxy: {address}")).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn set_role_acl(
    State(state): State<AppState>,
    Path(role): Path<String>,
    Json(entries): Json<Vec<AclEntry>>,
) -> StatusCode {
    state.acl().set_acl(role, entries);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct SetQueueLimitRequest {
    limit: usize,
}

async fn set_queue_limit(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(body): Json<SetQueueLimitRequest>,
) -> StatusCode {
    state.limiter().set_limit(&user, body.limit);
    StatusCode::NO_CONTENT
}

async fn get_config(State(state): State<AppState>) -> Json<DynamicConfig> {
    Json((*state.config().load()).clone())
}

async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<DynamicConfig>,
) -> StatusCode {
    state.config().store(config);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct BarrierResponse {
    barrier: BarrierToken,
}

async fn write_barrier(State(state): State<AppState>) -> Json<BarrierResponse> {
    Json(BarrierResponse {
        barrier: state.logger().barrier(),
    })
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    from: Option<u64>,
    to: Option<u64>,
}

#[derive(Debug, Serialize)]
struct LogResponse {
    entries: Vec<LogEntry>,
}

async fn query_log(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Json<LogResponse> {
    let entries = state
        .logger()
        .query(query.from.map(BarrierToken), query.to.map(BarrierToken));
    Json(LogResponse { entries })
}
