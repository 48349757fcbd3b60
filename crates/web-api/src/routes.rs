use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use config::ServerConfig;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/ws", get(websocket_upgrade))
}

/// 加上请求追踪和 CORS
pub fn with_http_layers(router: Router, server: &ServerConfig) -> Router {
    router.layer(cors_layer(&server.cors_origins)).layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    uptime: Option<u64>,
    online_users: usize,
    timestamp: DateTime<Utc>,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let online_users = state.hub.online_count().await;
    match state.storage_health.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthReport {
                status: "healthy",
                database: "connected",
                uptime: Some(state.started_at.elapsed().as_secs()),
                online_users,
                timestamp: Utc::now(),
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "存储健康检查失败");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport {
                    status: "unhealthy",
                    database: "disconnected",
                    uptime: None,
                    online_users,
                    timestamp: Utc::now(),
                }),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// 升级前完成身份校验，失败直接返回 401，连接不会进入会话
async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let identity = state
        .jwt_service
        .authenticate(&headers, query.token.as_deref())
        .inspect_err(|err| tracing::debug!(error = ?err, "拒绝未认证的连接"))?;

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(socket, hub, identity).run()))
}
