//! 桥接器配置 handlers。
//!
//! - GET /api/config：运行参数
//! - PUT /api/config：更新轮询间隔（≥ 1000 ms），立即生效并持久化

use api_contract::{BridgeConfigDto, UpdateBridgeConfigRequest};
use axum::{
    extract::State,
    http::HeaderMap,
    response::Response,
    Json,
};

use crate::middleware::require_session;
use crate::utils::response::{ok, runtime_error};
use crate::AppState;

/// 当前配置。
pub async fn get_config(State(state): State<AppState>) -> Response {
    let settings = state.manager.settings().await;
    let config = state.manager.config();
    ok(BridgeConfigDto {
        poll_interval_ms: settings.poll_interval_ms,
        history_retention_days: config.history_retention_days,
        web_port: config.web_port,
        auth_enabled: state.auth.enabled(),
    })
}

/// 更新配置。目前支持轮询间隔。
pub async fn update_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateBridgeConfigRequest>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    if let Some(interval) = req.poll_interval_ms {
        if let Err(err) = state.manager.set_poll_interval(interval).await {
            return runtime_error(err);
        }
    }
    get_config(State(state)).await
}
