//! 状态与健康 handlers。
//!
//! - GET /api/status：最近快照的 JSON 汇总（含 MQTT 健康与数据年龄）
//! - GET /api/health：聚合健康；healthy 返回 200，否则 503；永不鉴权

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use api_contract::ApiResponse;
use pdu_runtime::publish::build_status_dto;

use crate::handlers::DeviceQuery;
use crate::utils::response::{not_found_error, ok, runtime_error};
use crate::AppState;

/// 最近快照的状态汇总。轮询器尚未出数时返回 503。
pub async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let poller = match state.manager.poller_for(query.device_id.as_deref()).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    let Some(snapshot) = poller.shared.snapshot() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::<()>::error(
                api_contract::error_codes::INTERNAL_ERROR,
                "no data yet",
            )),
        )
            .into_response();
    };

    let device = match state.manager.get_device(&poller.device_id).await {
        Some(device) => device,
        None => return not_found_error(),
    };
    let health = poller.shared.health();
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    let age = poller.shared.data_age_seconds(now_ms).unwrap_or(0.0);

    let status = build_status_dto(
        &poller.device_id,
        &device.label,
        &snapshot,
        health.state.as_str(),
        &health.active_transport,
        Some(&state.manager.mqtt_status()),
        age,
    );
    ok(status)
}

/// 聚合健康。健康 200，降级/失联 503，响应体总是 JSON。
pub async fn get_health(State(state): State<AppState>) -> Response {
    let health = state.manager.health().await;
    let status = if health.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ApiResponse::success(health))).into_response()
}
