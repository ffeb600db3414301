//! 插座命令与命名 handlers。
//!
//! - POST /api/outlets/{n}/command：入队 SET 并等待执行结果
//! - PUT /api/outlets/{n}/name：覆盖插座名（空名清除）
//! - GET /api/outlet-names：当前覆盖表

use api_contract::{OutletCommandAck, OutletCommandRequest, RenameOutletRequest};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use domain::model::OutletAction;
use pdu_runtime::CommandOrigin;

use crate::handlers::DeviceQuery;
use crate::middleware::require_session;
use crate::utils::response::{bad_request_error, internal_error, ok, runtime_error};
use crate::AppState;

/// 执行插座命令。命令进入设备 FIFO，由轮询器串行执行；
/// 无论来源，结果都会发布到响应主题。
pub async fn outlet_command(
    State(state): State<AppState>,
    Path(outlet): Path<u16>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<OutletCommandRequest>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    let Some(action) = OutletAction::parse(&req.action) else {
        return bad_request_error(format!("invalid action: {:?}", req.action));
    };
    if outlet == 0 {
        return bad_request_error("outlet must be >= 1");
    }

    match state
        .manager
        .outlet_command(query.device_id.as_deref(), outlet, action, CommandOrigin::Http)
        .await
    {
        Ok(response) if response.success => ok(OutletCommandAck {
            outlet,
            action: action.as_str().to_string(),
            ok: true,
        }),
        Ok(response) => internal_error(
            response
                .error
                .unwrap_or_else(|| "command failed".to_string()),
        ),
        Err(err) => runtime_error(err),
    }
}

/// 覆盖插座名。覆盖应用在快照上并随下一拍发布。
pub async fn rename_outlet(
    State(state): State<AppState>,
    Path(outlet): Path<u16>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<RenameOutletRequest>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    let poller = match state.manager.poller_for(query.device_id.as_deref()).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    let name = req.name.trim().to_string();
    let name = if name.is_empty() { None } else { Some(name) };
    match poller.set_outlet_name(outlet, name.clone()).await {
        Ok(()) => ok(serde_json::json!({
            "outlet": outlet,
            "name": name.unwrap_or_default(),
            "ok": true,
        })),
        Err(err) => runtime_error(err),
    }
}

/// 当前的插座名覆盖表。
pub async fn get_outlet_names(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let poller = match state.manager.poller_for(query.device_id.as_deref()).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    match poller.outlet_names().await {
        Ok(names) => ok(names),
        Err(err) => runtime_error(err),
    }
}
