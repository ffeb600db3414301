//! PDU 管理 handlers（需要串口或模拟传输，否则 503）。
//!
//! 所有调用经轮询器消息通道转发到活动传输的管理扩展，保持传输
//! 独占：管理操作在途时轮询不会触碰传输。

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use pdu_runtime::ManagementCall;
use pdu_transport::{
    AtsConfigUpdate, EnergywiseConfig, NetworkUpdate, NotificationsUpdate, OutletConfigUpdate,
    ThresholdTarget,
};
use serde::Deserialize;

use crate::handlers::DeviceQuery;
use crate::middleware::require_session;
use crate::utils::response::{ok, runtime_error};
use crate::AppState;

async fn run_call(
    state: &AppState,
    device_id: Option<&str>,
    call: ManagementCall,
) -> Response {
    let poller = match state.manager.poller_for(device_id).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    match poller.management(call).await {
        Ok(value) => ok(value),
        Err(err) => runtime_error(err),
    }
}

/// GET /api/management/thresholds
pub async fn get_thresholds(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    run_call(&state, query.device_id.as_deref(), ManagementCall::GetThresholds).await
}

/// 阈值写入请求体：`{"scope": "...", "bank": n?, "value": x}`。
#[derive(Debug, Deserialize)]
pub struct SetThresholdRequest {
    #[serde(flatten)]
    pub target: ThresholdTarget,
    pub value: f64,
}

/// PUT /api/management/thresholds
pub async fn set_threshold(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<SetThresholdRequest>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::SetThreshold(req.target, req.value),
    )
    .await
}

/// GET /api/management/network
pub async fn get_network(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    run_call(&state, query.device_id.as_deref(), ManagementCall::GetNetwork).await
}

/// PUT /api/management/network
pub async fn set_network(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<NetworkUpdate>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::SetNetwork(req),
    )
    .await
}

/// GET /api/management/ats
pub async fn get_ats_config(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    run_call(&state, query.device_id.as_deref(), ManagementCall::GetAtsConfig).await
}

/// PUT /api/management/ats
pub async fn set_ats_config(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<AtsConfigUpdate>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::SetAtsConfig(req),
    )
    .await
}

/// GET /api/management/outlet-config
pub async fn get_outlet_config(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::GetOutletConfig,
    )
    .await
}

/// PUT /api/management/outlet-config/{n}
pub async fn set_outlet_config(
    State(state): State<AppState>,
    Path(outlet): Path<u16>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<OutletConfigUpdate>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::SetOutletConfig(outlet, req),
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct SetTextRequest {
    pub value: String,
}

/// PUT /api/management/device-name
pub async fn set_device_name(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<SetTextRequest>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::SetDeviceName(req.value),
    )
    .await
}

/// PUT /api/management/device-location
pub async fn set_device_location(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<SetTextRequest>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::SetDeviceLocation(req.value),
    )
    .await
}

/// GET /api/management/security/check
///
/// 设备仍用出厂口令时返回 true 并追加 security_warning 事件。
pub async fn check_default_credentials(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::CheckDefaultCredentials,
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub account: String,
    pub old_password: String,
    pub new_password: String,
}

/// POST /api/management/security/password
pub async fn change_password(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<ChangePasswordRequest>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::ChangePassword {
            account: req.account,
            old_password: req.old_password,
            new_password: req.new_password,
        },
    )
    .await
}

/// GET /api/management/event-log
pub async fn get_event_log(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    run_call(&state, query.device_id.as_deref(), ManagementCall::GetEventLog).await
}

/// GET /api/management/notifications
pub async fn get_notifications(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::GetNotifications,
    )
    .await
}

/// PUT /api/management/notifications
pub async fn set_notifications(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<NotificationsUpdate>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::SetNotifications(req),
    )
    .await
}

/// GET /api/management/energywise
pub async fn get_energywise(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::GetEnergywise,
    )
    .await
}

/// PUT /api/management/energywise
pub async fn set_energywise(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(req): Json<EnergywiseConfig>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    run_call(
        &state,
        query.device_id.as_deref(),
        ManagementCall::SetEnergywise(req),
    )
    .await
}

/// GET /api/management/users
pub async fn get_users(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    run_call(&state, query.device_id.as_deref(), ManagementCall::GetUsers).await
}
