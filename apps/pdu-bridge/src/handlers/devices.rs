//! PDU 设备管理 handlers。
//!
//! - GET /api/pdus：设备清单（凭据不回显）
//! - POST /api/pdus：热添加（轮询器下一拍启动）
//! - PUT/DELETE /api/pdus/{device_id}：更新 / 移除
//! - POST /api/pdus/discover：触发网络发现（外部扫描器，可缺席）

use api_contract::{CreatePduRequest, PduDto, UpdatePduRequest};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
};
use axum::Json;
use pdu_config::{PduConfig, TransportKind};
use pdu_runtime::manager::derive_device_id;

use crate::middleware::require_session;
use crate::utils::response::{bad_request_error, created, ok, pdu_to_dto, runtime_error};
use crate::AppState;

/// 列出配置的 PDU。
pub async fn list_pdus(State(state): State<AppState>) -> Response {
    let devices: Vec<PduDto> = state
        .manager
        .list_devices()
        .await
        .into_iter()
        .map(pdu_to_dto)
        .collect();
    ok(devices)
}

/// 添加一台 PDU。`device_id` 缺省时由主机/串口确定性推导。
pub async fn create_pdu(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePduRequest>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }

    let transport = match req.transport.as_deref() {
        None => TransportKind::Snmp,
        Some(text) => match TransportKind::parse(text) {
            Some(kind) => kind,
            None => return bad_request_error(format!("invalid transport: {text:?}")),
        },
    };
    let device_id = match req.device_id {
        Some(id) => id,
        None => derive_device_id(&req.host, &req.serial_port, ""),
    };

    let mut device = PduConfig::mock(&device_id);
    device.transport = transport;
    device.host = req.host;
    device.label = req.label;
    device.serial_port = req.serial_port;
    if let Some(port) = req.snmp_port {
        device.snmp_port = port;
    }
    if let Some(community) = req.community_read {
        device.community_read = community;
    }
    if let Some(community) = req.community_write {
        device.community_write = community;
    }
    if let Some(baud) = req.serial_baud {
        device.serial_baud = baud;
    }
    if let Some(username) = req.serial_username {
        device.serial_username = username;
    }
    if let Some(password) = req.serial_password {
        device.serial_password = password;
    }
    if let Some(enabled) = req.enabled {
        device.enabled = enabled;
    }
    if let Some(num_banks) = req.num_banks {
        device.num_banks = num_banks;
    }
    if device.transport != TransportKind::Mock {
        device.label = if device.label.is_empty() {
            device.device_id.clone()
        } else {
            device.label
        };
    }

    match state.manager.add_device(device).await {
        Ok(device) => created(pdu_to_dto(device)),
        Err(err) => runtime_error(err),
    }
}

/// 更新一台 PDU（字段级合并；device_id 不可变）。
pub async fn update_pdu(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdatePduRequest>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    let transport = match req.transport.as_deref() {
        None => None,
        Some(text) => match TransportKind::parse(text) {
            Some(kind) => Some(kind),
            None => return bad_request_error(format!("invalid transport: {text:?}")),
        },
    };

    let result = state
        .manager
        .update_device(&device_id, move |device| {
            if let Some(host) = req.host {
                device.host = host;
            }
            if let Some(port) = req.snmp_port {
                device.snmp_port = port;
            }
            if let Some(community) = req.community_read {
                device.community_read = community;
            }
            if let Some(community) = req.community_write {
                device.community_write = community;
            }
            if let Some(serial_port) = req.serial_port {
                device.serial_port = serial_port;
            }
            if let Some(baud) = req.serial_baud {
                device.serial_baud = baud;
            }
            if let Some(label) = req.label {
                device.label = label;
            }
            if let Some(enabled) = req.enabled {
                device.enabled = enabled;
            }
            if let Some(kind) = transport {
                device.transport = kind;
            }
            if let Some(num_banks) = req.num_banks {
                device.num_banks = num_banks;
            }
        })
        .await;
    match result {
        Ok(device) => ok(pdu_to_dto(device)),
        Err(err) => runtime_error(err),
    }
}

/// 移除一台 PDU：停轮询、退订主题并删除其规则/命名文档。
pub async fn delete_pdu(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    match state.manager.remove_device(&device_id).await {
        Ok(()) => ok(()),
        Err(err) => runtime_error(err),
    }
}

/// 网络发现。扫描器是外部协作者，缺席时返回空结果。
pub async fn discover_pdus(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    // 交互式扫描器属于外部协作者；核心只暴露稳定的空结果契约
    let _ = &state;
    ok(Vec::<PduDto>::new())
}
