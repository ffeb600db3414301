//! 自动化规则 handlers。
//!
//! 规则集归属该设备的轮询器；HTTP 变更经轮询器消息通道转发，
//! 这里绝不直接改规则状态。

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use pdu_automation::RuleDoc;

use crate::handlers::DeviceQuery;
use crate::middleware::require_session;
use crate::utils::response::{bad_request_error, created, ok, runtime_error};
use crate::AppState;

/// 列出规则（含运行态）。
pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let poller = match state.manager.poller_for(query.device_id.as_deref()).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    match poller.list_rules().await {
        Ok(rules) => ok(rules),
        Err(err) => runtime_error(err),
    }
}

/// 创建规则。
pub async fn create_rule(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    let doc: RuleDoc = match serde_json::from_value(body) {
        Ok(doc) => doc,
        Err(err) => return bad_request_error(format!("invalid rule data: {err}")),
    };
    let poller = match state.manager.poller_for(query.device_id.as_deref()).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    match poller.create_rule(doc).await {
        Ok(view) => created(view),
        Err(err) => runtime_error(err),
    }
}

/// 更新规则（名字来自路径，body 里的名字被忽略）。
pub async fn update_rule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    let mut body = body;
    if let Some(object) = body.as_object_mut() {
        object.insert("name".to_string(), serde_json::json!(name.clone()));
    }
    let doc: RuleDoc = match serde_json::from_value(body) {
        Ok(doc) => doc,
        Err(err) => return bad_request_error(format!("invalid rule data: {err}")),
    };
    let poller = match state.manager.poller_for(query.device_id.as_deref()).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    match poller.update_rule(name, doc).await {
        Ok(view) => ok(view),
        Err(err) => runtime_error(err),
    }
}

/// 删除规则。
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    let poller = match state.manager.poller_for(query.device_id.as_deref()).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    match poller.delete_rule(name.clone()).await {
        Ok(()) => ok(serde_json::json!({ "deleted": name })),
        Err(err) => runtime_error(err),
    }
}

/// 启停规则。
pub async fn toggle_rule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DeviceQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = require_session(&state, &headers) {
        return response;
    }
    let poller = match state.manager.poller_for(query.device_id.as_deref()).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    match poller.toggle_rule(name).await {
        Ok(view) => ok(view),
        Err(err) => runtime_error(err),
    }
}

/// 最近的自动化事件（新的在前，最多 100 条）。
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let poller = match state.manager.poller_for(query.device_id.as_deref()).await {
        Ok(poller) => poller,
        Err(err) => return runtime_error(err),
    };
    match poller.rule_events().await {
        Ok(events) => ok(events),
        Err(err) => runtime_error(err),
    }
}
