//! 路由定义。
//!
//! 集中管理所有 API 路由，将路径映射到对应的 handlers：
//! - 状态与健康：/api/status, /api/health
//! - 设备管理：/api/pdus/*
//! - 桥接器配置：/api/config
//! - 插座：/api/outlets/*, /api/outlet-names
//! - 规则与事件：/api/rules/*, /api/events
//! - 历史与报表：/api/history/*, /api/reports/*
//! - PDU 管理（串口/模拟）：/api/management/*
//! - 认证：/api/auth/*

use axum::{
    routing::{get, post, put},
    Router,
};

use super::handlers::*;
use super::AppState;

/// 创建 API 路由。
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/health", get(get_health))
        .route("/api/pdus", get(list_pdus).post(create_pdu))
        .route(
            "/api/pdus/:device_id",
            put(update_pdu).delete(delete_pdu),
        )
        .route("/api/pdus/discover", post(discover_pdus))
        .route("/api/config", get(get_config).put(update_config))
        .route("/api/outlets/:n/command", post(outlet_command))
        .route("/api/outlets/:n/name", put(rename_outlet))
        .route("/api/outlet-names", get(get_outlet_names))
        .route("/api/rules", get(list_rules).post(create_rule))
        .route(
            "/api/rules/:name",
            put(update_rule).delete(delete_rule),
        )
        .route("/api/rules/:name/toggle", put(toggle_rule))
        .route("/api/events", get(list_events))
        .route("/api/history/banks", get(history_banks))
        .route("/api/history/outlets", get(history_outlets))
        .route("/api/history/banks.csv", get(history_banks_csv))
        .route("/api/history/outlets.csv", get(history_outlets_csv))
        .route("/api/reports", get(list_reports))
        .route("/api/reports/latest", get(latest_report))
        .route("/api/reports/:id", get(get_report))
        .route(
            "/api/management/thresholds",
            get(get_thresholds).put(set_threshold),
        )
        .route(
            "/api/management/network",
            get(get_network).put(set_network),
        )
        .route("/api/management/ats", get(get_ats_config).put(set_ats_config))
        .route("/api/management/outlet-config", get(get_outlet_config))
        .route("/api/management/outlet-config/:n", put(set_outlet_config))
        .route("/api/management/device-name", put(set_device_name))
        .route("/api/management/device-location", put(set_device_location))
        .route("/api/management/security/check", get(check_default_credentials))
        .route("/api/management/security/password", post(change_password))
        .route("/api/management/event-log", get(get_event_log))
        .route(
            "/api/management/notifications",
            get(get_notifications).put(set_notifications),
        )
        .route(
            "/api/management/energywise",
            get(get_energywise).put(set_energywise),
        )
        .route("/api/management/users", get(get_users))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/status", get(auth_status))
}
