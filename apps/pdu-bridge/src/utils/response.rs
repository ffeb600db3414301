//! HTTP 响应辅助函数和 DTO 转换。
//!
//! 错误码到状态码的映射：invalid → 400，unauthorized → 401，
//! not found → 404，conflict → 409，requires-serial → 503，
//! internal → 500。所有错误统一走 ApiResponse 封装。

use api_contract::{error_codes, ApiResponse, PduDto, ReportDto, ReportSummaryDto};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pdu_automation::AutomationError;
use pdu_config::PduConfig;
use pdu_runtime::RuntimeError;
use pdu_storage::{ReportRecord, ReportSummary};

/// 认证错误响应。
pub fn auth_error() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error(
            error_codes::AUTH_UNAUTHORIZED,
            "unauthorized",
        )),
    )
        .into_response()
}

/// 错误请求响应。
pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(
            error_codes::INVALID_REQUEST,
            message.into(),
        )),
    )
        .into_response()
}

/// 资源未找到错误响应。
pub fn not_found_error() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(
            error_codes::RESOURCE_NOT_FOUND,
            "not found",
        )),
    )
        .into_response()
}

/// 冲突错误响应。
pub fn conflict_error(message: impl Into<String>) -> Response {
    (
        StatusCode::CONFLICT,
        Json(ApiResponse::<()>::error(error_codes::CONFLICT, message.into())),
    )
        .into_response()
}

/// 内部错误响应。
pub fn internal_error(message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::error!(error = %message, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error(
            error_codes::INTERNAL_ERROR,
            "internal error",
        )),
    )
        .into_response()
}

/// 需要串口传输的错误响应。
pub fn requires_serial_error() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::<()>::error(
            error_codes::REQUIRES_SERIAL,
            "management ops require the serial console or mock transport",
        )),
    )
        .into_response()
}

/// 运行时错误到 HTTP 状态码的统一映射。
pub fn runtime_error(err: RuntimeError) -> Response {
    match err {
        RuntimeError::DeviceNotFound(_) | RuntimeError::NoDevices => not_found_error(),
        RuntimeError::AmbiguousDevice | RuntimeError::Invalid(_) => {
            bad_request_error(err.to_string())
        }
        RuntimeError::DeviceExists(id) => conflict_error(format!("device already exists: {id}")),
        RuntimeError::RequiresSerial => requires_serial_error(),
        RuntimeError::Automation(inner) => match inner {
            AutomationError::InvalidRule(message) => bad_request_error(message),
            AutomationError::NotFound(name) => {
                tracing::debug!(rule = %name, "rule not found");
                not_found_error()
            }
            AutomationError::Conflict(name) => {
                conflict_error(format!("rule already exists: {name:?}"))
            }
            AutomationError::Storage(message) => internal_error(message),
        },
        RuntimeError::CommandTimeout
        | RuntimeError::PollerGone(_)
        | RuntimeError::Config(_)
        | RuntimeError::Storage(_) => internal_error(err.to_string()),
    }
}

/// 成功响应（200）。
pub fn ok<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 创建成功响应（201）。
pub fn created<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// PduConfig 转 PduDto。社区口令与串口凭据永不回显。
pub fn pdu_to_dto(config: PduConfig) -> PduDto {
    PduDto {
        device_id: config.device_id,
        host: config.host,
        snmp_port: config.snmp_port,
        label: config.label,
        enabled: config.enabled,
        transport: config.transport.as_str().to_string(),
        num_banks: config.num_banks,
        has_serial: !config.serial_port.is_empty(),
        serial: if config.serial.is_empty() {
            None
        } else {
            Some(config.serial)
        },
    }
}

/// ReportSummary 转 DTO。
pub fn report_summary_to_dto(summary: ReportSummary) -> ReportSummaryDto {
    ReportSummaryDto {
        id: summary.id,
        device_id: summary.device_id,
        week_start: summary.week_start,
        week_end: summary.week_end,
        created_at: summary.created_at,
    }
}

/// ReportRecord 转 DTO。
pub fn report_to_dto(report: ReportRecord) -> ReportDto {
    ReportDto {
        id: report.id,
        device_id: report.device_id,
        week_start: report.week_start,
        week_end: report.week_end,
        created_at: report.created_at,
        data: report.data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn requires_serial_maps_to_503() {
        let response = runtime_error(RuntimeError::RequiresSerial);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = response_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], error_codes::REQUIRES_SERIAL);
    }

    #[tokio::test]
    async fn not_found_and_conflict_mapping() {
        let response = runtime_error(RuntimeError::DeviceNotFound("x".to_string()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = runtime_error(RuntimeError::DeviceExists("x".to_string()));
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = runtime_error(RuntimeError::Automation(
            AutomationError::InvalidRule("bad threshold".to_string()),
        ));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn pdu_dto_hides_credentials() {
        let mut config = PduConfig::mock("pdu44001");
        config.community_write = "secret".to_string();
        config.serial_password = "hunter2".to_string();
        let dto = pdu_to_dto(config);
        let json = serde_json::to_value(dto).expect("json");
        assert!(json.get("community_write").is_none());
        assert!(json.get("serial_password").is_none());
    }
}
