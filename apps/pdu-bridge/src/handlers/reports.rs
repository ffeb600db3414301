//! 周报 handlers。
//!
//! 报表由小时级维护任务生成；这里只读。

use axum::{
    extract::{Path, Query, State},
    response::Response,
};

use crate::handlers::DeviceQuery;
use crate::utils::response::{
    internal_error, not_found_error, ok, report_summary_to_dto, report_to_dto,
};
use crate::AppState;

/// 报表摘要列表（按周起始倒序）。
pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    match state
        .manager
        .history()
        .list_reports(query.device_id.as_deref())
        .await
    {
        Ok(summaries) => ok(summaries
            .into_iter()
            .map(report_summary_to_dto)
            .collect::<Vec<_>>()),
        Err(err) => internal_error(err.to_string()),
    }
}

/// 最近一份报表全文。
pub async fn latest_report(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    match state
        .manager
        .history()
        .latest_report(query.device_id.as_deref())
        .await
    {
        Ok(Some(report)) => ok(report_to_dto(report)),
        Ok(None) => not_found_error(),
        Err(err) => internal_error(err.to_string()),
    }
}

/// 按 ID 取报表全文。
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.manager.history().get_report(&id).await {
        Ok(Some(report)) => ok(report_to_dto(report)),
        Ok(None) => not_found_error(),
        Err(err) => internal_error(err.to_string()),
    }
}
