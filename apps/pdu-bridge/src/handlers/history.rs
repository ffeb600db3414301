//! 历史查询 handlers。
//!
//! 接受 `range` 预设（1h/6h/24h/7d/30d/60d）或显式 `start`+`end`
//! （epoch 秒），按区间宽度自动降采样。`.csv` 变体返回同一数据的
//! 逗号分隔形式。

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use api_contract::HistoryQuery;

use crate::utils::response::{internal_error, ok, runtime_error};
use crate::AppState;

/// 时间区间预设（秒）。
fn range_seconds(range: &str) -> i64 {
    match range {
        "6h" => 6 * 3_600,
        "24h" => 24 * 3_600,
        "7d" => 7 * 86_400,
        "30d" => 30 * 86_400,
        "60d" => 60 * 86_400,
        _ => 3_600,
    }
}

fn resolve_window(query: &HistoryQuery) -> (i64, i64) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    match (query.start, query.end) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            let seconds = range_seconds(query.range.as_deref().unwrap_or("1h"));
            (now - seconds, now)
        }
    }
}

async fn resolve_device(
    state: &AppState,
    query: &HistoryQuery,
) -> Result<String, Response> {
    state
        .manager
        .poller_for(query.device_id.as_deref())
        .await
        .map(|poller| poller.device_id.clone())
        .map_err(runtime_error)
}

/// 负载组历史（JSON）。
pub async fn history_banks(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let device_id = match resolve_device(&state, &query).await {
        Ok(device_id) => device_id,
        Err(response) => return response,
    };
    let (start, end) = resolve_window(&query);
    match state
        .manager
        .history()
        .query_banks(&device_id, start, end, None)
        .await
    {
        Ok(points) => ok(points),
        Err(err) => internal_error(err.to_string()),
    }
}

/// 插座历史（JSON）。
pub async fn history_outlets(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let device_id = match resolve_device(&state, &query).await {
        Ok(device_id) => device_id,
        Err(response) => return response,
    };
    let (start, end) = resolve_window(&query);
    match state
        .manager
        .history()
        .query_outlets(&device_id, start, end, None)
        .await
    {
        Ok(points) => ok(points),
        Err(err) => internal_error(err.to_string()),
    }
}

fn csv_response(filename: &str, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

fn format_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// 负载组历史（CSV）。
pub async fn history_banks_csv(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let device_id = match resolve_device(&state, &query).await {
        Ok(device_id) => device_id,
        Err(response) => return response,
    };
    let (start, end) = resolve_window(&query);
    let points = match state
        .manager
        .history()
        .query_banks(&device_id, start, end, None)
        .await
    {
        Ok(points) => points,
        Err(err) => return internal_error(err.to_string()),
    };

    let mut body = String::from("bucket,bank,voltage,current,power,apparent,pf\n");
    for point in points {
        body.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            point.bucket,
            point.bank,
            format_opt(point.voltage),
            format_opt(point.current),
            format_opt(point.power),
            format_opt(point.apparent),
            format_opt(point.pf),
        ));
    }
    csv_response("bank_history.csv", body)
}

/// 插座历史（CSV）。
pub async fn history_outlets_csv(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let device_id = match resolve_device(&state, &query).await {
        Ok(device_id) => device_id,
        Err(response) => return response,
    };
    let (start, end) = resolve_window(&query);
    let points = match state
        .manager
        .history()
        .query_outlets(&device_id, start, end, None)
        .await
    {
        Ok(points) => points,
        Err(err) => return internal_error(err.to_string()),
    };

    let mut body = String::from("bucket,outlet,state,current,power,energy\n");
    for point in points {
        body.push_str(&format!(
            "{},{},{},{},{},{}\n",
            point.bucket,
            point.outlet,
            point.state.unwrap_or_default(),
            format_opt(point.current),
            format_opt(point.power),
            format_opt(point.energy),
        ));
    }
    csv_response("outlet_history.csv", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_presets() {
        assert_eq!(range_seconds("1h"), 3_600);
        assert_eq!(range_seconds("24h"), 86_400);
        assert_eq!(range_seconds("60d"), 60 * 86_400);
        // 未知预设回退 1h
        assert_eq!(range_seconds("yesterday"), 3_600);
    }

    #[test]
    fn explicit_window_beats_range() {
        let query = HistoryQuery {
            device_id: None,
            range: Some("24h".to_string()),
            start: Some(100),
            end: Some(200),
        };
        assert_eq!(resolve_window(&query), (100, 200));
    }
}
