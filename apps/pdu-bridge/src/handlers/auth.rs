//! 会话认证 handlers。
//!
//! 设置了 `BRIDGE_WEB_PASSWORD` 时所有写端点要求有效会话。
//! `/api/health` 永不鉴权。

use api_contract::{ApiResponse, AuthStatusDto, LoginRequest};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pdu_auth::AuthError;

use crate::middleware::session_token;
use crate::utils::response::{bad_request_error, ok};
use crate::AppState;

/// 口令登录，种下会话 cookie。
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Response {
    if !state.auth.enabled() {
        return bad_request_error("authentication is not enabled");
    }
    match state.auth.login(&req.password) {
        Ok(token) => {
            let cookie = format!("session={token}; Path=/; HttpOnly; SameSite=Strict");
            let mut response =
                (StatusCode::OK, Json(ApiResponse::success(()))).into_response();
            if let Ok(value) = header::HeaderValue::from_str(&cookie) {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            response
        }
        Err(AuthError::InvalidCredentials) => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                api_contract::error_codes::AUTH_UNAUTHORIZED,
                "invalid password",
            )),
        )
            .into_response(),
        Err(_) => bad_request_error("login failed"),
    }
}

/// 注销当前会话。
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.auth.logout(&token);
    }
    let mut response = (StatusCode::OK, Json(ApiResponse::success(()))).into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        header::HeaderValue::from_static("session=; Path=/; Max-Age=0"),
    );
    response
}

/// 认证状态。
pub async fn auth_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = session_token(&headers);
    let authenticated = state.auth.verify(token.as_deref()).is_ok();
    ok(AuthStatusDto {
        auth_enabled: state.auth.enabled(),
        authenticated,
    })
}
