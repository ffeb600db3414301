//! 请求上下文与会话认证中间件。
//!
//! - request_context：所有请求注入 request_id/trace_id
//! - session_token：从 Cookie 头提取 `session=` 值
//! - require_session：设置了 web 口令时校验会话；`/api/health`
//!   永不经过该检查

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use pdu_auth::AuthError;
use pdu_telemetry::new_request_ids;
use tracing::{info_span, Instrument};

use crate::utils::response::auth_error;
use crate::AppState;

/// 请求上下文中间件：注入 request_id/trace_id。
pub async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = info_span!(
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}

/// 从 Cookie 头提取会话 token。
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix("session=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// 写端点的会话校验。认证未启用时恒通过。
pub fn require_session(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let token = session_token(headers);
    match state.auth.verify(token.as_deref()) {
        Ok(()) => Ok(()),
        Err(AuthError::SessionExpired | AuthError::SessionInvalid) => Err(auth_error()),
        Err(AuthError::InvalidCredentials) => Err(auth_error()),
    }
}

#[cfg(test)]
mod tests {
    use super::session_token;
    use axum::http::{header, HeaderMap, HeaderValue};

    #[test]
    fn session_cookie_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc-123; lang=en"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn missing_cookie_yields_none() {
        let headers = HeaderMap::new();
        assert!(session_token(&headers).is_none());
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert!(session_token(&headers).is_none());
    }
}
