//! 认证能力：Web 口令登录与会话 token 校验。
//!
//! 桥接器的认证面很窄：配置了 `BRIDGE_WEB_PASSWORD` 时，所有写
//! 端点要求有效会话；口令比较用常数时间实现，会话 token 为随机
//! UUID，带滑动过期。未配置口令时认证整体停用，`/api/health`
//! 任何时候都不鉴权。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use subtle::ConstantTimeEq;

/// 认证相关错误。
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("session expired")]
    SessionExpired,
    #[error("session invalid")]
    SessionInvalid,
}

/// 默认会话有效期。
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 3600);

struct SessionEntry {
    expires_at: Instant,
}

/// 会话管理器。`web_password` 为 None 时认证停用。
pub struct SessionManager {
    web_password: Option<String>,
    ttl: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(web_password: Option<String>, ttl: Duration) -> Self {
        Self {
            web_password,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 认证是否启用。
    pub fn enabled(&self) -> bool {
        self.web_password.is_some()
    }

    /// 口令登录，返回会话 token。
    pub fn login(&self, password: &str) -> Result<String, AuthError> {
        let expected = self
            .web_password
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;
        if expected.as_bytes().ct_eq(password.as_bytes()).into() {
            let token = uuid::Uuid::new_v4().to_string();
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.retain(|_, entry| entry.expires_at > Instant::now());
            sessions.insert(
                token.clone(),
                SessionEntry {
                    expires_at: Instant::now() + self.ttl,
                },
            );
            Ok(token)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    /// 校验会话并滑动续期。认证停用时恒成功。
    pub fn verify(&self, token: Option<&str>) -> Result<(), AuthError> {
        if !self.enabled() {
            return Ok(());
        }
        let token = token.ok_or(AuthError::SessionInvalid)?;
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get_mut(token) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.expires_at = Instant::now() + self.ttl;
                Ok(())
            }
            Some(_) => {
                sessions.remove(token);
                Err(AuthError::SessionExpired)
            }
            None => Err(AuthError::SessionInvalid),
        }
    }

    /// 注销会话。未知 token 不算错误。
    pub fn logout(&self, token: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token);
    }
}
