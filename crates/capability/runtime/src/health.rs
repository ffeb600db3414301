//! 传输失效状态机。
//!
//! 状态迁移（每设备）：
//! - **Healthy**：主传输在主路上连续成功
//! - **Degraded**：连续失败 ≥ 10
//! - **Recovering**：连续失败 ≥ 30 且切到了备用传输；回到主路
//!   成功前保持该状态
//! - **Lost**：两路传输都不可用；安排恢复扫描后继续轮询，是
//!   稳定状态
//!
//! 日志节流：进入 Degraded 时告警一次，此后每第 10 次失败再告警。

use pdu_transport::{TransportError, TransportId};

/// 传输健康状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Recovering,
    Lost,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Recovering => "recovering",
            HealthState::Lost => "lost",
        }
    }
}

/// 一次传输切换记录。
#[derive(Debug, Clone)]
pub struct SwapRecord {
    pub at_ms: i64,
    pub from: TransportId,
    pub to: TransportId,
}

/// 失败处理决策，由轮询器执行。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// 静默计数。
    Count,
    /// 按节流规则记一条告警。
    LogWarn,
    /// 尝试热切换到备用传输。
    AttemptSwap,
    /// 刚进入 Lost：安排恢复扫描。
    EnterLost,
    /// 已处于 Lost，继续轮询。
    StayLost,
}

/// 每设备的传输健康状态机。
#[derive(Debug, Clone)]
pub struct TransportHealth {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_success_ms: Option<i64>,
    pub active: TransportId,
    pub primary: TransportId,
    pub last_error: Option<String>,
    pub swaps: Vec<SwapRecord>,
}

/// 降级阈值。
pub const DEGRADED_THRESHOLD: u32 = 10;
/// 切换/失联阈值。
pub const SWAP_THRESHOLD: u32 = 30;

impl TransportHealth {
    pub fn new(primary: TransportId) -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            last_success_ms: None,
            active: primary,
            primary,
            last_error: None,
            swaps: Vec::new(),
        }
    }

    /// 成功轮询。返回 true 表示状态从非健康恢复。
    pub fn record_success(&mut self, now_ms: i64) -> bool {
        self.consecutive_failures = 0;
        self.last_success_ms = Some(now_ms);
        self.last_error = None;
        let recovered = !matches!(self.state, HealthState::Healthy | HealthState::Recovering);
        // 备用传输上保持 Recovering，回到主路才算 Healthy
        if self.active == self.primary {
            let was_recovering = self.state == HealthState::Recovering;
            self.state = HealthState::Healthy;
            return recovered || was_recovering;
        }
        if self.state != HealthState::Recovering {
            self.state = HealthState::Recovering;
            return true;
        }
        false
    }

    /// 失败轮询。返回轮询器要执行的决策。
    pub fn record_failure(&mut self, error: &TransportError, has_secondary: bool) -> FailureDecision {
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
        let failures = self.consecutive_failures;

        if failures >= SWAP_THRESHOLD {
            if has_secondary && self.active == self.primary {
                return FailureDecision::AttemptSwap;
            }
            if self.state != HealthState::Lost {
                self.state = HealthState::Lost;
                return FailureDecision::EnterLost;
            }
            return FailureDecision::StayLost;
        }

        if failures >= DEGRADED_THRESHOLD {
            if self.state == HealthState::Healthy {
                self.state = HealthState::Degraded;
            }
            if failures == DEGRADED_THRESHOLD || failures % DEGRADED_THRESHOLD == 0 {
                return FailureDecision::LogWarn;
            }
        }
        FailureDecision::Count
    }

    /// 热切换成功：备用传输上线，计数清零。
    pub fn record_swap(&mut self, now_ms: i64, to: TransportId) {
        self.swaps.push(SwapRecord {
            at_ms: now_ms,
            from: self.active,
            to,
        });
        self.active = to;
        self.consecutive_failures = 0;
        self.state = HealthState::Recovering;
    }

    /// 恢复扫描找到设备后回到主路。
    pub fn recover_primary(&mut self, now_ms: i64) {
        if self.active != self.primary {
            self.swaps.push(SwapRecord {
                at_ms: now_ms,
                from: self.active,
                to: self.primary,
            });
            self.active = self.primary;
        }
        self.consecutive_failures = 0;
        self.state = HealthState::Healthy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> TransportError {
        TransportError::timeout("no response")
    }

    #[test]
    fn degrades_at_ten_consecutive_failures() {
        let mut health = TransportHealth::new(TransportId::Snmp);
        for i in 1..=9 {
            let decision = health.record_failure(&timeout(), false);
            assert_eq!(decision, FailureDecision::Count, "failure {i}");
            assert_eq!(health.state, HealthState::Healthy);
        }
        assert_eq!(
            health.record_failure(&timeout(), false),
            FailureDecision::LogWarn
        );
        assert_eq!(health.state, HealthState::Degraded);

        // 11..19 静默，20 再告警
        for _ in 11..=19 {
            assert_eq!(
                health.record_failure(&timeout(), false),
                FailureDecision::Count
            );
        }
        assert_eq!(
            health.record_failure(&timeout(), false),
            FailureDecision::LogWarn
        );
    }

    #[test]
    fn thirty_failures_with_secondary_attempts_swap() {
        let mut health = TransportHealth::new(TransportId::Snmp);
        let mut decision = FailureDecision::Count;
        for _ in 0..30 {
            decision = health.record_failure(&timeout(), true);
        }
        assert_eq!(decision, FailureDecision::AttemptSwap);

        health.record_swap(1_000, TransportId::Serial);
        assert_eq!(health.state, HealthState::Recovering);
        assert_eq!(health.active, TransportId::Serial);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.swaps.len(), 1);

        // 备用传输上的成功保持 Recovering
        health.record_success(2_000);
        assert_eq!(health.state, HealthState::Recovering);
    }

    #[test]
    fn thirty_failures_without_secondary_is_lost_and_stable() {
        let mut health = TransportHealth::new(TransportId::Snmp);
        let mut decision = FailureDecision::Count;
        for _ in 0..30 {
            decision = health.record_failure(&timeout(), false);
        }
        assert_eq!(decision, FailureDecision::EnterLost);
        assert_eq!(health.state, HealthState::Lost);
        assert_eq!(
            health.record_failure(&timeout(), false),
            FailureDecision::StayLost
        );
    }

    #[test]
    fn success_on_primary_returns_healthy() {
        let mut health = TransportHealth::new(TransportId::Snmp);
        for _ in 0..12 {
            health.record_failure(&timeout(), false);
        }
        assert_eq!(health.state, HealthState::Degraded);
        assert!(health.record_success(1_000));
        assert_eq!(health.state, HealthState::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.last_success_ms, Some(1_000));
    }

    #[test]
    fn recovery_scan_returns_to_primary() {
        let mut health = TransportHealth::new(TransportId::Snmp);
        for _ in 0..30 {
            health.record_failure(&timeout(), true);
        }
        health.record_swap(1_000, TransportId::Serial);
        health.recover_primary(2_000);
        assert_eq!(health.active, TransportId::Snmp);
        assert_eq!(health.state, HealthState::Healthy);
        assert_eq!(health.swaps.len(), 2);
    }
}
