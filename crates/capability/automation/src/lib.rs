//! # 自动化能力模块
//!
//! 输入失效驱动的插座控制规则：命名谓词 + 动作 + 延时/恢复/
//! 单次语义。规则以 JSON 文档持久化（每设备一份），条件在规则
//! 创建时解析为封闭枚举，运行期没有字符串查表。
//!
//! 引擎本身不执行命令：`evaluate` 返回动作意图（outlet → action），
//! 由轮询器经设备命令 FIFO 串行执行。

pub mod engine;

use domain::model::{AtsSource, OutletAction};
use domain::outlet_spec::parse_outlet_spec;
use serde::{Deserialize, Serialize};

pub use engine::{ActionIntent, Engine, EvalOutcome, EventRecord, RuleView};

/// 自动化错误。
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    #[error("rule not found: {0}")]
    NotFound(String),
    #[error("rule already exists: {0}")]
    Conflict(String),
    #[error("rule storage error: {0}")]
    Storage(String),
}

/// 调度类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Continuous,
    Oneshot,
}

fn default_true() -> bool {
    true
}

fn default_delay() -> u64 {
    5
}

fn default_schedule() -> ScheduleType {
    ScheduleType::Continuous
}

/// 规则的线上/盘上文档形态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDoc {
    pub name: String,
    /// 1=输入 A，2=输入 B，0=与输入无关（时间条件）。
    #[serde(default)]
    pub input: u8,
    pub condition: String,
    #[serde(default)]
    pub threshold: serde_json::Value,
    /// 标量 `5`、列表 `[1,3,5]` 或范围表达式 `"2-6"`。
    pub outlet: serde_json::Value,
    pub action: String,
    #[serde(default = "default_true")]
    pub restore: bool,
    /// 条件须持续成立的秒数。0 表示首个样本即触发。
    #[serde(default = "default_delay")]
    pub delay: u64,
    /// 0=周一…6=周日；空 = 每天。
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    #[serde(default = "default_schedule")]
    pub schedule_type: ScheduleType,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// 条件的封闭枚举。新条件是代码改动，不是运行期字符串。
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    VoltageBelow(f64),
    VoltageAbove(f64),
    AtsSourceIs(AtsSource),
    AtsPreferredLost,
    /// 分钟数（自当天 00:00）。
    TimeAfter(u16),
    TimeBefore(u16),
    /// `[start, end)`，支持跨午夜。
    TimeBetween(u16, u16),
}

fn parse_minutes(s: &str) -> Result<u16, AutomationError> {
    let s = s.trim();
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| AutomationError::InvalidRule(format!("invalid time {s:?}, expected HH:MM")))?;
    let hours: u16 = h
        .trim()
        .parse()
        .map_err(|_| AutomationError::InvalidRule(format!("invalid time {s:?}")))?;
    let minutes: u16 = m
        .trim()
        .parse()
        .map_err(|_| AutomationError::InvalidRule(format!("invalid time {s:?}")))?;
    if hours > 23 || minutes > 59 {
        return Err(AutomationError::InvalidRule(format!(
            "invalid time {s:?} (hour 0-23, minute 0-59)"
        )));
    }
    Ok(hours * 60 + minutes)
}

impl Condition {
    fn parse(condition: &str, threshold: &serde_json::Value) -> Result<Self, AutomationError> {
        let threshold_number = || {
            threshold.as_f64().ok_or_else(|| {
                AutomationError::InvalidRule(format!(
                    "condition {condition:?} needs a numeric threshold"
                ))
            })
        };
        let threshold_text = || {
            threshold.as_str().map(str::to_string).ok_or_else(|| {
                AutomationError::InvalidRule(format!(
                    "condition {condition:?} needs a time string threshold"
                ))
            })
        };

        match condition {
            "voltage_below" => Ok(Condition::VoltageBelow(threshold_number()?)),
            "voltage_above" => Ok(Condition::VoltageAbove(threshold_number()?)),
            "ats_source_is" => {
                let raw = threshold.as_i64().ok_or_else(|| {
                    AutomationError::InvalidRule(
                        "ats_source_is needs threshold 1 (A) or 2 (B)".to_string(),
                    )
                })?;
                let source = AtsSource::from_raw(raw).ok_or_else(|| {
                    AutomationError::InvalidRule(format!(
                        "ats_source_is threshold {raw} out of range"
                    ))
                })?;
                Ok(Condition::AtsSourceIs(source))
            }
            "ats_preferred_lost" => Ok(Condition::AtsPreferredLost),
            "time_after" => Ok(Condition::TimeAfter(parse_minutes(&threshold_text()?)?)),
            "time_before" => Ok(Condition::TimeBefore(parse_minutes(&threshold_text()?)?)),
            "time_between" => {
                let text = threshold_text()?;
                let (start, end) = text.split_once('-').ok_or_else(|| {
                    AutomationError::InvalidRule(format!(
                        "time_between threshold must be HH:MM-HH:MM, got {text:?}"
                    ))
                })?;
                Ok(Condition::TimeBetween(
                    parse_minutes(start)?,
                    parse_minutes(end)?,
                ))
            }
            other => Err(AutomationError::InvalidRule(format!(
                "unknown condition: {other:?}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Condition::VoltageBelow(_) => "voltage_below",
            Condition::VoltageAbove(_) => "voltage_above",
            Condition::AtsSourceIs(_) => "ats_source_is",
            Condition::AtsPreferredLost => "ats_preferred_lost",
            Condition::TimeAfter(_) => "time_after",
            Condition::TimeBefore(_) => "time_before",
            Condition::TimeBetween(_, _) => "time_between",
        }
    }

    fn threshold_value(&self) -> serde_json::Value {
        fn format_minutes(minutes: u16) -> String {
            format!("{:02}:{:02}", minutes / 60, minutes % 60)
        }
        match self {
            Condition::VoltageBelow(v) | Condition::VoltageAbove(v) => serde_json::json!(v),
            Condition::AtsSourceIs(source) => serde_json::json!(source.raw()),
            Condition::AtsPreferredLost => serde_json::Value::Null,
            Condition::TimeAfter(t) | Condition::TimeBefore(t) => {
                serde_json::json!(format_minutes(*t))
            }
            Condition::TimeBetween(start, end) => {
                serde_json::json!(format!(
                    "{}-{}",
                    format_minutes(*start),
                    format_minutes(*end)
                ))
            }
        }
    }
}

/// 解析校验后的规则。
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub input: u8,
    pub condition: Condition,
    pub outlets: Vec<u16>,
    pub action: OutletAction,
    pub restore: bool,
    pub delay_secs: u64,
    pub days_of_week: Vec<u8>,
    pub schedule_type: ScheduleType,
    pub enabled: bool,
}

impl Rule {
    /// 校验并解析文档。`max_outlet` 为设备插座数。
    pub fn from_doc(doc: &RuleDoc, max_outlet: u16) -> Result<Self, AutomationError> {
        if doc.name.trim().is_empty() {
            return Err(AutomationError::InvalidRule("name is empty".to_string()));
        }
        let action = match OutletAction::parse(&doc.action) {
            Some(action @ (OutletAction::On | OutletAction::Off)) => action,
            _ => {
                return Err(AutomationError::InvalidRule(format!(
                    "invalid action {:?} (must be 'on' or 'off')",
                    doc.action
                )))
            }
        };
        let condition = Condition::parse(&doc.condition, &doc.threshold)?;

        let outlets = match &doc.outlet {
            serde_json::Value::Number(n) => {
                let n = n.as_u64().unwrap_or(0);
                parse_outlet_spec(&n.to_string(), max_outlet)
            }
            serde_json::Value::Array(items) => {
                let spec = items
                    .iter()
                    .map(|v| v.as_u64().unwrap_or(0).to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                parse_outlet_spec(&spec, max_outlet)
            }
            serde_json::Value::String(s) => parse_outlet_spec(s, max_outlet),
            other => {
                return Err(AutomationError::InvalidRule(format!(
                    "invalid outlet spec: {other}"
                )))
            }
        }
        .map_err(|err| AutomationError::InvalidRule(err.to_string()))?;

        if doc.days_of_week.iter().any(|d| *d > 6) {
            return Err(AutomationError::InvalidRule(
                "days_of_week values must be 0-6 (Mon-Sun)".to_string(),
            ));
        }

        Ok(Rule {
            name: doc.name.clone(),
            input: doc.input,
            condition,
            outlets,
            action,
            restore: doc.restore,
            delay_secs: doc.delay,
            days_of_week: doc.days_of_week.clone(),
            schedule_type: doc.schedule_type,
            enabled: doc.enabled,
        })
    }

    /// 回写为持久化文档。
    pub fn to_doc(&self) -> RuleDoc {
        RuleDoc {
            name: self.name.clone(),
            input: self.input,
            condition: self.condition.name().to_string(),
            threshold: self.condition.threshold_value(),
            outlet: serde_json::json!(self.outlets),
            action: self.action.as_str().to_string(),
            restore: self.restore,
            delay: self.delay_secs,
            days_of_week: self.days_of_week.clone(),
            schedule_type: self.schedule_type,
            enabled: self.enabled,
        }
    }
}

/// 规则运行态。与规则同生命周期，不持久化。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleState {
    pub triggered: bool,
    /// 条件由假转真的时刻（毫秒）。
    pub condition_since_ms: Option<i64>,
    pub fired_at_ms: Option<i64>,
    pub fire_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(condition: &str, threshold: serde_json::Value, outlet: serde_json::Value) -> RuleDoc {
        RuleDoc {
            name: "test".to_string(),
            input: 1,
            condition: condition.to_string(),
            threshold,
            outlet,
            action: "off".to_string(),
            restore: true,
            delay: 5,
            days_of_week: vec![],
            schedule_type: ScheduleType::Continuous,
            enabled: true,
        }
    }

    #[test]
    fn voltage_rule_parses() {
        let rule = Rule::from_doc(&doc("voltage_below", json!(100.0), json!(5)), 10).expect("rule");
        assert_eq!(rule.condition, Condition::VoltageBelow(100.0));
        assert_eq!(rule.outlets, vec![5]);
        assert_eq!(rule.action, OutletAction::Off);
    }

    #[test]
    fn outlet_spec_forms_are_equivalent() {
        let range = Rule::from_doc(&doc("voltage_below", json!(100.0), json!("1-4")), 10)
            .expect("range");
        assert_eq!(range.outlets, vec![1, 2, 3, 4]);

        let list = Rule::from_doc(&doc("voltage_below", json!(100.0), json!([1, 3, 5])), 10)
            .expect("list");
        assert_eq!(list.outlets, vec![1, 3, 5]);

        let scalar =
            Rule::from_doc(&doc("voltage_below", json!(100.0), json!("0")), 10).unwrap_err();
        assert!(matches!(scalar, AutomationError::InvalidRule(_)));
        let over =
            Rule::from_doc(&doc("voltage_below", json!(100.0), json!(11)), 10).unwrap_err();
        assert!(matches!(over, AutomationError::InvalidRule(_)));
    }

    #[test]
    fn time_thresholds_are_validated() {
        assert!(Rule::from_doc(&doc("time_after", json!("22:00"), json!(1)), 10).is_ok());
        assert!(Rule::from_doc(&doc("time_between", json!("22:00-06:00"), json!(1)), 10).is_ok());
        assert!(Rule::from_doc(&doc("time_after", json!("25:00"), json!(1)), 10).is_err());
        assert!(Rule::from_doc(&doc("time_between", json!("22:00"), json!(1)), 10).is_err());
        assert!(Rule::from_doc(&doc("time_after", json!(5), json!(1)), 10).is_err());
    }

    #[test]
    fn unknown_condition_and_action_are_rejected() {
        assert!(Rule::from_doc(&doc("humidity_above", json!(50), json!(1)), 10).is_err());
        let mut bad_action = doc("voltage_below", json!(100.0), json!(1));
        bad_action.action = "reboot".to_string();
        assert!(Rule::from_doc(&bad_action, 10).is_err());
    }

    #[test]
    fn doc_roundtrip_preserves_semantics() {
        let original = doc("time_between", json!("22:00-06:00"), json!("2-4"));
        let rule = Rule::from_doc(&original, 10).expect("rule");
        let rewritten = rule.to_doc();
        assert_eq!(rewritten.condition, "time_between");
        assert_eq!(rewritten.threshold, json!("22:00-06:00"));
        assert_eq!(rewritten.outlet, json!([2, 3, 4]));
        let reparsed = Rule::from_doc(&rewritten, 10).expect("reparse");
        assert_eq!(reparsed, rule);
    }
}
