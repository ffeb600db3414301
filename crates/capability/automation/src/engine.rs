//! 规则引擎：每个快照评估一轮。
//!
//! 状态机（每条规则）：
//! 1. 条件为真且未触发：记录 `condition_since`；持续满 `delay` 秒
//!    即触发，发出动作意图并记账；oneshot 触发后自动停用
//! 2. 条件为假：清零 `condition_since`；若曾触发且 `restore` 为真，
//!    发出逆动作意图并复位
//!
//! 延时从 `condition_since` 连续计量，任何一个条件为假的样本都会
//! 重置计时。事件保留最近 100 条环形缓冲。

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Datelike, Local, Timelike};
use domain::model::{OutletAction, Snapshot};
use pdu_storage::JsonDocStore;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{AutomationError, Condition, Rule, RuleDoc, RuleState, ScheduleType};

const MAX_EVENTS: usize = 100;

/// 引擎发出的动作意图。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionIntent {
    pub outlet: u16,
    pub action: OutletAction,
}

/// 自动化事件记录。
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub device_id: String,
    pub rule: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub details: String,
    pub ts_ms: i64,
}

/// 一轮评估的产出。
#[derive(Debug, Default)]
pub struct EvalOutcome {
    pub intents: Vec<ActionIntent>,
    pub events: Vec<EventRecord>,
    /// 任何规则状态有变化（automation/status 按变化发布）。
    pub status_changed: bool,
}

/// 规则视图（列表端点与 automation/status 主题载荷）。
#[derive(Debug, Clone, Serialize)]
pub struct RuleView {
    #[serde(flatten)]
    pub doc: RuleDoc,
    pub state: RuleState,
}

/// 每设备规则引擎。由该设备的轮询器独占持有。
pub struct Engine {
    device_id: String,
    store: JsonDocStore,
    rules: BTreeMap<String, Rule>,
    states: BTreeMap<String, RuleState>,
    events: VecDeque<EventRecord>,
    max_outlet: u16,
}

impl Engine {
    /// 从规则文档加载。无效规则跳过并记错误日志。
    pub fn load(device_id: impl Into<String>, store: JsonDocStore, max_outlet: u16) -> Self {
        let device_id = device_id.into();
        let docs: Vec<RuleDoc> = match store.load() {
            Ok(docs) => docs,
            Err(err) => {
                error!(device_id = %device_id, error = %err, "failed to load rules, starting empty");
                Vec::new()
            }
        };

        let mut rules = BTreeMap::new();
        let mut states = BTreeMap::new();
        for doc in docs {
            match Rule::from_doc(&doc, max_outlet) {
                Ok(rule) => {
                    states.insert(rule.name.clone(), RuleState::default());
                    rules.insert(rule.name.clone(), rule);
                }
                Err(err) => {
                    error!(device_id = %device_id, rule = %doc.name, error = %err, "skipping invalid rule");
                }
            }
        }
        if !rules.is_empty() {
            info!(device_id = %device_id, count = rules.len(), "loaded automation rules");
        }

        Self {
            device_id,
            store,
            rules,
            states,
            events: VecDeque::new(),
            max_outlet,
        }
    }

    /// 设备身份确定后收紧插座上限（规则创建时校验用）。
    pub fn set_max_outlet(&mut self, max_outlet: u16) {
        if max_outlet > 0 {
            self.max_outlet = max_outlet;
        }
    }

    fn persist(&self) -> Result<(), AutomationError> {
        let docs: Vec<RuleDoc> = self.rules.values().map(Rule::to_doc).collect();
        self.store
            .save(&docs)
            .map_err(|err| AutomationError::Storage(err.to_string()))
    }

    fn push_event(&mut self, rule: &str, event_type: &str, details: String, ts_ms: i64) -> EventRecord {
        let event = EventRecord {
            device_id: self.device_id.clone(),
            rule: rule.to_string(),
            event_type: event_type.to_string(),
            details,
            ts_ms,
        };
        self.events.push_back(event.clone());
        while self.events.len() > MAX_EVENTS {
            self.events.pop_front();
        }
        event
    }

    fn check_condition(rule: &Rule, snapshot: &Snapshot, now: DateTime<Local>) -> bool {
        if !rule.enabled {
            return false;
        }
        if !rule.days_of_week.is_empty() {
            let today = now.weekday().num_days_from_monday() as u8;
            if !rule.days_of_week.contains(&today) {
                return false;
            }
        }

        let now_minutes = (now.hour() * 60 + now.minute()) as u16;
        match &rule.condition {
            Condition::VoltageBelow(threshold) => match snapshot.source_voltage(rule.input) {
                Some(voltage) => voltage < *threshold,
                None => false,
            },
            Condition::VoltageAbove(threshold) => match snapshot.source_voltage(rule.input) {
                Some(voltage) => voltage > *threshold,
                None => false,
            },
            Condition::AtsSourceIs(source) => snapshot.ats_current_source == Some(*source),
            Condition::AtsPreferredLost => match (
                snapshot.ats_current_source,
                snapshot.ats_preferred_source,
            ) {
                (Some(current), Some(preferred)) => current != preferred,
                _ => false,
            },
            Condition::TimeAfter(threshold) => now_minutes >= *threshold,
            Condition::TimeBefore(threshold) => now_minutes < *threshold,
            Condition::TimeBetween(start, end) => {
                if start <= end {
                    now_minutes >= *start && now_minutes < *end
                } else {
                    // 跨午夜（如 22:00-06:00）
                    now_minutes >= *start || now_minutes < *end
                }
            }
        }
    }

    /// 对一个快照评估全部规则。
    pub fn evaluate(&mut self, snapshot: &Snapshot, now: DateTime<Local>) -> EvalOutcome {
        let now_ms = now.timestamp_millis();
        let mut outcome = EvalOutcome::default();
        let mut disable_after_fire: Vec<String> = Vec::new();
        let states_before = self.states.clone();
        let mut events: Vec<(String, String, String)> = Vec::new();

        for (name, rule) in &mut self.rules {
            let state = self.states.entry(name.clone()).or_default();
            let condition_met = Self::check_condition(rule, snapshot, now);
            let outlet_list = rule
                .outlets
                .iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(",");

            if condition_met && !state.triggered {
                if state.condition_since_ms.is_none() {
                    state.condition_since_ms = Some(now_ms);
                }
                let elapsed_ms = now_ms - state.condition_since_ms.unwrap_or(now_ms);
                if elapsed_ms >= (rule.delay_secs as i64) * 1000 {
                    warn!(
                        device_id = %self.device_id,
                        rule = %name,
                        outlets = %outlet_list,
                        action = rule.action.as_str(),
                        "rule TRIGGERED"
                    );
                    for outlet in &rule.outlets {
                        outcome.intents.push(ActionIntent {
                            outlet: *outlet,
                            action: rule.action,
                        });
                    }
                    events.push((
                        name.clone(),
                        "triggered".to_string(),
                        format!(
                            "Input {} {} {} -> outlet(s) {} {}",
                            rule.input,
                            rule.condition.name(),
                            rule.condition.threshold_value(),
                            outlet_list,
                            rule.action.as_str()
                        ),
                    ));
                    state.triggered = true;
                    state.fired_at_ms = Some(now_ms);
                    state.fire_count += 1;
                    pdu_telemetry::record_rule_fired();
                    if rule.schedule_type == ScheduleType::Oneshot {
                        rule.enabled = false;
                        disable_after_fire.push(name.clone());
                    }
                }
            } else if !condition_met && state.triggered && rule.restore {
                let restore_action = rule.action.inverse().unwrap_or(OutletAction::On);
                info!(
                    device_id = %self.device_id,
                    rule = %name,
                    outlets = %outlet_list,
                    action = restore_action.as_str(),
                    "rule RESTORED"
                );
                for outlet in &rule.outlets {
                    outcome.intents.push(ActionIntent {
                        outlet: *outlet,
                        action: restore_action,
                    });
                }
                events.push((
                    name.clone(),
                    "restored".to_string(),
                    format!(
                        "Input {} recovered -> outlet(s) {} {}",
                        rule.input,
                        outlet_list,
                        restore_action.as_str()
                    ),
                ));
                state.triggered = false;
                state.condition_since_ms = None;
                state.fired_at_ms = None;
                pdu_telemetry::record_rule_restored();
            } else if !condition_met {
                state.condition_since_ms = None;
            }
        }

        for (rule, event_type, details) in events {
            let record = self.push_event(&rule, &event_type, details, now_ms);
            outcome.events.push(record);
        }

        if !disable_after_fire.is_empty() {
            if let Err(err) = self.persist() {
                error!(device_id = %self.device_id, error = %err, "failed to persist oneshot disable");
            }
            for name in &disable_after_fire {
                info!(device_id = %self.device_id, rule = %name, "oneshot completed, disabled");
            }
        }

        // 同一轮里去重：每个插座只保留最后一个意图
        let mut deduped: Vec<ActionIntent> = Vec::new();
        for intent in outcome.intents.drain(..) {
            deduped.retain(|existing| existing.outlet != intent.outlet);
            deduped.push(intent);
        }
        outcome.intents = deduped;

        outcome.status_changed = states_before != self.states || !disable_after_fire.is_empty();
        outcome
    }

    // --- CRUD ---

    pub fn list_rules(&self) -> Vec<RuleView> {
        self.rules
            .values()
            .map(|rule| RuleView {
                doc: rule.to_doc(),
                state: self.states.get(&rule.name).cloned().unwrap_or_default(),
            })
            .collect()
    }

    pub fn create_rule(&mut self, doc: RuleDoc, now_ms: i64) -> Result<RuleView, AutomationError> {
        let rule = Rule::from_doc(&doc, self.max_outlet)?;
        if self.rules.contains_key(&rule.name) {
            return Err(AutomationError::Conflict(rule.name));
        }
        let name = rule.name.clone();
        self.states.insert(name.clone(), RuleState::default());
        self.rules.insert(name.clone(), rule);
        self.persist()?;
        self.push_event(&name, "created", format!("Rule {name:?} created"), now_ms);
        info!(device_id = %self.device_id, rule = %name, "rule created");
        Ok(self.view(&name))
    }

    pub fn update_rule(
        &mut self,
        name: &str,
        mut doc: RuleDoc,
        now_ms: i64,
    ) -> Result<RuleView, AutomationError> {
        if !self.rules.contains_key(name) {
            return Err(AutomationError::NotFound(name.to_string()));
        }
        doc.name = name.to_string();
        let rule = Rule::from_doc(&doc, self.max_outlet)?;
        self.rules.insert(name.to_string(), rule);
        self.states.insert(name.to_string(), RuleState::default());
        self.persist()?;
        self.push_event(name, "updated", format!("Rule {name:?} updated"), now_ms);
        info!(device_id = %self.device_id, rule = %name, "rule updated");
        Ok(self.view(name))
    }

    pub fn delete_rule(&mut self, name: &str, now_ms: i64) -> Result<(), AutomationError> {
        if self.rules.remove(name).is_none() {
            return Err(AutomationError::NotFound(name.to_string()));
        }
        self.states.remove(name);
        self.persist()?;
        self.push_event(name, "deleted", format!("Rule {name:?} deleted"), now_ms);
        info!(device_id = %self.device_id, rule = %name, "rule deleted");
        Ok(())
    }

    pub fn toggle_rule(&mut self, name: &str, now_ms: i64) -> Result<RuleView, AutomationError> {
        let enabled = {
            let rule = self
                .rules
                .get_mut(name)
                .ok_or_else(|| AutomationError::NotFound(name.to_string()))?;
            rule.enabled = !rule.enabled;
            rule.enabled
        };
        self.persist()?;
        let word = if enabled { "enabled" } else { "disabled" };
        self.push_event(name, "toggled", format!("Rule {name:?} {word}"), now_ms);
        info!(device_id = %self.device_id, rule = %name, enabled, "rule toggled");
        Ok(self.view(name))
    }

    /// 最近事件，新的在前。
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.iter().rev().cloned().collect()
    }

    /// 外部事件（安全告警等）进入同一个环形缓冲。
    pub fn record_external_event(
        &mut self,
        event_type: &str,
        details: String,
        ts_ms: i64,
    ) -> EventRecord {
        self.push_event("", event_type, details, ts_ms)
    }

    fn view(&self, name: &str) -> RuleView {
        RuleView {
            doc: self.rules[name].to_doc(),
            state: self.states.get(name).cloned().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use domain::model::{SourceData, SourceVoltageStatus};
    use serde_json::json;

    fn engine_with(doc: RuleDoc) -> Engine {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDocStore::new(dir.path().join("rules_pdu44001.json"));
        store.save(&vec![doc]).expect("seed rules");
        // tempdir 在返回前被丢弃也没关系：引擎启动时已读入内存，
        // 持久化失败只记日志
        Engine::load("pdu44001", store, 10)
    }

    fn snapshot_with_source_a(voltage: f64) -> Snapshot {
        let mut snapshot = Snapshot::empty(1);
        snapshot.source_a = Some(SourceData {
            voltage: Some(voltage),
            frequency: Some(60.0),
            voltage_status: SourceVoltageStatus::Normal,
        });
        snapshot
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        // 2026-07-29 是周三
        Local
            .with_ymd_and_hms(2026, 7, 29, h, m, s)
            .single()
            .expect("time")
    }

    fn voltage_rule(delay: u64, restore: bool) -> RuleDoc {
        RuleDoc {
            name: "low".to_string(),
            input: 1,
            condition: "voltage_below".to_string(),
            threshold: json!(100.0),
            outlet: json!(5),
            action: "off".to_string(),
            restore,
            delay,
            days_of_week: vec![],
            schedule_type: ScheduleType::Continuous,
            enabled: true,
        }
    }

    #[test]
    fn delay_gates_firing_and_any_false_sample_resets() {
        let mut engine = engine_with(voltage_rule(5, true));

        // t=0: 条件成立，开始计时，不触发
        let outcome = engine.evaluate(&snapshot_with_source_a(95.0), at(12, 0, 0));
        assert!(outcome.intents.is_empty());

        // t=3: 条件中断，计时清零
        let outcome = engine.evaluate(&snapshot_with_source_a(120.0), at(12, 0, 3));
        assert!(outcome.intents.is_empty());

        // t=4..8: 重新计时，4 秒不够
        engine.evaluate(&snapshot_with_source_a(95.0), at(12, 0, 4));
        let outcome = engine.evaluate(&snapshot_with_source_a(95.0), at(12, 0, 8));
        assert!(outcome.intents.is_empty());

        // t=9: 持续 5 秒，触发
        let outcome = engine.evaluate(&snapshot_with_source_a(95.0), at(12, 0, 9));
        assert_eq!(
            outcome.intents,
            vec![ActionIntent {
                outlet: 5,
                action: OutletAction::Off
            }]
        );
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].event_type, "triggered");

        // 触发后条件恢复：restore
        let outcome = engine.evaluate(&snapshot_with_source_a(120.0), at(12, 0, 20));
        assert_eq!(
            outcome.intents,
            vec![ActionIntent {
                outlet: 5,
                action: OutletAction::On
            }]
        );
        assert_eq!(outcome.events[0].event_type, "restored");

        // continuous 规则恢复后重新武装
        engine.evaluate(&snapshot_with_source_a(95.0), at(12, 1, 0));
        let outcome = engine.evaluate(&snapshot_with_source_a(95.0), at(12, 1, 5));
        assert_eq!(outcome.intents.len(), 1);
    }

    #[test]
    fn zero_delay_fires_on_first_sample() {
        let mut engine = engine_with(voltage_rule(0, false));
        let outcome = engine.evaluate(&snapshot_with_source_a(95.0), at(12, 0, 0));
        assert_eq!(outcome.intents.len(), 1);
    }

    #[test]
    fn oneshot_disables_after_single_fire() {
        let mut doc = voltage_rule(0, false);
        doc.schedule_type = ScheduleType::Oneshot;
        let mut engine = engine_with(doc);

        let outcome = engine.evaluate(&snapshot_with_source_a(95.0), at(12, 0, 0));
        assert_eq!(outcome.intents.len(), 1);

        let views = engine.list_rules();
        assert!(!views[0].doc.enabled);

        // 再评估不再触发
        let outcome = engine.evaluate(&snapshot_with_source_a(95.0), at(12, 0, 10));
        assert!(outcome.intents.is_empty());
    }

    #[test]
    fn time_between_wraps_midnight() {
        let mut doc = voltage_rule(0, false);
        doc.condition = "time_between".to_string();
        doc.threshold = json!("22:00-06:00");
        let mut engine = engine_with(doc);
        let snapshot = Snapshot::empty(1);

        assert_eq!(engine.evaluate(&snapshot, at(23, 59, 0)).intents.len(), 1);
        // 触发后恢复为假（12:00 不在窗口内），无 restore
        engine.evaluate(&snapshot, at(12, 0, 0));

        let mut doc = voltage_rule(0, false);
        doc.name = "early".to_string();
        doc.condition = "time_between".to_string();
        doc.threshold = json!("22:00-06:00");
        let mut engine = engine_with(doc);
        assert_eq!(engine.evaluate(&snapshot, at(5, 59, 0)).intents.len(), 1);

        let mut doc = voltage_rule(0, false);
        doc.name = "noon".to_string();
        doc.condition = "time_between".to_string();
        doc.threshold = json!("22:00-06:00");
        let mut engine = engine_with(doc);
        assert!(engine.evaluate(&snapshot, at(12, 0, 0)).intents.is_empty());
    }

    #[test]
    fn day_of_week_window_filters() {
        let mut doc = voltage_rule(0, false);
        doc.days_of_week = vec![5, 6]; // 周六、周日
        let mut engine = engine_with(doc);
        // 2026-07-29 是周三
        let outcome = engine.evaluate(&snapshot_with_source_a(95.0), at(12, 0, 0));
        assert!(outcome.intents.is_empty());
    }

    #[test]
    fn intents_are_deduped_per_outlet() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDocStore::new(dir.path().join("rules.json"));
        let mut first = voltage_rule(0, false);
        first.outlet = json!("1-3");
        let mut second = voltage_rule(0, false);
        second.name = "also-low".to_string();
        second.outlet = json!([2, 3, 4]);
        store.save(&vec![first, second]).expect("seed");
        let mut engine = Engine::load("pdu44001", store, 10);

        let outcome = engine.evaluate(&snapshot_with_source_a(95.0), at(12, 0, 0));
        let mut outlets: Vec<u16> = outcome.intents.iter().map(|i| i.outlet).collect();
        outlets.sort_unstable();
        assert_eq!(outlets, vec![1, 2, 3, 4]);
    }

    #[test]
    fn events_ring_is_bounded() {
        let mut engine = engine_with(voltage_rule(0, true));
        for i in 0..120 {
            engine.evaluate(&snapshot_with_source_a(95.0), at(10, (i % 60) as u32, 0));
            engine.evaluate(&snapshot_with_source_a(120.0), at(10, (i % 60) as u32, 30));
        }
        assert_eq!(engine.events().len(), 100);
        // 新事件在前
        assert!(engine.events()[0].ts_ms >= engine.events()[99].ts_ms);
    }

    #[test]
    fn crud_persists_and_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDocStore::new(dir.path().join("rules.json"));
        let mut engine = Engine::load("pdu44001", store.clone(), 10);

        engine.create_rule(voltage_rule(5, true), 1).expect("create");
        assert!(matches!(
            engine.create_rule(voltage_rule(5, true), 2),
            Err(AutomationError::Conflict(_))
        ));

        let toggled = engine.toggle_rule("low", 3).expect("toggle");
        assert!(!toggled.doc.enabled);

        // 重新加载仍然只有一条且为停用状态
        let reloaded = Engine::load("pdu44001", store, 10);
        let views = reloaded.list_rules();
        assert_eq!(views.len(), 1);
        assert!(!views[0].doc.enabled);

        assert!(matches!(
            engine.delete_rule("missing", 4),
            Err(AutomationError::NotFound(_))
        ));
        engine.delete_rule("low", 5).expect("delete");
        assert!(engine.list_rules().is_empty());
    }
}
