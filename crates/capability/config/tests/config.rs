use pdu_config::AppConfig;

// 环境变量是进程级的，相关断言集中在一个测试里避免并行踩踏。
#[test]
fn load_config_from_env() {
    std::env::set_var("MQTT_BROKER", "broker.local");
    std::env::set_var("MQTT_PORT", "2883");
    std::env::set_var("BRIDGE_POLL_INTERVAL_MS", "2000");
    std::env::set_var("BRIDGE_WEB_PORT", "9090");
    std::env::set_var("HISTORY_RETENTION_DAYS", "30");
    std::env::set_var("PDU_DEVICE_ID", "rack1-pdu");

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.mqtt_broker, "broker.local");
    assert_eq!(config.mqtt_port, 2883);
    assert_eq!(config.poll_interval_ms, 2000);
    assert_eq!(config.web_port, 9090);
    assert_eq!(config.history_retention_days, 30);
    assert_eq!(config.env_device_id, "rack1-pdu");
    assert!(config.web_password.is_none());

    // 未知 BRIDGE_* 键在启动时被拒绝。
    std::env::set_var("BRIDGE_BOGUS_KNOB", "1");
    let err = AppConfig::from_env().expect_err("unknown key");
    assert!(err.to_string().contains("BRIDGE_BOGUS_KNOB"));
    std::env::remove_var("BRIDGE_BOGUS_KNOB");

    // 非法数值被拒绝。
    std::env::set_var("MQTT_PORT", "not-a-port");
    assert!(AppConfig::from_env().is_err());
    std::env::remove_var("MQTT_PORT");
}
