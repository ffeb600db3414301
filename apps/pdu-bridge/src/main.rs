//! PDU 桥接器主程序：配置加载、共享服务接线、HTTP facade 与停机。

mod handlers;
mod middleware;
mod routes;
mod utils;

use std::sync::Arc;

use pdu_auth::{SessionManager, DEFAULT_SESSION_TTL};
use pdu_config::{load_pdu_configs, AppConfig};
use pdu_mqtt::{topics, BridgeMqtt, MqttConfig};
use pdu_runtime::BridgeManager;
use pdu_storage::{HistoryStore, SampleWriter, SampleWriterConfig, SqliteHistoryStore};
use tracing::{error, info};

/// 应用状态，注入到所有 handler。
#[derive(Clone)]
pub struct AppState {
    pub manager: BridgeManager,
    pub auth: Arc<SessionManager>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 致命配置错误是唯一的非零退出路径
    let config = AppConfig::from_env()?;
    pdu_telemetry::init_tracing();

    // 历史存储 + 合并写入器
    let history: Arc<dyn HistoryStore> =
        Arc::new(SqliteHistoryStore::open(config.history_db()).await?);
    let writer = Arc::new(SampleWriter::new(
        history.clone(),
        SampleWriterConfig::default(),
    ));

    // 预读设备清单：遗嘱挂在首个设备的 bridge/status 主题上
    let devices = load_pdu_configs(&config)?;
    let first_device_id = devices
        .first()
        .map(|d| d.device_id.clone())
        .unwrap_or_else(|| "bridge".to_string());

    let mut mqtt_config = MqttConfig::new(
        config.mqtt_broker.clone(),
        config.mqtt_port,
        format!("pdu-bridge-{first_device_id}"),
    );
    mqtt_config.username = config.mqtt_username.clone();
    mqtt_config.password = config.mqtt_password.clone();
    mqtt_config.will_topic = Some(topics::bridge_status(&first_device_id));
    let (mqtt, _mqtt_driver) = BridgeMqtt::connect(mqtt_config);

    let manager =
        BridgeManager::start(config.clone(), mqtt, history, writer, None).await?;
    let auth = Arc::new(SessionManager::new(
        config.web_password.clone(),
        DEFAULT_SESSION_TTL,
    ));
    let state = AppState {
        manager: manager.clone(),
        auth,
    };

    let app = routes::create_api_router()
        .with_state(state)
        .layer(axum::middleware::from_fn(
            middleware::auth::request_context,
        ));

    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "http facade listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await;

    manager.shutdown().await;
    if let Err(err) = serve_result {
        error!(error = %err, "http server error");
        return Err(err.into());
    }
    info!("bridge stopped");
    Ok(())
}
