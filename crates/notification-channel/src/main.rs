//! 库存通知监听进程
//!
//! 连接仓库消息代理，把收到的库存告警写入日志，便于运维核对推送链路。

use std::sync::Arc;

use almacen_shared::{config::AppConfig, observability};
use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use notification_channel::{
    ChannelSettings, JwtTenantResolver, NotificationChannel, NotificationType, StompOptions,
    WsStompTransport, listener,
};

const SERVICE_NAME: &str = "notification-channel";

#[tokio::main]
async fn main() -> Result<()> {
    // .env 只用于本地开发，不存在时忽略
    dotenvy::dotenv().ok();

    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        warn!(code = e.code(), "Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        endpoint = ?config.broker.endpoint,
        "Starting notification-channel..."
    );

    let settings = ChannelSettings::from_config(&config)?;
    let transport = Arc::new(WsStompTransport::new(StompOptions::from_config(&config.broker)));

    if config.is_production() && config.auth.jwt_secret.is_none() {
        warn!("未配置 auth.jwt_secret，会话令牌的签名不会被校验");
    }
    let tenants = Arc::new(JwtTenantResolver::new(config.auth.jwt_secret.as_deref()));
    tenants.set_token(std::env::var("ALMACEN_SESSION_TOKEN").ok());

    let channel = NotificationChannel::new(settings, transport, tenants);
    for notification_type in NotificationType::ALL {
        channel.add_listener(
            notification_type,
            listener(|notification| {
                info!(
                    notification_type = %notification.notification_type,
                    message = %notification.message,
                    codigo = ?notification.field("codigo"),
                    "收到库存通知"
                );
                Ok(())
            }),
        );
    }

    channel.connect();
    shutdown_signal().await;
    channel.disconnect();

    info!("notification-channel stopped");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
