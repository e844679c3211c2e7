//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::error::AlmacenError;
use crate::observability::ObservabilityConfig;

/// 消息代理配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// STOMP over WebSocket 端点，如 ws://almacen-zoques:8080/ws
    ///
    /// 未配置时通知通道保持断开状态，只记录日志。
    pub endpoint: Option<String>,
    pub critical_topic: String,
    pub preventive_topic: String,
    pub connect_timeout_ms: u64,
    /// STOMP 心跳间隔（毫秒），0 表示不协商心跳
    pub heartbeat_ms: u64,
    pub login: Option<String>,
    pub passcode: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            critical_topic: "critical-stock".to_string(),
            preventive_topic: "preventive-stock".to_string(),
            connect_timeout_ms: 10_000,
            heartbeat_ms: 10_000,
            login: None,
            passcode: None,
        }
    }
}

impl BrokerConfig {
    /// 获取已配置的端点，空字符串视为未配置
    pub fn endpoint(&self) -> Result<&str, AlmacenError> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AlmacenError::MissingConfig {
                key: "broker.endpoint".to_string(),
            })
    }
}

/// 断线重连配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// 去重窗口配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub ttl_seconds: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl_seconds: 10 }
    }
}

/// 会话令牌配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// 校验会话 JWT 签名的密钥；为空时只读取声明，不校验签名
    pub jwt_secret: Option<String>,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub broker: BrokerConfig,
    pub reconnect: ReconnectConfig,
    pub dedup: DedupConfig,
    pub auth: AuthConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（ALMACEN_ 前缀，双下划线分隔层级，如 ALMACEN_BROKER__ENDPOINT -> broker.endpoint）
    pub fn load(service_name: &str) -> Result<Self, AlmacenError> {
        let env = std::env::var("ALMACEN_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(Path::new(&config_dir), &env, service_name)
    }

    /// 从指定目录加载配置，环境名由调用方给出
    pub fn load_from(
        config_dir: &Path,
        env: &str,
        service_name: &str,
    ) -> Result<Self, AlmacenError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{env}.toml"))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{service_name}.toml"))).required(false),
            )
            .add_source(
                Environment::with_prefix("ALMACEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
