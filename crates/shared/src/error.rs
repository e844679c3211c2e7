//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum AlmacenError {
    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("缺少配置项: {key}")]
    MissingConfig { key: String },

    #[error("无效的配置项: {key} - {message}")]
    InvalidConfig { key: String, message: String },
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, AlmacenError>;

impl AlmacenError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::MissingConfig { .. } => "MISSING_CONFIG",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
        }
    }
}
