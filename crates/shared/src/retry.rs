//! 退避策略
//!
//! 提供指数退避计算，用于消息代理断线后的自动重连。
//! 是否继续重试由调用方根据连续失败次数决定，策略本身不持有状态。

use std::time::Duration;

use crate::config::ReconnectConfig;
use crate::error::AlmacenError;

// ---------------------------------------------------------------------------
// RetryPolicy — 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 第 N 次连续失败后等待 `initial_delay * multiplier^N`，不超过 `max_delay`。
/// 默认值下：第 1 次失败后 2 秒，第 4 次失败后 16 秒，第 5 次失败后停止。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大连续失败次数，达到后不再自动重试
    pub max_retries: u32,
    /// 退避基数
    pub initial_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 每次失败的退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 从重连配置构造策略，拒绝会导致退避时间递减的倍数
    pub fn from_config(config: &ReconnectConfig) -> Result<Self, AlmacenError> {
        if config.multiplier < 1.0 {
            return Err(AlmacenError::InvalidConfig {
                key: "reconnect.multiplier".to_string(),
                message: format!("必须大于等于 1.0，实际 {}", config.multiplier),
            });
        }

        Ok(Self {
            max_retries: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        })
    }

    /// 计算第 N 次连续失败后的等待时间
    ///
    /// 公式: initial_delay * multiplier^attempt，结果不超过 max_delay。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 是否应继续重试
    ///
    /// attempt 表示已经连续失败的次数，当 attempt < max_retries 时返回 true。
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
