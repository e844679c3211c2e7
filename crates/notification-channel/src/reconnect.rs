//! 重连状态机
//!
//! `Disconnected → Connecting → Connected`；传输错误或意外关闭回到
//! `Disconnected` 并按指数退避安排重连。连续失败次数只在成功进入
//! `Connected` 时清零，达到上限后停止自动重连，直到再次调用 `connect()`。

use std::time::Duration;

use almacen_shared::retry::RetryPolicy;

/// 连接状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// 连续失败计数与退避计算
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: RetryPolicy,
    failures: u32,
}

impl ReconnectState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// 连接建立成功，清零失败计数
    pub fn on_connected(&mut self) {
        self.failures = 0;
    }

    /// 记录一次失败，返回下一次重连前的等待时间
    ///
    /// 返回 None 表示已达上限，不再自动重连。
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.policy.should_retry(self.failures) {
            Some(self.policy.delay_for_attempt(self.failures))
        } else {
            None
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn max_failures(&self) -> u32 {
        self.policy.max_retries
    }
}
