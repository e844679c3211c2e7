//! 短时去重窗口
//!
//! 代理在重连或多实例推送时会重复投递同一条库存告警。窗口内记录每个
//! 去重键的首次出现时间，每次写入前清理超过 TTL 的记录。时间源可注入，
//! 测试中使用 `ManualClock` 精确推进。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 单调时间源
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// 系统单调时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的时钟
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// 去重窗口
pub struct DedupWindow {
    ttl: Duration,
    seen: HashMap<String, Instant>,
    clock: Arc<dyn Clock>,
}

impl DedupWindow {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
            clock,
        }
    }

    /// 记录一次出现
    ///
    /// 窗口内首次出现返回 true；重复出现返回 false 且不刷新首次时间。
    pub fn observe(&mut self, key: &str) -> bool {
        let now = self.clock.now();
        self.sweep(now);

        if self.seen.contains_key(key) {
            return false;
        }
        self.seen.insert(key.to_string(), now);
        true
    }

    /// 当前仍在窗口内的记录数
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn sweep(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> (DedupWindow, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            DedupWindow::new(Duration::from_secs(10), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_duplicate_within_window_is_rejected() {
        let (mut dedup, clock) = window();

        assert!(dedup.observe("critical|X1|1|Widget"));
        clock.advance(Duration::from_secs(9));
        assert!(!dedup.observe("critical|X1|1|Widget"));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (mut dedup, clock) = window();

        assert!(dedup.observe("k"));
        clock.advance(Duration::from_secs(10));
        assert!(dedup.observe("k"));
    }

    #[test]
    fn test_repeat_does_not_extend_window() {
        let (mut dedup, clock) = window();

        assert!(dedup.observe("k"));
        clock.advance(Duration::from_secs(6));
        assert!(!dedup.observe("k"));
        // 距首次出现已满 10 秒，即使中途重复过也应放行
        clock.advance(Duration::from_secs(4));
        assert!(dedup.observe("k"));
    }

    #[test]
    fn test_sweep_on_insert() {
        let (mut dedup, clock) = window();

        dedup.observe("a");
        dedup.observe("b");
        assert_eq!(dedup.len(), 2);

        clock.advance(Duration::from_secs(11));
        dedup.observe("c");
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let (mut dedup, _clock) = window();

        assert!(dedup.observe("critical|X1||"));
        assert!(dedup.observe("preventive|X1||"));
        assert!(!dedup.is_empty());
    }
}
