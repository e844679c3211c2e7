//! 监听者注册表与分发
//!
//! 监听者以 `Arc` 形式注册，移除时按指针相等匹配第一个注册项。
//! 分发时先复制一份当前列表再逐个调用，监听者可以在回调中增删注册而不会死锁。
//! 单个监听者返回错误或 panic 只记录日志，不影响其余监听者。

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::types::{Notification, NotificationType};

/// 通知回调
pub type Listener = Arc<dyn Fn(Notification) -> anyhow::Result<()> + Send + Sync>;

/// 把闭包包装为 `Listener`
///
/// 保留返回的 `Arc` 才能在之后调用 `remove_listener`。
pub fn listener<F>(callback: F) -> Listener
where
    F: Fn(Notification) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// 监听者注册表
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<NotificationType, Vec<Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加注册，同一回调重复注册会被重复调用
    pub fn add(&mut self, notification_type: NotificationType, listener: Listener) {
        self.listeners
            .entry(notification_type)
            .or_default()
            .push(listener);
    }

    /// 移除第一个指针相等的注册项，返回是否找到
    pub fn remove(&mut self, notification_type: NotificationType, listener: &Listener) -> bool {
        let Some(registered) = self.listeners.get_mut(&notification_type) else {
            return false;
        };
        match registered.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                registered.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn count(&self, notification_type: NotificationType) -> usize {
        self.listeners
            .get(&notification_type)
            .map_or(0, Vec::len)
    }

    /// 按注册顺序复制某类型的监听者
    pub fn snapshot(&self, notification_type: NotificationType) -> Vec<Listener> {
        self.listeners
            .get(&notification_type)
            .cloned()
            .unwrap_or_default()
    }
}

/// 分发结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// 按顺序把通知交给每个监听者
pub fn dispatch(listeners: &[Listener], notification: &Notification) -> DispatchReport {
    let mut report = DispatchReport::default();

    for (index, callback) in listeners.iter().enumerate() {
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(notification.clone())));
        match outcome {
            Ok(Ok(())) => report.delivered += 1,
            Ok(Err(e)) => {
                report.failed += 1;
                error!(
                    notification_type = %notification.notification_type,
                    listener_index = index,
                    error = %e,
                    "通知监听者执行失败"
                );
            }
            Err(panic) => {
                report.failed += 1;
                error!(
                    notification_type = %notification.notification_type,
                    listener_index = index,
                    panic = panic_message(&*panic),
                    "通知监听者发生 panic"
                );
            }
        }
    }

    report
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::Map;

    fn make_notification() -> Notification {
        Notification {
            notification_type: NotificationType::Critical,
            message: "Producto agotado: Gasas (G-01)".to_string(),
            timestamp: Utc::now(),
            data: Map::new(),
        }
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Listener {
        let log = log.clone();
        listener(move |_| {
            log.lock().push(name);
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.add(NotificationType::Critical, recording(&log, "first"));
        registry.add(NotificationType::Critical, recording(&log, "second"));
        registry.add(NotificationType::Preventive, recording(&log, "other"));

        let report = dispatch(
            &registry.snapshot(NotificationType::Critical),
            &make_notification(),
        );

        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_duplicate_registration_invokes_twice() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb = recording(&log, "dup");
        let mut registry = ListenerRegistry::new();
        registry.add(NotificationType::Critical, cb.clone());
        registry.add(NotificationType::Critical, cb.clone());

        dispatch(
            &registry.snapshot(NotificationType::Critical),
            &make_notification(),
        );
        assert_eq!(log.lock().len(), 2);

        // 只移除第一个匹配项
        assert!(registry.remove(NotificationType::Critical, &cb));
        assert_eq!(registry.count(NotificationType::Critical), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registered = recording(&log, "a");
        let stranger = recording(&log, "a");
        let mut registry = ListenerRegistry::new();
        registry.add(NotificationType::Critical, registered);

        assert!(!registry.remove(NotificationType::Critical, &stranger));
        assert!(!registry.remove(NotificationType::Preventive, &stranger));
        assert_eq!(registry.count(NotificationType::Critical), 1);
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let listeners = vec![
            listener(|_| Err(anyhow::anyhow!("ui detached"))),
            listener(|_| panic!("listener bug")),
            recording(&log, "survivor"),
        ];

        let report = dispatch(&listeners, &make_notification());

        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert_eq!(*log.lock(), vec!["survivor"]);
    }

    #[test]
    fn test_empty_snapshot() {
        let registry = ListenerRegistry::new();
        assert!(registry.snapshot(NotificationType::Preventive).is_empty());
        assert_eq!(registry.count(NotificationType::Preventive), 0);
    }
}
