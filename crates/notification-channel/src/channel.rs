//! 实时库存通知通道
//!
//! 通道持有一个后台连接任务：连接代理、订阅两个库存主题，把每一帧依次经过
//! 解码、租户过滤、短时去重、消息生成后分发给按类型注册的监听者。连接失败或
//! 意外断开时按指数退避重连，连续失败达到上限后停止，直到再次调用 `connect()`。
//!
//! 通道由组合根显式创建并注入传输层与租户解析器，不提供全局实例。

use std::sync::Arc;
use std::time::Duration;

use almacen_shared::config::AppConfig;
use almacen_shared::retry::RetryPolicy;
use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dedup::{Clock, DedupWindow, SystemClock};
use crate::error::ChannelError;
use crate::frame::InboundFrame;
use crate::listeners::{Listener, ListenerRegistry, dispatch};
use crate::reconnect::{ConnectionState, ReconnectState};
use crate::templates::MessageTemplates;
use crate::tenant::TenantResolver;
use crate::transport::{BrokerSession, BrokerTransport};
use crate::types::{Notification, NotificationType, topics};

// ---------------------------------------------------------------------------
// ChannelSettings
// ---------------------------------------------------------------------------

/// 通道运行参数
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// 代理端点，未配置时 `connect()` 只记录错误
    pub endpoint: Option<String>,
    pub critical_topic: String,
    pub preventive_topic: String,
    pub retry: RetryPolicy,
    pub dedup_ttl: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            critical_topic: topics::CRITICAL_STOCK.to_string(),
            preventive_topic: topics::PREVENTIVE_STOCK.to_string(),
            retry: RetryPolicy::default(),
            dedup_ttl: Duration::from_secs(10),
        }
    }
}

impl ChannelSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ChannelError> {
        Ok(Self {
            endpoint: config.broker.endpoint().ok().map(str::to_string),
            critical_topic: config.broker.critical_topic.clone(),
            preventive_topic: config.broker.preventive_topic.clone(),
            retry: RetryPolicy::from_config(&config.reconnect)?,
            dedup_ttl: Duration::from_secs(config.dedup.ttl_seconds),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn topic(&self, notification_type: NotificationType) -> &str {
        match notification_type {
            NotificationType::Critical => &self.critical_topic,
            NotificationType::Preventive => &self.preventive_topic,
        }
    }

    /// 主题对应的 STOMP 目的地
    pub fn destination(&self, notification_type: NotificationType) -> String {
        format!("{}{}", topics::DESTINATION_PREFIX, self.topic(notification_type))
    }

    /// 根据消息目的地反查通知类型，兼容带或不带 `/topic/` 前缀
    fn type_for_destination(&self, destination: &str) -> Option<NotificationType> {
        let topic = destination
            .strip_prefix(topics::DESTINATION_PREFIX)
            .unwrap_or(destination);
        NotificationType::ALL
            .into_iter()
            .find(|t| self.topic(*t) == topic)
    }

    fn configured_endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

// ---------------------------------------------------------------------------
// NotificationChannel
// ---------------------------------------------------------------------------

/// 库存通知通道
pub struct NotificationChannel {
    inner: Arc<Inner>,
    /// 当前连接任务的关闭信号
    task: Mutex<Option<watch::Sender<bool>>>,
}

struct Inner {
    settings: ChannelSettings,
    transport: Arc<dyn BrokerTransport>,
    tenants: Arc<dyn TenantResolver>,
    listeners: Mutex<ListenerRegistry>,
    dedup: Mutex<DedupWindow>,
    status: Mutex<Status>,
}

/// 每次 `connect()`/`disconnect()` 递增 generation，旧任务的状态写入被忽略
struct Status {
    generation: u64,
    state: ConnectionState,
}

/// 一次会话的结束原因
enum SessionEnd {
    Shutdown,
    Lost(ChannelError),
}

impl NotificationChannel {
    pub fn new(
        settings: ChannelSettings,
        transport: Arc<dyn BrokerTransport>,
        tenants: Arc<dyn TenantResolver>,
    ) -> Self {
        Self::with_clock(settings, transport, tenants, Arc::new(SystemClock))
    }

    /// 使用指定时间源构造，去重窗口按该时间源过期
    pub fn with_clock(
        settings: ChannelSettings,
        transport: Arc<dyn BrokerTransport>,
        tenants: Arc<dyn TenantResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dedup = DedupWindow::new(settings.dedup_ttl, clock);
        Self {
            inner: Arc::new(Inner {
                settings,
                transport,
                tenants,
                listeners: Mutex::new(ListenerRegistry::new()),
                dedup: Mutex::new(dedup),
                status: Mutex::new(Status {
                    generation: 0,
                    state: ConnectionState::Disconnected,
                }),
            }),
            task: Mutex::new(None),
        }
    }

    /// 开始连接代理
    ///
    /// 立即返回，连接在当前 tokio 运行时的后台任务中进行。已有会话会先被关闭，
    /// 连续失败计数重新开始。未配置端点或不在运行时内调用时只记录错误。
    pub fn connect(&self) {
        self.stop_task();

        let Some(endpoint) = self.inner.settings.configured_endpoint().map(str::to_string) else {
            error!("未配置消息代理端点，通知通道保持断开");
            self.inner.reset_state();
            return;
        };

        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "当前线程没有 tokio 运行时，无法启动通知通道");
                self.inner.reset_state();
                return;
            }
        };

        let generation = {
            let mut status = self.inner.status.lock();
            status.generation += 1;
            status.state = ConnectionState::Connecting;
            status.generation
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            inner.run(generation, endpoint, shutdown_rx).await;
        });
        *self.task.lock() = Some(shutdown_tx);
    }

    /// 断开连接并取消尚未执行的重连，可重复调用
    pub fn disconnect(&self) {
        let stopped = self.stop_task();
        self.inner.reset_state();
        if stopped {
            gauge!("broker_connected").set(0.0);
            info!("通知通道已断开");
        }
    }

    /// 注册监听者，同一监听者可重复注册
    pub fn add_listener(&self, notification_type: NotificationType, listener: Listener) {
        self.inner.listeners.lock().add(notification_type, listener);
    }

    /// 按引用移除第一个匹配的监听者，返回是否移除
    pub fn remove_listener(&self, notification_type: NotificationType, listener: &Listener) -> bool {
        self.inner.listeners.lock().remove(notification_type, listener)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.lock().state
    }

    pub fn listener_count(&self, notification_type: NotificationType) -> usize {
        self.inner.listeners.lock().count(notification_type)
    }

    fn stop_task(&self) -> bool {
        match self.task.lock().take() {
            Some(shutdown) => {
                // 接收端已退出时发送失败，任务本身已经结束
                let _ = shutdown.send(true);
                true
            }
            None => false,
        }
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        self.stop_task();
    }
}

// ---------------------------------------------------------------------------
// 连接任务
// ---------------------------------------------------------------------------

impl Inner {
    async fn run(
        self: Arc<Self>,
        generation: u64,
        endpoint: String,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut reconnect = ReconnectState::new(self.settings.retry.clone());

        loop {
            if !self.set_state(generation, ConnectionState::Connecting) {
                return;
            }
            debug!(endpoint = %endpoint, failures = reconnect.failures(), "正在连接消息代理");

            let connected = tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                result = self.transport.connect(&endpoint) => Some(result),
            };

            let end = match connected {
                None => SessionEnd::Shutdown,
                Some(Err(e)) => SessionEnd::Lost(e),
                Some(Ok(session)) => {
                    self.serve(generation, session, &mut reconnect, &mut shutdown)
                        .await
                }
            };

            let err = match end {
                SessionEnd::Shutdown => return,
                SessionEnd::Lost(err) => err,
            };

            if !self.set_state(generation, ConnectionState::Disconnected) {
                return;
            }
            gauge!("broker_connected").set(0.0);

            let Some(delay) = reconnect.on_failure() else {
                error!(
                    endpoint = %endpoint,
                    failures = reconnect.failures(),
                    error = %err,
                    "消息代理连续失败次数已达上限，停止自动重连"
                );
                return;
            };

            warn!(
                endpoint = %endpoint,
                failures = reconnect.failures(),
                max_failures = reconnect.max_failures(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "消息代理连接中断，等待后重连"
            );

            let cancelled = tokio::select! {
                biased;
                _ = shutdown.changed() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                return;
            }
            counter!("broker_reconnect_attempts_total").increment(1);
        }
    }

    /// 订阅主题并持续消费，直到会话结束
    async fn serve(
        &self,
        generation: u64,
        mut session: Box<dyn BrokerSession>,
        reconnect: &mut ReconnectState,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        for notification_type in NotificationType::ALL {
            let destination = self.settings.destination(notification_type);
            if let Err(e) = session.subscribe(&destination).await {
                session.close().await;
                return SessionEnd::Lost(e);
            }
        }

        if !self.set_state(generation, ConnectionState::Connected) {
            session.close().await;
            return SessionEnd::Shutdown;
        }
        reconnect.on_connected();
        gauge!("broker_connected").set(1.0);
        info!(
            critical_topic = %self.settings.critical_topic,
            preventive_topic = %self.settings.preventive_topic,
            "已连接消息代理并完成订阅"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                message = session.next_message() => Some(message),
            };

            match next {
                None => {
                    session.close().await;
                    return SessionEnd::Shutdown;
                }
                Some(None) => return SessionEnd::Lost(ChannelError::Closed),
                Some(Some(Err(e))) => {
                    session.close().await;
                    return SessionEnd::Lost(e);
                }
                Some(Some(Ok(message))) => {
                    match self.settings.type_for_destination(&message.destination) {
                        Some(notification_type) => {
                            self.handle_frame(notification_type, &message.body).await;
                        }
                        None => debug!(
                            destination = %message.destination,
                            "忽略未订阅目的地的消息"
                        ),
                    }
                }
            }
        }
    }

    /// 处理一帧：解码、租户过滤、去重、生成通知并分发
    ///
    /// 被丢弃的帧返回 None。
    async fn handle_frame(&self, notification_type: NotificationType, body: &str) -> Option<Notification> {
        counter!("notification_frames_total", "topic" => notification_type.as_str()).increment(1);

        let frame = match InboundFrame::decode(body) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    notification_type = %notification_type,
                    error = %e,
                    "通知帧无法解析，已丢弃"
                );
                counter!("notification_frames_dropped_total", "reason" => "decode").increment(1);
                return None;
            }
        };

        if let Some(frame_tenant) = frame.tenant_id() {
            let current = self.tenants.current_tenant().await;
            if current.as_deref() != Some(frame_tenant) {
                debug!(
                    notification_type = %notification_type,
                    frame_tenant,
                    current_tenant = ?current,
                    "通知不属于当前租户，已丢弃"
                );
                counter!("notification_frames_dropped_total", "reason" => "tenant").increment(1);
                return None;
            }
        }

        let key = frame.dedup_key(notification_type);
        let fresh = self.dedup.lock().observe(&key);
        if !fresh {
            debug!(dedup_key = %key, "窗口内重复的通知，已忽略");
            counter!("notification_frames_dropped_total", "reason" => "duplicate").increment(1);
            return None;
        }

        let notification = Notification {
            notification_type,
            message: MessageTemplates::render(&frame, notification_type),
            timestamp: Utc::now(),
            data: frame.merged_data(),
        };

        let listeners = self.listeners.lock().snapshot(notification_type);
        let report = dispatch(&listeners, &notification);
        counter!("notifications_dispatched_total", "type" => notification_type.as_str())
            .increment(report.delivered as u64);
        if report.failed > 0 {
            counter!("notification_listener_errors_total").increment(report.failed as u64);
        }
        debug!(
            notification_type = %notification_type,
            delivered = report.delivered,
            failed = report.failed,
            "通知已分发"
        );

        Some(notification)
    }

    fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        let mut status = self.status.lock();
        if status.generation != generation {
            return false;
        }
        status.state = state;
        true
    }

    /// 使正在运行的任务失效并回到断开状态
    fn reset_state(&self) {
        let mut status = self.status.lock();
        status.generation += 1;
        status.state = ConnectionState::Disconnected;
    }
}
