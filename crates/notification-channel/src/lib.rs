//! 库存实时通知通道
//!
//! 通过 STOMP over WebSocket 订阅仓库库存告警主题，按当前租户过滤、
//! 短时去重后生成本地化通知，分发给应用内注册的监听者。
//! 连接中断时按指数退避自动重连，连续失败达到上限后停止。

pub mod channel;
pub mod dedup;
pub mod error;
pub mod frame;
pub mod listeners;
pub mod reconnect;
pub mod stomp;
pub mod templates;
pub mod tenant;
pub mod transport;
pub mod types;

pub use channel::{ChannelSettings, NotificationChannel};
pub use error::ChannelError;
pub use listeners::{Listener, listener};
pub use reconnect::ConnectionState;
pub use tenant::{JwtTenantResolver, StaticTenant, TenantResolver};
pub use transport::{BrokerMessage, BrokerSession, BrokerTransport, StompOptions, WsStompTransport};
pub use types::{Notification, NotificationType};
