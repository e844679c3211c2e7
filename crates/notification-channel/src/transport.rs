//! 消息代理传输层
//!
//! 通知通道只依赖 `BrokerTransport` / `BrokerSession` 两个 trait；
//! 生产环境使用 STOMP over WebSocket 实现，测试中注入内存实现。

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use almacen_shared::config::BrokerConfig;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Message, http::Uri};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::stomp::{Command, StompFrame};

/// 代理推送到某个目的地的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub destination: String,
    pub body: String,
}

/// 已建立的代理会话
#[async_trait]
pub trait BrokerSession: Send {
    async fn subscribe(&mut self, destination: &str) -> Result<(), ChannelError>;

    /// 下一条消息；连接正常关闭时返回 None
    async fn next_message(&mut self) -> Option<Result<BrokerMessage, ChannelError>>;

    async fn close(&mut self);
}

/// 建立代理会话的传输实现
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn BrokerSession>, ChannelError>;
}

// ---------------------------------------------------------------------------
// STOMP over WebSocket
// ---------------------------------------------------------------------------

/// STOMP 握手参数
#[derive(Debug, Clone)]
pub struct StompOptions {
    pub connect_timeout: Duration,
    pub heartbeat: Duration,
    pub login: Option<String>,
    pub passcode: Option<String>,
}

impl StompOptions {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            heartbeat: Duration::from_millis(config.heartbeat_ms),
            login: config.login.clone(),
            passcode: config.passcode.clone(),
        }
    }
}

impl Default for StompOptions {
    fn default() -> Self {
        Self::from_config(&BrokerConfig::default())
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 基于 tokio-tungstenite 的 STOMP 客户端传输
pub struct WsStompTransport {
    options: StompOptions,
}

impl WsStompTransport {
    pub fn new(options: StompOptions) -> Self {
        Self { options }
    }

    async fn handshake(&self, endpoint: &str) -> Result<WsStompSession, ChannelError> {
        let (mut stream, _response) = connect_async(endpoint).await?;

        let host = endpoint
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.host().map(str::to_string))
            .unwrap_or_else(|| "/".to_string());
        let connect = StompFrame::connect(
            &host,
            self.options.login.as_deref(),
            self.options.passcode.as_deref(),
            self.options.heartbeat.as_millis() as u64,
        );
        stream.send(Message::Text(connect.encode().into())).await?;

        let connected = wait_connected(&mut stream).await?;
        let read_timeout = negotiated_read_timeout(&connected, self.options.heartbeat);
        debug!(
            version = ?connected.header("version"),
            server = ?connected.header("server"),
            read_timeout_ms = ?read_timeout.map(|d| d.as_millis() as u64),
            "收到 CONNECTED 帧"
        );

        Ok(WsStompSession {
            stream,
            subscriptions: HashMap::new(),
            pending: VecDeque::new(),
            read_timeout,
            next_subscription: 0,
        })
    }
}

#[async_trait]
impl BrokerTransport for WsStompTransport {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn BrokerSession>, ChannelError> {
        let timeout_ms = self.options.connect_timeout.as_millis() as u64;
        let session = tokio::time::timeout(self.options.connect_timeout, self.handshake(endpoint))
            .await
            .map_err(|_| ChannelError::HandshakeTimeout { timeout_ms })??;

        info!(endpoint, "STOMP 会话已建立");
        Ok(Box::new(session))
    }
}

/// 等待 CONNECTED；收到 ERROR 时返回代理错误
async fn wait_connected(stream: &mut WsStream) -> Result<StompFrame, ChannelError> {
    while let Some(message) = stream.next().await {
        let text = match message? {
            Message::Text(text) => text.as_str().to_string(),
            Message::Binary(data) => String::from_utf8(data.to_vec())
                .map_err(|e| ChannelError::Stomp(e.to_string()))?,
            Message::Close(_) => return Err(ChannelError::Closed),
            _ => continue,
        };

        for frame in StompFrame::decode_all(&text)? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    return Err(ChannelError::Broker {
                        message: frame.error_message(),
                    });
                }
                other => debug!(command = %other, "握手期间忽略 STOMP 帧"),
            }
        }
    }

    Err(ChannelError::Closed)
}

/// 按服务端心跳计算读超时：三个心跳周期内无任何数据视为连接失效
///
/// 任一方不启用心跳时不设读超时。
fn negotiated_read_timeout(connected: &StompFrame, requested: Duration) -> Option<Duration> {
    let server_send_ms = connected
        .header("heart-beat")
        .and_then(|hb| hb.split_once(','))
        .and_then(|(sx, _)| sx.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let requested_ms = requested.as_millis() as u64;

    if server_send_ms == 0 || requested_ms == 0 {
        return None;
    }
    Some(Duration::from_millis(server_send_ms.max(requested_ms) * 3))
}

struct WsStompSession {
    stream: WsStream,
    /// 订阅 id -> 目的地
    subscriptions: HashMap<String, String>,
    pending: VecDeque<BrokerMessage>,
    read_timeout: Option<Duration>,
    next_subscription: u32,
}

impl WsStompSession {
    fn route(&mut self, frame: StompFrame) -> Result<(), ChannelError> {
        match frame.command {
            Command::Message => {
                let destination = frame
                    .header("destination")
                    .map(str::to_string)
                    .or_else(|| {
                        frame
                            .header("subscription")
                            .and_then(|id| self.subscriptions.get(id).cloned())
                    })
                    .unwrap_or_default();
                self.pending.push_back(BrokerMessage {
                    destination,
                    body: frame.body,
                });
                Ok(())
            }
            Command::Error => Err(ChannelError::Broker {
                message: frame.error_message(),
            }),
            other => {
                debug!(command = %other, "忽略 STOMP 帧");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BrokerSession for WsStompSession {
    async fn subscribe(&mut self, destination: &str) -> Result<(), ChannelError> {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;

        let frame = StompFrame::subscribe(&id, destination);
        self.stream
            .send(Message::Text(frame.encode().into()))
            .await?;
        debug!(subscription = %id, destination, "已订阅代理目的地");
        self.subscriptions.insert(id, destination.to_string());
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<BrokerMessage, ChannelError>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(Ok(message));
            }

            let next = match self.read_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        return Some(Err(ChannelError::Transport(format!(
                            "{}ms 内未收到任何数据，判定心跳超时",
                            limit.as_millis()
                        ))));
                    }
                },
                None => self.stream.next().await,
            };

            let text = match next? {
                Ok(Message::Text(text)) => text.as_str().to_string(),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "二进制消息不是有效的 UTF-8，丢弃");
                        continue;
                    }
                },
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                    continue;
                }
                Ok(Message::Close(frame)) => {
                    info!(close_frame = ?frame, "服务端关闭了 WebSocket 连接");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            };

            let frames = match StompFrame::decode_all(&text) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(error = %e, "STOMP 帧解码失败，丢弃该消息");
                    continue;
                }
            };
            for frame in frames {
                if let Err(e) = self.route(frame) {
                    return Some(Err(e));
                }
            }
        }
    }

    async fn close(&mut self) {
        let frame = StompFrame::disconnect("disconnect");
        if let Err(e) = self
            .stream
            .send(Message::Text(frame.encode().into()))
            .await
        {
            debug!(error = %e, "发送 DISCONNECT 失败");
        }
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "关闭 WebSocket 失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(heart_beat: Option<&str>) -> StompFrame {
        let frame = StompFrame::new(Command::Connected).with_header("version", "1.2");
        match heart_beat {
            Some(hb) => frame.with_header("heart-beat", hb),
            None => frame,
        }
    }

    #[test]
    fn test_read_timeout_negotiation() {
        let requested = Duration::from_secs(10);

        assert_eq!(
            negotiated_read_timeout(&connected(Some("20000,0")), requested),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            negotiated_read_timeout(&connected(Some("5000,5000")), requested),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            negotiated_read_timeout(&connected(Some("0,0")), requested),
            None
        );
        assert_eq!(negotiated_read_timeout(&connected(None), requested), None);
        assert_eq!(
            negotiated_read_timeout(&connected(Some("20000,0")), Duration::ZERO),
            None
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = BrokerConfig {
            connect_timeout_ms: 2_500,
            heartbeat_ms: 0,
            login: Some("almacen".to_string()),
            ..BrokerConfig::default()
        };

        let options = StompOptions::from_config(&config);
        assert_eq!(options.connect_timeout, Duration::from_millis(2_500));
        assert_eq!(options.heartbeat, Duration::ZERO);
        assert_eq!(options.login.as_deref(), Some("almacen"));
        assert!(options.passcode.is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let transport = WsStompTransport::new(StompOptions {
            connect_timeout: Duration::from_secs(2),
            ..StompOptions::default()
        });

        // 端口 1 上没有 WebSocket 服务
        let err = transport
            .connect("ws://127.0.0.1:1/ws")
            .await
            .err()
            .expect("连接应失败");
        assert!(err.is_retryable());
    }
}
