//! 通知通道错误类型
//!
//! 区分传输层故障（驱动重连状态机）、解码失败（单帧丢弃）与
//! 配置缺失（需要外部修正），便于上层决定重试或丢弃策略。

use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("传输层错误: {0}")]
    Transport(String),

    #[error("消息代理返回错误: {message}")]
    Broker { message: String },

    #[error("STOMP 握手超时: {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    #[error("连接已被对端关闭")]
    Closed,

    #[error("STOMP 帧格式错误: {0}")]
    Stomp(String),

    #[error("消息解码失败: {0}")]
    Decode(String),

    #[error("会话令牌解析失败: {0}")]
    Token(String),

    #[error(transparent)]
    Shared(#[from] almacen_shared::error::AlmacenError),
}

impl ChannelError {
    /// 是否应交给重连状态机处理
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Broker { .. } | Self::HandshakeTimeout { .. } | Self::Closed
        )
    }
}

impl From<tungstenite::Error> for ChannelError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almacen_shared::error::AlmacenError;

    #[test]
    fn test_error_display() {
        let broker_err = ChannelError::Broker {
            message: "Access denied".to_string(),
        };
        assert_eq!(broker_err.to_string(), "消息代理返回错误: Access denied");

        let timeout = ChannelError::HandshakeTimeout { timeout_ms: 10_000 };
        assert_eq!(timeout.to_string(), "STOMP 握手超时: 10000ms");

        let decode = ChannelError::Decode("expected value at line 1 column 1".to_string());
        assert_eq!(
            decode.to_string(),
            "消息解码失败: expected value at line 1 column 1"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ChannelError::Transport("connection refused".to_string()).is_retryable());
        assert!(ChannelError::Closed.is_retryable());
        assert!(ChannelError::HandshakeTimeout { timeout_ms: 1 }.is_retryable());

        assert!(!ChannelError::Decode("bad".to_string()).is_retryable());
        let missing: ChannelError = AlmacenError::MissingConfig {
            key: "broker.endpoint".to_string(),
        }
        .into();
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_from_tungstenite_closed() {
        let err: ChannelError = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, ChannelError::Closed));
    }
}
