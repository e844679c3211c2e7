//! STOMP 1.2 帧编解码
//!
//! 库存告警通过 STOMP over WebSocket 推送。客户端只需要少量命令：
//! 发送 CONNECT / SUBSCRIBE / DISCONNECT，接收 CONNECTED / MESSAGE /
//! RECEIPT / ERROR。一条 WebSocket 文本消息可以包含多个帧和心跳换行。

use std::fmt;

use crate::error::ChannelError;

/// STOMP 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Subscribe,
    Disconnect,
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Result<Self, ChannelError> {
        match raw {
            "CONNECT" => Ok(Self::Connect),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "DISCONNECT" => Ok(Self::Disconnect),
            "CONNECTED" => Ok(Self::Connected),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            other => Err(ChannelError::Stomp(format!("未知命令: {other}"))),
        }
    }

    /// CONNECT 与 CONNECTED 帧的头部不做转义
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// STOMP 帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// CONNECT 帧
    ///
    /// 心跳声明为 `0,{heartbeat_ms}`：客户端不主动发送心跳，只要求服务端发送。
    pub fn connect(
        host: &str,
        login: Option<&str>,
        passcode: Option<&str>,
        heartbeat_ms: u64,
    ) -> Self {
        let mut frame = Self::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("heart-beat", format!("0,{heartbeat_ms}"));
        if let Some(login) = login {
            frame = frame.with_header("login", login);
        }
        if let Some(passcode) = passcode {
            frame = frame.with_header("passcode", passcode);
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).with_header("receipt", receipt)
    }

    /// 第一个同名头部的值（STOMP 1.2 规定重复头部以首个为准）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// ERROR 帧的错误描述
    pub fn error_message(&self) -> String {
        match (self.header("message"), self.body.trim()) {
            (Some(message), "") => message.to_string(),
            (Some(message), body) => format!("{message}: {body}"),
            (None, "") => "未知错误".to_string(),
            (None, body) => body.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// 解码一条 WebSocket 消息中的所有帧，心跳换行被忽略
    pub fn decode_all(input: &str) -> Result<Vec<Self>, ChannelError> {
        let mut frames = Vec::new();
        let mut rest = input;
        while let Some((frame, consumed)) = Self::decode_one(rest)? {
            frames.push(frame);
            rest = &rest[consumed..];
        }
        Ok(frames)
    }

    /// 解码一个帧，返回帧及消耗的字节数；只剩心跳换行时返回 None
    fn decode_one(input: &str) -> Result<Option<(Self, usize)>, ChannelError> {
        let start = input.len() - input.trim_start_matches(|c: char| c == '\r' || c == '\n').len();
        if start == input.len() {
            return Ok(None);
        }

        let mut pos = start;
        let command_line = next_line(input, &mut pos)?;
        let command = Command::parse(command_line)?;

        let mut headers = Vec::new();
        loop {
            let line = next_line(input, &mut pos)?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ChannelError::Stomp(format!("头部缺少冒号: {line}")))?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(n, _)| n == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| ChannelError::Stomp(format!("无效的 content-length: {v}")))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                let end = pos
                    .checked_add(len)
                    .ok_or_else(|| ChannelError::Stomp(format!("content-length 超出范围: {len}")))?;
                if input.as_bytes().get(end) != Some(&0) {
                    return Err(ChannelError::Stomp("正文长度与 NUL 结束符不匹配".to_string()));
                }
                end
            }
            None => input[pos..]
                .find('\0')
                .map(|offset| pos + offset)
                .ok_or_else(|| ChannelError::Stomp("帧缺少 NUL 结束符".to_string()))?,
        };

        let body = input
            .get(pos..body_end)
            .ok_or_else(|| ChannelError::Stomp("正文不是有效的 UTF-8 边界".to_string()))?
            .to_string();

        Ok(Some((
            Self {
                command,
                headers,
                body,
            },
            body_end + 1,
        )))
    }
}

fn next_line<'a>(input: &'a str, pos: &mut usize) -> Result<&'a str, ChannelError> {
    let rest = &input[*pos..];
    let end = rest
        .find('\n')
        .ok_or_else(|| ChannelError::Stomp("帧头部不完整".to_string()))?;
    *pos += end + 1;
    Ok(rest[..end].strip_suffix('\r').unwrap_or(&rest[..end]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, ChannelError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(ChannelError::Stomp(format!(
                    "无效的头部转义: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
