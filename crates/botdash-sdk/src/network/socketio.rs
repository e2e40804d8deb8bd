//! Socket.IO v4 推送通道（WebSocket 传输）
//!
//! 只实现仪表盘需要的子集：
//! - Engine.IO：`0` open、`1` close、`2` ping → `3` pong、`4` message
//! - Socket.IO：`0` connect、`1` disconnect、`2` event、`4` connect_error
//!
//! 连接断开后按 `ReconnectRateLimiter` 的节奏自动重连，直到取消或服务器明确不支持。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{StreamEvent, StreamTransport};
use crate::error::{BotdashError, Result};
use crate::rate_limiter::ReconnectRateLimiter;
use crate::sdk::BotdashConfig;

/// 解码后的数据包
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Packet {
    /// Engine.IO 握手（载荷为 JSON 字符串）
    Open(String),
    Close,
    Ping,
    Pong,
    Connect,
    Disconnect,
    ConnectError(String),
    Event { name: String, payload: Value },
    /// noop / upgrade / 二进制事件 / ack 等不关心的包
    Ignored,
}

/// 解码一个文本帧
pub(crate) fn decode_packet(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let engine_type = chars
        .next()
        .ok_or_else(|| BotdashError::Serialization("空数据包".to_string()))?;
    let rest = chars.as_str();

    match engine_type {
        '0' => Ok(Packet::Open(rest.to_string())),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_packet(rest),
        '5' | '6' => Ok(Packet::Ignored),
        other => Err(BotdashError::Serialization(format!(
            "未知 Engine.IO 包类型: {}",
            other
        ))),
    }
}

fn decode_socket_packet(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let socket_type = chars
        .next()
        .ok_or_else(|| BotdashError::Serialization("空 Socket.IO 包".to_string()))?;
    let body = strip_namespace_and_ack(chars.as_str());

    match socket_type {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let mut items = match serde_json::from_str::<Value>(body)? {
                Value::Array(items) => items.into_iter(),
                other => {
                    return Err(BotdashError::Serialization(format!(
                        "事件包不是数组: {}",
                        other
                    )))
                }
            };
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => return Err(BotdashError::Serialization("事件包缺少事件名".to_string())),
            };
            let payload = items.next().unwrap_or(Value::Null);
            Ok(Packet::Event { name, payload })
        }
        '4' => {
            let message = match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(map)) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| body.to_string()),
                Ok(Value::String(s)) => s,
                _ => body.to_string(),
            };
            Ok(Packet::ConnectError(message))
        }
        _ => Ok(Packet::Ignored),
    }
}

/// 去掉可选的 "/namespace," 前缀和 ack id
fn strip_namespace_and_ack(body: &str) -> &str {
    let body = if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    };
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

/// 一次会话的结束方式
enum SessionEnd {
    /// 被取消（teardown）
    Cancelled,
    /// 连接丢失，需要重连
    Lost,
    /// 服务器不支持，放弃
    Unsupported(String),
}

/// Socket.IO 推送通道
pub struct SocketIoTransport {
    url: String,
    session_cookie: Option<String>,
    limiter: Arc<ReconnectRateLimiter>,
}

impl SocketIoTransport {
    pub fn new(config: &BotdashConfig) -> Result<Self> {
        Ok(Self {
            url: config.stream_url()?,
            session_cookie: config.session_cookie.clone(),
            limiter: Arc::new(ReconnectRateLimiter::new(config.reconnect_config.clone())),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamTransport for SocketIoTransport {
    async fn open(&self, cancel: CancellationToken) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SessionWorker {
            url: self.url.clone(),
            session_cookie: self.session_cookie.clone(),
            limiter: self.limiter.clone(),
            events: tx,
            cancel,
        };
        tokio::spawn(worker.run());
        info!("🔌 推送通道已启动: {}", self.url);
        Ok(rx)
    }
}

struct SessionWorker {
    url: String,
    session_cookie: Option<String>,
    limiter: Arc<ReconnectRateLimiter>,
    events: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
}

impl SessionWorker {
    async fn run(self) {
        loop {
            let delay = self.limiter.next_delay();
            if !delay.is_zero() {
                debug!("⏳ {}ms 后重连推送通道", delay.as_millis());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if !self.emit(StreamEvent::Connecting) {
                break;
            }

            match self.session().await {
                SessionEnd::Cancelled => break,
                SessionEnd::Lost => continue,
                SessionEnd::Unsupported(reason) => {
                    warn!("🚫 推送通道不可用: {}", reason);
                    self.emit(StreamEvent::Unavailable { reason });
                    break;
                }
            }
        }
        debug!("推送通道工作任务退出");
    }

    fn emit(&self, event: StreamEvent) -> bool {
        self.events.send(event).is_ok()
    }

    async fn session(&self) -> SessionEnd {
        let request = match self.build_request() {
            Ok(request) => request,
            Err(e) => return SessionEnd::Unsupported(e.to_string()),
        };

        let connect = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            result = tokio_tungstenite::connect_async(request) => result,
        };

        let mut ws = match connect {
            Ok((ws, _response)) => ws,
            Err(tungstenite::Error::Http(response))
                if response.status() == StatusCode::NOT_FOUND =>
            {
                return SessionEnd::Unsupported(format!(
                    "服务器未提供推送端点 (HTTP {})",
                    response.status().as_u16()
                ));
            }
            Err(tungstenite::Error::Url(e)) => {
                return SessionEnd::Unsupported(format!("推送地址无效: {}", e));
            }
            Err(e) => {
                self.emit(StreamEvent::ConnectError { error: e.to_string() });
                return SessionEnd::Lost;
            }
        };

        let mut connected = false;
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = ws.send(Message::Close(None)).await;
                    return SessionEnd::Cancelled;
                }
                next = ws.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.report_lost(connected, e.to_string());
                    return SessionEnd::Lost;
                }
                None => {
                    self.report_lost(connected, "连接已关闭".to_string());
                    return SessionEnd::Lost;
                }
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Ping(bytes) => {
                    let _ = ws.send(Message::Pong(bytes)).await;
                    continue;
                }
                Message::Close(_) => {
                    self.report_lost(connected, "服务器关闭了连接".to_string());
                    return SessionEnd::Lost;
                }
                _ => continue,
            };

            let packet = match decode_packet(text.as_str()) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("忽略无法解析的数据包: {}", e);
                    continue;
                }
            };

            match packet {
                Packet::Open(handshake) => {
                    debug!("Engine.IO 握手: {}", handshake);
                    if ws.send(Message::Text("40".into())).await.is_err() {
                        self.report_lost(connected, "发送 connect 失败".to_string());
                        return SessionEnd::Lost;
                    }
                }
                Packet::Ping => {
                    if ws.send(Message::Text("3".into())).await.is_err() {
                        self.report_lost(connected, "发送 pong 失败".to_string());
                        return SessionEnd::Lost;
                    }
                }
                Packet::Connect => {
                    connected = true;
                    self.limiter.mark_success();
                    if !self.emit(StreamEvent::Connected) {
                        return SessionEnd::Cancelled;
                    }
                }
                Packet::Disconnect | Packet::Close => {
                    self.report_lost(connected, "服务器断开连接".to_string());
                    return SessionEnd::Lost;
                }
                Packet::ConnectError(error) => {
                    self.emit(StreamEvent::ConnectError { error });
                    return SessionEnd::Lost;
                }
                Packet::Event { name, payload } => {
                    if let Some(event) = StreamEvent::from_named(&name, payload) {
                        if !self.emit(event) {
                            return SessionEnd::Cancelled;
                        }
                    }
                }
                Packet::Pong | Packet::Ignored => {}
            }
        }
    }

    fn report_lost(&self, connected: bool, reason: String) {
        let event = if connected {
            StreamEvent::Disconnected { reason }
        } else {
            StreamEvent::ConnectError { error: reason }
        };
        self.emit(event);
    }

    fn build_request(&self) -> Result<tungstenite::handshake::client::Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| BotdashError::Config(format!("推送地址无效: {}", e)))?;

        if let Some(cookie) = &self.session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| BotdashError::Config(format!("无效的会话 Cookie: {}", e)))?;
            request.headers_mut().insert(COOKIE, value);
        }
        Ok(request)
    }
}
