//! 推送通道
//!
//! 传输层只负责把服务器事件翻译成 `StreamEvent` 并投递出去，
//! 状态机和日志修改由 `StreamSubscriber` / `SyncCoordinator` 负责。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

pub mod socketio;

pub use socketio::SocketIoTransport;

/// 推送通道事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// 开始一次连接尝试
    Connecting,
    /// 已连接（connect）
    Connected,
    /// 服务器主动断开或连接丢失（disconnect），传输层会自动重连
    Disconnected { reason: String },
    /// 连接失败（connect_error），传输层会自动重连
    ConnectError { error: String },
    /// 连接时的完整历史日志（historical_logs）
    HistoricalLogs { logs: String },
    /// 新的日志行（new_log_line）
    NewLogLine { line: String },
    /// 日志已被清空（log_cleared）
    LogCleared { message: String },
    /// 当前环境不支持推送通道，不再重连
    Unavailable { reason: String },
}

#[derive(Debug, Deserialize)]
struct HistoricalLogsPayload {
    #[serde(default)]
    logs: String,
}

#[derive(Debug, Deserialize)]
struct NewLogLinePayload {
    #[serde(default)]
    line: String,
}

#[derive(Debug, Deserialize)]
struct LogClearedPayload {
    #[serde(default)]
    message: String,
}

impl StreamEvent {
    /// 把具名服务器事件翻译为 `StreamEvent`
    ///
    /// 未知事件名或无法解析的载荷返回 None。
    pub fn from_named(name: &str, payload: serde_json::Value) -> Option<Self> {
        let event = match name {
            "historical_logs" => serde_json::from_value::<HistoricalLogsPayload>(payload)
                .map(|p| StreamEvent::HistoricalLogs { logs: p.logs }),
            "new_log_line" => serde_json::from_value::<NewLogLinePayload>(payload)
                .map(|p| StreamEvent::NewLogLine { line: p.line }),
            "log_cleared" => serde_json::from_value::<LogClearedPayload>(payload)
                .map(|p| StreamEvent::LogCleared { message: p.message }),
            other => {
                debug!("忽略未知推送事件: {}", other);
                return None;
            }
        };

        match event {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("推送事件 {} 载荷无法解析: {}", name, e);
                None
            }
        }
    }
}

/// 推送通道传输层
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// 打开推送通道
    ///
    /// 返回的接收端在 `cancel` 触发或传输层放弃后关闭。
    /// 返回 Err 表示推送通道在当前环境下不可用。
    async fn open(&self, cancel: CancellationToken) -> Result<mpsc::UnboundedReceiver<StreamEvent>>;
}


#[cfg(test)]
pub use test_helpers::ChannelStreamTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_named_events() {
        assert_eq!(
            StreamEvent::from_named("historical_logs", json!({"logs": "A"})),
            Some(StreamEvent::HistoricalLogs { logs: "A".to_string() })
        );
        assert_eq!(
            StreamEvent::from_named("new_log_line", json!({"line": "B"})),
            Some(StreamEvent::NewLogLine { line: "B".to_string() })
        );
        assert_eq!(
            StreamEvent::from_named("log_cleared", json!({"message": "C"})),
            Some(StreamEvent::LogCleared { message: "C".to_string() })
        );
        assert_eq!(StreamEvent::from_named("status_update", json!({})), None);
        assert_eq!(StreamEvent::from_named("new_log_line", json!("not an object")), None);
    }

    #[tokio::test]
    async fn test_channel_transport_closes_on_cancel() {
        let transport = ChannelStreamTransport::new();
        let cancel = CancellationToken::new();
        let mut rx = transport.open(cancel.clone()).await.unwrap();

        assert!(transport.emit(StreamEvent::Connected));
        assert_eq!(rx.recv().await, Some(StreamEvent::Connected));

        cancel.cancel();
        assert_eq!(rx.recv().await, None);
        assert!(!transport.emit(StreamEvent::Connected));
    }
}
