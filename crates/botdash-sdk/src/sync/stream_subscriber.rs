//! 推送通道状态机
//!
//! ```text
//! DISCONNECTED → CONNECTING → CONNECTED
//!        ↑            ↑           │
//!        │            └── ERROR ←─┘  (断开 / 连接失败，传输层自动重连)
//!        └──────────── teardown / 不可用
//! ```
//!
//! 只把事件翻译成意图（`StreamAction`），真正修改 LogBuffer 的是协调器。

use tracing::{debug, info, warn};

use crate::connection_state::{ChannelKind, ChannelState, ChannelStatus};
use crate::network::StreamEvent;

/// 推送事件对应的日志修改意图
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAction {
    /// 无修改
    None,
    /// 历史快照，整体覆盖
    Replace(String),
    /// 新行，追加
    Append(String),
    /// 服务器已清空日志
    Clear(String),
    /// 追加诊断行（不影响通道权威标记）
    Diagnostic(String),
}

/// 处理一个推送事件的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReaction {
    /// 状态变化 (旧, 新)
    pub transition: Option<(ChannelStatus, ChannelStatus)>,
    pub action: StreamAction,
}

#[derive(Debug)]
pub struct StreamSubscriber {
    state: ChannelState,
    /// 推送通道在本会话中不可用（仅拉取模式）
    unavailable: bool,
    /// 已 teardown，之后的事件全部忽略
    closed: bool,
}

impl Default for StreamSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSubscriber {
    pub fn new() -> Self {
        Self {
            state: ChannelState::new(ChannelKind::Push),
            unavailable: false,
            closed: false,
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    pub fn on_event(&mut self, event: StreamEvent) -> StreamReaction {
        if self.closed || self.unavailable {
            debug!("推送通道已关闭，忽略事件: {:?}", event);
            return self.react(None, StreamAction::None);
        }

        match event {
            StreamEvent::Connecting => {
                let old = self.state.transition(ChannelStatus::Connecting);
                self.react(old, StreamAction::None)
            }
            StreamEvent::Connected => {
                info!("✅ 推送通道已连接");
                let old = self.state.transition(ChannelStatus::Connected);
                self.react(old, StreamAction::None)
            }
            StreamEvent::Disconnected { reason } => {
                warn!("🔌 推送通道断开: {}", reason);
                let old = self.state.transition(ChannelStatus::Error);
                self.react(
                    old,
                    StreamAction::Diagnostic(format!("\n🔌 实时连接已断开: {}\n", reason)),
                )
            }
            StreamEvent::ConnectError { error } => {
                warn!("❌ 推送通道连接失败: {}", error);
                let old = self.state.transition(ChannelStatus::Error);
                self.react(
                    old,
                    StreamAction::Diagnostic(format!("\n❌ 实时连接错误: {}\n", error)),
                )
            }
            StreamEvent::HistoricalLogs { logs } => {
                self.state.touch();
                debug!("📜 收到历史日志 ({} bytes)", logs.len());
                self.react(None, StreamAction::Replace(logs))
            }
            StreamEvent::NewLogLine { line } => {
                self.state.touch();
                self.react(None, StreamAction::Append(line))
            }
            StreamEvent::LogCleared { message } => {
                self.state.touch();
                info!("🧹 服务器日志已清空");
                self.react(None, StreamAction::Clear(message))
            }
            StreamEvent::Unavailable { reason } => self.mark_unavailable(&reason),
        }
    }

    /// 推送通道在当前环境下不可用，退化为仅拉取模式
    pub fn mark_unavailable(&mut self, reason: &str) -> StreamReaction {
        if self.unavailable {
            return self.react(None, StreamAction::None);
        }
        warn!("⚠️ 推送通道不可用，改为仅拉取模式: {}", reason);
        self.unavailable = true;
        let old = self.state.transition(ChannelStatus::Disconnected);
        self.react(
            old,
            StreamAction::Diagnostic(format!("\n⚠️ 实时连接不可用，仅使用定时拉取: {}\n", reason)),
        )
    }

    /// 显式关闭
    pub fn teardown(&mut self) -> Option<(ChannelStatus, ChannelStatus)> {
        self.closed = true;
        self.state
            .transition(ChannelStatus::Disconnected)
            .map(|old| (old, ChannelStatus::Disconnected))
    }

    fn react(&self, old: Option<ChannelStatus>, action: StreamAction) -> StreamReaction {
        StreamReaction {
            transition: old.map(|old| (old, self.state.status)),
            action,
        }
    }
}
