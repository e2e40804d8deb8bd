//! 通道状态管理
//!
//! 拉取通道（SnapshotPoller）与推送通道（StreamSubscriber）各持有一份
//! `ChannelState`，只有所属的通道管理器可以修改，协调器只读。

use serde::{Deserialize, Serialize};

use crate::utils::TimeFormatter;

/// 通道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// 拉取通道（GET /api/logs）
    Pull,
    /// 推送通道（实时事件流）
    Push,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Pull => write!(f, "pull"),
            ChannelKind::Push => write!(f, "push"),
        }
    }
}

/// 通道连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// 未连接
    Disconnected,
    /// 连接中
    Connecting,
    /// 已连接
    Connected,
    /// 出错（等待重连/下次轮询）
    Error,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Disconnected => write!(f, "未连接"),
            ChannelStatus::Connecting => write!(f, "连接中"),
            ChannelStatus::Connected => write!(f, "已连接"),
            ChannelStatus::Error => write!(f, "出错"),
        }
    }
}

/// 单个通道的状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    /// 通道类型
    pub kind: ChannelKind,
    /// 连接状态
    pub status: ChannelStatus,
    /// 最后活动时间（UTC毫秒时间戳）
    pub last_activity_at: Option<i64>,
}

impl ChannelState {
    /// 创建新的通道状态（未连接）
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            status: ChannelStatus::Disconnected,
            last_activity_at: None,
        }
    }

    /// 切换状态，返回旧状态（状态未变化时返回 None）
    pub(crate) fn transition(&mut self, status: ChannelStatus) -> Option<ChannelStatus> {
        self.touch();
        if self.status == status {
            return None;
        }
        let old = self.status;
        self.status = status;
        Some(old)
    }

    /// 记录活动时间
    pub(crate) fn touch(&mut self) {
        self.last_activity_at = Some(TimeFormatter::now_millis());
    }

    pub fn is_connected(&self) -> bool {
        self.status == ChannelStatus::Connected
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        let activity = self
            .last_activity_at
            .map(TimeFormatter::format_clock)
            .unwrap_or_else(|| "-".to_string());
        format!("[{}] {} (最后活动: {})", self.kind, self.status, activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_reports_old_status() {
        let mut state = ChannelState::new(ChannelKind::Push);
        assert_eq!(state.transition(ChannelStatus::Connecting), Some(ChannelStatus::Disconnected));
        assert_eq!(state.transition(ChannelStatus::Connecting), None);
        assert_eq!(state.transition(ChannelStatus::Connected), Some(ChannelStatus::Connecting));
        assert!(state.is_connected());
        assert!(state.last_activity_at.is_some());
        assert!(state.summary().starts_with("[push] 已连接"));
    }
}
