//! 事件系统模块 - 渲染层 / UI 协作方与 SDK 之间的唯一出口
//!
//! 功能包括：
//! - 日志内容变更事件（附带来源标签）
//! - 通道连接状态变更事件
//! - Bot 运行状态变更事件
//! - 生命周期命令完成 / 失败事件
//! - 事件广播和订阅机制

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::connection_state::{ChannelKind, ChannelStatus};
use crate::lifecycle::{LifecycleCommand, LifecycleStatus};
use crate::log_buffer::LogUpdate;
use crate::utils::TimeFormatter;

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientEvent {
    /// 日志缓冲区已修改
    LogUpdated(LogUpdate),
    /// 通道连接状态变更
    ChannelStateChanged {
        channel: ChannelKind,
        old_status: ChannelStatus,
        new_status: ChannelStatus,
        timestamp: i64,
    },
    /// Bot 运行状态变更（reported / pending）
    LifecycleStatusChanged {
        status: LifecycleStatus,
        timestamp: i64,
    },
    /// 命令执行成功（message 为服务器返回的提示）
    CommandCompleted {
        command: LifecycleCommand,
        message: String,
        timestamp: i64,
    },
    /// 命令执行失败
    CommandFailed {
        command: LifecycleCommand,
        error: String,
        timestamp: i64,
    },
    /// 配置已保存，调用方需要重新加载整个会话
    ReloadRequested {
        message: String,
        timestamp: i64,
    },
}

impl ClientEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::LogUpdated(_) => "log_updated",
            ClientEvent::ChannelStateChanged { .. } => "channel_state_changed",
            ClientEvent::LifecycleStatusChanged { .. } => "lifecycle_status_changed",
            ClientEvent::CommandCompleted { .. } => "command_completed",
            ClientEvent::CommandFailed { .. } => "command_failed",
            ClientEvent::ReloadRequested { .. } => "reload_requested",
        }
    }

    /// 获取事件时间戳（UTC毫秒）
    pub fn timestamp(&self) -> i64 {
        match self {
            ClientEvent::LogUpdated(update) => update.timestamp,
            ClientEvent::ChannelStateChanged { timestamp, .. } => *timestamp,
            ClientEvent::LifecycleStatusChanged { timestamp, .. } => *timestamp,
            ClientEvent::CommandCompleted { timestamp, .. } => *timestamp,
            ClientEvent::CommandFailed { timestamp, .. } => *timestamp,
            ClientEvent::ReloadRequested { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加事件类型过滤
    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &ClientEvent) -> bool {
        match self.event_types {
            Some(ref types) => types.iter().any(|t| t == event.event_type()),
            None => true,
        }
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&ClientEvent) + Send + Sync>;

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<ClientEvent>,
    /// 事件监听器映射
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    ///
    /// 监听器在返回前同步执行完毕，调用方据此保证"修改完成 + 通知完成"后再处理下一条消息。
    pub async fn emit(&self, event: ClientEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 的客户端），仅打 debug
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }

        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定类型的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器（"*" 监听全部事件）
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners.entry(event_type.to_string()).or_default().push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub async fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().await;
        listeners.clear();

        let mut stats = self.stats.write().await;
        stats.listener_count = 0;

        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<ClientEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<ClientEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<ClientEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<ClientEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    pub fn channel_state_changed(
        channel: ChannelKind,
        old_status: ChannelStatus,
        new_status: ChannelStatus,
    ) -> ClientEvent {
        ClientEvent::ChannelStateChanged {
            channel,
            old_status,
            new_status,
            timestamp: TimeFormatter::now_millis(),
        }
    }

    pub fn lifecycle_status_changed(status: LifecycleStatus) -> ClientEvent {
        ClientEvent::LifecycleStatusChanged {
            status,
            timestamp: TimeFormatter::now_millis(),
        }
    }

    pub fn command_completed(command: LifecycleCommand, message: String) -> ClientEvent {
        ClientEvent::CommandCompleted {
            command,
            message,
            timestamp: TimeFormatter::now_millis(),
        }
    }

    pub fn command_failed(command: LifecycleCommand, error: String) -> ClientEvent {
        ClientEvent::CommandFailed {
            command,
            error,
            timestamp: TimeFormatter::now_millis(),
        }
    }

    pub fn reload_requested(message: String) -> ClientEvent {
        ClientEvent::ReloadRequested {
            message,
            timestamp: TimeFormatter::now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_buffer::{LogBuffer, LABEL_LIVE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_event_manager_basic_functionality() {
        let manager = EventManager::new(100);
        let mut receiver = manager.subscribe();

        let mut buffer = LogBuffer::new();
        manager.emit(ClientEvent::LogUpdated(buffer.append("line\n", LABEL_LIVE))).await;

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "log_updated");

        let stats = manager.get_stats().await;
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.events_by_type.get("log_updated"), Some(&1));
    }

    #[tokio::test]
    async fn test_event_filter() {
        let manager = EventManager::new(100);
        let filter = EventFilter::new().with_event_types(vec!["command_failed".to_string()]);
        let mut filtered = manager.subscribe_filtered(filter);

        manager
            .emit(event_builders::channel_state_changed(
                ChannelKind::Push,
                ChannelStatus::Connecting,
                ChannelStatus::Connected,
            ))
            .await;
        manager
            .emit(event_builders::command_failed(LifecycleCommand::Stop, "boom".to_string()))
            .await;

        let event = filtered.recv().await.unwrap();
        match event {
            ClientEvent::CommandFailed { command, error, .. } => {
                assert_eq!(command, LifecycleCommand::Stop);
                assert_eq!(error, "boom");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listeners_run_before_emit_returns() {
        let manager = EventManager::new(100);
        let counter = Arc::new(AtomicUsize::new(0));
        let specific = counter.clone();
        let wildcard = counter.clone();

        manager
            .add_listener("reload_requested", move |_| {
                specific.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        manager
            .add_listener("*", move |_| {
                wildcard.fetch_add(10, Ordering::SeqCst);
            })
            .await;

        manager.emit(event_builders::reload_requested("saved".to_string())).await;
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert_eq!(manager.get_stats().await.listener_count, 2);

        manager.clear_listeners().await;
        manager.emit(event_builders::reload_requested("saved".to_string())).await;
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }
}
