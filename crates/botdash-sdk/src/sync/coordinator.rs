//! 同步协调器 - LogBuffer 的唯一写入者
//!
//! 核心设计：
//! - 所有输入都是 `SyncMessage`，按到达顺序逐条处理，处理过程不可重入
//! - 每条消息处理完毕后产出 `Outbox`：先发布事件，再执行副作用
//! - 协调器本身不做 IO，不持有定时器，可以在测试里直接驱动
//!
//! 通道权威规则：
//! - 推送通道的修改（历史快照 / 新行 / 清空）总是立即生效，并推进权威标记
//! - 快照只有在发出后没有任何推送修改、且序号比已应用的快照新时才生效
//! - 推送通道已连接时，例行拉取（启动 / 周期）的结果直接丢弃
//! - 命令触发的刷新（start/stop 刷新、restart 刷新、clear 兜底、clear 重同步）
//!   即使推送通道已连接也可以覆盖日志，只要发出后没有推送修改；
//!   这样 log_cleared 丢失时 clear 兜底仍然生效
//! - 清空同样推进权威标记，清空前发出的快照一律丢弃
//! - 诊断行不推进权威标记，也不改变日志来源

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{
    CommandRequest, PollReason, PollTicket, SnapshotPoller, StreamAction, StreamSubscriber,
    SyncEffect, SyncMessage, TimerKind,
};
use crate::connection_state::{ChannelKind, ChannelState, ChannelStatus};
use crate::error::{BotdashError, Result};
use crate::events::{event_builders, ClientEvent};
use crate::http_client::{CommandResponse, LogSnapshot};
use crate::lifecycle::{LifecycleCommand, LifecycleController, LifecycleStatus};
use crate::log_buffer::{LogBuffer, LogSource, LABEL_DIAGNOSTIC, LABEL_LIVE, LABEL_SNAPSHOT};
use crate::network::StreamEvent;
use crate::sdk::BotdashConfig;

/// 协调器用到的延迟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    /// log_cleared 之后重新同步的延迟
    pub clear_resync: Duration,
    /// clear_logs 成功后兜底拉取的延迟
    pub clear_fallback: Duration,
    /// restart 成功后刷新的延迟
    pub restart_refresh: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            clear_resync: Duration::from_secs(2),
            clear_fallback: Duration::from_secs(1),
            restart_refresh: Duration::from_secs(3),
        }
    }
}

impl From<&BotdashConfig> for SyncTimings {
    fn from(config: &BotdashConfig) -> Self {
        Self {
            clear_resync: Duration::from_secs(config.clear_resync_delay_secs),
            clear_fallback: Duration::from_secs(config.clear_fallback_delay_secs),
            restart_refresh: Duration::from_secs(config.restart_refresh_delay_secs),
        }
    }
}

/// 某一时刻的完整只读视图
#[derive(Debug, Clone)]
pub struct SyncView {
    pub content: String,
    pub source: Option<LogSource>,
    pub revision: u64,
    pub last_updated_at: Option<i64>,
    pub info_line: String,
    pub lifecycle: LifecycleStatus,
    pub pull: ChannelState,
    pub push: ChannelState,
    pub pull_only: bool,
}

/// 一条消息处理完毕后的输出
#[derive(Debug, Default)]
pub struct Outbox {
    /// 按顺序发布的事件
    pub events: Vec<ClientEvent>,
    /// 事件发布完后执行的副作用
    pub effects: Vec<SyncEffect>,
    /// 会话已结束，需要在执行完副作用后回复并退出
    pub stopped: Option<oneshot::Sender<()>>,
}

pub struct SyncCoordinator {
    buffer: LogBuffer,
    poller: SnapshotPoller,
    stream: StreamSubscriber,
    lifecycle: LifecycleController,
    timings: SyncTimings,
    /// 最近一次推送 / 清空修改时的 LogBuffer 修改序号
    authority_revision: u64,
    /// 最近一次应用的快照序号
    last_applied_snapshot_seq: u64,
    next_command_id: u64,
    waiting: HashMap<u64, oneshot::Sender<Result<CommandResponse>>>,
    shut_down: bool,
    outbox: Outbox,
}

impl SyncCoordinator {
    pub fn new(timings: SyncTimings) -> Self {
        Self {
            buffer: LogBuffer::new(),
            poller: SnapshotPoller::new(),
            stream: StreamSubscriber::new(),
            lifecycle: LifecycleController::new(),
            timings,
            authority_revision: 0,
            last_applied_snapshot_seq: 0,
            next_command_id: 1,
            waiting: HashMap::new(),
            shut_down: false,
            outbox: Outbox::default(),
        }
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    pub fn pull_state(&self) -> &ChannelState {
        self.poller.state()
    }

    pub fn push_state(&self) -> &ChannelState {
        self.stream.state()
    }

    pub fn lifecycle_status(&self) -> LifecycleStatus {
        self.lifecycle.status()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn view(&self) -> SyncView {
        SyncView {
            content: self.buffer.content().to_string(),
            source: self.buffer.source(),
            revision: self.buffer.revision(),
            last_updated_at: self.buffer.last_updated_at(),
            info_line: self.buffer.info_line(),
            lifecycle: self.lifecycle.status(),
            pull: self.poller.state().clone(),
            push: self.stream.state().clone(),
            pull_only: self.stream.is_unavailable(),
        }
    }

    /// 会话开始：立即拉取一次
    pub fn start(&mut self) -> Outbox {
        info!("🚀 日志同步会话开始");
        self.issue_poll(PollReason::Startup);
        self.take_outbox()
    }

    /// 处理一条消息
    pub fn handle(&mut self, message: SyncMessage) -> Outbox {
        debug!("处理消息: {}", message.kind());

        match message {
            SyncMessage::Inspect { reply } => {
                let _ = reply.send(self.view());
            }
            SyncMessage::Shutdown { reply } => {
                self.teardown();
                self.outbox.stopped = Some(reply);
            }
            SyncMessage::Command { request, reply } => self.on_command(request, reply),
            _ if self.shut_down => {
                debug!("会话已结束，忽略消息");
            }
            SyncMessage::SnapshotResult { ticket, result } => self.on_snapshot(ticket, result),
            SyncMessage::StreamEvent(event) => self.on_stream_event(event),
            SyncMessage::CommandResult { id, command, result } => {
                self.on_command_result(id, command, result)
            }
            SyncMessage::TimerFired(TimerKind::PollTick) => self.issue_poll(PollReason::Interval),
            SyncMessage::TimerFired(TimerKind::DelayedPoll(reason)) => self.issue_poll(reason),
        }

        self.take_outbox()
    }

    fn take_outbox(&mut self) -> Outbox {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, event: ClientEvent) {
        self.outbox.events.push(event);
    }

    fn emit_channel(&mut self, channel: ChannelKind, old: Option<ChannelStatus>, new: ChannelStatus) {
        if let Some(old) = old {
            debug!("[{}] {} → {}", channel, old, new);
            self.emit(event_builders::channel_state_changed(channel, old, new));
        }
    }

    fn emit_lifecycle(&mut self) {
        let status = self.lifecycle.status();
        self.emit(event_builders::lifecycle_status_changed(status));
    }

    fn issue_poll(&mut self, reason: PollReason) {
        let (ticket, old) = self.poller.issue(reason, self.buffer.revision());
        self.emit_channel(ChannelKind::Pull, old, ChannelStatus::Connecting);
        self.outbox.effects.push(SyncEffect::FetchSnapshot(ticket));
    }

    fn schedule_poll(&mut self, reason: PollReason, delay: Duration) {
        debug!("⏰ {}ms 后拉取 (reason={})", delay.as_millis(), reason);
        self.outbox.effects.push(SyncEffect::Schedule {
            timer: TimerKind::DelayedPoll(reason),
            delay,
        });
    }

    // ========== 日志修改 ==========

    fn apply_stream_replace(&mut self, logs: String) {
        let update = self.buffer.replace(logs, LABEL_LIVE);
        self.authority_revision = update.revision;
        self.emit(ClientEvent::LogUpdated(update));
    }

    fn apply_stream_append(&mut self, line: &str) {
        let update = self.buffer.append(line, LABEL_LIVE);
        self.authority_revision = update.revision;
        self.emit(ClientEvent::LogUpdated(update));
    }

    fn apply_clear(&mut self, message: String) {
        let update = self.buffer.clear(message);
        self.authority_revision = update.revision;
        self.emit(ClientEvent::LogUpdated(update));
    }

    fn append_diagnostic(&mut self, text: &str) {
        let update = self.buffer.annotate(text, LABEL_DIAGNOSTIC);
        self.emit(ClientEvent::LogUpdated(update));
    }

    // ========== 拉取通道 ==========

    fn on_snapshot(&mut self, ticket: PollTicket, result: Result<LogSnapshot>) {
        let old = self.poller.complete(&ticket, &result);
        let new = self.poller.state().status;
        self.emit_channel(ChannelKind::Pull, old, new);

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.append_diagnostic(&format!("\n❌ 拉取日志失败: {}\n", e));
                return;
            }
        };

        if let Some(reason) = self.stale_reason(&ticket) {
            debug!(
                "🗑️ 丢弃快照 #{} (reason={}): {}",
                ticket.seq, ticket.reason, reason
            );
            return;
        }

        self.last_applied_snapshot_seq = ticket.seq;
        let update = self.buffer.replace(snapshot.logs, LABEL_SNAPSHOT);
        debug!(
            "📥 应用快照 #{} (reason={}, revision={})",
            ticket.seq, ticket.reason, update.revision
        );
        self.emit(ClientEvent::LogUpdated(update));
    }

    fn stale_reason(&self, ticket: &PollTicket) -> Option<&'static str> {
        let routine = matches!(ticket.reason, PollReason::Startup | PollReason::Interval);
        if routine && self.stream.is_connected() {
            return Some("推送通道已连接");
        }
        if self.authority_revision > ticket.issued_at_revision {
            return Some("发出后推送通道已修改日志");
        }
        if ticket.seq <= self.last_applied_snapshot_seq {
            return Some("已应用更新的快照");
        }
        None
    }

    // ========== 推送通道 ==========

    fn on_stream_event(&mut self, event: StreamEvent) {
        let reaction = self.stream.on_event(event);
        if let Some((old, new)) = reaction.transition {
            self.emit_channel(ChannelKind::Push, Some(old), new);
        }

        match reaction.action {
            StreamAction::None => {}
            StreamAction::Replace(logs) => self.apply_stream_replace(logs),
            StreamAction::Append(line) => self.apply_stream_append(&line),
            StreamAction::Clear(message) => {
                self.apply_clear(message);
                self.schedule_poll(PollReason::ClearResync, self.timings.clear_resync);
            }
            StreamAction::Diagnostic(text) => self.append_diagnostic(&text),
        }
    }

    // ========== 生命周期命令 ==========

    fn on_command(
        &mut self,
        request: CommandRequest,
        reply: oneshot::Sender<Result<CommandResponse>>,
    ) {
        if self.shut_down {
            self.outbox.effects.push(SyncEffect::Reply {
                reply,
                result: Err(BotdashError::ShuttingDown("会话已结束".to_string())),
            });
            return;
        }

        let command = request.command;
        match self.lifecycle.begin(command) {
            Ok(true) => self.emit_lifecycle(),
            Ok(false) => {}
            Err(e) => {
                self.outbox.effects.push(SyncEffect::Reply { reply, result: Err(e) });
                return;
            }
        }

        if command == LifecycleCommand::Restart {
            self.append_diagnostic("\n🔄 正在重启 Bot，请稍候...\n");
        }

        let id = self.next_command_id;
        self.next_command_id += 1;
        self.waiting.insert(id, reply);
        info!("📤 发送命令 #{}: {}", id, command);
        self.outbox.effects.push(SyncEffect::SendCommand {
            id,
            command,
            payload: request.payload,
        });
    }

    fn on_command_result(
        &mut self,
        id: u64,
        command: LifecycleCommand,
        result: Result<CommandResponse>,
    ) {
        if self.lifecycle.complete(command, &result) {
            self.emit_lifecycle();
        }

        match &result {
            Ok(response) => {
                let message = response.message.clone();
                self.emit(event_builders::command_completed(command, message.clone()));
                match command {
                    LifecycleCommand::Start | LifecycleCommand::Stop => {
                        self.issue_poll(PollReason::CommandRefresh)
                    }
                    LifecycleCommand::Restart => {
                        self.schedule_poll(PollReason::RestartRefresh, self.timings.restart_refresh)
                    }
                    LifecycleCommand::ClearLogs => {
                        self.schedule_poll(PollReason::ClearFallback, self.timings.clear_fallback)
                    }
                    LifecycleCommand::SaveConfig => {
                        info!("💾 配置已保存，需要重新加载会话");
                        self.emit(event_builders::reload_requested(message));
                    }
                }
            }
            Err(e) => {
                self.emit(event_builders::command_failed(command, e.to_string()));
                if command == LifecycleCommand::Restart {
                    self.issue_poll(PollReason::CommandRefresh);
                }
            }
        }

        match self.waiting.remove(&id) {
            Some(reply) => self.outbox.effects.push(SyncEffect::Reply { reply, result }),
            None => warn!("命令 #{} 的调用方已不存在", id),
        }
    }

    // ========== 关闭 ==========

    fn teardown(&mut self) {
        if self.shut_down {
            return;
        }
        info!("🛑 日志同步会话结束");
        self.shut_down = true;

        if let Some((old, new)) = self.stream.teardown() {
            self.emit_channel(ChannelKind::Push, Some(old), new);
        }
        let old = self.poller.teardown();
        self.emit_channel(ChannelKind::Pull, old, ChannelStatus::Disconnected);

        for (_, reply) in self.waiting.drain() {
            self.outbox.effects.push(SyncEffect::Reply {
                reply,
                result: Err(BotdashError::ShuttingDown("会话已结束".to_string())),
            });
        }
    }
}
