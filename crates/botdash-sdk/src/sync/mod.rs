/// 日志同步模块
///
/// 职责：
/// - 拉取通道：周期性拉取完整快照（SnapshotPoller）
/// - 推送通道：管理实时事件流（StreamSubscriber）
/// - 协调：串行化所有修改，裁决两个通道的冲突（SyncCoordinator）
///
/// 所有输入（网络结果、推送事件、定时器、用户命令）都以 `SyncMessage`
/// 的形式进入同一个队列，按到达顺序逐条处理。

pub mod coordinator;
pub mod snapshot_poller;
pub mod stream_subscriber;

pub use coordinator::{Outbox, SyncCoordinator, SyncTimings, SyncView};
pub use snapshot_poller::SnapshotPoller;
pub use stream_subscriber::{StreamAction, StreamReaction, StreamSubscriber};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::http_client::{CommandResponse, LogSnapshot};
use crate::lifecycle::{ConfigPayload, LifecycleCommand};
use crate::network::StreamEvent;

/// 发起拉取的原因（仅用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollReason {
    /// 启动时立即拉取
    Startup,
    /// 周期拉取
    Interval,
    /// log_cleared 之后的重新同步
    ClearResync,
    /// clear_logs 命令成功后的兜底拉取
    ClearFallback,
    /// restart 成功后的延迟刷新
    RestartRefresh,
    /// start / stop 完成后的刷新
    CommandRefresh,
}

impl std::fmt::Display for PollReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PollReason::Startup => "startup",
            PollReason::Interval => "interval",
            PollReason::ClearResync => "clear_resync",
            PollReason::ClearFallback => "clear_fallback",
            PollReason::RestartRefresh => "restart_refresh",
            PollReason::CommandRefresh => "command_refresh",
        };
        write!(f, "{}", name)
    }
}

/// 拉取请求凭据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollTicket {
    /// 会话内单调递增的序号
    pub seq: u64,
    /// 发起时 LogBuffer 的修改序号
    pub issued_at_revision: u64,
    pub reason: PollReason,
}

/// 定时器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// 周期拉取
    PollTick,
    /// 一次性延迟拉取
    DelayedPoll(PollReason),
}

/// 用户命令请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: LifecycleCommand,
    /// 仅 save_config 携带
    pub payload: Option<ConfigPayload>,
}

impl CommandRequest {
    pub fn new(command: LifecycleCommand) -> Self {
        Self {
            command,
            payload: None,
        }
    }

    pub fn save_config(payload: ConfigPayload) -> Self {
        Self {
            command: LifecycleCommand::SaveConfig,
            payload: Some(payload),
        }
    }
}

/// 协调器队列中的消息
pub enum SyncMessage {
    /// 拉取结果
    SnapshotResult {
        ticket: PollTicket,
        result: Result<LogSnapshot>,
    },
    /// 推送通道事件
    StreamEvent(StreamEvent),
    /// 命令响应（含超时）
    CommandResult {
        id: u64,
        command: LifecycleCommand,
        result: Result<CommandResponse>,
    },
    /// 定时器到期
    TimerFired(TimerKind),
    /// 用户命令，响应在服务器给出结果后回复
    Command {
        request: CommandRequest,
        reply: oneshot::Sender<Result<CommandResponse>>,
    },
    /// 读取当前状态
    Inspect { reply: oneshot::Sender<SyncView> },
    /// 关闭会话
    Shutdown { reply: oneshot::Sender<()> },
}

impl SyncMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::SnapshotResult { .. } => "SNAPSHOT_RESULT",
            SyncMessage::StreamEvent(_) => "STREAM_EVENT",
            SyncMessage::CommandResult { .. } => "COMMAND_RESULT",
            SyncMessage::TimerFired(_) => "TIMER_FIRED",
            SyncMessage::Command { .. } => "COMMAND",
            SyncMessage::Inspect { .. } => "INSPECT",
            SyncMessage::Shutdown { .. } => "SHUTDOWN",
        }
    }
}

/// 协调器要求运行时执行的副作用
///
/// 网络请求和定时器都在独立任务中执行，结果以 `SyncMessage` 形式回到队列。
pub enum SyncEffect {
    /// 拉取快照
    FetchSnapshot(PollTicket),
    /// 一次性定时器
    Schedule { timer: TimerKind, delay: Duration },
    /// 发送命令
    SendCommand {
        id: u64,
        command: LifecycleCommand,
        payload: Option<ConfigPayload>,
    },
    /// 回复调用方
    Reply {
        reply: oneshot::Sender<Result<CommandResponse>>,
        result: Result<CommandResponse>,
    },
}

impl std::fmt::Debug for SyncEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncEffect::FetchSnapshot(ticket) => f.debug_tuple("FetchSnapshot").field(ticket).finish(),
            SyncEffect::Schedule { timer, delay } => f
                .debug_struct("Schedule")
                .field("timer", timer)
                .field("delay", delay)
                .finish(),
            SyncEffect::SendCommand { id, command, payload } => f
                .debug_struct("SendCommand")
                .field("id", id)
                .field("command", command)
                .field("payload", payload)
                .finish(),
            SyncEffect::Reply { result, .. } => f.debug_struct("Reply").field("result", result).finish(),
        }
    }
}
