//! Bot 生命周期管理
//!
//! 管理 start / stop / restart / clear_logs / save_config 命令的在途状态，
//! 以及服务器报告的 Bot 运行状态。
//!
//! 规则：
//! - 同一时刻最多一个 start/stop/restart 在途，新的命令直接拒绝（COMMAND_IN_FLIGHT）
//! - `pending` 只在服务器给出明确响应（成功或失败）或超时后清除
//! - 失败时绝不改写 `reported`

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BotdashError, Result};
use crate::http_client::CommandResponse;

/// 服务器报告的 Bot 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportedStatus {
    Running,
    Stopped,
    Unknown,
}

impl ReportedStatus {
    /// 解析服务器响应里的状态字段
    pub fn from_server_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_lowercase().as_str() {
            "running" | "rodando" => Some(ReportedStatus::Running),
            "stopped" | "parado" => Some(ReportedStatus::Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReportedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportedStatus::Running => write!(f, "运行中"),
            ReportedStatus::Stopped => write!(f, "已停止"),
            ReportedStatus::Unknown => write!(f, "未知"),
        }
    }
}

/// 在途的生命周期操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingOp {
    None,
    Start,
    Stop,
    Restart,
}

impl std::fmt::Display for PendingOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingOp::None => write!(f, "NONE"),
            PendingOp::Start => write!(f, "START"),
            PendingOp::Stop => write!(f, "STOP"),
            PendingOp::Restart => write!(f, "RESTART"),
        }
    }
}

/// 生命周期命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleCommand {
    Start,
    Stop,
    Restart,
    ClearLogs,
    SaveConfig,
}

impl LifecycleCommand {
    /// 命令对应的 HTTP 路径（均为 POST）
    pub fn path(&self) -> &'static str {
        match self {
            LifecycleCommand::Start => "/start_bot",
            LifecycleCommand::Stop => "/stop_bot",
            LifecycleCommand::Restart => "/restart_bot",
            LifecycleCommand::ClearLogs => "/clear_logs",
            LifecycleCommand::SaveConfig => "/save_config",
        }
    }

    /// 受在途互斥约束的命令对应的 pending 值
    pub fn pending_op(&self) -> Option<PendingOp> {
        match self {
            LifecycleCommand::Start => Some(PendingOp::Start),
            LifecycleCommand::Stop => Some(PendingOp::Stop),
            LifecycleCommand::Restart => Some(PendingOp::Restart),
            LifecycleCommand::ClearLogs | LifecycleCommand::SaveConfig => None,
        }
    }

    /// 成功后默认推断的运行状态
    fn implied_status(&self) -> Option<ReportedStatus> {
        match self {
            LifecycleCommand::Start | LifecycleCommand::Restart => Some(ReportedStatus::Running),
            LifecycleCommand::Stop => Some(ReportedStatus::Stopped),
            LifecycleCommand::ClearLogs | LifecycleCommand::SaveConfig => None,
        }
    }
}

impl std::fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleCommand::Start => write!(f, "start"),
            LifecycleCommand::Stop => write!(f, "stop"),
            LifecycleCommand::Restart => write!(f, "restart"),
            LifecycleCommand::ClearLogs => write!(f, "clear_logs"),
            LifecycleCommand::SaveConfig => write!(f, "save_config"),
        }
    }
}

/// Bot 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStatus {
    pub reported: ReportedStatus,
    pub pending: PendingOp,
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        Self {
            reported: ReportedStatus::Unknown,
            pending: PendingOp::None,
        }
    }
}

/// 命令的最终结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// 服务器已执行，message 为服务器返回的提示
    Completed { message: String },
    /// 用户取消了确认，没有发出请求
    Declined,
}

/// 生命周期控制器
///
/// 纯状态机：不发请求、不持有定时器，由 `SyncCoordinator` 驱动。
#[derive(Debug, Default)]
pub struct LifecycleController {
    status: LifecycleStatus,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.status
    }

    /// 命令发出前调用：检查在途互斥并乐观设置 pending
    ///
    /// 返回 true 表示状态发生了变化（需要通知 UI）
    pub fn begin(&mut self, command: LifecycleCommand) -> Result<bool> {
        let Some(op) = command.pending_op() else {
            return Ok(false);
        };

        if self.status.pending != PendingOp::None {
            warn!(
                "⚠️ 拒绝命令 {}: {} 仍在途",
                command, self.status.pending
            );
            return Err(BotdashError::CommandInFlight {
                pending: self.status.pending,
            });
        }

        self.status.pending = op;
        info!("⏳ 命令已发出: {} (pending={})", command, op);
        Ok(true)
    }

    /// 收到响应（成功 / 失败 / 超时）后调用
    ///
    /// 返回 true 表示状态发生了变化
    pub fn complete(&mut self, command: LifecycleCommand, result: &Result<CommandResponse>) -> bool {
        let before = self.status;

        if let Some(op) = command.pending_op() {
            if self.status.pending == op {
                self.status.pending = PendingOp::None;
            } else {
                debug!(
                    "命令 {} 完成时 pending={}，不匹配，忽略 pending 清理",
                    command, self.status.pending
                );
            }
        }

        match result {
            Ok(response) => {
                let reported = response
                    .status
                    .as_deref()
                    .and_then(ReportedStatus::from_server_hint)
                    .or_else(|| command.implied_status());
                if let Some(reported) = reported {
                    self.status.reported = reported;
                }
                info!("✅ 命令完成: {} -> {}", command, response.message);
            }
            Err(e) => {
                // 失败时保持 reported 不变
                warn!("❌ 命令失败: {}: {}", command, e);
            }
        }

        self.status != before
    }
}

mod config_draft;
mod confirm_hook;

pub use config_draft::{fields, ConfigDraft, ConfigPayload};
pub use confirm_hook::{AutoConfirm, ConfirmPrompt, ConfirmationHook};

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(message: &str) -> Result<CommandResponse> {
        Ok(CommandResponse {
            message: message.to_string(),
            status: None,
        })
    }

    #[test]
    fn test_pending_is_exclusive() {
        let mut controller = LifecycleController::new();
        assert!(controller.begin(LifecycleCommand::Restart).unwrap());
        assert_eq!(controller.status().pending, PendingOp::Restart);

        let err = controller.begin(LifecycleCommand::Restart).unwrap_err();
        assert!(matches!(
            err,
            BotdashError::CommandInFlight { pending: PendingOp::Restart }
        ));
        assert!(controller.begin(LifecycleCommand::Start).is_err());

        // clear_logs / save_config 不受互斥约束
        assert!(!controller.begin(LifecycleCommand::ClearLogs).unwrap());
        assert!(!controller.begin(LifecycleCommand::SaveConfig).unwrap());
    }

    #[test]
    fn test_success_updates_reported() {
        let mut controller = LifecycleController::new();
        controller.begin(LifecycleCommand::Start).unwrap();
        assert!(controller.complete(LifecycleCommand::Start, &ok("Bot iniciado com sucesso!")));
        assert_eq!(
            controller.status(),
            LifecycleStatus {
                reported: ReportedStatus::Running,
                pending: PendingOp::None,
            }
        );

        controller.begin(LifecycleCommand::Stop).unwrap();
        controller.complete(LifecycleCommand::Stop, &ok("Bot parado com sucesso."));
        assert_eq!(controller.status().reported, ReportedStatus::Stopped);
    }

    #[test]
    fn test_server_status_hint_wins() {
        let mut controller = LifecycleController::new();
        controller.begin(LifecycleCommand::Restart).unwrap();
        let response = Ok(CommandResponse {
            message: "restart scheduled".to_string(),
            status: Some("Stopped".to_string()),
        });
        controller.complete(LifecycleCommand::Restart, &response);
        assert_eq!(controller.status().reported, ReportedStatus::Stopped);
    }

    #[test]
    fn test_failure_keeps_reported() {
        let mut controller = LifecycleController::new();
        controller.begin(LifecycleCommand::Start).unwrap();
        controller.complete(LifecycleCommand::Start, &ok("started"));

        controller.begin(LifecycleCommand::Stop).unwrap();
        let failure: Result<CommandResponse> = Err(BotdashError::Timeout("30s".to_string()));
        assert!(controller.complete(LifecycleCommand::Stop, &failure));
        assert_eq!(controller.status().reported, ReportedStatus::Running);
        assert_eq!(controller.status().pending, PendingOp::None);
    }

    #[test]
    fn test_server_hint_parsing() {
        assert_eq!(ReportedStatus::from_server_hint(" RUNNING "), Some(ReportedStatus::Running));
        assert_eq!(ReportedStatus::from_server_hint("Parado"), Some(ReportedStatus::Stopped));
        assert_eq!(ReportedStatus::from_server_hint("sleeping"), None);
    }
}
