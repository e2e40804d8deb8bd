//! 用户确认 Hook
//!
//! restart 和 clear_logs 属于破坏性操作，发出请求前需要调用方（UI 层）确认。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 需要确认的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmPrompt {
    /// 重启 Bot
    RestartBot,
    /// 清空服务器日志
    ClearLogs,
}

impl ConfirmPrompt {
    /// 展示给用户的提示文本
    pub fn message(&self) -> &'static str {
        match self {
            ConfirmPrompt::RestartBot => "确定要重启 Bot 吗？",
            ConfirmPrompt::ClearLogs => "确定要清空所有日志吗？此操作无法撤销。",
        }
    }
}

/// 用户确认 Hook
///
/// 返回 false 时命令被放弃，不会发出任何请求，也不会修改任何状态。
#[async_trait]
pub trait ConfirmationHook: Send + Sync {
    async fn confirm(&self, prompt: ConfirmPrompt) -> bool;
}

/// 始终确认（无 UI 的客户端 / 测试）
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

#[async_trait]
impl ConfirmationHook for AutoConfirm {
    async fn confirm(&self, prompt: ConfirmPrompt) -> bool {
        debug!("AutoConfirm: {:?}", prompt);
        true
    }
}
