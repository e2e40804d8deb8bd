use thiserror::Error;

use crate::lifecycle::PendingOp;

/// 错误分类（对外暴露的稳定分类，UI 层据此决定提示方式）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 拉取/推送通道不可达或非 2xx
    TransportFailure,
    /// 当前环境不支持推送通道，退化为仅拉取模式
    ChannelUnavailable,
    /// 已有生命周期命令在途，新命令被拒绝
    CommandInFlight,
    /// 服务器拒绝或执行命令出错
    CommandFailure,
    /// 内部错误（序列化、配置、IO 等）
    Internal,
}

#[derive(Debug, Error)]
pub enum BotdashError {
    #[error("Transport error: {0}")]
    Transport(String),

    /// 请求超时（按传输失败处理）
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Command in flight: {pending} is still pending")]
    CommandInFlight { pending: PendingOp },

    #[error("Command failed: {0}")]
    CommandFailure(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

impl From<serde_json::Error> for BotdashError {
    fn from(error: serde_json::Error) -> Self {
        BotdashError::Serialization(error.to_string())
    }
}

impl From<reqwest::Error> for BotdashError {
    fn from(error: reqwest::Error) -> Self {
        // 响应体截断 / 解码失败同样属于传输层失败
        if error.is_timeout() {
            BotdashError::Timeout(error.to_string())
        } else {
            BotdashError::Transport(error.to_string())
        }
    }
}

impl BotdashError {
    /// 获取错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            BotdashError::Transport(_) | BotdashError::Timeout(_) => ErrorKind::TransportFailure,
            BotdashError::ChannelUnavailable(_) => ErrorKind::ChannelUnavailable,
            BotdashError::CommandInFlight { .. } => ErrorKind::CommandInFlight,
            BotdashError::CommandFailure(_) => ErrorKind::CommandFailure,
            BotdashError::Serialization(_)
            | BotdashError::Config(_)
            | BotdashError::Io(_)
            | BotdashError::ShuttingDown(_) => ErrorKind::Internal,
        }
    }

    /// 是否属于传输层失败（含超时）
    pub fn is_transport_failure(&self) -> bool {
        self.kind() == ErrorKind::TransportFailure
    }
}

pub type Result<T> = std::result::Result<T, BotdashError>;
