//! Botdash SDK - Bot 控制面板日志同步与生命周期控制客户端
//!
//! 本 SDK 把一个 Bot 控制面板的日志和运行状态同步到本地，包括：
//! - 📥 拉取通道：启动时及每 10 秒拉取一次完整日志快照
//! - 📡 推送通道：Socket.IO 实时日志流，断线自动重连，不可用时退化为仅拉取
//! - 🧠 单写入者协调器：两个通道的结果按权威规则合并，慢到的旧快照不会覆盖新日志
//! - ⚙️ 生命周期命令：start / stop / restart / clear_logs / save_config，同一时刻最多一个在途
//! - 🔔 事件系统：日志变更、通道状态、运行状态统一通过事件广播
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use botdash_sdk::{BotdashConfig, BotdashSDK, ClientEvent, ConfigDraft};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 配置 SDK
//!     let config = BotdashConfig::builder()
//!         .base_url("http://127.0.0.1:5001")
//!         .poll_interval(10)
//!         .build()?;
//!
//!     // 初始化 SDK
//!     let sdk = BotdashSDK::initialize(config).await?;
//!
//!     // 订阅日志变更
//!     let mut events = sdk.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let ClientEvent::LogUpdated(update) = event {
//!                 println!("[{}] {} bytes", update.label, update.content.len());
//!             }
//!         }
//!     });
//!
//!     // 启动 Bot
//!     sdk.start().await?;
//!
//!     // 保存配置（空字段不会提交）
//!     let draft = ConfigDraft::new().with("JOGO_SLUG", "abc");
//!     sdk.save_config(&draft).await?;
//!
//!     // 关闭 SDK
//!     sdk.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod version;
pub mod utils;
pub mod connection_state;
pub mod log_buffer;
pub mod events;
pub mod lifecycle;
pub mod http_client;
pub mod rate_limiter;
pub mod network;
pub mod sync;
pub mod sdk;

// 重新导出核心类型，方便使用
pub use error::{BotdashError, ErrorKind, Result};
pub use sdk::{BotdashConfig, BotdashConfigBuilder, BotdashSDK, EventConfig, HttpClientConfig, ReconnectConfig};
pub use events::{ClientEvent, EventFilter, EventManager, FilteredEventReceiver};
pub use log_buffer::{LogBuffer, LogSource, LogUpdate};
pub use connection_state::{ChannelKind, ChannelState, ChannelStatus};
pub use lifecycle::{
    AutoConfirm, CommandOutcome, ConfigDraft, ConfigPayload, ConfirmPrompt, ConfirmationHook,
    LifecycleCommand, LifecycleStatus, PendingOp, ReportedStatus,
};
pub use http_client::{BotApi, BotHttpClient, CommandResponse, LogSnapshot};
pub use network::{SocketIoTransport, StreamEvent, StreamTransport};
pub use rate_limiter::ReconnectRateLimiter;
pub use sync::SyncView;
pub use utils::TimeFormatter;
