use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::connection_state::ChannelState;
use crate::error::{BotdashError, Result};
use crate::events::{ClientEvent, EventFilter, EventManager, FilteredEventReceiver};
use crate::http_client::{BotApi, BotHttpClient, CommandResponse};
use crate::lifecycle::{
    AutoConfirm, CommandOutcome, ConfigDraft, ConfirmPrompt, ConfirmationHook, LifecycleCommand,
    LifecycleStatus, PendingOp,
};
use crate::log_buffer::LogBuffer;
use crate::network::{SocketIoTransport, StreamEvent, StreamTransport};
use crate::sync::{
    CommandRequest, Outbox, SyncCoordinator, SyncEffect, SyncMessage, SyncTimings, SyncView,
    TimerKind,
};
use crate::utils::TimeFormatter;

/// HTTP 客户端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 请求超时（秒），超时按传输失败处理
    pub request_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// 重连间隔上限（秒）
const MAX_RECONNECT_INTERVAL_SECS: f64 = 3600.0;
/// 退避倍数上限
const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// 推送通道重连配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// 初始重连间隔（秒）
    pub initial_interval_secs: f64,
    /// 最大重连间隔（秒）
    pub max_interval_secs: f64,
    /// 退避倍数
    pub backoff_multiplier: f64,
    /// 连接保持多久后重置间隔（秒）
    pub reset_after_success_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: 1.0,
            max_interval_secs: 15.0,
            backoff_multiplier: 2.0,
            reset_after_success_secs: 60,
        }
    }
}

/// 事件配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    /// 事件缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Botdash SDK 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotdashConfig {
    /// 控制面板地址，例如 http://127.0.0.1:5001
    pub base_url: String,
    /// 周期拉取间隔（秒）
    pub poll_interval_secs: u64,
    /// log_cleared 之后重新同步的延迟（秒）
    pub clear_resync_delay_secs: u64,
    /// clear_logs 成功后兜底拉取的延迟（秒）
    pub clear_fallback_delay_secs: u64,
    /// restart 成功后刷新的延迟（秒）
    pub restart_refresh_delay_secs: u64,
    /// 是否启用推送通道，关闭时只使用拉取
    pub stream_enabled: bool,
    /// 会话 Cookie（原样放入 Cookie 头）
    pub session_cookie: Option<String>,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 推送通道重连配置
    pub reconnect_config: ReconnectConfig,
    /// 事件配置
    pub event_config: EventConfig,
}

impl Default for BotdashConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5001".to_string(),
            poll_interval_secs: 10,
            clear_resync_delay_secs: 2,
            clear_fallback_delay_secs: 1,
            restart_refresh_delay_secs: 3,
            stream_enabled: true,
            session_cookie: None,
            http_client_config: HttpClientConfig::default(),
            reconnect_config: ReconnectConfig::default(),
            event_config: EventConfig::default(),
        }
    }
}

impl BotdashConfig {
    pub fn builder() -> BotdashConfigBuilder {
        BotdashConfigBuilder::new()
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| BotdashError::Config(format!("无效的 base_url {}: {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BotdashError::Config(format!(
                "base_url 只支持 http / https: {}",
                self.base_url
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(BotdashError::Config("poll_interval_secs 不能为 0".to_string()));
        }
        if self.http_client_config.request_timeout_secs == 0 {
            return Err(BotdashError::Config("request_timeout_secs 不能为 0".to_string()));
        }
        if self.event_config.buffer_size == 0 {
            return Err(BotdashError::Config("event buffer_size 不能为 0".to_string()));
        }
        let reconnect = &self.reconnect_config;
        let finite = reconnect.initial_interval_secs.is_finite()
            && reconnect.max_interval_secs.is_finite()
            && reconnect.backoff_multiplier.is_finite();
        if !finite
            || reconnect.initial_interval_secs <= 0.0
            || reconnect.max_interval_secs < reconnect.initial_interval_secs
            || reconnect.max_interval_secs > MAX_RECONNECT_INTERVAL_SECS
            || !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&reconnect.backoff_multiplier)
        {
            return Err(BotdashError::Config(format!("无效的重连配置: {:?}", reconnect)));
        }
        Ok(())
    }

    /// 拼接 HTTP 接口地址
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// 推送通道地址（http → ws，https → wss）
    pub fn stream_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| BotdashError::Config(format!("无效的 base_url {}: {}", self.base_url, e)))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(BotdashError::Config(format!("不支持的协议: {}", other)));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| BotdashError::Config(format!("无法转换协议: {}", self.base_url)))?;
        let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url.to_string())
    }
}

/// Botdash SDK 配置构建器
pub struct BotdashConfigBuilder {
    config: BotdashConfig,
}

impl Default for BotdashConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BotdashConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BotdashConfig::default(),
        }
    }

    pub fn base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn poll_interval(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs;
        self
    }

    pub fn clear_resync_delay(mut self, secs: u64) -> Self {
        self.config.clear_resync_delay_secs = secs;
        self
    }

    pub fn clear_fallback_delay(mut self, secs: u64) -> Self {
        self.config.clear_fallback_delay_secs = secs;
        self
    }

    pub fn restart_refresh_delay(mut self, secs: u64) -> Self {
        self.config.restart_refresh_delay_secs = secs;
        self
    }

    /// 关闭推送通道，只使用拉取
    pub fn stream_enabled(mut self, enabled: bool) -> Self {
        self.config.stream_enabled = enabled;
        self
    }

    pub fn session_cookie<S: Into<String>>(mut self, cookie: S) -> Self {
        self.config.session_cookie = Some(cookie.into());
        self
    }

    /// 设置 HTTP 客户端配置
    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.config.reconnect_config = config;
        self
    }

    pub fn event_config(mut self, config: EventConfig) -> Self {
        self.config.event_config = config;
        self
    }

    pub fn build(self) -> Result<BotdashConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// 协调器运行时
///
/// 单个任务按顺序消费 `SyncMessage`：先发布事件，再执行副作用。
/// 网络请求和定时器在独立任务中执行，结果回到同一个队列。
struct SyncRuntime {
    coordinator: SyncCoordinator,
    api: Arc<dyn BotApi>,
    event_manager: Arc<EventManager>,
    sender: mpsc::UnboundedSender<SyncMessage>,
    cancel: CancellationToken,
    request_timeout: Duration,
}

impl SyncRuntime {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<SyncMessage>) {
        let outbox = self.coordinator.start();
        self.dispatch(outbox).await;

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = receiver.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let outbox = self.coordinator.handle(message);
            if self.dispatch(outbox).await {
                break;
            }
        }
        self.cancel.cancel();
        debug!("同步运行时退出");
    }

    /// 返回 true 表示会话已结束
    async fn dispatch(&self, outbox: Outbox) -> bool {
        for event in outbox.events {
            self.event_manager.emit(event).await;
        }
        for effect in outbox.effects {
            self.execute(effect);
        }
        match outbox.stopped {
            Some(reply) => {
                self.cancel.cancel();
                let _ = reply.send(());
                true
            }
            None => false,
        }
    }

    fn execute(&self, effect: SyncEffect) {
        match effect {
            SyncEffect::FetchSnapshot(ticket) => {
                let api = self.api.clone();
                let sender = self.sender.clone();
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = api.fetch_logs() => result,
                    };
                    let _ = sender.send(SyncMessage::SnapshotResult { ticket, result });
                });
            }
            SyncEffect::Schedule { timer, delay } => {
                let sender = self.sender.clone();
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = sender.send(SyncMessage::TimerFired(timer));
                        }
                    }
                });
            }
            SyncEffect::SendCommand { id, command, payload } => {
                let api = self.api.clone();
                let sender = self.sender.clone();
                let cancel = self.cancel.clone();
                let timeout = self.request_timeout;
                tokio::spawn(async move {
                    let request = async {
                        match &payload {
                            Some(payload) => api.save_config(payload).await,
                            None => api.send_command(command).await,
                        }
                    };
                    let result = tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = tokio::time::timeout(timeout, request) => match result {
                            Ok(result) => result,
                            Err(_) => {
                                warn!("⏰ 命令 {} 超时 ({}s)", command, timeout.as_secs());
                                Err(BotdashError::Timeout(format!(
                                    "{} 超过 {}s 未响应",
                                    command,
                                    timeout.as_secs()
                                )))
                            }
                        },
                    };
                    let _ = sender.send(SyncMessage::CommandResult { id, command, result });
                });
            }
            SyncEffect::Reply { reply, result } => {
                let _ = reply.send(result);
            }
        }
    }
}

/// Botdash SDK 主接口
///
/// 一个实例对应一个会话：
/// - 拉取通道：启动时立即拉取，之后按 `poll_interval_secs` 周期拉取
/// - 推送通道：`stream_enabled` 时打开，自动重连
/// - 生命周期命令：start / stop / restart / clear_logs / save_config
///
/// 所有状态都由内部的协调器任务持有，对外通过事件和只读视图暴露。
pub struct BotdashSDK {
    config: BotdashConfig,
    event_manager: Arc<EventManager>,
    sender: mpsc::UnboundedSender<SyncMessage>,
    confirmation: Arc<dyn ConfirmationHook>,
    cancel: CancellationToken,
    shutting_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BotdashSDK {
    /// 初始化 SDK（reqwest 拉取通道 + Socket.IO 推送通道，自动确认）
    pub async fn initialize(config: BotdashConfig) -> Result<Arc<Self>> {
        Self::initialize_with_hook(config, Arc::new(AutoConfirm)).await
    }

    /// 初始化 SDK 并指定用户确认 Hook
    pub async fn initialize_with_hook(
        config: BotdashConfig,
        confirmation: Arc<dyn ConfirmationHook>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let api: Arc<dyn BotApi> = Arc::new(BotHttpClient::new(&config)?);
        let transport: Option<Arc<dyn StreamTransport>> = if config.stream_enabled {
            Some(Arc::new(SocketIoTransport::new(&config)?))
        } else {
            None
        };
        Self::initialize_with(config, api, transport, confirmation).await
    }

    /// 使用自定义的拉取 / 推送实现初始化 SDK
    ///
    /// `transport` 为 None 时只使用拉取通道。
    pub async fn initialize_with(
        config: BotdashConfig,
        api: Arc<dyn BotApi>,
        transport: Option<Arc<dyn StreamTransport>>,
        confirmation: Arc<dyn ConfirmationHook>,
    ) -> Result<Arc<Self>> {
        info!("正在初始化 BotdashSDK ({})...", config.base_url);
        config.validate()?;

        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size));
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let runtime = SyncRuntime {
            coordinator: SyncCoordinator::new(SyncTimings::from(&config)),
            api,
            event_manager: event_manager.clone(),
            sender: sender.clone(),
            cancel: cancel.clone(),
            request_timeout: Duration::from_secs(config.http_client_config.request_timeout_secs),
        };
        tasks.push(tokio::spawn(runtime.run(receiver)));
        tasks.push(Self::spawn_poll_ticker(
            Duration::from_secs(config.poll_interval_secs),
            sender.clone(),
            cancel.clone(),
        ));

        if let Some(transport) = transport {
            match transport.open(cancel.child_token()).await {
                Ok(events) => tasks.push(Self::spawn_stream_forwarder(events, sender.clone())),
                Err(e) => {
                    warn!("⚠️ 推送通道打开失败: {}", e);
                    let _ = sender.send(SyncMessage::StreamEvent(StreamEvent::Unavailable {
                        reason: e.to_string(),
                    }));
                }
            }
        } else {
            info!("推送通道已关闭，仅使用拉取模式");
        }

        info!("✅ BotdashSDK 初始化完成");
        Ok(Arc::new(Self {
            config,
            event_manager,
            sender,
            confirmation,
            cancel,
            shutting_down: AtomicBool::new(false),
            tasks: Mutex::new(tasks),
        }))
    }

    fn spawn_poll_ticker(
        period: Duration,
        sender: mpsc::UnboundedSender<SyncMessage>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            // 启动时的拉取由协调器发起，这里从第一个周期开始
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if sender.send(SyncMessage::TimerFired(TimerKind::PollTick)).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("周期拉取已停止");
        })
    }

    fn spawn_stream_forwarder(
        mut events: mpsc::UnboundedReceiver<StreamEvent>,
        sender: mpsc::UnboundedSender<SyncMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if sender.send(SyncMessage::StreamEvent(event)).is_err() {
                    break;
                }
            }
            debug!("推送事件转发结束");
        })
    }

    pub fn config(&self) -> &BotdashConfig {
        &self.config
    }

    // ========== 生命周期命令 ==========

    /// 启动 Bot
    pub async fn start(&self) -> Result<CommandOutcome> {
        self.execute_command(CommandRequest::new(LifecycleCommand::Start)).await
    }

    /// 停止 Bot
    pub async fn stop(&self) -> Result<CommandOutcome> {
        self.execute_command(CommandRequest::new(LifecycleCommand::Stop)).await
    }

    /// 重启 Bot（需要用户确认）
    ///
    /// 已有命令在途时直接拒绝，不弹出确认。
    pub async fn restart(&self) -> Result<CommandOutcome> {
        let pending = self.lifecycle_status().await?.pending;
        if pending != PendingOp::None {
            warn!("⚠️ 拒绝重启: {} 仍在途", pending);
            return Err(BotdashError::CommandInFlight { pending });
        }
        if !self.confirmation.confirm(ConfirmPrompt::RestartBot).await {
            info!("用户取消了重启");
            return Ok(CommandOutcome::Declined);
        }
        self.execute_command(CommandRequest::new(LifecycleCommand::Restart)).await
    }

    /// 清空服务器日志（需要用户确认）
    pub async fn clear_logs(&self) -> Result<CommandOutcome> {
        if !self.confirmation.confirm(ConfirmPrompt::ClearLogs).await {
            info!("用户取消了清空日志");
            return Ok(CommandOutcome::Declined);
        }
        self.execute_command(CommandRequest::new(LifecycleCommand::ClearLogs)).await
    }

    /// 保存配置（只提交非空字段）
    ///
    /// 成功后会发布 `ClientEvent::ReloadRequested`，调用方应重新建立会话。
    pub async fn save_config(&self, draft: &ConfigDraft) -> Result<CommandOutcome> {
        let payload = draft.to_payload();
        info!("💾 保存配置: {:?}", payload.keys().collect::<Vec<_>>());
        self.execute_command(CommandRequest::save_config(payload)).await
    }

    async fn execute_command(&self, request: CommandRequest) -> Result<CommandOutcome> {
        let command = request.command;
        let response: CommandResponse = self
            .request(|reply| SyncMessage::Command { request, reply })
            .await??;
        debug!("命令 {} 完成: {}", command, response.message);
        Ok(CommandOutcome::Completed {
            message: response.message,
        })
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SyncMessage,
    ) -> Result<T> {
        if self.is_shutting_down() {
            return Err(BotdashError::ShuttingDown("SDK 已关闭".to_string()));
        }
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(message(reply))
            .map_err(|_| BotdashError::ShuttingDown("同步任务已退出".to_string()))?;
        receiver
            .await
            .map_err(|_| BotdashError::ShuttingDown("同步任务已退出".to_string()))
    }

    // ========== 状态读取 ==========

    /// 当前完整视图（日志、运行状态、两个通道）
    pub async fn view(&self) -> Result<SyncView> {
        self.request(|reply| SyncMessage::Inspect { reply }).await
    }

    pub async fn log_content(&self) -> Result<String> {
        Ok(self.view().await?.content)
    }

    pub async fn lifecycle_status(&self) -> Result<LifecycleStatus> {
        Ok(self.view().await?.lifecycle)
    }

    /// (拉取通道, 推送通道)
    pub async fn channel_states(&self) -> Result<(ChannelState, ChannelState)> {
        let view = self.view().await?;
        Ok((view.pull, view.push))
    }

    /// 把当前日志导出到 `dir/bot_logs_<时间>.txt`
    pub async fn export_logs(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let content = self.log_content().await?;
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(LogBuffer::export_file_name(TimeFormatter::now_millis()));
        tokio::fs::write(&path, content.as_bytes()).await?;
        info!("📥 日志已导出: {} ({} bytes)", path.display(), content.len());
        Ok(path)
    }

    // ========== 事件 ==========

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_manager.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        self.event_manager.subscribe_filtered(filter)
    }

    pub fn event_manager(&self) -> Arc<EventManager> {
        self.event_manager.clone()
    }

    // ========== 关闭 ==========

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 关闭会话：停止周期拉取、关闭推送通道、拒绝后续命令
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("正在关闭 BotdashSDK...");

        let (reply, receiver) = oneshot::channel();
        if self.sender.send(SyncMessage::Shutdown { reply }).is_ok() {
            let _ = receiver.await;
        }
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("后台任务异常退出: {}", e);
            }
        }

        info!("BotdashSDK 关闭完成");
        Ok(())
    }
}

impl Drop for BotdashSDK {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
