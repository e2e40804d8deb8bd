//! HTTP 客户端模块 - 拉取通道与生命周期命令
//!
//! 本模块使用 reqwest 访问 Bot 控制面板的 HTTP 接口：
//! - `GET /api/logs` 拉取完整日志快照
//! - `POST /start_bot` 等生命周期命令
//! - `POST /save_config` 保存配置（只提交非空字段）

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{BotdashError, Result};
use crate::lifecycle::{ConfigPayload, LifecycleCommand};
use crate::sdk::BotdashConfig;

/// 日志快照响应（GET /api/logs）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSnapshot {
    pub logs: String,
    #[serde(default)]
    pub file_size: u64,
}

/// 命令响应（{message}，可选 status 字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// 非 2xx 响应体（{message} 或 {error}）
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Bot 控制面板 API
///
/// 拉取通道和命令端点的抽象，测试中由 `MockBotApi` 替换。
#[async_trait]
pub trait BotApi: Send + Sync {
    /// 拉取完整日志快照
    async fn fetch_logs(&self) -> Result<LogSnapshot>;

    /// 发送无请求体的生命周期命令
    async fn send_command(&self, command: LifecycleCommand) -> Result<CommandResponse>;

    /// 保存配置
    async fn save_config(&self, payload: &ConfigPayload) -> Result<CommandResponse>;
}

/// 基于 reqwest 的 `BotApi` 实现
pub struct BotHttpClient {
    client: Client,
    config: BotdashConfig,
}

impl BotHttpClient {
    /// 创建新的 HTTP 客户端
    pub fn new(config: &BotdashConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&crate::version::user_agent())
                .map_err(|e| BotdashError::Config(format!("无效的 User-Agent: {}", e)))?,
        );
        if let Some(cookie) = &config.session_cookie {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(cookie)
                    .map_err(|e| BotdashError::Config(format!("无效的会话 Cookie: {}", e)))?,
            );
        }

        let http = &config.http_client_config;
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .build()
            .map_err(|e| BotdashError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ HTTP 客户端已创建 (base_url: {})", config.base_url);

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn post(&self, path: &str, body: Option<&ConfigPayload>) -> Result<CommandResponse> {
        let url = self.config.api_url(path);
        debug!("📤 POST {}", url);

        let mut request = self.client.post(&url);
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|e| {
            error!("❌ 请求失败: {}: {}", url, e);
            BotdashError::from(e)
        })?;

        let status = response.status();
        let text = response.text().await?;
        parse_command_response(status, &text)
    }
}

#[async_trait]
impl BotApi for BotHttpClient {
    async fn fetch_logs(&self) -> Result<LogSnapshot> {
        let url = self.config.api_url("/api/logs");
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown");
            return Err(BotdashError::Transport(format!(
                "HTTP {} {}",
                status.as_u16(),
                reason
            )));
        }

        let text = response.text().await?;
        let snapshot: LogSnapshot = serde_json::from_str(&text)
            .map_err(|e| BotdashError::Transport(format!("无法解析日志响应: {}", e)))?;
        debug!("📥 日志快照: {} bytes (file_size={})", snapshot.logs.len(), snapshot.file_size);
        Ok(snapshot)
    }

    async fn send_command(&self, command: LifecycleCommand) -> Result<CommandResponse> {
        self.post(command.path(), None).await
    }

    async fn save_config(&self, payload: &ConfigPayload) -> Result<CommandResponse> {
        self.post(LifecycleCommand::SaveConfig.path(), Some(payload)).await
    }
}

/// 解析命令响应
///
/// - 2xx + `{message}`：成功
/// - 非 2xx + `{message}` / `{error}`：COMMAND_FAILURE
/// - 其他（无法解析）：TRANSPORT_FAILURE
pub(crate) fn parse_command_response(status: StatusCode, body: &str) -> Result<CommandResponse> {
    if status.is_success() {
        return serde_json::from_str::<CommandResponse>(body).map_err(|e| {
            BotdashError::Transport(format!("无法解析命令响应 (HTTP {}): {}", status.as_u16(), e))
        });
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { message: Some(text), .. }) | Ok(ErrorBody { error: Some(text), .. }) => {
            Err(BotdashError::CommandFailure(text))
        }
        _ => Err(BotdashError::Transport(format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        ))),
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;

    #[derive(Default)]
    struct MockState {
        logs: String,
        fetch_results: VecDeque<Result<LogSnapshot>>,
        fetch_delay: Duration,
        fetch_count: usize,
        command_results: HashMap<LifecycleCommand, VecDeque<Result<CommandResponse>>>,
        command_delay: Duration,
        commands: Vec<LifecycleCommand>,
        saved_payloads: Vec<ConfigPayload>,
    }

    /// 测试用：可编排响应的 `BotApi`
    ///
    /// 没有预置结果时，`fetch_logs` 返回 `set_logs` 设置的内容，命令返回 `{message: "ok"}`。
    #[derive(Clone, Default)]
    pub struct MockBotApi {
        state: Arc<Mutex<MockState>>,
    }

    impl MockBotApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_logs(&self, logs: &str) {
            self.state.lock().logs = logs.to_string();
        }

        pub fn push_fetch_result(&self, result: Result<LogSnapshot>) {
            self.state.lock().fetch_results.push_back(result);
        }

        pub fn set_fetch_delay(&self, delay: Duration) {
            self.state.lock().fetch_delay = delay;
        }

        pub fn push_command_result(&self, command: LifecycleCommand, result: Result<CommandResponse>) {
            self.state
                .lock()
                .command_results
                .entry(command)
                .or_default()
                .push_back(result);
        }

        pub fn set_command_delay(&self, delay: Duration) {
            self.state.lock().command_delay = delay;
        }

        pub fn fetch_count(&self) -> usize {
            self.state.lock().fetch_count
        }

        pub fn commands(&self) -> Vec<LifecycleCommand> {
            self.state.lock().commands.clone()
        }

        pub fn saved_payloads(&self) -> Vec<ConfigPayload> {
            self.state.lock().saved_payloads.clone()
        }

        fn next_command_result(&self, command: LifecycleCommand) -> (Duration, Result<CommandResponse>) {
            let mut state = self.state.lock();
            state.commands.push(command);
            let result = state
                .command_results
                .get_mut(&command)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| {
                    Ok(CommandResponse {
                        message: "ok".to_string(),
                        status: None,
                    })
                });
            (state.command_delay, result)
        }
    }

    #[async_trait]
    impl BotApi for MockBotApi {
        async fn fetch_logs(&self) -> Result<LogSnapshot> {
            let (delay, result) = {
                let mut state = self.state.lock();
                state.fetch_count += 1;
                let result = state.fetch_results.pop_front().unwrap_or_else(|| {
                    Ok(LogSnapshot {
                        logs: state.logs.clone(),
                        file_size: state.logs.len() as u64,
                    })
                });
                (state.fetch_delay, result)
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }

        async fn send_command(&self, command: LifecycleCommand) -> Result<CommandResponse> {
            let (delay, result) = self.next_command_result(command);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }

        async fn save_config(&self, payload: &ConfigPayload) -> Result<CommandResponse> {
            self.state.lock().saved_payloads.push(payload.clone());
            let (delay, result) = self.next_command_result(LifecycleCommand::SaveConfig);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }
}

#[cfg(test)]
pub use test_helpers::MockBotApi;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_response() {
        let response = parse_command_response(
            StatusCode::OK,
            r#"{"message":"Bot iniciado com sucesso!"}"#,
        )
        .unwrap();
        assert_eq!(response.message, "Bot iniciado com sucesso!");
        assert_eq!(response.status, None);

        let response = parse_command_response(
            StatusCode::OK,
            r#"{"message":"ok","status":"running"}"#,
        )
        .unwrap();
        assert_eq!(response.status.as_deref(), Some("running"));
    }

    #[test]
    fn test_parse_failure_response() {
        let err = parse_command_response(
            StatusCode::BAD_REQUEST,
            r#"{"message":"Bot já está rodando."}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BotdashError::CommandFailure(ref m) if m == "Bot já está rodando."));

        let err = parse_command_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":"disk full"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BotdashError::CommandFailure(ref m) if m == "disk full"));

        let err = parse_command_response(StatusCode::BAD_GATEWAY, "<html>").unwrap_err();
        assert!(err.is_transport_failure());

        let err = parse_command_response(StatusCode::OK, "not json").unwrap_err();
        assert!(err.is_transport_failure());
    }

    #[test]
    fn test_log_snapshot_defaults_file_size() {
        let snapshot: LogSnapshot = serde_json::from_str(r#"{"logs":"A\nB\n"}"#).unwrap();
        assert_eq!(snapshot.logs, "A\nB\n");
        assert_eq!(snapshot.file_size, 0);
    }

    #[test]
    fn test_client_rejects_invalid_cookie() {
        let config = BotdashConfig::builder()
            .session_cookie("session=\nbroken")
            .build()
            .unwrap();
        assert!(matches!(
            BotHttpClient::new(&config),
            Err(BotdashError::Config(_))
        ));
    }
}
