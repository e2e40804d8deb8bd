//! SDK 版本信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// HTTP / WebSocket 请求携带的 User-Agent
pub fn user_agent() -> String {
    format!("botdash-sdk/{}", SDK_VERSION)
}
