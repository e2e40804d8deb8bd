//! 控制面板同步演示
//!
//! 连接本地控制面板，打印日志变更和通道状态，然后依次执行 start / restart。
//!
//! 运行：`cargo run --example dashboard_demo -- http://127.0.0.1:5001`

use std::time::Duration;

use botdash_sdk::{BotdashConfig, BotdashSDK, ClientEvent, CommandOutcome};
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:5001".to_string());

    println!("\n🚀 控制面板同步演示 ({})\n", base_url);
    println!("====================================\n");

    let config = BotdashConfig::builder().base_url(base_url).build()?;

    println!("📦 正在初始化 SDK...");
    let sdk = BotdashSDK::initialize(config).await?;
    println!("✅ SDK 初始化完成\n");

    let mut events = sdk.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::LogUpdated(update) => {
                    let tail: String = update
                        .content
                        .lines()
                        .last()
                        .unwrap_or_default()
                        .chars()
                        .take(80)
                        .collect();
                    println!("📜 [{}] rev={} {}", update.label, update.revision, tail);
                }
                ClientEvent::ChannelStateChanged { channel, old_status, new_status, .. } => {
                    println!("🔌 [{}] {} → {}", channel, old_status, new_status);
                }
                ClientEvent::LifecycleStatusChanged { status, .. } => {
                    println!("🤖 Bot: {} (pending={})", status.reported, status.pending);
                }
                ClientEvent::CommandCompleted { command, message, .. } => {
                    println!("✅ {}: {}", command, message);
                }
                ClientEvent::CommandFailed { command, error, .. } => {
                    println!("❌ {}: {}", command, error);
                }
                ClientEvent::ReloadRequested { message, .. } => {
                    println!("🔄 需要重新加载: {}", message);
                }
            }
        }
    });

    sleep(Duration::from_secs(3)).await;

    println!("\n【启动 Bot】");
    match sdk.start().await {
        Ok(CommandOutcome::Completed { message }) => println!("   {}", message),
        Ok(CommandOutcome::Declined) => println!("   已取消"),
        Err(e) => println!("   失败: {} ({:?})", e, e.kind()),
    }

    sleep(Duration::from_secs(5)).await;

    println!("\n【重启 Bot】");
    if let Err(e) = sdk.restart().await {
        println!("   失败: {}", e);
    }

    sleep(Duration::from_secs(10)).await;

    let view = sdk.view().await?;
    println!("\n【当前状态】");
    println!("   {}", view.info_line);
    println!("   {}", view.pull.summary());
    println!("   {}", view.push.summary());

    let path = sdk.export_logs(std::env::temp_dir()).await?;
    println!("   日志已导出: {}", path.display());

    sdk.shutdown().await?;
    println!("\n✅ 演示结束");
    Ok(())
}
