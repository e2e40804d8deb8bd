//! 重连限流模块
//!
//! 推送通道断开后由传输层自动重连，本模块控制重连节奏，防止重连风暴。
//!
//! | 参数 | 默认值 |
//! |------|--------|
//! | 初始间隔 | 1 秒 |
//! | 最大间隔 | 15 秒 |
//! | 退避倍数 | 2 |
//! | 稳定连接多久后重置 | 60 秒 |

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::sdk::ReconnectConfig;

/// 单次等待上限
const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// 秒数转 Duration；NaN、负数归零，超出上限的值截断到 `MAX_DELAY`
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_DELAY)
        .min(MAX_DELAY)
}

#[derive(Debug)]
struct ReconnectState {
    /// 当前退避间隔
    current_interval: Duration,
    /// 上次尝试时间
    last_attempt: Option<Instant>,
    /// 上次连接成功时间
    last_success: Option<Instant>,
    /// 连续尝试次数
    attempt_count: u64,
}

/// 重连限流器
///
/// 指数退避：1s → 2s → 4s → 8s → 15s 封顶。
/// 连接保持超过 `reset_after_success_secs` 后断开，间隔回到初始值；
/// 连上即断的服务器不会让间隔归零。
#[derive(Debug)]
pub struct ReconnectRateLimiter {
    config: ReconnectConfig,
    state: Mutex<ReconnectState>,
}

impl ReconnectRateLimiter {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: Mutex::new(ReconnectState {
                current_interval: secs_to_duration(config.initial_interval_secs),
                last_attempt: None,
                last_success: None,
                attempt_count: 0,
            }),
            config,
        }
    }

    /// 计算下一次连接尝试前需要等待的时间，并登记本次尝试
    ///
    /// 第一次尝试不等待。
    pub fn next_delay(&self) -> Duration {
        let mut state = self.state.lock();
        let now = Instant::now();

        if let Some(last_success) = state.last_success.take() {
            let stable_for = now.duration_since(last_success);
            if stable_for >= Duration::from_secs(self.config.reset_after_success_secs) {
                info!("🔄 重连间隔已重置（连接保持了 {}s）", stable_for.as_secs());
                state.current_interval = secs_to_duration(self.config.initial_interval_secs);
                state.last_attempt = None;
                state.attempt_count = 0;
            }
        }

        let delay = match state.last_attempt {
            None => Duration::ZERO,
            Some(last_attempt) => state
                .current_interval
                .saturating_sub(now.duration_since(last_attempt)),
        };

        if state.last_attempt.is_some() {
            let grown = (state.current_interval.as_secs_f64() * self.config.backoff_multiplier)
                .min(self.config.max_interval_secs);
            state.current_interval = secs_to_duration(grown);
        }

        state.attempt_count += 1;
        state.last_attempt = Some(now + delay);

        debug!(
            "重连尝试 #{}, 等待 {}ms, 下次间隔 {:.1}s",
            state.attempt_count,
            delay.as_millis(),
            state.current_interval.as_secs_f64()
        );
        delay
    }

    /// 标记连接成功
    pub fn mark_success(&self) {
        let mut state = self.state.lock();
        info!("✅ 推送通道已连接（此前尝试 {} 次）", state.attempt_count);
        state.last_success = Some(Instant::now());
    }

    /// 当前连续尝试次数
    pub fn attempt_count(&self) -> u64 {
        self.state.lock().attempt_count
    }
}
