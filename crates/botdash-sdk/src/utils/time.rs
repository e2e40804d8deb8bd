//! 时间处理工具模块
//!
//! # 设计原则
//!
//! - **状态层**: 所有时间字段使用 UTC 毫秒时间戳（i64）
//! - **业务层**: 统一使用 `Utc::now().timestamp_millis()` 生成时间
//! - **显示层**: 状态栏时间按本地时区显示，导出文件名使用 UTC

use chrono::{Local, TimeZone, Utc};

/// 时间格式化工具
pub struct TimeFormatter;

impl TimeFormatter {
    /// 当前 UTC 毫秒时间戳
    pub fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// 格式化为本地时钟时间
    ///
    /// 格式: "HH:MM:SS"
    pub fn format_clock(utc_timestamp_ms: i64) -> String {
        let dt = Utc
            .timestamp_millis_opt(utc_timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now);
        dt.with_timezone(&Local).format("%H:%M:%S").to_string()
    }

    /// 格式化为可用于文件名的 UTC 时间
    ///
    /// 格式: "YYYY-MM-DDTHH-MM-SS"（冒号替换为短横线）
    pub fn format_file_stamp(utc_timestamp_ms: i64) -> String {
        let dt = Utc
            .timestamp_millis_opt(utc_timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now);
        dt.format("%Y-%m-%dT%H-%M-%S").to_string()
    }
}
