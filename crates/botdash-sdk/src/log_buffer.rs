//! 日志缓冲区
//!
//! 会话内唯一权威的日志视图。只有 `SyncCoordinator` 持有可变引用，
//! 每次修改都会完整结束（内容更新 + 生成 `LogUpdate`）后才处理下一条消息，
//! 读者永远看不到半截或交错的内容。

use serde::{Deserialize, Serialize};

use crate::utils::TimeFormatter;

/// 拉取快照覆盖
pub const LABEL_SNAPSHOT: &str = "snapshot";
/// 推送通道（历史快照 / 增量行）
pub const LABEL_LIVE: &str = "live";
/// 日志已清空
pub const LABEL_CLEARED: &str = "cleared";
/// SDK 自身插入的诊断行
pub const LABEL_DIAGNOSTIC: &str = "diagnostic";

/// 最近一次修改的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    /// 整体覆盖
    Snapshot,
    /// 增量追加
    Stream,
    /// 清空
    Cleared,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSource::Snapshot => write!(f, "SNAPSHOT"),
            LogSource::Stream => write!(f, "STREAM"),
            LogSource::Cleared => write!(f, "CLEARED"),
        }
    }
}

/// 一次已提交的修改（推送给渲染层）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogUpdate {
    /// 修改后的完整内容
    pub content: String,
    /// 修改后缓冲区的来源（诊断行不改变来源）
    pub source: Option<LogSource>,
    /// 简短来源标签（"live" / "snapshot" / "cleared" / "diagnostic"）
    pub label: String,
    /// 修改序号（单调递增）
    pub revision: u64,
    /// 修改时间（UTC毫秒时间戳）
    pub timestamp: i64,
}

/// 日志缓冲区
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    content: String,
    last_updated_at: Option<i64>,
    source: Option<LogSource>,
    revision: u64,
}

impl LogBuffer {
    /// 创建空缓冲区（会话开始时）
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体覆盖内容
    pub fn replace(&mut self, text: impl Into<String>, label: &str) -> LogUpdate {
        self.content = text.into();
        self.commit(Some(LogSource::Snapshot), label)
    }

    /// 追加内容
    pub fn append(&mut self, text: &str, label: &str) -> LogUpdate {
        self.content.push_str(text);
        self.commit(Some(LogSource::Stream), label)
    }

    /// 追加诊断行，保留上一次的来源
    pub fn annotate(&mut self, text: &str, label: &str) -> LogUpdate {
        self.content.push_str(text);
        self.commit(self.source, label)
    }

    /// 清空并写入提示信息
    pub fn clear(&mut self, message: impl Into<String>) -> LogUpdate {
        self.content = message.into();
        self.commit(Some(LogSource::Cleared), LABEL_CLEARED)
    }

    fn commit(&mut self, source: Option<LogSource>, label: &str) -> LogUpdate {
        let now = TimeFormatter::now_millis();
        self.revision += 1;
        self.last_updated_at = Some(now);
        self.source = source;

        LogUpdate {
            content: self.content.clone(),
            source,
            label: label.to_string(),
            revision: self.revision,
            timestamp: now,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source(&self) -> Option<LogSource> {
        self.source
    }

    pub fn last_updated_at(&self) -> Option<i64> {
        self.last_updated_at
    }

    /// 当前修改序号（0 表示从未修改）
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// 状态栏信息，例如 "1024 chars • 12:30:05"
    pub fn info_line(&self) -> String {
        let clock = self
            .last_updated_at
            .map(TimeFormatter::format_clock)
            .unwrap_or_else(|| "-".to_string());
        format!("{} chars • {}", self.content.chars().count(), clock)
    }

    /// 导出文件名：bot_logs_YYYY-MM-DDTHH-MM-SS.txt
    pub fn export_file_name(now_ms: i64) -> String {
        format!("bot_logs_{}.txt", TimeFormatter::format_file_stamp(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutations_record_source_and_revision() {
        let mut buffer = LogBuffer::new();
        assert_eq!(buffer.revision(), 0);
        assert!(buffer.source().is_none());

        let update = buffer.replace("A", LABEL_LIVE);
        assert_eq!(update.content, "A");
        assert_eq!(update.source, Some(LogSource::Snapshot));
        assert_eq!(update.label, "live");

        let update = buffer.append("B", LABEL_LIVE);
        assert_eq!(update.content, "AB");
        assert_eq!(update.source, Some(LogSource::Stream));

        let update = buffer.clear("C");
        assert_eq!(update.content, "C");
        assert_eq!(update.source, Some(LogSource::Cleared));
        assert_eq!(update.label, LABEL_CLEARED);
        assert_eq!(buffer.revision(), 3);
        assert!(buffer.last_updated_at().is_some());
    }

    #[test]
    fn test_annotate_keeps_previous_source() {
        let mut buffer = LogBuffer::new();
        let update = buffer.annotate("\n❌ 拉取日志失败\n", LABEL_DIAGNOSTIC);
        assert_eq!(update.source, None);
        assert_eq!(buffer.source(), None);

        buffer.replace("snap\n", LABEL_SNAPSHOT);
        let update = buffer.annotate("note\n", LABEL_DIAGNOSTIC);
        assert_eq!(update.content, "snap\nnote\n");
        assert_eq!(update.source, Some(LogSource::Snapshot));
        assert_eq!(update.label, LABEL_DIAGNOSTIC);
        assert_eq!(buffer.source(), Some(LogSource::Snapshot));
        assert_eq!(buffer.revision(), 3);
    }

    #[test]
    fn test_interleaved_writes_never_tear() {
        // 每次修改后的可见内容必须正好是某个提交值（覆盖值或 前值+追加值）
        let mut buffer = LogBuffer::new();
        let mut expected = String::new();
        let ops: Vec<(bool, &str)> = vec![
            (false, "snap-1\n"),
            (true, "line-a\n"),
            (true, "line-b\n"),
            (false, "snap-2\n"),
            (true, "line-c\n"),
            (false, ""),
            (true, "line-d\n"),
        ];

        for (is_append, text) in ops {
            let update = if is_append {
                expected.push_str(text);
                buffer.append(text, LABEL_LIVE)
            } else {
                expected = text.to_string();
                buffer.replace(text, LABEL_SNAPSHOT)
            };
            assert_eq!(update.content, expected);
            assert_eq!(buffer.content(), expected);
        }
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut buffer = LogBuffer::new();
        buffer.replace("same", LABEL_SNAPSHOT);
        let first = buffer.content().to_string();
        buffer.replace("same", LABEL_SNAPSHOT);
        assert_eq!(buffer.content(), first);

        buffer.clear("cleared");
        buffer.clear("cleared");
        assert_eq!(buffer.content(), "cleared");
    }

    #[test]
    fn test_info_line_and_export_name() {
        let mut buffer = LogBuffer::new();
        buffer.replace("héllo", LABEL_SNAPSHOT);
        assert!(buffer.info_line().starts_with("5 chars • "));

        let name = LogBuffer::export_file_name(0);
        assert_eq!(name, "bot_logs_1970-01-01T00-00-00.txt");
    }
}
