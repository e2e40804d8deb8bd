//! 拉取通道
//!
//! 负责签发 `PollTicket` 和维护拉取通道状态。是否应用快照由协调器裁决。

use tracing::{debug, warn};

use super::{PollReason, PollTicket};
use crate::connection_state::{ChannelKind, ChannelState, ChannelStatus};
use crate::error::Result;
use crate::http_client::LogSnapshot;

#[derive(Debug)]
pub struct SnapshotPoller {
    state: ChannelState,
    next_seq: u64,
    in_flight: usize,
}

impl Default for SnapshotPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPoller {
    pub fn new() -> Self {
        Self {
            state: ChannelState::new(ChannelKind::Pull),
            next_seq: 1,
            in_flight: 0,
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// 在途拉取数量
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// 签发新的拉取凭据，通道进入 CONNECTING
    ///
    /// 返回凭据和状态变化（旧状态）。
    pub fn issue(&mut self, reason: PollReason, current_revision: u64) -> (PollTicket, Option<ChannelStatus>) {
        let ticket = PollTicket {
            seq: self.next_seq,
            issued_at_revision: current_revision,
            reason,
        };
        self.next_seq += 1;
        self.in_flight += 1;
        debug!(
            "🔄 发起拉取 #{} (reason={}, revision={})",
            ticket.seq, reason, current_revision
        );
        let old = self.state.transition(ChannelStatus::Connecting);
        (ticket, old)
    }

    /// 记录拉取结果，通道进入 CONNECTED / ERROR
    pub fn complete(&mut self, ticket: &PollTicket, result: &Result<LogSnapshot>) -> Option<ChannelStatus> {
        self.in_flight = self.in_flight.saturating_sub(1);
        match result {
            Ok(snapshot) => {
                debug!("📥 拉取 #{} 成功 ({} bytes)", ticket.seq, snapshot.logs.len());
                self.state.transition(ChannelStatus::Connected)
            }
            Err(e) => {
                warn!("❌ 拉取 #{} 失败 (reason={}): {}", ticket.seq, ticket.reason, e);
                self.state.transition(ChannelStatus::Error)
            }
        }
    }

    /// 会话结束
    pub fn teardown(&mut self) -> Option<ChannelStatus> {
        self.in_flight = 0;
        self.state.transition(ChannelStatus::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotdashError;

    #[test]
    fn test_tickets_are_monotonic() {
        let mut poller = SnapshotPoller::new();
        let (first, old) = poller.issue(PollReason::Startup, 0);
        assert_eq!(old, Some(ChannelStatus::Disconnected));
        let (second, old) = poller.issue(PollReason::Interval, 3);
        assert_eq!(old, None);

        assert!(second.seq > first.seq);
        assert_eq!(second.issued_at_revision, 3);
        assert_eq!(poller.in_flight(), 2);
    }

    #[test]
    fn test_result_drives_channel_state() {
        let mut poller = SnapshotPoller::new();
        let (ticket, _) = poller.issue(PollReason::Startup, 0);

        let failure: Result<LogSnapshot> = Err(BotdashError::Transport("HTTP 502".to_string()));
        assert_eq!(poller.complete(&ticket, &failure), Some(ChannelStatus::Connecting));
        assert_eq!(poller.state().status, ChannelStatus::Error);

        let (ticket, _) = poller.issue(PollReason::Interval, 0);
        let success = Ok(LogSnapshot {
            logs: "A".to_string(),
            file_size: 1,
        });
        poller.complete(&ticket, &success);
        assert!(poller.state().is_connected());
        assert_eq!(poller.in_flight(), 0);

        assert_eq!(poller.teardown(), Some(ChannelStatus::Connected));
    }
}
