use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Policy constants from §5 — these are fixed behaviour, not tunables.
pub const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const PROPOSAL_VOTE_WINDOW: Duration = Duration::from_secs(30);
pub const ROUND_WAIT_WINDOW: Duration = Duration::from_secs(60);

/// A wall-clock instant expressed as milliseconds since the Unix epoch, so
/// that deadlines can cross the RPC wire as a plain integer rather than a
/// platform-specific `Instant`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Deadline(pub u64);

impl Deadline {
    pub fn after(window: Duration) -> Self {
        Self(now_millis() + window.as_millis() as u64)
    }

    pub fn has_passed(self) -> bool {
        now_millis() > self.0
    }

    pub fn remaining(self) -> Duration {
        let now = now_millis();
        if self.0 <= now {
            Duration::ZERO
        } else {
            Duration::from_millis(self.0 - now)
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
