use serde::{Deserialize, Serialize};

/// A leader's admission/proposal exclusion state (§3 invariant 1). Exactly
/// one of {admission, proposal} may be active; `operation_lock` in the
/// cluster crate is what actually enforces that, this enum is just the
/// observable shape of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaderStatus {
    Free,
    FollowerChange,
    DatabaseChange,
}

impl LeaderStatus {
    pub fn is_free(self) -> bool {
        matches!(self, LeaderStatus::Free)
    }
}
