use crate::status::LeaderStatus;

/// The crate-wide error taxonomy.
///
/// Every kind here maps to one of the refusal reasons a leader or follower
/// can surface to an operator (§7 of the design doc: bad credentials, a
/// pending admission/proposal, an unreachable peer, an unauthorised caller,
/// a reserved ban, or an election currently in progress). `Internal` is the
/// catch-all for bugs, not for expected refusals — don't reach for it just
/// because a match arm is inconvenient.
#[derive(Debug, thiserror::Error)]
pub enum QuorumError {
    #[error("wrong master password")]
    BadCredentials,

    #[error("`{0}` already exists")]
    Duplicate(String),

    #[error("`{0}` was not found")]
    NotFound(String),

    /// The leader is busy with another admission or proposal. Carries the
    /// status it was busy with so the caller's UI can explain precisely why.
    #[error("leader is busy ({0:?})")]
    Busy(LeaderStatus),

    #[error("peer `{0}` is unreachable")]
    Unreachable(String),

    #[error("caller is not a recognised member of this share")]
    Unauthorised,

    /// Reserved: the source protocol carries this return code but no path
    /// emits it. Kept for forward compatibility with a persistent ban list.
    #[error("this peer has been banned from the share")]
    Banned,

    #[error("an election is currently in progress")]
    ElectionInProgress,

    #[error("internal error: {0}")]
    Internal(String),
}

impl QuorumError {
    /// Stable short code for programmatic dispatch, independent of the
    /// human-readable `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            QuorumError::BadCredentials => "bad_credentials",
            QuorumError::Duplicate(_) => "duplicate",
            QuorumError::NotFound(_) => "not_found",
            QuorumError::Busy(_) => "busy",
            QuorumError::Unreachable(_) => "unreachable",
            QuorumError::Unauthorised => "unauthorised",
            QuorumError::Banned => "banned",
            QuorumError::ElectionInProgress => "election_in_progress",
            QuorumError::Internal(_) => "internal",
        }
    }

    /// The leader status to report alongside this error, if any. The
    /// original CLI always printed the current status next to a refusal;
    /// this keeps that behaviour available without forcing every caller to
    /// carry a status around separately.
    pub fn status(&self) -> Option<LeaderStatus> {
        match self {
            QuorumError::Busy(status) => Some(*status),
            _ => None,
        }
    }
}

pub type QuorumResult<T> = Result<T, QuorumError>;
