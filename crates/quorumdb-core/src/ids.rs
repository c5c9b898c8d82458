use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A follower's cluster-wide unique id, assigned once by the leader at
/// admission and immutable thereafter. Also the sole tiebreaker used by the
/// bully election (§4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FollowerId(pub u128);

impl FollowerId {
    /// Generates a fresh random id. Collisions are astronomically unlikely
    /// at 128 bits; the leader does not need to check uniqueness against
    /// existing members before handing this out.
    pub fn generate() -> Self {
        Self(random_u128())
    }
}

impl fmt::Display for FollowerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Identifies one proposal's vote/commit round. Fresh per proposal; never
/// reused even across an election, since in-flight proposals are lost when
/// the leader changes (§5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub u128);

impl ProposalId {
    pub fn generate() -> Self {
        Self(random_u128())
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

fn random_u128() -> u128 {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    u128::from_le_bytes(bytes)
}
