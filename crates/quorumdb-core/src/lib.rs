//! quorumdb-core: shared contracts for the quorumdb peer-to-peer password
//! database — error taxonomy, identifiers, timing policy and the small
//! vocabulary of types every other quorumdb crate builds on.
//!
//! This crate carries no networking or storage code of its own; it exists so
//! that `quorumdb-store`, `quorumdb-rpc`, `quorumdb-discovery` and
//! `quorumdb-cluster` agree on one error type and one notion of "what a
//! mutation looks like" without depending on each other directly.

mod capability;
mod error;
mod ids;
mod op;
mod status;
mod time;
mod tree;

pub mod prelude {
    //! Single shallow import surface for the rest of the workspace.
    pub use crate::capability::StoreCapability;
    pub use crate::error::{QuorumError, QuorumResult};
    pub use crate::ids::{FollowerId, ProposalId};
    pub use crate::op::{EntryPath, MutationData, MutationOp};
    pub use crate::status::LeaderStatus;
    pub use crate::time::{Deadline, PROPOSAL_VOTE_WINDOW, RPC_CONNECT_TIMEOUT, ROUND_WAIT_WINDOW};
    pub use crate::tree::{Entry, Group};
}

pub use capability::StoreCapability;
pub use error::{QuorumError, QuorumResult};
pub use ids::{FollowerId, ProposalId};
pub use op::{EntryPath, MutationData, MutationOp};
pub use status::LeaderStatus;
pub use time::{Deadline, PROPOSAL_VOTE_WINDOW, RPC_CONNECT_TIMEOUT, ROUND_WAIT_WINDOW};
pub use tree::{Entry, Group};
