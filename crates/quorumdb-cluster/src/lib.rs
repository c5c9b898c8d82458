//! quorumdb-cluster: the context registry plus the leader/follower roles
//! and the bully election subprotocol that moves stores between them
//! (C5-C8).

mod context;
mod election;
mod follower;
mod leader;
mod role;

pub use context::Context;
pub use follower::FollowerRole;
pub use leader::{FollowerInfo, LeaderRole};
pub use role::Role;
