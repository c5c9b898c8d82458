use std::sync::Arc;

use async_trait::async_trait;

use quorumdb_core::{Entry, EntryPath, QuorumResult, StoreCapability};
use quorumdb_store::Store;

use crate::follower::FollowerRole;
use crate::leader::LeaderRole;

/// The tagged variant behind the context registry's `replace` operation
/// (§9 "dynamic dispatch over local/leader/follower"). Every variant
/// implements [`StoreCapability`] so callers — the CLI menu above all —
/// never need to match on which role they're holding.
#[derive(Clone)]
pub enum Role {
    Local(Arc<Store>),
    Leader(Arc<LeaderRole>),
    Follower(Arc<FollowerRole>),
}

impl Role {
    pub fn kind(&self) -> &'static str {
        match self {
            Role::Local(_) => "local",
            Role::Leader(_) => "leader",
            Role::Follower(_) => "follower",
        }
    }
}

#[async_trait]
impl StoreCapability for Role {
    async fn add_entry(
        &self,
        path: EntryPath,
        title: String,
        username: String,
        password: String,
    ) -> QuorumResult<()> {
        match self {
            Role::Local(s) => s.add_entry(path, title, username, password).await,
            Role::Leader(l) => l.add_entry(path, title, username, password).await,
            Role::Follower(f) => f.add_entry(path, title, username, password).await,
        }
    }

    async fn add_group(&self, path: EntryPath, name: String) -> QuorumResult<()> {
        match self {
            Role::Local(s) => s.add_group(path, name).await,
            Role::Leader(l) => l.add_group(path, name).await,
            Role::Follower(f) => f.add_group(path, name).await,
        }
    }

    async fn delete_entry(&self, path: EntryPath, title: String) -> QuorumResult<()> {
        match self {
            Role::Local(s) => s.delete_entry(path, title).await,
            Role::Leader(l) => l.delete_entry(path, title).await,
            Role::Follower(f) => f.delete_entry(path, title).await,
        }
    }

    async fn delete_group(&self, path: EntryPath, name: String) -> QuorumResult<()> {
        match self {
            Role::Local(s) => s.delete_group(path, name).await,
            Role::Leader(l) => l.delete_group(path, name).await,
            Role::Follower(f) => f.delete_group(path, name).await,
        }
    }

    fn get_entries(&self) -> Vec<(EntryPath, Entry)> {
        match self {
            Role::Local(s) => s.get_entries(),
            Role::Leader(l) => l.get_entries(),
            Role::Follower(f) => f.get_entries(),
        }
    }

    fn get_groups(&self) -> Vec<EntryPath> {
        match self {
            Role::Local(s) => s.get_groups(),
            Role::Leader(l) => l.get_groups(),
            Role::Follower(f) => f.get_groups(),
        }
    }

    fn get_name(&self) -> String {
        match self {
            Role::Local(s) => s.get_name(),
            Role::Leader(l) => l.get_name(),
            Role::Follower(f) => f.get_name(),
        }
    }

    fn get_filename(&self) -> String {
        match self {
            Role::Local(s) => s.get_filename(),
            Role::Leader(l) => l.get_filename(),
            Role::Follower(f) => f.get_filename(),
        }
    }

    fn save(&self) -> QuorumResult<()> {
        match self {
            Role::Local(s) => s.save(),
            Role::Leader(l) => l.save(),
            Role::Follower(f) => f.save(),
        }
    }
}
