use async_trait::async_trait;

use crate::error::QuorumResult;
use crate::op::EntryPath;
use crate::tree::Entry;

/// The single store-capability set every role exposes (§9 "dynamic dispatch
/// over local/leader/follower"). A local store applies mutations directly;
/// a leader applies them after a committed vote; a follower forwards them
/// as a proposal to its leader and waits for the commit. Callers — the CLI
/// menu in particular — never need to know which.
#[async_trait]
pub trait StoreCapability: Send + Sync {
    async fn add_entry(
        &self,
        path: EntryPath,
        title: String,
        username: String,
        password: String,
    ) -> QuorumResult<()>;

    async fn add_group(&self, path: EntryPath, name: String) -> QuorumResult<()>;

    async fn delete_entry(&self, path: EntryPath, title: String) -> QuorumResult<()>;

    async fn delete_group(&self, path: EntryPath, name: String) -> QuorumResult<()>;

    fn get_entries(&self) -> Vec<(EntryPath, Entry)>;

    fn get_groups(&self) -> Vec<EntryPath>;

    fn get_name(&self) -> String;

    fn get_filename(&self) -> String;

    fn save(&self) -> QuorumResult<()>;
}
