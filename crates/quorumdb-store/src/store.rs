use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quorumdb_core::{Entry, Group, QuorumError, QuorumResult, StoreCapability};

use crate::crypto;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    name: String,
    root: Group,
}

#[derive(Debug)]
struct StoreState {
    name: String,
    root: Group,
}

/// An encrypted credential store backed by a single file. All mutating
/// methods are serialised by an internal lock (§4.1: "concurrent callers
/// within one process are serialised by a per-store lock") — there is only
/// ever one writer active against the in-memory tree at a time, whether the
/// caller is the operator menu or an inbound `remote_add_entry` RPC.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    password: String,
    state: Mutex<StoreState>,
}

impl Store {
    /// Creates a brand-new store at `path`, persisting it immediately so a
    /// `snapshot_bytes()` right after `create` is well-defined.
    pub fn create(path: impl AsRef<Path>, password: &str, name: &str) -> QuorumResult<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            password: password.to_string(),
            state: Mutex::new(StoreState {
                name: name.to_string(),
                root: Group::root(),
            }),
        };
        store.save()?;
        Ok(store)
    }

    /// Opens an existing store file, decrypting it with `password`.
    /// Returns [`QuorumError::BadCredentials`] on a wrong password or a
    /// corrupt file — the two are indistinguishable from an AEAD tag
    /// mismatch alone.
    pub fn open(path: impl AsRef<Path>, password: &str) -> QuorumResult<Self> {
        let path = path.as_ref().to_path_buf();
        let blob = fs::read(&path).map_err(|e| QuorumError::Internal(format!("read failed: {e}")))?;
        let plaintext = crypto::open(password, &blob)?;
        let file: StoreFile = serde_json::from_slice(&plaintext)
            .map_err(|e| QuorumError::Internal(format!("corrupt store file: {e}")))?;
        Ok(Self {
            path,
            password: password.to_string(),
            state: Mutex::new(StoreState {
                name: file.name,
                root: file.root,
            }),
        })
    }

    /// Writes `blob` atomically to `path` (write to a sibling temp file,
    /// then rename) and opens it — this is how a follower materialises the
    /// byte image it receives from `receive_db` (§4.7.1).
    pub fn receive(path: impl AsRef<Path>, password: &str, blob: &[u8]) -> QuorumResult<Self> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, blob).map_err(|e| QuorumError::Internal(format!("write failed: {e}")))?;
        fs::rename(&tmp_path, path).map_err(|e| QuorumError::Internal(format!("rename failed: {e}")))?;
        Self::open(path, password)
    }

    fn with_parent<T>(
        &self,
        parent: &[String],
        f: impl FnOnce(&mut Group) -> QuorumResult<T>,
    ) -> QuorumResult<T> {
        let mut state = self.state.lock().expect("store lock poisoned");
        let group = state
            .root
            .resolve_mut(parent)
            .ok_or_else(|| QuorumError::NotFound(describe_path(parent)))?;
        f(group)
    }
}

fn describe_path(path: &[String]) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        format!("root/{}", path.join("/"))
    }
}

#[async_trait]
impl StoreCapability for Store {
    async fn add_entry(
        &self,
        path: Vec<String>,
        title: String,
        username: String,
        password: String,
    ) -> QuorumResult<()> {
        self.with_parent(&path, |group| {
            if group.entries.iter().any(|e| e.title == title) {
                return Err(QuorumError::Duplicate(format!(
                    "{}/{}",
                    describe_path(&path),
                    title
                )));
            }
            group.entries.push(Entry {
                title,
                username,
                password,
            });
            Ok(())
        })
    }

    async fn add_group(&self, path: Vec<String>, name: String) -> QuorumResult<()> {
        self.with_parent(&path, |group| {
            if group.groups.iter().any(|g| g.name == name) {
                return Err(QuorumError::Duplicate(format!(
                    "{}/{}",
                    describe_path(&path),
                    name
                )));
            }
            group.groups.push(Group {
                name,
                groups: Vec::new(),
                entries: Vec::new(),
            });
            Ok(())
        })
    }

    async fn delete_entry(&self, path: Vec<String>, title: String) -> QuorumResult<()> {
        self.with_parent(&path, |group| {
            let before = group.entries.len();
            group.entries.retain(|e| e.title != title);
            if group.entries.len() == before {
                return Err(QuorumError::NotFound(format!(
                    "{}/{}",
                    describe_path(&path),
                    title
                )));
            }
            Ok(())
        })
    }

    async fn delete_group(&self, path: Vec<String>, name: String) -> QuorumResult<()> {
        self.with_parent(&path, |group| {
            let before = group.groups.len();
            group.groups.retain(|g| g.name != name);
            if group.groups.len() == before {
                return Err(QuorumError::NotFound(format!(
                    "{}/{}",
                    describe_path(&path),
                    name
                )));
            }
            Ok(())
        })
    }

    fn get_entries(&self) -> Vec<(Vec<String>, Entry)> {
        let state = self.state.lock().expect("store lock poisoned");
        state
            .root
            .all_entries()
            .into_iter()
            .map(|(path, entry)| (path, entry.clone()))
            .collect()
    }

    fn get_groups(&self) -> Vec<Vec<String>> {
        let state = self.state.lock().expect("store lock poisoned");
        state.root.all_group_paths()
    }

    fn get_name(&self) -> String {
        self.state.lock().expect("store lock poisoned").name.clone()
    }

    fn get_filename(&self) -> String {
        self.path.display().to_string()
    }

    fn save(&self) -> QuorumResult<()> {
        let state = self.state.lock().expect("store lock poisoned");
        let file = StoreFile {
            name: state.name.clone(),
            root: state.root.clone(),
        };
        let plaintext = serde_json::to_vec(&file)
            .map_err(|e| QuorumError::Internal(format!("serialize failed: {e}")))?;
        let sealed = crypto::seal(&self.password, &plaintext)?;
        fs::write(&self.path, sealed).map_err(|e| QuorumError::Internal(format!("write failed: {e}")))
    }
}

impl Store {
    /// Compares `candidate` against the password this store was opened
    /// with — used by admission (§4.6.1 step 1) to decide whether a
    /// connecting peer may join as a follower.
    pub fn check_password(&self, candidate: &str) -> bool {
        candidate == self.password
    }

    /// Renames the store's display name (not the on-disk filename).
    pub fn rename(&self, name: String) -> QuorumResult<()> {
        self.state.lock().expect("store lock poisoned").name = name;
        self.save()
    }

    /// Returns the on-disk image after flushing pending changes (§4.1).
    pub fn snapshot_bytes(&self) -> QuorumResult<Vec<u8>> {
        self.save()?;
        fs::read(&self.path).map_err(|e| QuorumError::Internal(format!("read failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = Store::create(&path, "hunter2", "shared").unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn add_then_delete_entry_round_trips() {
        let (_dir, store) = temp_store();
        store
            .add_entry(vec![], "t".into(), "u".into(), "w".into())
            .await
            .unwrap();
        assert_eq!(store.get_entries().len(), 1);

        store.delete_entry(vec![], "t".into()).await.unwrap();
        assert_eq!(store.get_entries().len(), 0);
    }

    #[tokio::test]
    async fn duplicate_entry_is_rejected() {
        let (_dir, store) = temp_store();
        store
            .add_entry(vec![], "t".into(), "u".into(), "w".into())
            .await
            .unwrap();
        let err = store
            .add_entry(vec![], "t".into(), "u2".into(), "w2".into())
            .await
            .unwrap_err();
        assert!(matches!(err, QuorumError::Duplicate(_)));
    }

    #[tokio::test]
    async fn add_group_then_delete_group_restores_prior_state() {
        let (_dir, store) = temp_store();
        let before = store.get_groups();

        store.add_group(vec![], "work".into()).await.unwrap();
        assert_eq!(store.get_groups().len(), before.len() + 1);

        store.delete_group(vec![], "work".into()).await.unwrap();
        assert_eq!(store.get_groups(), before);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_receive() {
        let (dir, store) = temp_store();
        store
            .add_entry(vec![], "t".into(), "u".into(), "w".into())
            .await
            .unwrap();
        let bytes = store.snapshot_bytes().unwrap();

        let replica_path = dir.path().join("replica.db");
        let replica = Store::receive(&replica_path, "hunter2", &bytes).unwrap();
        assert_eq!(replica.get_entries(), store.get_entries());
        assert_eq!(replica.get_name(), store.get_name());
    }

    #[test]
    fn opening_with_wrong_password_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        Store::create(&path, "hunter2", "shared").unwrap();

        let err = Store::open(&path, "wrong").unwrap_err();
        assert!(matches!(err, QuorumError::BadCredentials));
    }
}
