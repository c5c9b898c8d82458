use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use quorumdb_discovery::Discovery;
use quorumdb_notify::NotificationQueue;
use quorumdb_rpc::TlsMaterial;

use crate::role::Role;

/// C5: the process-wide singleton every menu action and RPC handler reads
/// through. Bundles the TLS material and Discovery/Notification handles
/// every role needs, plus the store registry itself — a `local_id →
/// StoreHandle` map where `local_id` only ever grows and `StoreHandle` is
/// one of {local, leader, follower}. [`Context::replace`] is the single
/// atomic transition point used both by "share this store" (local→leader)
/// and by a won election (follower→leader).
pub struct Context {
    tls: Arc<TlsMaterial>,
    discovery: Arc<Discovery>,
    notifications: Arc<NotificationQueue>,
    registry: DashMap<u64, ArcSwap<Role>>,
    next_id: AtomicU64,
}

impl Context {
    pub fn new(tls: Arc<TlsMaterial>, discovery: Arc<Discovery>, notifications: Arc<NotificationQueue>) -> Arc<Self> {
        Arc::new(Self {
            tls,
            discovery,
            notifications,
            registry: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn tls(&self) -> Arc<TlsMaterial> {
        self.tls.clone()
    }

    pub fn discovery(&self) -> Arc<Discovery> {
        self.discovery.clone()
    }

    pub fn notifications(&self) -> Arc<NotificationQueue> {
        self.notifications.clone()
    }

    /// Registers a freshly opened, created, or admitted store under a new
    /// `local_id`. Follower roles are linked back to `context` so an
    /// election they win later knows how to install its own replacement.
    pub fn add(context: &Arc<Context>, role: Role) -> u64 {
        let id = context.next_id.fetch_add(1, Ordering::SeqCst);
        if let Role::Follower(follower) = &role {
            follower.bind_context(context, id);
        }
        context.registry.insert(id, ArcSwap::new(Arc::new(role)));
        id
    }

    pub fn get(&self, id: u64) -> Option<Role> {
        self.registry.get(&id).map(|entry| (**entry.value().load()).clone())
    }

    /// Atomically swaps the role registered at `id`. Used for local→leader
    /// on share and follower→leader on a won election. A `Role::Leader`
    /// only ever arrives through this method (never through `add`), so this
    /// is where it learns the id it should stamp onto its own pending
    /// votes (§4.6.2 step 5).
    pub fn replace(&self, id: u64, role: Role) {
        if let Role::Leader(leader) = &role {
            leader.bind_local_id(id);
        }
        if let Some(entry) = self.registry.get(&id) {
            entry.value().store(Arc::new(role));
        }
    }

    pub fn remove(&self, id: u64) -> Option<Role> {
        self.registry.remove(&id).map(|(_, slot)| (**slot.load()).clone())
    }

    pub fn iter(&self) -> Vec<(u64, Role)> {
        self.registry
            .iter()
            .map(|entry| (*entry.key(), (**entry.value().load()).clone()))
            .collect()
    }
}
