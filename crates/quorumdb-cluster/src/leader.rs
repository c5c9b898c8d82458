use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use quorumdb_core::{
    Deadline, Entry, EntryPath, FollowerId, LeaderStatus, MutationData, MutationOp, ProposalId,
    QuorumError, QuorumResult, StoreCapability, PROPOSAL_VOTE_WINDOW,
};
use quorumdb_notify::{Notification, NotificationQueue};
use quorumdb_rpc::{Daemon, Handler, Proxy, ProxyHandle, TlsMaterial};
use quorumdb_store::Store;

/// One follower's membership record (§3).
#[derive(Clone, Debug)]
pub struct FollowerInfo {
    pub cn: String,
    pub id: FollowerId,
}

struct ProposalState {
    proposal_id: ProposalId,
    operation: MutationOp,
    data: MutationData,
    votes: Vec<bool>,
    voters: HashSet<String>,
    deadlines: HashMap<String, Deadline>,
}

/// C6: a local store exposed to remote followers. Owns the membership
/// table, the single in-flight proposal (if any) and the RPC daemon that
/// serves admission, proposals, votes and departure.
pub struct LeaderRole {
    pub store: Arc<Store>,
    pub self_uri: String,
    tls: Arc<TlsMaterial>,
    notifications: Arc<NotificationQueue>,
    followers: DashMap<String, FollowerInfo>,
    status: RwLock<LeaderStatus>,
    operation_lock: Arc<AsyncMutex<()>>,
    current_proposal: AsyncMutex<Option<ProposalState>>,
    is_leader: AtomicBool,
    self_weak: std::sync::OnceLock<std::sync::Weak<LeaderRole>>,
    local_id: std::sync::OnceLock<u64>,
    _daemon: Daemon,
}

impl LeaderRole {
    /// Binds a fresh RPC daemon for this role and returns it wrapped in
    /// `Arc`. Construction is two-phase because the daemon needs a
    /// [`Handler`] before the `LeaderRole` it dispatches into exists: the
    /// daemon is bound against a forwarding shim backed by a `OnceLock`
    /// that is filled in once the `Arc<LeaderRole>` is built.
    pub async fn bind(
        store: Arc<Store>,
        tls: Arc<TlsMaterial>,
        notifications: Arc<NotificationQueue>,
        bind_addr: std::net::SocketAddr,
    ) -> QuorumResult<Arc<Self>> {
        let target: Arc<std::sync::OnceLock<Arc<LeaderRole>>> = Arc::new(std::sync::OnceLock::new());
        let handler: Arc<dyn Handler> = Arc::new(ForwardingHandler {
            target: target.clone(),
        });
        let daemon = Daemon::bind(bind_addr, tls.clone(), handler).await?;
        let self_uri = daemon.local_addr().to_string();

        let role = Arc::new(Self {
            store,
            self_uri,
            tls,
            notifications,
            followers: DashMap::new(),
            status: RwLock::new(LeaderStatus::Free),
            operation_lock: Arc::new(AsyncMutex::new(())),
            current_proposal: AsyncMutex::new(None),
            is_leader: AtomicBool::new(true),
            self_weak: std::sync::OnceLock::new(),
            local_id: std::sync::OnceLock::new(),
            _daemon: daemon,
        });
        let _ = role.self_weak.set(Arc::downgrade(&role));
        let _ = target.set(role.clone());
        Ok(role)
    }

    fn self_arc(&self) -> Arc<Self> {
        self.self_weak
            .get()
            .and_then(|w| w.upgrade())
            .expect("LeaderRole always constructed via bind()")
    }

    pub fn status(&self) -> LeaderStatus {
        *self.status.read().expect("status lock poisoned")
    }

    pub(crate) fn set_status(&self, status: LeaderStatus) {
        *self.status.write().expect("status lock poisoned") = status;
    }

    /// Exposed so a won election can hold the lock across handover setup
    /// before the new leader accepts its first mutation (§4.8 step 4a).
    pub(crate) fn operation_lock(&self) -> Arc<AsyncMutex<()>> {
        self.operation_lock.clone()
    }

    /// Seeds membership copied over from the outgoing follower/leader
    /// during a handover, bypassing the normal `login` admission flow.
    pub(crate) fn seed_followers(&self, entries: Vec<(String, FollowerInfo)>) {
        for (uri, info) in entries {
            self.followers.insert(uri, info);
        }
    }

    pub(crate) async fn sweep_dead_pub(&self, dead: Vec<String>) {
        self.sweep_dead(dead).await;
    }

    pub fn followers_snapshot(&self) -> Vec<(String, FollowerInfo)> {
        self.followers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Links this role into the process-wide registry so its own pending
    /// votes (§4.6.2 step 5) can be stamped with the id an operator would
    /// type back at `answer_notification`. Set by [`Context::replace`],
    /// the only place a `Role::Leader` is ever installed.
    pub(crate) fn bind_local_id(&self, id: u64) {
        let _ = self.local_id.set(id);
    }

    pub(crate) fn local_id(&self) -> Option<u64> {
        self.local_id.get().copied()
    }

    /// §4.6.5: mark this role no longer the authoritative leader, then
    /// fire `start_election` at every follower so the cluster picks a
    /// successor instead of waiting to notice this peer went quiet.
    /// `ping` reports `false` from the moment the flag flips, so a
    /// follower that reaches this role mid-election treats it as dead.
    pub async fn close(&self) {
        self.is_leader.store(false, Ordering::SeqCst);
        for entry in self.followers.iter() {
            let uri = entry.key().clone();
            if let Ok(proxy) = Proxy::connect(&uri, &self.tls).await {
                let _ = proxy.call_one_way("start_election", serde_json::json!({})).await;
            }
        }
    }

    pub fn ping(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// §4.6.1 admission. Called for any TLS peer requesting to join.
    #[instrument(skip(self, password), fields(follower_uri = %follower_uri))]
    pub async fn login(&self, password: &str, peer_cn: &str, follower_uri: &str) -> QuorumResult<LeaderStatus> {
        let guard = tokio::time::timeout(std::time::Duration::from_secs(5), self.operation_lock.lock())
            .await
            .map_err(|_| QuorumError::Busy(self.status()))?;
        self.set_status(LeaderStatus::FollowerChange);

        let result = self.login_body(password, peer_cn, follower_uri).await;

        self.set_status(LeaderStatus::Free);
        drop(guard);
        result
    }

    async fn login_body(&self, password: &str, peer_cn: &str, follower_uri: &str) -> QuorumResult<LeaderStatus> {
        if !self.store.check_password(password) {
            return Err(QuorumError::BadCredentials);
        }

        let unique_id = FollowerId::generate();

        let proxy = Proxy::connect(follower_uri, &self.tls).await?;
        let blob = self.store.snapshot_bytes()?;
        // ids are 128-bit and serde_json's `Value` only carries numbers up
        // to 64 bits losslessly, so every id crosses the wire as its hex
        // `Display` form rather than a JSON number (§4.4 "opaque integers").
        let ids: HashMap<String, String> = self
            .followers
            .iter()
            .map(|e| (e.key().clone(), e.value().id.to_string()))
            .collect();
        let cns: HashMap<String, String> = self
            .followers
            .iter()
            .map(|e| (e.key().clone(), e.value().cn.clone()))
            .collect();

        proxy
            .call("receive_db", serde_json::json!({"blob": blob}))
            .await?;
        proxy
            .call("receive_uris", serde_json::json!({"ids": ids, "cns": cns}))
            .await?;
        proxy
            .call("set_unique_id", serde_json::json!({"id": unique_id.to_string()}))
            .await?;

        let mut dead = Vec::new();
        for entry in self.followers.iter() {
            let uri = entry.key().clone();
            match Proxy::connect(&uri, &self.tls).await {
                Ok(peer_proxy) => {
                    if peer_proxy
                        .call(
                            "add_uri",
                            serde_json::json!({"uri": follower_uri, "id": unique_id.to_string(), "cn": peer_cn}),
                        )
                        .await
                        .is_err()
                    {
                        dead.push(uri);
                    }
                }
                Err(_) => dead.push(uri),
            }
        }
        self.sweep_dead(dead).await;

        self.followers.insert(
            follower_uri.to_string(),
            FollowerInfo {
                cn: peer_cn.to_string(),
                id: unique_id,
            },
        );
        info!(peer_cn, follower_uri, "follower admitted");
        Ok(LeaderStatus::Free)
    }

    /// §4.6.4 dead-follower sweep, run to convergence.
    async fn sweep_dead(&self, initial_dead: Vec<String>) {
        let mut dead = initial_dead;
        while !dead.is_empty() {
            for uri in &dead {
                self.followers.remove(uri);
            }
            let removed = dead.clone();
            dead = Vec::new();
            for entry in self.followers.iter() {
                let uri = entry.key().clone();
                match Proxy::connect(&uri, &self.tls).await {
                    Ok(proxy) => {
                        if proxy
                            .call("remove_uris", serde_json::json!({"uris": removed}))
                            .await
                            .is_err()
                        {
                            dead.push(uri);
                        }
                    }
                    Err(_) => dead.push(uri),
                }
            }
            if !removed.is_empty() {
                warn!(?removed, "pruned unreachable followers");
            }
        }
    }

    /// §4.6.2 proposal kickoff. Returns immediately once the operation
    /// lock is acquired and the proposal task is spawned; the caller
    /// awaits the returned handle to observe the final outcome (used by
    /// [`StoreCapability`] impls below, which must block until commit or
    /// denial).
    #[instrument(skip(self, data))]
    async fn propose(
        &self,
        op: MutationOp,
        data: MutationData,
        requester_uri: String,
    ) -> QuorumResult<tokio::sync::oneshot::Receiver<bool>> {
        let owned_guard = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            self.operation_lock.clone().lock_owned(),
        )
        .await
        .map_err(|_| QuorumError::Busy(self.status()))?;
        self.set_status(LeaderStatus::DatabaseChange);

        let role = self.self_arc();
        let message = data.describe(&op);
        let proposal_id = ProposalId::generate();

        {
            let mut current = self.current_proposal.lock().await;
            *current = Some(ProposalState {
                proposal_id,
                operation: op.clone(),
                data: data.clone(),
                votes: vec![true],
                voters: HashSet::from([requester_uri.clone()]),
                deadlines: HashMap::new(),
            });
        }

        let deadline = Deadline::after(PROPOSAL_VOTE_WINDOW);
        for entry in self.followers.iter() {
            let uri = entry.key().clone();
            if uri == requester_uri {
                continue;
            }
            {
                let mut current = self.current_proposal.lock().await;
                if let Some(state) = current.as_mut() {
                    state.deadlines.insert(uri.clone(), deadline);
                }
            }
            match Proxy::connect(&uri, &self.tls).await {
                Ok(proxy) => {
                    let _ = proxy
                        .call_one_way(
                            "add_notification",
                            serde_json::json!({
                                "message": message,
                                "deadline": deadline.0,
                                "proposal_id": proposal_id.to_string(),
                            }),
                        )
                        .await;
                }
                Err(e) => warn!(uri, error = %e, "could not notify follower of proposal"),
            }
        }

        if requester_uri != self.self_uri {
            self.notifications.push(Notification {
                message: message.clone(),
                deadline,
                proposal_id,
                share_id: self.local_id().unwrap_or(0),
            });
        }

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(deadline.remaining()).await;
            let committed = role.tally_and_commit(proposal_id).await;
            drop(owned_guard);
            let _ = done_tx.send(committed);
        });

        Ok(done_rx)
    }

    async fn tally_and_commit(&self, proposal_id: ProposalId) -> bool {
        let state = {
            let mut current = self.current_proposal.lock().await;
            match current.take() {
                Some(state) if state.proposal_id == proposal_id => state,
                Some(other) => {
                    *current = Some(other);
                    return false;
                }
                None => return false,
            }
        };

        let eligible = self.followers.len() + 1;
        let yes_count = state.votes.iter().filter(|v| **v).count();
        let quorum = eligible.div_ceil(2);
        let decision = yes_count >= quorum;

        info!(proposal_id = %state.proposal_id, yes_count, quorum, decision, "proposal tallied");

        for entry in self.followers.iter() {
            let uri = entry.key().clone();
            if let Ok(proxy) = Proxy::connect(&uri, &self.tls).await {
                let _ = proxy
                    .call_one_way(
                        "remote_print_message",
                        serde_json::json!({"text": format!(
                            "proposal {} {}",
                            state.proposal_id,
                            if decision { "approved" } else { "denied" }
                        )}),
                    )
                    .await;
            }
        }

        if !decision {
            self.set_status(LeaderStatus::Free);
            return false;
        }

        let mut dead = Vec::new();
        let method = commit_method(&state.operation);
        for entry in self.followers.iter() {
            let uri = entry.key().clone();
            match Proxy::connect(&uri, &self.tls).await {
                Ok(proxy) => {
                    if proxy
                        .call(method, mutation_payload(&state.data))
                        .await
                        .is_err()
                    {
                        dead.push(uri);
                    }
                }
                Err(_) => dead.push(uri),
            }
        }

        apply_locally(&self.store, &state.operation, &state.data).await;
        self.sweep_dead(dead).await;
        self.set_status(LeaderStatus::Free);
        true
    }

    /// Applied when the leader's own operator votes via the notification
    /// queue (§4.6.2 step 5) rather than over RPC.
    pub async fn cast_vote(&self, vote: bool, voter_uri: &str, proposal_id: ProposalId) -> bool {
        let mut current = self.current_proposal.lock().await;
        let Some(state) = current.as_mut() else {
            return false;
        };
        if state.proposal_id != proposal_id {
            return false;
        }
        if state.voters.contains(voter_uri) {
            return false;
        }
        if let Some(deadline) = state.deadlines.get(voter_uri) {
            if deadline.has_passed() {
                return false;
            }
        }
        state.votes.push(vote);
        state.voters.insert(voter_uri.to_string());
        debug!(voter_uri, vote, "vote recorded");
        true
    }

    /// §4.6.6 graceful follower departure.
    pub async fn leave_database(&self, caller_cn: &str) {
        let leaving: Vec<String> = self
            .followers
            .iter()
            .filter(|e| e.value().cn == caller_cn)
            .map(|e| e.key().clone())
            .collect();
        self.sweep_dead(leaving).await;
    }
}

struct ForwardingHandler {
    target: Arc<std::sync::OnceLock<Arc<LeaderRole>>>,
}

#[async_trait]
impl Handler for ForwardingHandler {
    async fn handle(
        &self,
        method: &str,
        peer_cn: &str,
        payload: serde_json::Value,
    ) -> QuorumResult<serde_json::Value> {
        let role = self
            .target
            .get()
            .ok_or_else(|| QuorumError::Internal("leader role not yet initialised".into()))?;
        dispatch(role, method, peer_cn, payload).await
    }
}

async fn dispatch(
    role: &Arc<LeaderRole>,
    method: &str,
    peer_cn: &str,
    payload: serde_json::Value,
) -> QuorumResult<serde_json::Value> {
    match method {
        "ping" => Ok(serde_json::json!(role.ping())),
        "login" => {
            let password = field_str(&payload, "password")?;
            let follower_uri = field_str(&payload, "follower_uri")?;
            let status = role.login(&password, peer_cn, &follower_uri).await?;
            Ok(serde_json::json!({"status": format!("{status:?}")}))
        }
        "cast_vote" => {
            if !role.followers.iter().any(|e| e.value().cn == peer_cn) {
                return Err(QuorumError::Unauthorised);
            }
            let vote = payload.get("vote").and_then(|v| v.as_bool()).unwrap_or(false);
            let voter_uri = field_str(&payload, "voter_uri")?;
            let proposal_id = ProposalId(field_u128(&payload, "proposal_id")?);
            Ok(serde_json::json!(role.cast_vote(vote, &voter_uri, proposal_id).await))
        }
        "leave_database" => {
            role.leave_database(peer_cn).await;
            Ok(serde_json::json!(true))
        }
        "propose_add_entry" | "propose_add_group" | "propose_delete_entry" | "propose_delete_group" => {
            if !role.followers.iter().any(|e| e.value().cn == peer_cn) && peer_cn != "self" {
                return Err(QuorumError::Unauthorised);
            }
            let op = op_for_method(method);
            let data = data_from_payload(&payload)?;
            let requester_uri = field_str(&payload, "requester_uri")?;
            // Per §4.6.2: the RPC caller gets an immediate ack; the
            // completion receiver is intentionally dropped here so the
            // proposal runs to completion in the background.
            let _ = role.propose(op, data, requester_uri).await?;
            Ok(serde_json::json!({"status": "DatabaseChange"}))
        }
        other => Err(QuorumError::Internal(format!("unknown method `{other}`"))),
    }
}

fn commit_method(op: &MutationOp) -> &'static str {
    match op {
        MutationOp::AddEntry => "remote_add_entry",
        MutationOp::AddGroup => "remote_add_group",
        MutationOp::DeleteEntry => "remote_delete_entry",
        MutationOp::DeleteGroup => "remote_delete_group",
    }
}

fn op_for_method(method: &str) -> MutationOp {
    match method {
        "propose_add_entry" => MutationOp::AddEntry,
        "propose_add_group" => MutationOp::AddGroup,
        "propose_delete_entry" => MutationOp::DeleteEntry,
        _ => MutationOp::DeleteGroup,
    }
}

fn mutation_payload(data: &MutationData) -> serde_json::Value {
    serde_json::to_value(data).unwrap_or(serde_json::Value::Null)
}

fn data_from_payload(payload: &serde_json::Value) -> QuorumResult<MutationData> {
    serde_json::from_value(payload.clone())
        .map_err(|e| QuorumError::Internal(format!("bad proposal payload: {e}")))
}

fn field_str(payload: &serde_json::Value, key: &str) -> QuorumResult<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| QuorumError::Internal(format!("missing field `{key}`")))
}

/// 128-bit ids cross the wire as hex strings (see the comment in
/// `login_body`), not JSON numbers.
fn field_u128(payload: &serde_json::Value, key: &str) -> QuorumResult<u128> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| u128::from_str_radix(s, 16).ok())
        .ok_or_else(|| QuorumError::Internal(format!("missing field `{key}`")))
}

pub(crate) async fn apply_locally(store: &Arc<Store>, op: &MutationOp, data: &MutationData) {
    let result = match op {
        MutationOp::AddEntry => {
            store
                .add_entry(
                    data.path.clone(),
                    data.title.clone().unwrap_or_default(),
                    data.username.clone().unwrap_or_default(),
                    data.password.clone().unwrap_or_default(),
                )
                .await
        }
        MutationOp::AddGroup => store.add_group(data.path.clone(), data.title.clone().unwrap_or_default()).await,
        MutationOp::DeleteEntry => store.delete_entry(data.path.clone(), data.title.clone().unwrap_or_default()).await,
        MutationOp::DeleteGroup => store.delete_group(data.path.clone(), data.title.clone().unwrap_or_default()).await,
    };
    if let Err(e) = result {
        warn!(error = %e, "local commit failed");
    }
}

impl LeaderRole {
    /// Runs `op`/`data` through the full propose/notify/vote/commit cycle
    /// with this leader itself as requester, and waits for the outcome.
    /// Used when the operator local to the leader process mutates their
    /// own shared store — per §4.6.2 even the leader's own edits are
    /// proposals, just ones where the leader's vote is automatically yes.
    async fn propose_as_self(&self, op: MutationOp, data: MutationData) -> QuorumResult<()> {
        let role = self.self_arc();
        let self_uri = self.self_uri.clone();
        let done = role.propose(op, data, self_uri).await?;
        let _ = done.await;
        Ok(())
    }
}

#[async_trait]
impl StoreCapability for LeaderRole {
    async fn add_entry(&self, path: EntryPath, title: String, username: String, password: String) -> QuorumResult<()> {
        self.propose_as_self(MutationOp::AddEntry, MutationData::for_entry(path, title, username, password))
            .await
    }

    async fn add_group(&self, path: EntryPath, name: String) -> QuorumResult<()> {
        self.propose_as_self(MutationOp::AddGroup, MutationData::for_group(path, name))
            .await
    }

    async fn delete_entry(&self, path: EntryPath, title: String) -> QuorumResult<()> {
        self.propose_as_self(MutationOp::DeleteEntry, MutationData::for_group(path, title))
            .await
    }

    async fn delete_group(&self, path: EntryPath, name: String) -> QuorumResult<()> {
        self.propose_as_self(MutationOp::DeleteGroup, MutationData::for_group(path, name))
            .await
    }

    fn get_entries(&self) -> Vec<(EntryPath, Entry)> {
        self.store.get_entries()
    }

    fn get_groups(&self) -> Vec<EntryPath> {
        self.store.get_groups()
    }

    fn get_name(&self) -> String {
        self.store.get_name()
    }

    fn get_filename(&self) -> String {
        self.store.get_filename()
    }

    fn save(&self) -> QuorumResult<()> {
        self.store.save()
    }
}
