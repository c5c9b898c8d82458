use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use quorumdb_core::{
    Deadline, Entry, EntryPath, FollowerId, MutationData, MutationOp, ProposalId, QuorumError,
    QuorumResult, RPC_CONNECT_TIMEOUT, StoreCapability,
};
use quorumdb_notify::{Notification, NotificationQueue};
use quorumdb_rpc::{Daemon, Handler, Proxy, TlsMaterial};
use quorumdb_store::Store;

use crate::context::Context;

/// Who this follower currently takes orders from. Cleared at the start of
/// an election (§4.8 step 3) so a stale leader can't keep dispatching RPCs
/// into this role mid-vote.
struct LeaderLink {
    uri: String,
    cn: String,
}

/// C7: a local replica that forwards every mutation to its leader as a
/// proposal and applies whatever the leader subsequently commits. The
/// store itself doesn't exist until the leader's admission callbacks land
/// (`receive_db` in particular), so it starts out empty and is filled in
/// during [`FollowerRole::connect`].
pub struct FollowerRole {
    store: Mutex<Option<Arc<Store>>>,
    local_file_path: PathBuf,
    password: String,
    self_uri: String,
    tls: Arc<TlsMaterial>,
    notifications: Arc<NotificationQueue>,
    leader: RwLock<Option<LeaderLink>>,
    followers_ids: RwLock<HashMap<String, u128>>,
    followers_cns: RwLock<HashMap<String, String>>,
    unique_id: RwLock<Option<FollowerId>>,
    election_lock: Arc<AsyncMutex<()>>,
    pending_new_leader: Mutex<Option<tokio::sync::oneshot::Sender<(u128, String, String)>>>,
    context: std::sync::OnceLock<Weak<Context>>,
    local_id: std::sync::OnceLock<u64>,
    _daemon: Daemon,
}

impl FollowerRole {
    /// §4.7.1. Dials `leader_uri`, registers a local servant, and asks the
    /// leader to admit it with `password`. The leader calls back into the
    /// servant (`receive_db`/`receive_uris`/`set_unique_id`) before its
    /// `login` reply reaches us, so by the time this returns `Ok` the
    /// replica is fully populated.
    pub async fn connect(
        leader_uri: &str,
        password: &str,
        local_file_path: impl AsRef<Path>,
        tls: Arc<TlsMaterial>,
        notifications: Arc<NotificationQueue>,
        bind_addr: SocketAddr,
    ) -> QuorumResult<Arc<Self>> {
        let admission_proxy = Proxy::connect(leader_uri, &tls).await?;
        let leader_cn = admission_proxy.peer_cn().to_string();

        let target: Arc<std::sync::OnceLock<Arc<FollowerRole>>> = Arc::new(std::sync::OnceLock::new());
        let handler: Arc<dyn Handler> = Arc::new(ForwardingHandler {
            target: target.clone(),
        });
        let daemon = Daemon::bind(bind_addr, tls.clone(), handler).await?;
        let self_uri = daemon.local_addr().to_string();

        let role = Arc::new(Self {
            store: Mutex::new(None),
            local_file_path: local_file_path.as_ref().to_path_buf(),
            password: password.to_string(),
            self_uri: self_uri.clone(),
            tls,
            notifications,
            leader: RwLock::new(Some(LeaderLink {
                uri: leader_uri.to_string(),
                cn: leader_cn,
            })),
            followers_ids: RwLock::new(HashMap::new()),
            followers_cns: RwLock::new(HashMap::new()),
            unique_id: RwLock::new(None),
            election_lock: Arc::new(AsyncMutex::new(())),
            pending_new_leader: Mutex::new(None),
            context: std::sync::OnceLock::new(),
            local_id: std::sync::OnceLock::new(),
            _daemon: daemon,
        });
        let _ = target.set(role.clone());

        admission_proxy
            .call(
                "login",
                serde_json::json!({"password": password, "follower_uri": self_uri}),
            )
            .await?;

        if role.store.lock().expect("follower store lock poisoned").is_none() {
            return Err(QuorumError::Internal(
                "leader admitted us without sending a store image".into(),
            ));
        }
        info!(leader_uri, follower_uri = %role.self_uri, "admitted as follower");
        Ok(role)
    }

    /// Links this role into the process-wide registry so a self-promotion
    /// during an election has somewhere to install the new leader.
    pub(crate) fn bind_context(&self, context: &Arc<Context>, local_id: u64) {
        let _ = self.context.set(Arc::downgrade(context));
        let _ = self.local_id.set(local_id);
    }

    pub(crate) fn context(&self) -> Option<Arc<Context>> {
        self.context.get().and_then(|w| w.upgrade())
    }

    pub(crate) fn local_id(&self) -> Option<u64> {
        self.local_id.get().copied()
    }

    pub(crate) fn tls(&self) -> Arc<TlsMaterial> {
        self.tls.clone()
    }

    pub(crate) fn self_uri(&self) -> &str {
        &self.self_uri
    }

    pub fn unique_id(&self) -> Option<FollowerId> {
        *self.unique_id.read().expect("unique_id lock poisoned")
    }

    pub fn leader_uri(&self) -> Option<String> {
        self.leader.read().expect("leader lock poisoned").as_ref().map(|l| l.uri.clone())
    }

    pub fn leader_cn(&self) -> Option<String> {
        self.leader.read().expect("leader lock poisoned").as_ref().map(|l| l.cn.clone())
    }

    pub(crate) fn followers_ids_snapshot(&self) -> HashMap<String, u128> {
        self.followers_ids.read().expect("followers_ids lock poisoned").clone()
    }

    pub(crate) fn followers_cns_snapshot(&self) -> HashMap<String, String> {
        self.followers_cns.read().expect("followers_cns lock poisoned").clone()
    }

    pub(crate) fn store_arc(&self) -> Arc<Store> {
        self.store()
    }

    /// §4.8 step 1: a cheap liveness probe used both by election and by
    /// the operator-facing `ping` display. Bounded by `RPC_CONNECT_TIMEOUT`
    /// so a leader that accepted the connection but hangs mid-request (its
    /// `TlsChannel` mutex stuck behind another in-flight call) still counts
    /// as unreachable instead of blocking this call forever.
    pub async fn ping_leader(&self) -> bool {
        let Some(uri) = self.leader_uri() else {
            return false;
        };
        let Ok(proxy) = Proxy::connect(&uri, &self.tls).await else {
            return false;
        };
        tokio::time::timeout(RPC_CONNECT_TIMEOUT, proxy.call("ping", serde_json::json!({})))
            .await
            .ok()
            .and_then(|r| r.ok())
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// §4.6.6 graceful departure: tells the leader this follower is leaving
    /// before the caller drops it from the registry, so the leader's
    /// membership table doesn't carry a phantom entry until an unrelated
    /// RPC fan-out happens to discover it's unreachable.
    pub async fn leave(&self) {
        let Some(uri) = self.leader_uri() else {
            return;
        };
        if let Ok(proxy) = Proxy::connect(&uri, &self.tls).await {
            let _ = proxy.call_one_way("leave_database", serde_json::json!({})).await;
        }
    }

    /// §4.8 step 3: drop the current leader link and un-hide its mDNS
    /// advertisement so it shows back up as a candidate share once (if)
    /// it recovers independently.
    pub(crate) fn clear_leader(&self) -> Option<String> {
        let old = self.leader.write().expect("leader lock poisoned").take();
        old.map(|l| l.uri)
    }

    pub(crate) fn set_leader(&self, uri: String, cn: String) {
        *self.leader.write().expect("leader lock poisoned") = Some(LeaderLink { uri, cn });
    }

    pub(crate) async fn acquire_election_lock(&self) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        self.election_lock.clone().try_lock_owned().ok()
    }

    /// Whether an election is currently in progress on this peer, used
    /// both to gate operator mutations (§4.7.2) and to decide whether an
    /// inbound `new_leader` call is plausible at all.
    pub(crate) fn election_in_progress(&self) -> bool {
        self.election_lock.try_lock().is_err()
    }

    /// Arms a one-shot slot for the next `new_leader` call to land in,
    /// returning the receiver the election loop waits on for up to 60 s.
    pub(crate) fn arm_new_leader_wait(&self) -> tokio::sync::oneshot::Receiver<(u128, String, String)> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        *self.pending_new_leader.lock().expect("pending_new_leader lock poisoned") = Some(tx);
        rx
    }

    fn accept_new_leader(&self, unique_id: u128, leader_uri: String, leader_cn: String) -> bool {
        let sender = self
            .pending_new_leader
            .lock()
            .expect("pending_new_leader lock poisoned")
            .take();
        match sender {
            Some(tx) => tx.send((unique_id, leader_uri, leader_cn)).is_ok(),
            None => false,
        }
    }

    fn store(&self) -> Arc<Store> {
        self.store
            .lock()
            .expect("follower store lock poisoned")
            .clone()
            .expect("follower store received before use")
    }

    /// §4.7.2: forwards an operator mutation to the leader as a proposal.
    /// Refuses outright while an election holds `election_lock`, since the
    /// leader link is unreliable mid-election.
    async fn propose_via_leader(&self, method: &str, data: MutationData) -> QuorumResult<()> {
        if self.election_in_progress() {
            return Err(QuorumError::ElectionInProgress);
        }
        let leader_uri = self.leader_uri().ok_or_else(|| QuorumError::Unreachable("no leader".into()))?;
        let proxy = Proxy::connect(&leader_uri, &self.tls).await?;
        let mut payload = serde_json::to_value(&data).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert("requester_uri".to_string(), serde_json::Value::String(self.self_uri.clone()));
        }
        proxy.call(method, payload).await?;
        Ok(())
    }

    /// §4.7.4. Relays the operator's vote to the leader; rejects locally
    /// without a round trip once the notification's own deadline has
    /// passed.
    pub async fn answer_notification(&self, vote: bool, notification: &Notification) -> QuorumResult<bool> {
        if notification.deadline.has_passed() {
            return Ok(false);
        }
        let leader_uri = self.leader_uri().ok_or_else(|| QuorumError::Unreachable("no leader".into()))?;
        let proxy = Proxy::connect(&leader_uri, &self.tls).await?;
        let accepted = proxy
            .call(
                "cast_vote",
                serde_json::json!({
                    "vote": vote,
                    "voter_uri": self.self_uri,
                    "proposal_id": notification.proposal_id.to_string(),
                }),
            )
            .await?
            .as_bool()
            .unwrap_or(false);
        Ok(accepted)
    }
}

struct ForwardingHandler {
    target: Arc<std::sync::OnceLock<Arc<FollowerRole>>>,
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
            .ok_or_else(|| QuorumError::Internal("follower role not yet initialised".into()))?;
        dispatch(role, method, peer_cn, payload).await
    }
}

/// §4.7.3: every handler here is authorised by `peer_cn == leader_cn`
/// alone — a follower never accepts pushed state from anyone else, even a
/// fellow follower it otherwise trusts.
#[instrument(skip(role, payload))]
async fn dispatch(
    role: &Arc<FollowerRole>,
    method: &str,
    peer_cn: &str,
    payload: serde_json::Value,
) -> QuorumResult<serde_json::Value> {
    if method == "start_election" {
        let role = role.clone();
        tokio::spawn(async move {
            crate::election::run(role).await;
        });
        return Ok(serde_json::json!(true));
    }

    if method == "new_leader" {
        // Deliberately not gated on `leader_cn`: during an election there
        // is no leader to compare against. Guarded instead by the three
        // conditions in §4.8 — an election actually pending here, a
        // strictly higher id, and a reachable claimed leader.
        let claimed_id = field_u128(&payload, "unique_id")?;
        let leader_uri = field_str(&payload, "leader_uri")?;
        let self_id = role.unique_id().map(|id| id.0).unwrap_or(0);
        let plausible = role.election_in_progress()
            && claimed_id > self_id
            && Proxy::connect(&leader_uri, &role.tls).await.is_ok();
        if !plausible {
            return Err(QuorumError::Unauthorised);
        }
        let accepted = role.accept_new_leader(claimed_id, leader_uri, peer_cn.to_string());
        return Ok(serde_json::json!(accepted));
    }

    let is_leader = role.leader_cn().as_deref() == Some(peer_cn);
    if !is_leader {
        return Err(QuorumError::Unauthorised);
    }

    match method {
        "add_uri" => {
            let uri = field_str(&payload, "uri")?;
            let id = field_u128(&payload, "id")?;
            let cn = field_str(&payload, "cn")?;
            role.followers_ids.write().expect("followers_ids lock poisoned").insert(uri.clone(), id);
            role.followers_cns.write().expect("followers_cns lock poisoned").insert(uri, cn);
            Ok(serde_json::json!(true))
        }
        "remove_uris" => {
            let uris: Vec<String> = payload
                .get("uris")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            let mut ids = role.followers_ids.write().expect("followers_ids lock poisoned");
            let mut cns = role.followers_cns.write().expect("followers_cns lock poisoned");
            for uri in &uris {
                ids.remove(uri);
                cns.remove(uri);
            }
            Ok(serde_json::json!(true))
        }
        "receive_uris" => {
            let ids_hex: HashMap<String, String> = payload
                .get("ids")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            let ids: HashMap<String, u128> = ids_hex
                .into_iter()
                .filter_map(|(uri, hex)| u128::from_str_radix(&hex, 16).ok().map(|id| (uri, id)))
                .collect();
            let cns: HashMap<String, String> = payload
                .get("cns")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            *role.followers_ids.write().expect("followers_ids lock poisoned") = ids;
            *role.followers_cns.write().expect("followers_cns lock poisoned") = cns;
            Ok(serde_json::json!(true))
        }
        "receive_db" => {
            let blob: Vec<u8> = payload
                .get("blob")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .ok_or_else(|| QuorumError::Internal("missing field `blob`".into()))?;
            let store = Store::receive(&role.local_file_path, &role.password, &blob)?;
            *role.store.lock().expect("follower store lock poisoned") = Some(Arc::new(store));
            Ok(serde_json::json!(true))
        }
        "set_unique_id" => {
            let id = field_u128(&payload, "id")?;
            *role.unique_id.write().expect("unique_id lock poisoned") = Some(FollowerId(id));
            Ok(serde_json::json!(true))
        }
        "add_notification" => {
            let message = field_str(&payload, "message")?;
            let deadline = Deadline(field_u64(&payload, "deadline")?);
            let proposal_id = ProposalId(field_u128(&payload, "proposal_id")?);
            info!(%message, "new proposal awaiting vote");
            role.notifications.push(Notification {
                message,
                deadline,
                proposal_id,
                share_id: role.local_id().unwrap_or(0),
            });
            Ok(serde_json::json!(true))
        }
        "remote_add_entry" | "remote_add_group" | "remote_delete_entry" | "remote_delete_group" => {
            let op = op_for_method(method);
            let data: MutationData = serde_json::from_value(payload)
                .map_err(|e| QuorumError::Internal(format!("bad commit payload: {e}")))?;
            let ok = apply_locally(&role.store(), &op, &data).await;
            Ok(serde_json::json!(ok))
        }
        "remote_print_message" => {
            let text = field_str(&payload, "text")?;
            info!(%text, "message from leader");
            Ok(serde_json::json!(true))
        }
        other => Err(QuorumError::Internal(format!("unknown method `{other}`"))),
    }
}

fn op_for_method(method: &str) -> MutationOp {
    match method {
        "remote_add_entry" => MutationOp::AddEntry,
        "remote_add_group" => MutationOp::AddGroup,
        "remote_delete_entry" => MutationOp::DeleteEntry,
        _ => MutationOp::DeleteGroup,
    }
}

/// A follower never bubbles a commit failure back to the leader (§4.7.3) —
/// the leader already decided this proposal passed, so a follower that
/// can't apply it just logs and stays out of sync until the next full
/// `receive_db`.
async fn apply_locally(store: &Arc<Store>, op: &MutationOp, data: &MutationData) -> bool {
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
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "remote commit failed locally");
            false
        }
    }
}

fn field_str(payload: &serde_json::Value, key: &str) -> QuorumResult<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| QuorumError::Internal(format!("missing field `{key}`")))
}

/// 128-bit ids cross the wire as hex strings, not JSON numbers, since
/// `serde_json::Value` only carries integers losslessly up to 64 bits.
fn field_u128(payload: &serde_json::Value, key: &str) -> QuorumResult<u128> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| u128::from_str_radix(s, 16).ok())
        .ok_or_else(|| QuorumError::Internal(format!("missing field `{key}`")))
}

fn field_u64(payload: &serde_json::Value, key: &str) -> QuorumResult<u64> {
    payload
        .get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| QuorumError::Internal(format!("missing field `{key}`")))
}

#[async_trait]
impl StoreCapability for FollowerRole {
    async fn add_entry(&self, path: EntryPath, title: String, username: String, password: String) -> QuorumResult<()> {
        self.propose_via_leader("propose_add_entry", MutationData::for_entry(path, title, username, password))
            .await
    }

    async fn add_group(&self, path: EntryPath, name: String) -> QuorumResult<()> {
        self.propose_via_leader("propose_add_group", MutationData::for_group(path, name)).await
    }

    async fn delete_entry(&self, path: EntryPath, title: String) -> QuorumResult<()> {
        self.propose_via_leader("propose_delete_entry", MutationData::for_group(path, title)).await
    }

    async fn delete_group(&self, path: EntryPath, name: String) -> QuorumResult<()> {
        self.propose_via_leader("propose_delete_group", MutationData::for_group(path, name)).await
    }

    fn get_entries(&self) -> Vec<(EntryPath, Entry)> {
        self.store().get_entries()
    }

    fn get_groups(&self) -> Vec<EntryPath> {
        self.store().get_groups()
    }

    fn get_name(&self) -> String {
        self.store().get_name()
    }

    fn get_filename(&self) -> String {
        self.store().get_filename()
    }

    fn save(&self) -> QuorumResult<()> {
        self.store().save()
    }
}
