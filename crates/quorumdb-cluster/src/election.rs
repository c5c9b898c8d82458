//! C8: bully election by `unique_id`, run entirely on the follower that
//! noticed the leader is gone. The highest surviving id wins; everyone
//! else just waits for that winner's `new_leader` call.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use quorumdb_core::{LeaderStatus, StoreCapability, ROUND_WAIT_WINDOW, RPC_CONNECT_TIMEOUT};
use quorumdb_rpc::Proxy;

use crate::follower::FollowerRole;
use crate::leader::{FollowerInfo, LeaderRole};
use crate::role::Role;

const MAX_ROUNDS: usize = 5;

/// Entry point invoked either off a one-way `start_election` call or when
/// a follower notices its leader is unreachable on its own. Runs to
/// completion: either a new leader is found, this peer promotes itself,
/// or the replica is demoted to a standalone local store.
pub async fn run(role: Arc<FollowerRole>) {
    if role.leader_uri().is_some() && role.ping_leader().await {
        return;
    }

    let Some(_election_guard) = role.acquire_election_lock().await else {
        info!("election already in progress on this peer, ignoring");
        return;
    };

    let context = role.context();
    if let Some(old_uri) = role.clear_leader() {
        if let Some(ctx) = &context {
            ctx.discovery().reintroduce(&old_uri);
        }
    }

    let mut dead: HashSet<String> = HashSet::new();

    for round in 0..MAX_ROUNDS {
        let self_id = role.unique_id().map(|id| id.0).unwrap_or(0);
        let higher: Vec<String> = role
            .followers_ids_snapshot()
            .into_iter()
            .filter(|(uri, id)| *id > self_id && !dead.contains(uri))
            .map(|(uri, _)| uri)
            .collect();

        if higher.is_empty() {
            info!("no surviving peer outranks us, promoting to leader");
            promote_self(&role, &dead).await;
            return;
        }

        let mut any_answered = false;
        for uri in &higher {
            match Proxy::connect(uri, &role.tls()).await {
                Ok(proxy) => {
                    let answered = tokio::time::timeout(RPC_CONNECT_TIMEOUT, proxy.call("ping", serde_json::json!({})))
                        .await
                        .ok()
                        .and_then(|r| r.ok())
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    let _ = proxy.call_one_way("start_election", serde_json::json!({})).await;
                    if answered {
                        any_answered = true;
                    } else {
                        dead.insert(uri.clone());
                    }
                }
                Err(_) => {
                    dead.insert(uri.clone());
                }
            }
        }

        if !any_answered {
            continue;
        }

        let wait = role.arm_new_leader_wait();
        match tokio::time::timeout(ROUND_WAIT_WINDOW, wait).await {
            Ok(Ok((_id, leader_uri, leader_cn))) => {
                role.set_leader(leader_uri.clone(), leader_cn);
                if let Some(ctx) = &context {
                    ctx.discovery().ignore(&leader_uri);
                }
                info!(leader_uri, "accepted new leader");
                return;
            }
            _ => {
                warn!(round, "no new_leader call arrived in this round's window");
            }
        }
    }

    warn!(
        "election exhausted all rounds without a new leader; this peer can no longer rejoin \
         the surviving cluster automatically and must reconnect to a fresh share"
    );
    demote_to_local(&role);
}

/// §4.8 step 4a-e: this peer outranks every surviving follower, so it
/// takes over as leader. The new `LeaderRole`'s `operation_lock` is held
/// for the whole handover so no mutation can land before membership is
/// copied across.
async fn promote_self(role: &Arc<FollowerRole>, dead: &HashSet<String>) {
    let Some(context) = role.context() else {
        warn!("election promotion skipped: follower was never linked to a context");
        return;
    };
    let Some(local_id) = role.local_id() else {
        warn!("election promotion skipped: follower has no registry id");
        return;
    };

    let store = role.store_arc();
    let tls = role.tls();
    let notifications = context.notifications();
    let bind_addr: SocketAddr = "0.0.0.0:0".parse().expect("valid wildcard address");

    let leader = match LeaderRole::bind(store, tls.clone(), notifications, bind_addr).await {
        Ok(leader) => leader,
        Err(e) => {
            warn!(error = %e, "election promotion failed to bind the new leader's RPC daemon");
            return;
        }
    };

    let guard = leader.operation_lock().lock_owned().await;
    leader.set_status(LeaderStatus::DatabaseChange);

    let self_uri = role.self_uri().to_string();
    let ids = role.followers_ids_snapshot();
    let cns = role.followers_cns_snapshot();
    let new_unique_id = role.unique_id().map(|id| id.0).unwrap_or(0);

    let inherited: Vec<(String, FollowerInfo)> = ids
        .iter()
        .filter(|(uri, _)| *uri != &self_uri && !dead.contains(*uri))
        .filter_map(|(uri, id)| {
            cns.get(uri).map(|cn| {
                (
                    uri.clone(),
                    FollowerInfo {
                        cn: cn.clone(),
                        id: quorumdb_core::FollowerId(*id),
                    },
                )
            })
        })
        .collect();
    leader.seed_followers(inherited.clone());

    let snapshot = match leader_store_snapshot(&leader) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "could not snapshot store for handover, aborting promotion");
            leader.set_status(LeaderStatus::Free);
            drop(guard);
            return;
        }
    };

    let mut newly_dead = Vec::new();
    let retired: HashSet<String> = dead.iter().cloned().chain(std::iter::once(self_uri.clone())).collect();
    for (uri, _) in &inherited {
        match Proxy::connect(uri, &tls).await {
            Ok(proxy) => {
                let ok = proxy
                    .call(
                        "new_leader",
                        serde_json::json!({
                            "unique_id": quorumdb_core::FollowerId(new_unique_id).to_string(),
                            "leader_uri": leader.self_uri,
                        }),
                    )
                    .await
                    .is_ok()
                    && proxy
                        .call("receive_db", serde_json::json!({"blob": snapshot}))
                        .await
                        .is_ok()
                    && proxy
                        .call("remove_uris", serde_json::json!({"uris": retired.iter().collect::<Vec<_>>()}))
                        .await
                        .is_ok();
                if !ok {
                    newly_dead.push(uri.clone());
                }
            }
            Err(_) => newly_dead.push(uri.clone()),
        }
    }
    leader.sweep_dead_pub(newly_dead).await;

    if let Ok(host_port) = leader.self_uri.parse::<SocketAddr>() {
        let share_name = leader.get_name();
        if let Err(e) = context.discovery().advertise(&share_name, host_port.ip(), host_port.port(), &leader.self_uri) {
            warn!(error = %e, "failed to advertise promoted leader's share");
        }
    }

    leader.set_status(LeaderStatus::Free);
    drop(guard);

    context.replace(local_id, Role::Leader(leader.clone()));
    info!(leader_uri = %leader.self_uri, "promotion to leader complete");
}

fn leader_store_snapshot(leader: &Arc<LeaderRole>) -> quorumdb_core::QuorumResult<Vec<u8>> {
    leader.store.snapshot_bytes()
}

fn demote_to_local(role: &Arc<FollowerRole>) {
    let Some(context) = role.context() else {
        return;
    };
    let Some(local_id) = role.local_id() else {
        return;
    };
    context.replace(local_id, Role::Local(role.store_arc()));
}
