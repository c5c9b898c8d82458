//! End-to-end scenarios driving real loopback mTLS peers against each
//! other: admission, proposal/vote/commit, and a leader-departure
//! election. Every peer here is a distinct `LeaderRole`/`FollowerRole`
//! bound to its own `127.0.0.1:0` daemon, exactly as separate processes
//! would be, just sharing one test binary's runtime.

mod support;

use std::sync::Arc;
use std::time::Duration;

use quorumdb_cluster::{Context, FollowerRole, LeaderRole, Role};
use quorumdb_core::{QuorumError, QuorumResult, StoreCapability};
use quorumdb_discovery::Discovery;
use quorumdb_notify::NotificationQueue;
use quorumdb_store::Store;

use support::{loopback, Pki};

const PASSWORD: &str = "hunter2";

struct Follower {
    role: Arc<FollowerRole>,
    notifications: Arc<NotificationQueue>,
}

impl std::fmt::Debug for Follower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Follower").finish_non_exhaustive()
    }
}

async fn bind_leader(pki: &Pki, cn: &str) -> (Arc<LeaderRole>, Arc<NotificationQueue>) {
    let tls = pki.issue(cn);
    let store = Arc::new(Store::create(pki.store_path(&format!("{cn}.db")), PASSWORD, "shared").unwrap());
    let notifications = Arc::new(NotificationQueue::new());
    let leader = LeaderRole::bind(store, tls, notifications.clone(), loopback()).await.unwrap();
    (leader, notifications)
}

async fn connect_follower(pki: &Pki, cn: &str, leader_uri: &str, password: &str) -> QuorumResult<Follower> {
    let tls = pki.issue(cn);
    let notifications = Arc::new(NotificationQueue::new());
    let role = FollowerRole::connect(
        leader_uri,
        password,
        pki.store_path(&format!("{cn}.replica.db")),
        tls,
        notifications.clone(),
        loopback(),
    )
    .await?;
    Ok(Follower { role, notifications })
}

/// Polls `check` every 100ms until it returns `Some` or `timeout` elapses.
async fn wait_until<T>(mut check: impl FnMut() -> Option<T>, timeout: Duration) -> Option<T> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// Scenario 1 (§8): share and connect.
#[tokio::test(flavor = "multi_thread")]
async fn share_and_connect_replicates_the_store() {
    let pki = Pki::new();
    let (leader, _leader_notes) = bind_leader(&pki, "peer-a").await;

    let b = connect_follower(&pki, "peer-b", &leader.self_uri, PASSWORD).await.unwrap();

    assert_eq!(b.role.get_entries(), leader.get_entries());
    assert_eq!(b.role.get_groups(), leader.get_groups());

    let followers = leader.followers_snapshot();
    assert_eq!(followers.len(), 1);
    assert_eq!(followers[0].1.cn, "peer-b");
}

// Scenario 2 (§8): wrong password.
#[tokio::test(flavor = "multi_thread")]
async fn wrong_password_is_refused() {
    let pki = Pki::new();
    let (leader, _leader_notes) = bind_leader(&pki, "peer-a").await;

    let err = connect_follower(&pki, "peer-b", &leader.self_uri, "not-the-password")
        .await
        .unwrap_err();
    assert!(matches!(err, QuorumError::Internal(_)));
    assert!(leader.followers_snapshot().is_empty());
}

// Scenario 3 (§8): approved change commits everywhere.
#[tokio::test(flavor = "multi_thread")]
async fn approved_change_commits_on_every_replica() {
    let pki = Pki::new();
    let (leader, leader_notes) = bind_leader(&pki, "peer-a").await;
    let b = connect_follower(&pki, "peer-b", &leader.self_uri, PASSWORD).await.unwrap();
    let c = connect_follower(&pki, "peer-c", &leader.self_uri, PASSWORD).await.unwrap();

    let proposer = tokio::spawn({
        let role = b.role.clone();
        async move { role.add_entry(vec![], "t".into(), "u".into(), "w".into()).await }
    });

    // A is not the requester, so the leader's own operator must vote too.
    let leader_note = wait_until(|| leader_notes.snapshot().into_iter().next(), Duration::from_secs(5))
        .await
        .expect("leader never queued its own vote");
    let self_uri = leader.self_uri.clone();
    assert!(leader.cast_vote(true, &self_uri, leader_note.proposal_id).await);

    let c_note = wait_until(|| c.notifications.snapshot().into_iter().next(), Duration::from_secs(5))
        .await
        .expect("C never received the proposal notification");
    assert!(c.role.answer_notification(true, &c_note).await.unwrap());

    proposer.await.unwrap().unwrap();

    let committed = wait_until(|| (!leader.get_entries().is_empty()).then_some(()), Duration::from_secs(35)).await;
    assert!(committed.is_some(), "proposal never committed within its voting window");

    for entries in [leader.get_entries(), b.role.get_entries(), c.role.get_entries()] {
        assert_eq!(entries.len(), 1);
        let (path, entry) = &entries[0];
        assert!(path.is_empty());
        assert_eq!(entry.title, "t");
        assert_eq!(entry.username, "u");
        assert_eq!(entry.password, "w");
    }
}

// Scenario 4 (§8): denied change leaves every replica untouched.
#[tokio::test(flavor = "multi_thread")]
async fn denied_change_mutates_nothing() {
    let pki = Pki::new();
    let (leader, _leader_notes) = bind_leader(&pki, "peer-a").await;
    leader.store.add_group(vec![], "x".into()).await.unwrap();

    let b = connect_follower(&pki, "peer-b", &leader.self_uri, PASSWORD).await.unwrap();
    let c = connect_follower(&pki, "peer-c", &leader.self_uri, PASSWORD).await.unwrap();
    assert_eq!(b.role.get_groups(), vec![Vec::<String>::new(), vec!["x".to_string()]]);

    let proposer = tokio::spawn({
        let leader = leader.clone();
        async move { leader.delete_group(vec![], "x".into()).await }
    });

    let b_note = wait_until(|| b.notifications.snapshot().into_iter().next(), Duration::from_secs(5))
        .await
        .expect("B never received the proposal notification");
    assert!(b.role.answer_notification(false, &b_note).await.unwrap());
    // C deliberately never votes.

    proposer.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(32)).await;

    let expected = vec![Vec::<String>::new(), vec!["x".to_string()]];
    for groups in [leader.get_groups(), b.role.get_groups(), c.role.get_groups()] {
        assert_eq!(groups, expected, "a 1-yes/1-no/1-silent vote must not reach quorum");
    }
}

async fn test_context(pki: &Pki, cn: &str) -> Arc<Context> {
    let tls = pki.issue(cn);
    let discovery = Arc::new(Discovery::new().expect("mDNS daemon"));
    let notifications = Arc::new(NotificationQueue::new());
    Context::new(tls, discovery, notifications)
}

// Scenario 5 (§8): leader departure triggers an election and the cluster
// converges on exactly one successor. `unique_id`s are random per §3, so
// this checks the property ("at most one leader installs") rather than
// which specific peer wins.
#[tokio::test(flavor = "multi_thread")]
async fn leader_departure_elects_a_successor() {
    let pki = Pki::new();
    let (leader, _leader_notes) = bind_leader(&pki, "peer-a").await;

    let ctx_b = test_context(&pki, "peer-b").await;
    let ctx_c = test_context(&pki, "peer-c").await;

    let tls_b = ctx_b.tls();
    let notes_b = ctx_b.notifications();
    let role_b = FollowerRole::connect(
        &leader.self_uri,
        PASSWORD,
        pki.store_path("peer-b.replica.db"),
        tls_b,
        notes_b,
        loopback(),
    )
    .await
    .unwrap();
    let id_b = Context::add(&ctx_b, Role::Follower(role_b));

    let tls_c = ctx_c.tls();
    let notes_c = ctx_c.notifications();
    let role_c = FollowerRole::connect(
        &leader.self_uri,
        PASSWORD,
        pki.store_path("peer-c.replica.db"),
        tls_c,
        notes_c,
        loopback(),
    )
    .await
    .unwrap();
    let id_c = Context::add(&ctx_c, Role::Follower(role_c));

    leader.close().await;

    let outcome = wait_until(
        || {
            let on_b = ctx_b.get(id_b)?;
            let on_c = ctx_c.get(id_c)?;
            match (on_b, on_c) {
                (Role::Leader(l), Role::Follower(f)) if f.leader_uri().as_deref() == Some(l.self_uri.as_str()) => {
                    Some(l.self_uri.clone())
                }
                (Role::Follower(f), Role::Leader(l)) if f.leader_uri().as_deref() == Some(l.self_uri.as_str()) => {
                    Some(l.self_uri.clone())
                }
                _ => None,
            }
        },
        Duration::from_secs(20),
    )
    .await;

    assert!(outcome.is_some(), "the surviving peers never converged on a single new leader");
}
