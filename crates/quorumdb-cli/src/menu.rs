//! The operator menu (§6). Every action reads a store id from the
//! registry by number rather than holding a "currently selected" slot, so
//! an operator juggling several open/shared/connected stores never loses
//! track of which is which — `List stores` always shows the id to type
//! back.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use quorumdb_core::{QuorumError, StoreCapability};
use quorumdb_discovery::Discovery;
use quorumdb_notify::NotificationQueue;
use quorumdb_rpc::TlsMaterial;
use quorumdb_store::Store;
use quorumdb_cluster::{Context, FollowerRole, LeaderRole, Role};

use crate::config::Config;

pub struct App {
    context: Arc<Context>,
    tls: Arc<TlsMaterial>,
    discovery: Arc<Discovery>,
    notifications: Arc<NotificationQueue>,
    config: Config,
}

impl App {
    pub fn new(tls: Arc<TlsMaterial>, discovery: Arc<Discovery>, notifications: Arc<NotificationQueue>, config: Config) -> Self {
        let context = Context::new(tls.clone(), discovery.clone(), notifications.clone());
        Self {
            context,
            tls,
            discovery,
            notifications,
            config,
        }
    }
}

const MENU_TEXT: &str = "\
1) Create store
2) Open store
3) List stores
4) List entries
5) List groups
6) Add group
7) Add entry
8) Delete group
9) Delete entry
10) Close store
11) Share store
12) Connect to share
13) List available shares
14) Read notifications
15) Answer notification
0) Exit";

/// Drives the menu to completion, returning the process exit code (§6:
/// 0 on graceful exit, 1 if the operator picks a selection with no
/// handler).
pub async fn run(app: App) -> i32 {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        println!("{MENU_TEXT}");
        let Some(choice) = prompt(&mut lines, "> ").await else {
            return 0;
        };

        let outcome = match choice.trim() {
            "1" => create_store(&app, &mut lines).await,
            "2" => open_store(&app, &mut lines).await,
            "3" => list_stores(&app),
            "4" => list_entries(&app, &mut lines).await,
            "5" => list_groups(&app, &mut lines).await,
            "6" => add_group(&app, &mut lines).await,
            "7" => add_entry(&app, &mut lines).await,
            "8" => delete_group(&app, &mut lines).await,
            "9" => delete_entry(&app, &mut lines).await,
            "10" => close_store(&app, &mut lines).await,
            "11" => share_store(&app, &mut lines).await,
            "12" => connect_to_share(&app, &mut lines).await,
            "13" => list_shares(&app),
            "14" => read_notifications(&app),
            "15" => answer_notification(&app, &mut lines).await,
            "0" => return 0,
            other => {
                println!("no such menu item: `{other}`");
                return 1;
            }
        };
        if let Err(e) = outcome {
            print_refusal(&e);
        }
    }
}

async fn prompt(lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>, label: &str) -> Option<String> {
    print!("{label}");
    use std::io::Write;
    let _ = std::io::stdout().flush();
    lines.next_line().await.ok().flatten()
}

fn print_refusal(error: &QuorumError) {
    match error.status() {
        Some(status) => println!("refused ({}): {error}", format!("{status:?}")),
        None => println!("refused: {error}"),
    }
}

fn split_path(raw: &str) -> Vec<String> {
    raw.split('/').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

async fn read_store_id(lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Option<u64> {
    prompt(lines, "store id: ").await?.trim().parse().ok()
}

async fn create_store(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let name = prompt(lines, "store name: ").await.unwrap_or_default();
    let filename = prompt(lines, "file name: ").await.unwrap_or_default();
    let password = prompt(lines, "master password: ").await.unwrap_or_default();
    let path = app.config.share_dir.join(filename);
    let store = Store::create(&path, &password, &name)?;
    let id = Context::add(&app.context, Role::Local(Arc::new(store)));
    println!("created store `{name}` as id {id}");
    Ok(())
}

async fn open_store(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let filename = prompt(lines, "file name: ").await.unwrap_or_default();
    let password = prompt(lines, "master password: ").await.unwrap_or_default();
    let path = app.config.share_dir.join(filename);
    let store = Store::open(&path, &password)?;
    let id = Context::add(&app.context, Role::Local(Arc::new(store)));
    println!("opened store as id {id}");
    Ok(())
}

fn list_stores(app: &App) -> Result<(), QuorumError> {
    for (id, role) in app.context.iter() {
        println!("{id}\t{}\t{}", role.kind(), role.get_name());
    }
    Ok(())
}

fn get_role(app: &App, id: u64) -> Result<Role, QuorumError> {
    app.context.get(id).ok_or_else(|| QuorumError::NotFound(format!("store id {id}")))
}

async fn list_entries(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let id = read_store_id(lines).await.ok_or(QuorumError::Internal("no store id given".into()))?;
    let role = get_role(app, id)?;
    for (path, entry) in role.get_entries() {
        println!("{}/{}\t{}", path.join("/"), entry.title, entry.username);
    }
    Ok(())
}

fn format_path(path: &[String]) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        format!("root/{}", path.join("/"))
    }
}

async fn list_groups(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let id = read_store_id(lines).await.ok_or(QuorumError::Internal("no store id given".into()))?;
    let role = get_role(app, id)?;
    for path in role.get_groups() {
        println!("{}", format_path(&path));
    }
    Ok(())
}

async fn add_group(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let id = read_store_id(lines).await.ok_or(QuorumError::Internal("no store id given".into()))?;
    let role = get_role(app, id)?;
    let parent = split_path(&prompt(lines, "parent path (e.g. work/eng): ").await.unwrap_or_default());
    let name = prompt(lines, "group name: ").await.unwrap_or_default();
    role.add_group(parent, name).await
}

async fn add_entry(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let id = read_store_id(lines).await.ok_or(QuorumError::Internal("no store id given".into()))?;
    let role = get_role(app, id)?;
    let parent = split_path(&prompt(lines, "parent path (e.g. work/eng): ").await.unwrap_or_default());
    let title = prompt(lines, "title: ").await.unwrap_or_default();
    let username = prompt(lines, "username: ").await.unwrap_or_default();
    let password = prompt(lines, "password: ").await.unwrap_or_default();
    role.add_entry(parent, title, username, password).await
}

async fn delete_group(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let id = read_store_id(lines).await.ok_or(QuorumError::Internal("no store id given".into()))?;
    let role = get_role(app, id)?;
    let parent = split_path(&prompt(lines, "parent path (e.g. work/eng): ").await.unwrap_or_default());
    let name = prompt(lines, "group name: ").await.unwrap_or_default();
    role.delete_group(parent, name).await
}

async fn delete_entry(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let id = read_store_id(lines).await.ok_or(QuorumError::Internal("no store id given".into()))?;
    let role = get_role(app, id)?;
    let parent = split_path(&prompt(lines, "parent path (e.g. work/eng): ").await.unwrap_or_default());
    let title = prompt(lines, "title: ").await.unwrap_or_default();
    role.delete_entry(parent, title).await
}

async fn close_store(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let id = read_store_id(lines).await.ok_or(QuorumError::Internal("no store id given".into()))?;
    let role = get_role(app, id)?;
    match role {
        Role::Leader(leader) => {
            leader.close().await;
            app.context.replace(id, Role::Local(leader.store.clone()));
            println!("closed store {id}; cluster notified to elect a new leader, replica kept locally");
        }
        Role::Follower(follower) => {
            follower.leave().await;
            app.context.remove(id);
            println!("closed store {id}; leader notified of departure");
        }
        Role::Local(_) => {
            role.save()?;
            app.context.remove(id);
            println!("closed store {id}");
        }
    }
    Ok(())
}

/// §4.6: promotes a `Role::Local` store to a `Role::Leader`, starting an
/// RPC daemon and advertising it over mDNS so followers can discover it.
async fn share_store(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let id = read_store_id(lines).await.ok_or(QuorumError::Internal("no store id given".into()))?;
    let role = get_role(app, id)?;
    let Role::Local(store) = role else {
        return Err(QuorumError::Internal("only a local store can be shared".into()));
    };

    let leader = LeaderRole::bind(store, app.tls.clone(), app.notifications.clone(), app.config.rpc_bind_address).await?;
    let name = leader.get_name();
    let port = leader
        .self_uri
        .parse::<SocketAddr>()
        .map_err(|e| QuorumError::Internal(format!("leader bound a malformed URI: {e}")))?
        .port();
    let registered = app.discovery.advertise(&name, app.config.advertised_host, port, &leader.self_uri)?;
    app.context.replace(id, Role::Leader(leader.clone()));
    println!("sharing `{name}` at {} (advertised as {registered})", leader.self_uri);
    Ok(())
}

/// §4.7.1: dials a leader's URI and joins its membership as a follower.
async fn connect_to_share(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let leader_uri = prompt(lines, "leader uri (host:port): ").await.unwrap_or_default();
    let password = prompt(lines, "master password: ").await.unwrap_or_default();
    let filename = prompt(lines, "local file name: ").await.unwrap_or_default();
    let path = app.config.share_dir.join(filename);

    let role = FollowerRole::connect(
        &leader_uri,
        &password,
        &path,
        app.tls.clone(),
        app.notifications.clone(),
        app.config.rpc_bind_address,
    )
    .await?;
    let id = Context::add(&app.context, Role::Follower(role));
    println!("connected to {leader_uri} as follower, id {id}");
    Ok(())
}

fn list_shares(app: &App) -> Result<(), QuorumError> {
    for (fullname, record) in app.discovery.candidates() {
        println!("{fullname}\t{}\t{}:{}", record.uri, record.host, record.port);
    }
    Ok(())
}

fn read_notifications(app: &App) -> Result<(), QuorumError> {
    for (index, notification) in app.notifications.snapshot().into_iter().enumerate() {
        println!(
            "{index}) {} (deadline {}, proposal {})",
            notification.message, notification.deadline.0, notification.proposal_id
        );
    }
    Ok(())
}

/// §4.7.4: relays a vote through whichever role the notification's own
/// `share_id` names — a follower relays it to the leader over RPC, a
/// leader (voting on a proposal it did not itself request, §4.6.2 step 5)
/// casts it directly since that vote never leaves the process. Routing by
/// `share_id` rather than "the first follower/leader found" matters the
/// moment an operator has two concurrent shares with pending votes.
async fn answer_notification(app: &App, lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>) -> Result<(), QuorumError> {
    let index: usize = prompt(lines, "notification index: ")
        .await
        .and_then(|s| s.trim().parse().ok())
        .ok_or(QuorumError::Internal("not a valid index".into()))?;
    let vote = match prompt(lines, "vote (y/n): ").await.unwrap_or_default().trim() {
        "y" | "Y" => true,
        _ => false,
    };

    let Some(notification) = app.notifications.remove_at(index) else {
        return Err(QuorumError::NotFound(format!("notification {index}")));
    };

    let role = get_role(app, notification.share_id)?;
    let accepted = match role {
        Role::Follower(follower) => follower.answer_notification(vote, &notification).await?,
        Role::Leader(leader) => {
            if notification.deadline.has_passed() {
                false
            } else {
                let self_uri = leader.self_uri.clone();
                leader.cast_vote(vote, &self_uri, notification.proposal_id).await
            }
        }
        Role::Local(_) => {
            return Err(QuorumError::Internal(format!(
                "store {} is no longer a leader or follower, this vote is stale",
                notification.share_id
            )));
        }
    };

    println!("vote {}", if accepted { "recorded" } else { "rejected (deadline passed or already tallied)" });
    Ok(())
}
