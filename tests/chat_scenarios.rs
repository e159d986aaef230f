//! End-to-end scenarios over real TCP connections, mirroring the
//! per-connection wiring in `src/main.rs`'s `run_server`. These exercise
//! the client surface, chain replication, head failover, and stale
//! rejoin scenarios from the design's "Concrete scenarios" list.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use replichat::chat::{self, replica, ChatState, Config, ReplicaAddr};
use replichat::rpc::{self, Session};

/// A running replica process: its shared state plus the accept loop
/// driving it, the same shape as `run_server` in `src/main.rs`.
struct RunningReplica {
    state: Arc<ChatState>,
}

/// Binds a replica at an ephemeral port and runs its accept loop in the
/// background, the same shape as `run_server` in `src/main.rs`.
async fn spawn_replica(self_addr: ReplicaAddr, config: Config, db_path: std::path::PathBuf) -> RunningReplica {
    let state = ChatState::new(self_addr.clone(), config, db_path);
    state.connect_downstream().await;

    let listener = TcpListener::bind((self_addr.host.as_str(), self_addr.port))
        .await
        .expect("bind replica listener");

    let accept_state = state.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            stream.set_nodelay(true).ok();
            let state = accept_state.clone();

            tokio::spawn(async move {
                let conn_id = state.fresh_connection_id();
                let (session, event_loop) = rpc::spawn_session(stream);

                state.register_shared_handlers(&session, conn_id).await;
                let user_session = chat::UserSession::new(state.clone(), session.clone());
                user_session.register_handlers().await;

                event_loop.run().await;

                user_session.on_disconnect().await;
                state.on_connection_closed(conn_id).await;
            });
        }
    });

    RunningReplica { state }
}

/// Reserves an ephemeral port by binding then dropping the listener, so
/// the address can be handed to `spawn_replica` (which binds again) and
/// to peer replicas that need to know it up front.
async fn ephemeral_addr() -> ReplicaAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ReplicaAddr::new("127.0.0.1", port)
}

/// Connects a bare client session (no `UserSession` of its own — these
/// tests drive the client surface directly via `request`).
async fn dial_client(addr: &ReplicaAddr) -> Session<tokio::io::WriteHalf<tokio::net::TcpStream>> {
    let (session, handle) = dial_raw(addr).await;
    std::mem::forget(handle);
    session
}

/// Like `dial_client`, but also returns the event loop's `JoinHandle` so
/// the caller can abort it (dropping the read half) independently of
/// dropping the `Session` (which drops the write half) — the two
/// together are what it takes to fully close a split `TcpStream` and
/// simulate a crashed peer.
async fn dial_raw(
    addr: &ReplicaAddr,
) -> (Session<tokio::io::WriteHalf<tokio::net::TcpStream>>, JoinHandle<()>) {
    let (session, event_loop) = replica::dial(addr).await.expect("dial replica");
    let handle = tokio::spawn(event_loop.run());
    (session, handle)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn s1_create_login_list_delete_on_single_replica() {
    let dir = tempfile::tempdir().unwrap();
    let addr = ephemeral_addr().await;
    let config = Config { servers: vec![addr.clone()] };
    let db_path = dir.path().join(addr.db_file_name());
    let _replica = spawn_replica(addr.clone(), config, db_path).await;
    settle().await;

    let client = dial_client(&addr).await;

    let resp = client.request("create_user", vec![json!("ana")]).await.unwrap();
    assert!(resp.error.is_none());

    let resp = client.request("create_user", vec![json!("ana")]).await.unwrap();
    assert_eq!(resp.error.unwrap().code, 303);

    let resp = client.request("list_users", vec![]).await.unwrap();
    assert_eq!(resp.result.unwrap(), json!(["ana"]));

    let resp = client.request("delete_user", vec![json!("ana")]).await.unwrap();
    assert!(resp.error.is_none());

    let resp = client.request("list_users", vec![]).await.unwrap();
    assert_eq!(resp.result.unwrap(), Value::Array(vec![]));
}

#[tokio::test]
async fn s2_login_of_nonexistent_user_then_created_user_has_empty_pending() {
    let dir = tempfile::tempdir().unwrap();
    let addr = ephemeral_addr().await;
    let config = Config { servers: vec![addr.clone()] };
    let db_path = dir.path().join(addr.db_file_name());
    let _replica = spawn_replica(addr.clone(), config, db_path).await;
    settle().await;

    let client = dial_client(&addr).await;

    let resp = client.request("login", vec![json!("ana")]).await.unwrap();
    assert_eq!(resp.error.unwrap().code, 301);

    client.request("create_user", vec![json!("ana")]).await.unwrap();
    let resp = client.request("login", vec![json!("ana")]).await.unwrap();
    assert_eq!(resp.result.unwrap(), Value::Array(vec![]));
}

#[tokio::test]
async fn s3_offline_delivery_drains_on_login() {
    let dir = tempfile::tempdir().unwrap();
    let addr = ephemeral_addr().await;
    let config = Config { servers: vec![addr.clone()] };
    let db_path = dir.path().join(addr.db_file_name());
    let _replica = spawn_replica(addr.clone(), config, db_path).await;
    settle().await;

    let ana = dial_client(&addr).await;
    ana.request("create_user", vec![json!("ana")]).await.unwrap();
    ana.request("create_user", vec![json!("cam")]).await.unwrap();
    ana.request("login", vec![json!("ana")]).await.unwrap();

    let resp = ana
        .request("send", vec![json!("Hello!"), json!("cam")])
        .await
        .unwrap();
    assert!(resp.error.is_none());

    let cam = dial_client(&addr).await;
    let resp = cam.request("login", vec![json!("cam")]).await.unwrap();
    let pending = resp.result.unwrap();
    let messages = pending.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["sender"], json!("ana"));
    assert_eq!(messages[0]["recipient"], json!("cam"));
    assert_eq!(messages[0]["content"], json!("Hello!"));

    // `cam` is already logged in on the first connection, so a second
    // login attempt from a fresh connection fails 302 rather than
    // returning a second copy of the drained message.
    let cam2 = dial_client(&addr).await;
    let resp = cam2.request("login", vec![json!("cam")]).await.unwrap();
    assert_eq!(resp.error.unwrap().code, 302);
}

#[tokio::test]
async fn s4_chain_write_propagates_to_every_replica_and_its_db_file() {
    let dir = tempfile::tempdir().unwrap();
    let addrs = [
        ephemeral_addr().await,
        ephemeral_addr().await,
        ephemeral_addr().await,
    ];
    let config = Config { servers: addrs.to_vec() };

    // Start from the tail backward so each replica's downstream dial at
    // startup finds a live listener.
    let mut replicas = Vec::new();
    for addr in addrs.iter().rev() {
        let db_path = dir.path().join(addr.db_file_name());
        let replica = spawn_replica(addr.clone(), config.clone(), db_path).await;
        replicas.push(replica);
    }
    replicas.reverse();
    settle().await;

    let primary_addr = &addrs[0];
    let client = dial_client(primary_addr).await;
    let resp = client.request("create_user", vec![json!("x")]).await.unwrap();
    assert!(resp.error.is_none());

    settle().await;

    for (addr, replica) in addrs.iter().zip(replicas.iter()) {
        let resp = replica.state.list_users().await.unwrap();
        assert_eq!(resp, json!(["x"]), "in-memory db at {addr} missing forwarded user");

        let db_path = dir.path().join(addr.db_file_name());
        let text = std::fs::read_to_string(&db_path).expect("db file committed");
        let on_disk: std::collections::HashMap<String, Value> = serde_json::from_str(&text).unwrap();
        assert!(on_disk.contains_key("x"), "db file at {addr} missing forwarded user");
    }
}

#[tokio::test]
async fn s5_head_failover_promotes_first_backup() {
    let dir = tempfile::tempdir().unwrap();
    let addrs = [
        ephemeral_addr().await,
        ephemeral_addr().await,
        ephemeral_addr().await,
    ];
    let config = Config { servers: addrs.to_vec() };

    let db_b2 = dir.path().join(addrs[2].db_file_name());
    let b2 = spawn_replica(addrs[2].clone(), config.clone(), db_b2).await;

    let db_b1 = dir.path().join(addrs[1].db_file_name());
    let b1 = spawn_replica(addrs[1].clone(), config.clone(), db_b1).await;
    settle().await;
    assert!(!b1.state.is_primary());

    // Stand in for P: dial B1 and register as its replica source exactly
    // as a real primary's `connect_downstream` would on startup.
    let (fake_primary, fake_primary_task) = dial_raw(&addrs[1]).await;
    let resp = fake_primary
        .request("register_replica_source", vec![json!({}), Value::Null])
        .await
        .unwrap();
    assert!(resp.error.is_none());

    // Kill P: close both halves of its connection to B1.
    fake_primary_task.abort();
    drop(fake_primary);
    settle().await;
    settle().await;

    assert!(b1.state.is_primary(), "B1 should have promoted itself after P's upstream link died");
    assert!(!b2.state.is_primary(), "B2 sees B1, not itself, as the surviving predecessor");

    // A client can now reconnect to B1 and register successfully.
    let client = dial_client(&addrs[1]).await;
    let resp = client.request("register_client", vec![]).await.unwrap();
    assert!(resp.error.is_none());
}

#[tokio::test]
async fn s6_stale_replica_rejoin_adopts_newer_upstream_state() {
    let dir = tempfile::tempdir().unwrap();
    let addrs = [ephemeral_addr().await, ephemeral_addr().await];
    let config = Config { servers: addrs.to_vec() };

    // Backup starts first with no prior state (mtime NONE).
    let db_backup = dir.path().join(addrs[1].db_file_name());
    let _backup = spawn_replica(addrs[1].clone(), config.clone(), db_backup.clone()).await;

    // Primary starts with a user already on disk, so its mtime is newer
    // than the backup's NONE once it loads and commits that file.
    let db_primary = dir.path().join(addrs[0].db_file_name());
    std::fs::write(&db_primary, serde_json::to_string(&json!({"ana": []})).unwrap()).unwrap();
    let primary = spawn_replica(addrs[0].clone(), config.clone(), db_primary).await;
    settle().await;

    let resp = primary.state.list_users().await.unwrap();
    assert_eq!(resp, json!(["ana"]));

    let text = std::fs::read_to_string(&db_backup).unwrap();
    let on_disk: std::collections::HashMap<String, Value> = serde_json::from_str(&text).unwrap();
    assert!(on_disk.contains_key("ana"), "backup did not adopt upstream's newer state");
}
