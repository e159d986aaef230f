//! The chat domain state machine: client surface, replication surface,
//! write forwarding, failover, and persistence, tied together behind
//! one shared `Arc<ChatState>`.
//!
//! Grounded on `original_source/hw3/server.py`'s `Server` class for the
//! handler shapes (the draft stops at a single primary with `TODO`s
//! where chain replication would go; this module completes that part)
//! and on a single-threaded, suspension-point-only mutation discipline
//! realized here with `tokio::sync::Mutex` guards that are never held
//! across more than one await when correctness depends on atomicity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chat::config::{Config, ReplicaAddr};
use crate::chat::db::{Db, Mtime};
use crate::chat::errors;
use crate::chat::message::{Message, MessageList, User};
use crate::chat::replica::{self, ChatSession, DownstreamLink};
use crate::rpc::{Handler, JsonRpcError};

/// A connection-scoped identifier, distinct from the wire-level
/// `RequestId`; used only to recognize "the connection that last
/// registered as my replica source" for head-failover detection.
pub type ConnectionId = u64;

pub struct ChatState {
    pub self_addr: ReplicaAddr,
    pub config: Config,
    db: Mutex<Db>,
    is_primary: AtomicBool,
    downstream: Mutex<DownstreamLink>,
    logins: Mutex<HashMap<User, ChatSession>>,
    upstream_source: Mutex<Option<ConnectionId>>,
    next_conn_id: AtomicU64,
}

/// Outcome of comparing an offered `(db, mtime)` against local state,
/// shared by `register_replica_source` and `update_db` — both compare
/// the same way and both may trigger an adoption.
#[derive(serde::Serialize)]
#[serde(rename_all = "PascalCase")]
enum AdoptOutcome {
    Ok,
    DbUpdate {
        db: HashMap<User, MessageList>,
        mtime: Mtime,
    },
}

impl ChatState {
    pub fn new(self_addr: ReplicaAddr, config: Config, db_path: impl Into<std::path::PathBuf>) -> Arc<Self> {
        let is_primary = config.is_primary(&self_addr);
        Arc::new(Self {
            self_addr,
            config,
            db: Mutex::new(Db::load(db_path)),
            is_primary: AtomicBool::new(is_primary),
            downstream: Mutex::new(DownstreamLink::empty()),
            logins: Mutex::new(HashMap::new()),
            upstream_source: Mutex::new(None),
            next_conn_id: AtomicU64::new(0),
        })
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary.load(Ordering::SeqCst)
    }

    pub fn fresh_connection_id(&self) -> ConnectionId {
        self.next_conn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Establish the downstream link at startup, trying every
    /// configured successor in order.
    pub async fn connect_downstream(self: &Arc<Self>) {
        let candidates = self.config.successors_of(&self.self_addr);
        self.establish_downstream(candidates).await;
    }

    async fn establish_downstream(self: &Arc<Self>, candidates: Vec<ReplicaAddr>) -> bool {
        match replica::connect_first_live(candidates).await {
            Some((session, tail)) => {
                self.register_with_downstream(&session).await;
                *self.downstream.lock().await = DownstreamLink {
                    session: Some(session),
                    tail,
                };
                true
            }
            None => {
                *self.downstream.lock().await = DownstreamLink::empty();
                false
            }
        }
    }

    /// The caller side of the state-transfer handshake run on replica
    /// restart: offer our own `(db, mtime)` and adopt whatever the
    /// reply says we should hold.
    async fn register_with_downstream(self: &Arc<Self>, session: &ChatSession) {
        let (offered_db, offered_mtime) = {
            let db = self.db.lock().await;
            (db.snapshot(), db.mtime())
        };

        let resp = match session
            .request(
                "register_replica_source",
                vec![json!(offered_db), json!(offered_mtime)],
            )
            .await
        {
            Ok(r) => r,
            Err(_) => {
                warn!("downstream closed during register_replica_source handshake");
                return;
            }
        };

        if let Some(err) = resp.error {
            warn!("register_replica_source rejected by downstream: {err}");
            return;
        }

        let Some(result) = resp.result else { return };
        if let Some(update) = result.get("DbUpdate") {
            if let Ok(db) = serde_json::from_value::<HashMap<User, MessageList>>(update["db"].clone()) {
                info!("adopting newer state offered by downstream during handshake");
                self.db.lock().await.replace_all(db);
                let (snapshot, mtime) = {
                    let db = self.db.lock().await;
                    (db.snapshot(), db.mtime())
                };
                self.forward("update_db", vec![json!(snapshot), json!(mtime)]).await;
            }
        }
    }

    /// Forward a mutating operation to the downstream link, reconnecting
    /// through `tail` on failure. Drops the forward silently once `tail`
    /// is exhausted.
    async fn forward(self: &Arc<Self>, method: &str, params: Vec<Value>) {
        loop {
            let live_session = {
                let dl = self.downstream.lock().await;
                if dl.is_live() {
                    dl.session.clone()
                } else {
                    None
                }
            };

            let session = match live_session {
                Some(s) => s,
                None => {
                    let candidates = self.downstream.lock().await.tail.clone();
                    if !self.establish_downstream(candidates).await {
                        return;
                    }
                    continue;
                }
            };

            match session.request(method, params.clone()).await {
                Ok(_) => return,
                Err(_) => {
                    warn!("downstream link died forwarding {method}, attempting failover");
                    self.downstream.lock().await.session = None;
                    continue;
                }
            }
        }
    }

    // ---- Client surface (primary only) ----

    pub async fn create_user(self: &Arc<Self>, user: User) -> Result<Value, JsonRpcError> {
        {
            let db = self.db.lock().await;
            if db.contains(&user) {
                return Err(errors::user_already_exists(&user));
            }
        }
        self.db.lock().await.create_user(user.clone());
        self.forward("create_user", vec![json!(user)]).await;
        Ok(json!("Ok"))
    }

    /// Replication-surface counterpart of `create_user`: idempotent, so
    /// a backup that already holds `user` (e.g. after a full-db adoption
    /// via `register_replica_source`/`update_db`) still cascades the
    /// call further down the chain instead of halting on a 303 that no
    /// client is waiting to see.
    async fn create_user_cascade(self: &Arc<Self>, user: User) -> Result<Value, JsonRpcError> {
        self.db.lock().await.create_user(user.clone());
        self.forward("create_user", vec![json!(user)]).await;
        Ok(json!("Ok"))
    }

    pub async fn delete_user(self: &Arc<Self>, user: User, forward: bool) -> Result<Value, JsonRpcError> {
        self.db.lock().await.delete_user(&user);
        self.logins.lock().await.remove(&user);
        if forward {
            self.forward("delete_user", vec![json!(user)]).await;
        }
        Ok(json!("Ok"))
    }

    pub async fn list_users(&self) -> Result<Value, JsonRpcError> {
        if !self.is_primary() {
            return Err(errors::i_am_backup());
        }
        let users = self.db.lock().await.users();
        Ok(Value::Array(users.into_iter().map(|u| json!(u)).collect()))
    }

    /// The client-facing `login`, called from `UserSession`: validates
    /// the user exists and isn't already logged in elsewhere, then
    /// drains and cascades the pending list.
    pub async fn login(self: &Arc<Self>, user: &User, session: ChatSession) -> Result<Vec<Message>, JsonRpcError> {
        {
            let db = self.db.lock().await;
            if !db.contains(user) {
                return Err(errors::no_such_user(user));
            }
        }
        {
            let mut logins = self.logins.lock().await;
            if logins.contains_key(user) {
                return Err(errors::already_logged_in(user));
            }
            logins.insert(user.clone(), session);
        }

        let pending = self.db.lock().await.retrieve_pending(user);
        self.forward("retrieve_pending", vec![json!(user)]).await;
        Ok(pending)
    }

    pub async fn logout(&self, user: &User) {
        self.logins.lock().await.remove(user);
    }

    pub async fn send_message(self: &Arc<Self>, sender: User, recipient: User, text: String) -> Result<(), JsonRpcError> {
        {
            let db = self.db.lock().await;
            if !db.contains(&recipient) {
                return Err(errors::no_such_user(&recipient));
            }
        }

        // Per the open question on client-supplied sender fields, the
        // authenticated `sender` always wins over anything the client
        // sent in the payload.
        let msg = Message::new(sender, recipient.clone(), text);

        let recipient_session = self.logins.lock().await.get(&recipient).cloned();
        match recipient_session {
            Some(session) => {
                let _ = session.notify("receive_message", vec![json!(msg)]).await;
            }
            None => {
                self.db.lock().await.append_to(&recipient, msg.clone());
                self.forward("store_msg", vec![json!(msg)]).await;
            }
        }
        Ok(())
    }

    // ---- Replication surface (backup only, but registered everywhere) ----

    async fn adopt_or_reject(&self, offered_db: HashMap<User, MessageList>, offered_mtime: Mtime) -> AdoptOutcome {
        let mut db = self.db.lock().await;
        if db.mtime().is_strictly_newer_than(&offered_mtime) {
            AdoptOutcome::DbUpdate {
                db: db.snapshot(),
                mtime: db.mtime(),
            }
        } else {
            db.replace_all(offered_db);
            AdoptOutcome::Ok
        }
    }

    async fn register_replica_source(
        self: &Arc<Self>,
        conn_id: ConnectionId,
        offered_db: HashMap<User, MessageList>,
        offered_mtime: Mtime,
    ) -> Result<Value, JsonRpcError> {
        if self.is_primary() {
            return Err(errors::i_am_primary());
        }
        let outcome = self.adopt_or_reject(offered_db, offered_mtime).await;
        *self.upstream_source.lock().await = Some(conn_id);
        if matches!(outcome, AdoptOutcome::Ok) {
            let (snapshot, mtime) = {
                let db = self.db.lock().await;
                (db.snapshot(), db.mtime())
            };
            self.forward("update_db", vec![json!(snapshot), json!(mtime)]).await;
        }
        Ok(serde_json::to_value(outcome).expect("AdoptOutcome always serializes"))
    }

    async fn update_db(
        self: &Arc<Self>,
        offered_db: HashMap<User, MessageList>,
        offered_mtime: Mtime,
    ) -> Result<Value, JsonRpcError> {
        let outcome = self.adopt_or_reject(offered_db, offered_mtime).await;
        if matches!(outcome, AdoptOutcome::Ok) {
            let (snapshot, mtime) = {
                let db = self.db.lock().await;
                (db.snapshot(), db.mtime())
            };
            self.forward("update_db", vec![json!(snapshot), json!(mtime)]).await;
        }
        Ok(serde_json::to_value(outcome).expect("AdoptOutcome always serializes"))
    }

    async fn retrieve_pending_cascade(self: &Arc<Self>, user: User) -> Result<Value, JsonRpcError> {
        self.db.lock().await.retrieve_pending(&user);
        self.forward("retrieve_pending", vec![json!(user)]).await;
        Ok(json!("Ok"))
    }

    async fn store_msg_cascade(self: &Arc<Self>, msg: Message) -> Result<Value, JsonRpcError> {
        self.db.lock().await.append_to(&msg.recipient.clone(), msg.clone());
        self.forward("store_msg", vec![json!(msg)]).await;
        Ok(json!("Ok"))
    }

    /// Called once per accepted connection after its event loop exits:
    /// runs idempotent connection-scoped cleanup, including leader
    /// election if this connection was our upstream replica source.
    pub async fn on_connection_closed(self: &Arc<Self>, conn_id: ConnectionId) {
        let was_upstream = {
            let mut src = self.upstream_source.lock().await;
            if *src == Some(conn_id) {
                *src = None;
                true
            } else {
                false
            }
        };

        if was_upstream && !self.is_primary() {
            info!("upstream replica source disconnected, running leader election");
            let predecessors = self.config.predecessors_of(&self.self_addr);
            if replica::should_promote_to_primary(&predecessors).await {
                self.is_primary.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Register every role-agnostic and role-gated-but-connection-
    /// independent handler on one incoming connection's RPC session.
    /// `login`/`send` are registered separately by `UserSession`, which
    /// needs per-connection identity.
    pub async fn register_shared_handlers(self: &Arc<Self>, session: &ChatSession, conn_id: ConnectionId) {
        let st = self.clone();
        session
            .register_handler(
                "ping",
                Handler::new(move |_params| {
                    let _ = &st;
                    async move { Ok(json!("Ok")) }
                }),
            )
            .await;

        let st = self.clone();
        session
            .register_handler(
                "register_client",
                Handler::new(move |_params| {
                    let st = st.clone();
                    async move {
                        if st.is_primary() {
                            Ok(json!("Ok"))
                        } else {
                            Err(errors::i_am_backup())
                        }
                    }
                }),
            )
            .await;

        let st = self.clone();
        session
            .register_handler(
                "create_user",
                Handler::new(move |params| {
                    let st = st.clone();
                    async move {
                        let user = parse_user_param(&params)?;
                        if st.is_primary() {
                            st.create_user(user).await
                        } else {
                            st.create_user_cascade(user).await
                        }
                    }
                }),
            )
            .await;

        let st = self.clone();
        session
            .register_handler(
                "delete_user",
                Handler::new(move |params| {
                    let st = st.clone();
                    async move {
                        let user = parse_user_param(&params)?;
                        st.delete_user(user, true).await
                    }
                }),
            )
            .await;

        let st = self.clone();
        session
            .register_handler(
                "list_users",
                Handler::new(move |_params| {
                    let st = st.clone();
                    async move { st.list_users().await }
                }),
            )
            .await;

        let st = self.clone();
        session
            .register_handler(
                "register_replica_source",
                Handler::new(move |params| {
                    let st = st.clone();
                    async move {
                        let (db, mtime) = parse_db_params(&params)?;
                        st.register_replica_source(conn_id, db, mtime).await
                    }
                }),
            )
            .await;

        let st = self.clone();
        session
            .register_handler(
                "update_db",
                Handler::new(move |params| {
                    let st = st.clone();
                    async move {
                        let (db, mtime) = parse_db_params(&params)?;
                        st.update_db(db, mtime).await
                    }
                }),
            )
            .await;

        let st = self.clone();
        session
            .register_handler(
                "retrieve_pending",
                Handler::new(move |params| {
                    let st = st.clone();
                    async move {
                        let user = parse_user_param(&params)?;
                        st.retrieve_pending_cascade(user).await
                    }
                }),
            )
            .await;

        let st = self.clone();
        session
            .register_handler(
                "store_msg",
                Handler::new(move |params| {
                    let st = st.clone();
                    async move {
                        let msg: Message = params
                            .first()
                            .cloned()
                            .and_then(|v| serde_json::from_value(v).ok())
                            .ok_or_else(|| JsonRpcError::bad_request(json!("store_msg expects [Message]")))?;
                        st.store_msg_cascade(msg).await
                    }
                }),
            )
            .await;
    }
}

fn parse_user_param(params: &[Value]) -> Result<User, JsonRpcError> {
    params
        .first()
        .and_then(Value::as_str)
        .map(User::from)
        .ok_or_else(|| JsonRpcError::bad_request(json!("expected a single User string param")))
}

fn parse_db_params(params: &[Value]) -> Result<(HashMap<User, MessageList>, Mtime), JsonRpcError> {
    let db = params
        .first()
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| JsonRpcError::bad_request(json!("expected [db, mtime]")))?;
    let mtime = params
        .get(1)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| JsonRpcError::bad_request(json!("expected [db, mtime]")))?;
    Ok((db, mtime))
}
