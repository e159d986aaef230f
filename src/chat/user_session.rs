//! Per-connected-client session state.
//!
//! Tracks at most one logged-in user for one client connection and
//! registers the two client-facing handlers (`login`, `send`) that need
//! that per-connection identity. The remaining client/replication
//! handlers are role-agnostic and registered directly by
//! [`crate::chat::state::ChatState`].

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::chat::errors;
use crate::chat::message::{Message, User};
use crate::chat::replica::ChatSession;
use crate::chat::state::ChatState;
use crate::rpc::{Handler, JsonRpcError};

pub struct UserSession {
    state: Arc<ChatState>,
    session: ChatSession,
    username: Mutex<Option<User>>,
}

impl UserSession {
    pub fn new(state: Arc<ChatState>, session: ChatSession) -> Arc<Self> {
        Arc::new(Self {
            state,
            session,
            username: Mutex::new(None),
        })
    }

    /// Register `login` and `send` on the owning RPC session.
    pub async fn register_handlers(self: &Arc<Self>) {
        let login_self = self.clone();
        self.session
            .register_handler(
                "login",
                Handler::new(move |params| {
                    let me = login_self.clone();
                    async move { me.login(params).await }
                }),
            )
            .await;

        let send_self = self.clone();
        self.session
            .register_handler(
                "send",
                Handler::new(move |params| {
                    let me = send_self.clone();
                    async move { me.send(params).await }
                }),
            )
            .await;
    }

    async fn login(&self, params: Vec<Value>) -> Result<Value, JsonRpcError> {
        if !self.state.is_primary() {
            return Err(errors::i_am_backup());
        }

        let user: User = parse_user(&params)?;

        let mut mine = self.username.lock().await;
        if mine.is_some() {
            return Err(errors::already_logged_in_session(&user));
        }

        let pending = self.state.login(&user, self.session.clone()).await?;
        *mine = Some(user);

        Ok(Value::Array(pending.into_iter().map(message_to_value).collect()))
    }

    async fn send(&self, params: Vec<Value>) -> Result<Value, JsonRpcError> {
        if !self.state.is_primary() {
            return Err(errors::i_am_backup());
        }

        let text = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::bad_request(json!("send expects [text, recipient]")))?
            .to_string();
        let recipient: User = params
            .get(1)
            .and_then(Value::as_str)
            .map(User::from)
            .ok_or_else(|| JsonRpcError::bad_request(json!("send expects [text, recipient]")))?;

        let sender = self
            .username
            .lock()
            .await
            .clone()
            .ok_or_else(errors::not_logged_in)?;

        self.state.send_message(sender, recipient, text).await?;
        Ok(json!("Ok"))
    }

    /// Run on pipe close: an idempotent logout — if a user was logged
    /// in on this connection, it fires exactly once.
    pub async fn on_disconnect(&self) {
        let mut mine = self.username.lock().await;
        if let Some(user) = mine.take() {
            self.state.logout(&user).await;
        }
    }
}

fn parse_user(params: &[Value]) -> Result<User, JsonRpcError> {
    params
        .first()
        .and_then(Value::as_str)
        .map(User::from)
        .ok_or_else(|| JsonRpcError::bad_request(json!("expected a single User string param")))
}

pub fn message_to_value(msg: Message) -> Value {
    serde_json::to_value(msg).expect("Message always serializes")
}
