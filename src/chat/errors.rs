//! Domain error codes (301–306, 500–501), expressed as `JsonRpcError`
//! constructors so handlers can `?`-propagate them directly into a
//! response.

use serde_json::{json, Value};

use crate::rpc::JsonRpcError;
use crate::chat::message::User;

pub fn no_such_user(user: &User) -> JsonRpcError {
    JsonRpcError::new(301, "no such user", json!(user.as_str()))
}

pub fn already_logged_in(user: &User) -> JsonRpcError {
    JsonRpcError::new(302, "user is already logged in", json!(user.as_str()))
}

pub fn user_already_exists(user: &User) -> JsonRpcError {
    JsonRpcError::new(303, "user already exists", json!(user.as_str()))
}

pub fn not_logged_in() -> JsonRpcError {
    JsonRpcError::new(304, "not logged in", Value::Null)
}

pub fn already_logged_in_session(user: &User) -> JsonRpcError {
    JsonRpcError::new(306, "this session has already logged in", json!(user.as_str()))
}

pub fn i_am_backup() -> JsonRpcError {
    JsonRpcError::new(500, "I am a backup, connect to primary", Value::Null)
}

pub fn i_am_primary() -> JsonRpcError {
    JsonRpcError::new(501, "I am primary, refusing to re-register as replica source", Value::Null)
}
