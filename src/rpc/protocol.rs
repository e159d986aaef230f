//! Wire types for the JSON-RPC 2.0 subset used by this service.
//!
//! Grounded on `original_source/hw3/jsonrpc.py`'s `Request`/`Response`/
//! `JsonRpcError` classes, realized with `serde` derives instead of the
//! original's hand-written `serialize`/`parse_*` functions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Monotonically increasing request id, wrapping modulo 2^32.
pub type RequestId = u32;

/// A JSON-RPC 2.0 request. `params` is always present and always an
/// array; keyword params and batch requests are disallowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    pub params: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }

    /// A request with no `id` is a notification: the receiver must not
    /// produce a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response. Carries exactly one of `result`/`error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: JsonRpcVersion,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl Response {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Always serializes/deserializes as the literal string `"2.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        if s == "2.0" {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom("unsupported jsonrpc version"))
        }
    }
}

/// The JSON-RPC error envelope: `{code, message, data}`.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Value,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn bad_request(data: Value) -> Self {
        Self::new(400, "bad request", data)
    }

    pub fn no_such_request(data: Value) -> Self {
        Self::new(402, "response references no outstanding request", data)
    }

    pub fn no_such_method(method: &str) -> Self {
        Self::new(404, "no such method", Value::String(method.to_string()))
    }
}

/// Raised when a caller tries to use a session whose event loop has
/// already exited.
#[derive(Debug, thiserror::Error)]
#[error("session is disconnected")]
pub struct Disconnected;

/// An inbound JSON object, classified into request/response/malformed.
pub enum Inbound {
    Request(Request),
    Response(Response),
    /// Parsed as a JSON object but matches neither shape.
    Malformed(Value),
}

pub fn classify(value: Value) -> Inbound {
    let Value::Object(ref map) = value else {
        return Inbound::Malformed(value);
    };

    if map.contains_key("method") {
        match serde_json::from_value::<Request>(value.clone()) {
            Ok(req) => Inbound::Request(req),
            Err(_) => Inbound::Malformed(value),
        }
    } else if map.contains_key("id") {
        match serde_json::from_value::<Response>(value.clone()) {
            Ok(resp) => Inbound::Response(resp),
            Err(_) => Inbound::Malformed(value),
        }
    } else {
        Inbound::Malformed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips() {
        let req = Request::new("login", vec![json!("ana")], Some(7));
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: Request = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.method, "login");
        assert_eq!(decoded.params, vec![json!("ana")]);
        assert_eq!(decoded.id, Some(7));
    }

    #[test]
    fn notification_has_no_id_field_on_wire() {
        let req = Request::new("ping", vec![], None);
        let encoded = serde_json::to_value(&req).unwrap();
        assert!(!encoded.as_object().unwrap().contains_key("id"));
        assert!(req.is_notification());
    }

    #[test]
    fn response_carries_exactly_one_of_result_or_error() {
        let ok = Response::success(Some(1), json!("Ok"));
        let encoded = serde_json::to_value(&ok).unwrap();
        assert!(encoded.get("result").is_some());
        assert!(encoded.get("error").is_none());

        let err = Response::failure(Some(1), JsonRpcError::no_such_method("nope"));
        let encoded = serde_json::to_value(&err).unwrap();
        assert!(encoded.get("error").is_some());
        assert!(encoded.get("result").is_none());
    }

    #[test]
    fn classify_distinguishes_request_from_response() {
        let req = json!({"jsonrpc": "2.0", "method": "ping", "params": [], "id": 1});
        assert!(matches!(classify(req), Inbound::Request(_)));

        let resp = json!({"jsonrpc": "2.0", "id": 1, "result": "Ok"});
        assert!(matches!(classify(resp), Inbound::Response(_)));

        let garbage = json!([1, 2, 3]);
        assert!(matches!(classify(garbage), Inbound::Malformed(_)));
    }
}
