//! JSON-RPC session layer: request/notification/response
//! multiplexing over the framed [`crate::transport`].

pub mod completion;
pub mod protocol;
pub mod session;

pub use protocol::{Disconnected, JsonRpcError, Request, RequestId, Response};
pub use session::{spawn_session, EventLoop, Handler, Session};
