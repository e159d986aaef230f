//! # Replichat
//!
//! A chain-replicated chat service plus a companion Lamport-clock
//! simulation, built from four layers:
//!
//! - [`transport`]: framed byte-message I/O over one duplex pipe.
//! - [`rpc`]: a bidirectional JSON-RPC session multiplexed over one
//!   transport.
//! - [`chat`]: the replicated chat domain — users, messages, chain
//!   topology, failover, persistence.
//! - [`clock`]: an independent Lamport-clock peer simulation.

pub mod chat;
pub mod clock;
pub mod logging;
pub mod rpc;
pub mod transport;

pub use chat::{ChatState, Config, Message, MessageList, ReplicaAddr, User};
pub use rpc::{Session, Handler};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
