//! Chain topology and connection management: dialing, downstream
//! failover, and head (primary) failover.
//!
//! Grounded on `ipc::tcp_socket`'s dialing conventions (`TCP_NODELAY`
//! tuning, `tokio::time::timeout` around connect) and on a
//! view-stamped-replication replica module for the next/tail
//! bookkeeping shape.

use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::chat::config::ReplicaAddr;
use crate::rpc::{self, Session};

pub type ChatSession = Session<WriteHalf<TcpStream>>;
pub type ChatEventLoop = rpc::EventLoop<ReadHalf<TcpStream>, WriteHalf<TcpStream>>;

const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Open a TCP connection to `addr` and wrap it in an RPC session.
/// Mirrors `ipc::tcp_socket`'s `TCP_NODELAY` tuning for a benchmark
/// transport, here applied to chain links instead.
pub async fn dial(addr: &ReplicaAddr) -> anyhow::Result<(ChatSession, ChatEventLoop)> {
    let target = format!("{}:{}", addr.host, addr.port);
    let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&target)).await??;
    stream.set_nodelay(true)?;
    Ok(rpc::spawn_session(stream))
}

/// This replica's single downstream link: a live RPC session to the
/// nearest successor, plus the ordered list of addresses to try next if
/// that session dies.
pub struct DownstreamLink {
    pub session: Option<ChatSession>,
    pub tail: Vec<ReplicaAddr>,
}

impl DownstreamLink {
    pub fn empty() -> Self {
        Self {
            session: None,
            tail: Vec::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(&self.session, Some(s) if s.is_running())
    }
}

/// Try each candidate address in order, dialing and running the new
/// event loop in the background. Returns the session that connected
/// plus the remaining (untried) candidates, or `None` if every
/// candidate failed — meaning this replica is now the tail.
pub async fn connect_first_live(mut candidates: Vec<ReplicaAddr>) -> Option<(ChatSession, Vec<ReplicaAddr>)> {
    while !candidates.is_empty() {
        let addr = candidates.remove(0);
        match dial(&addr).await {
            Ok((session, event_loop)) => {
                tokio::spawn(event_loop.run());
                return Some((session, candidates));
            }
            Err(e) => {
                warn!("failed to dial downstream replica {addr}: {e}");
                continue;
            }
        }
    }
    None
}

/// Leader-election probe: dial `addr` and send a `ping`. Any successful
/// reply means a predecessor is alive.
pub async fn probe_alive(addr: &ReplicaAddr) -> bool {
    let dialed = tokio::time::timeout(DIAL_TIMEOUT, dial(addr)).await;
    let Ok(Ok((session, event_loop))) = dialed else {
        return false;
    };
    tokio::spawn(event_loop.run());

    match tokio::time::timeout(PING_TIMEOUT, session.request("ping", vec![])).await {
        Ok(Ok(resp)) => resp.error.is_none(),
        _ => false,
    }
}

/// Run leader election: probe every address strictly preceding
/// `self_addr` in `config`. Returns `true` if this replica should
/// promote itself to primary (every predecessor is unreachable).
pub async fn should_promote_to_primary(predecessors: &[ReplicaAddr]) -> bool {
    for addr in predecessors {
        if probe_alive(addr).await {
            info!("predecessor {addr} is alive, remaining a backup");
            return false;
        }
    }
    info!("no predecessor responded, promoting to primary");
    true
}
