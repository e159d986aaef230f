//! Chain configuration: `{"servers": [{"host","port"}, …]}`.
//!
//! Loading the file itself is an external-collaborator concern, but
//! the shape of the config and the position-based predecessor/successor
//! queries it exposes are core to the chain
//! topology, so they live here.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaAddr {
    pub host: String,
    pub port: u16,
}

impl ReplicaAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The file stem used to name this replica's persisted db:
    /// `{host}-{port}-db.json`.
    pub fn db_file_name(&self) -> String {
        format!("{}-{}-db.json", self.host, self.port)
    }

    pub fn to_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("unresolvable replica address {}:{}", self.host, self.port))
    }
}

impl std::fmt::Display for ReplicaAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The ordered chain. Position 0 is the initial primary; position is
/// also how predecessors/successors are defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub servers: Vec<ReplicaAddr>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.as_ref().display()))?;
        let cfg: Config = serde_json::from_str(&text)?;
        Ok(cfg)
    }

    pub fn position_of(&self, addr: &ReplicaAddr) -> Option<usize> {
        self.servers.iter().position(|s| s == addr)
    }

    pub fn is_primary(&self, addr: &ReplicaAddr) -> bool {
        self.position_of(addr) == Some(0)
    }

    /// Addresses strictly after `addr`'s position, in chain order — the
    /// `tail` candidate list used for downstream failover.
    pub fn successors_of(&self, addr: &ReplicaAddr) -> Vec<ReplicaAddr> {
        match self.position_of(addr) {
            Some(pos) => self.servers[pos + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Addresses strictly before `addr`'s position, in chain order — the
    /// candidates probed during leader election.
    pub fn predecessors_of(&self, addr: &ReplicaAddr) -> Vec<ReplicaAddr> {
        match self.position_of(addr) {
            Some(pos) => self.servers[..pos].to_vec(),
            None => Vec::new(),
        }
    }
}
