//! The replicated store: `User → MessageList`, with atomic-from-the-
//! client's-perspective commit to a JSON file and filesystem-mtime
//! tracking.
//!
//! Grounded on `original_source/hw3/server.py`'s `Db` class (load/dump
//! via stdlib `json`, `os.path.getmtime`), translated to `serde_json`
//! and `std::fs`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chat::message::{Message, MessageList, User};

/// A commit timestamp in whole nanoseconds since the Unix epoch. `None`
/// means "no file has ever been committed"; it orders strictly before
/// any numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mtime(pub Option<u64>);

impl Mtime {
    pub const NONE: Mtime = Mtime(None);

    fn now() -> Mtime {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_nanos() as u64;
        Mtime(Some(nanos))
    }

    /// Whether `self` is strictly newer than `other`, per the ordering
    /// rule where NONE is older than any numeric mtime.
    pub fn is_strictly_newer_than(&self, other: &Mtime) -> bool {
        self > other
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct DbFile(HashMap<User, MessageList>);

/// One replica's view of the chat store.
pub struct Db {
    path: PathBuf,
    data: HashMap<User, MessageList>,
    mtime: Mtime,
}

impl Db {
    /// Load a db from `path` if present; otherwise start empty with
    /// `Mtime::NONE`, matching a brand-new replica that has never
    /// committed.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let data = serde_json::from_str::<DbFile>(&text).unwrap_or_default().0;
                let mtime = file_mtime(&path).unwrap_or(Mtime::NONE);
                Db { path, data, mtime }
            }
            Err(_) => Db {
                path,
                data: HashMap::new(),
                mtime: Mtime::NONE,
            },
        }
    }

    pub fn mtime(&self) -> Mtime {
        self.mtime
    }

    pub fn contains(&self, user: &User) -> bool {
        self.data.contains_key(user)
    }

    pub fn users(&self) -> Vec<User> {
        self.data.keys().cloned().collect()
    }

    pub fn create_user(&mut self, user: User) {
        self.data.entry(user).or_insert_with(MessageList::new);
        self.commit();
    }

    pub fn delete_user(&mut self, user: &User) {
        self.data.remove(user);
        self.commit();
    }

    pub fn append_to(&mut self, recipient: &User, msg: Message) {
        self.data
            .entry(recipient.clone())
            .or_insert_with(MessageList::new)
            .push(msg);
        self.commit();
    }

    /// Drain and return `user`'s pending list, leaving it empty.
    pub fn retrieve_pending(&mut self, user: &User) -> Vec<Message> {
        let drained = self
            .data
            .get_mut(user)
            .map(MessageList::drain_all)
            .unwrap_or_default();
        self.commit();
        drained
    }

    /// Replace the entire mapping (used when adopting a peer's state via
    /// `register_replica_source`/`update_db`).
    pub fn replace_all(&mut self, data: HashMap<User, MessageList>) {
        self.data = data;
        self.commit();
    }

    pub fn snapshot(&self) -> HashMap<User, MessageList> {
        self.data.clone()
    }

    /// Write the full mapping to `self.path`, then refresh `mtime` from
    /// the filesystem. Failures are swallowed with a log record rather
    /// than propagated.
    pub fn commit(&mut self) {
        let file = DbFile(self.data.clone());
        let text = match serde_json::to_string_pretty(&file) {
            Ok(t) => t,
            Err(e) => {
                warn!("failed to serialize db for {}: {e}", self.path.display());
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, text) {
            warn!("failed to commit db file {}: {e}", self.path.display());
            return;
        }
        self.mtime = file_mtime(&self.path).unwrap_or_else(Mtime::now);
    }
}

fn file_mtime(path: &Path) -> Option<Mtime> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos() as u64;
    Some(Mtime(Some(nanos)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_orders_before_any_numeric_mtime() {
        assert!(Mtime(Some(1)).is_strictly_newer_than(&Mtime::NONE));
        assert!(!Mtime::NONE.is_strictly_newer_than(&Mtime(Some(1))));
    }

    #[test]
    fn create_then_delete_user_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("127.0.0.1-9001-db.json");

        let mut db = Db::load(&path);
        assert_eq!(db.mtime(), Mtime::NONE);

        db.create_user(User::new("ana"));
        assert!(db.contains(&User::new("ana")));
        assert_ne!(db.mtime(), Mtime::NONE);

        let reloaded = Db::load(&path);
        assert!(reloaded.contains(&User::new("ana")));

        db.delete_user(&User::new("ana"));
        assert!(!db.contains(&User::new("ana")));
    }

    #[test]
    fn append_then_retrieve_pending_drains_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let mut db = Db::load(&path);

        db.create_user(User::new("cam"));
        db.append_to(&User::new("cam"), Message::new(User::new("ana"), User::new("cam"), "hi"));
        db.append_to(&User::new("cam"), Message::new(User::new("ana"), User::new("cam"), "there"));

        let pending = db.retrieve_pending(&User::new("cam"));
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].content, "hi");
        assert!(db.retrieve_pending(&User::new("cam")).is_empty());
    }
}
