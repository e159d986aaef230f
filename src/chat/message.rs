//! Domain data model: `User`, `Message`, `MessageList`.

use serde::{Deserialize, Serialize};

/// An opaque non-empty string handle. Equality and hashing are
/// string-identity, so a plain `String` newtype suffices — grounded on
/// `original_source/hw3/server.py`, which uses the bare `User` type
/// alias from `common.py` the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct User(pub String);

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        User(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for User {
    fn from(s: String) -> Self {
        User(s)
    }
}

impl From<&str> for User {
    fn from(s: &str) -> Self {
        User(s.to_string())
    }
}

/// An immutable `(sender, recipient, content)` triple, grounded on
/// `original_source/hw3/server.py`'s `Message` dataclass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: User,
    pub recipient: User,
    pub content: String,
}

impl Message {
    pub fn new(sender: User, recipient: User, content: impl Into<String>) -> Self {
        Self {
            sender,
            recipient,
            content: content.into(),
        }
    }
}

/// A FIFO sequence of messages, insertion order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageList(pub Vec<Message>);

impl MessageList {
    pub fn new() -> Self {
        MessageList(Vec::new())
    }

    pub fn push(&mut self, msg: Message) {
        self.0.push(msg);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drain all messages, leaving this list empty, and return them in
    /// delivery (FIFO) order.
    pub fn drain_all(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_list_preserves_insertion_order() {
        let mut list = MessageList::new();
        list.push(Message::new(User::new("a"), User::new("b"), "one"));
        list.push(Message::new(User::new("a"), User::new("b"), "two"));

        let drained = list.drain_all();
        assert_eq!(drained[0].content, "one");
        assert_eq!(drained[1].content, "two");
        assert!(list.is_empty());
    }

    #[test]
    fn user_equality_is_string_identity() {
        assert_eq!(User::new("ana"), User::new("ana"));
        assert_ne!(User::new("ana"), User::new("cam"));
    }
}
