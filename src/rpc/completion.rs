//! Write-once completion slot for suspended `request` callers.
//!
//! Grounded on `original_source/hw3/jsonrpc.py`'s `Ivar` (a hand-rolled
//! `asyncio.Event` + slot because asyncio has no such primitive built
//! in). Tokio does: this is a thin, named wrapper over
//! `tokio::sync::oneshot` so call sites read in terms of a completion
//! slot rather than a bare channel.

use tokio::sync::oneshot;

/// The sending half; fills the slot exactly once.
pub struct Completer<T>(oneshot::Sender<T>);

/// The receiving half; awaiting it blocks until the slot is filled or
/// the sender is dropped (event-loop exit), at which point it resolves
/// to `Err(Canceled)`.
pub struct Awaiting<T>(oneshot::Receiver<T>);

/// Raised when the slot's `Completer` was dropped before filling it —
/// the event loop exited while a caller was still suspended on this
/// request.
#[derive(Debug, thiserror::Error)]
#[error("completion slot dropped before being filled")]
pub struct Canceled;

pub fn slot<T>() -> (Completer<T>, Awaiting<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer(tx), Awaiting(rx))
}

impl<T> Completer<T> {
    /// Fill the slot. Ignored if the awaiting side already gave up.
    pub fn fill(self, value: T) {
        let _ = self.0.send(value);
    }
}

impl<T> Awaiting<T> {
    pub async fn read(self) -> Result<T, Canceled> {
        self.0.await.map_err(|_| Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fill_then_read_delivers_value() {
        let (completer, awaiting) = slot::<u32>();
        completer.fill(42);
        assert_eq!(awaiting.read().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn dropping_completer_cancels_awaiting() {
        let (completer, awaiting) = slot::<u32>();
        drop(completer);
        assert!(awaiting.read().await.is_err());
    }
}
