//! # Framed Message Transport
//!
//! Converts a duplex byte pipe into a duplex stream of discrete opaque
//! payloads. Every payload is chunked into fixed-size pieces on the wire
//! and reassembled on the receiving end, so a logical message of
//! arbitrary size never has to land in a single `read`/`write` call.
//!
//! ## Frame format
//!
//! Each chunk on the wire is a fixed 9-byte big-endian header followed by
//! the chunk's payload bytes:
//!
//! ```text
//! +------------------+------------------+----------+-----------------+
//! | chunk_len (u32)  | msg_id (u32)     | more (u8)| chunk bytes      |
//! +------------------+------------------+----------+-----------------+
//! ```
//!
//! `more = 1` on every chunk of a payload except the last. Chunks from
//! different message ids may interleave on the wire; the receiver keeps
//! one reassembly buffer per in-flight id.
//!
//! This generalizes the length-prefixed framing in
//! `ipc::tcp_socket::{read_message, write_message}` (there a 4-byte
//! little-endian length prefix ahead of one bincode blob) to a 9-byte
//! header with multi-chunk reassembly.
//!
//! The reader and writer are split (via [`tokio::io::split`], the same
//! way `handle_connection` clones a `TcpStream` so one task can read
//! while another writes) so an RPC session can have one task draining
//! `receive()` while any number of other tasks take turns calling
//! `send()` through a shared, mutex-serialized writer.

use std::collections::HashMap;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Per-message chunk size, kept small enough that tests can exercise
/// multi-chunk reassembly without huge payloads.
pub const MAX_MSG_SIZE: usize = 64 * 1024;

const HEADER_LEN: usize = 9;

/// Per-session monotonic message id, wrapping modulo 2^32.
pub type MsgId = u32;

/// Errors raised by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
}

/// The write half of a framed transport.
pub struct TransportWriter<W> {
    pipe: W,
    next_id: MsgId,
}

/// The read half of a framed transport.
pub struct TransportReader<R> {
    pipe: R,
    reassembly: HashMap<MsgId, Vec<u8>>,
}

/// A framed transport layered over one duplex byte pipe `S`. Use
/// [`Transport::split`] to obtain an independently-owned reader/writer
/// pair for concurrent use.
pub struct Transport<S> {
    pipe: S,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(pipe: S) -> Self {
        Self { pipe }
    }

    pub fn split(self) -> (TransportReader<ReadHalf<S>>, TransportWriter<WriteHalf<S>>) {
        let (read, write) = split(self.pipe);
        (TransportReader::new(read), TransportWriter::new(write))
    }
}

impl<W> TransportWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(pipe: W) -> Self {
        Self { pipe, next_id: 0 }
    }

    fn fresh_id(&mut self) -> MsgId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Chunk and write `payload`, flushing after every chunk. Fails with
    /// [`TransportError::Closed`] if the underlying pipe refuses the write.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let msg_id = self.fresh_id();
        let mut offset = 0usize;

        loop {
            let remaining = payload.len() - offset;
            let take = remaining.min(MAX_MSG_SIZE);
            let more = offset + take < payload.len();
            let chunk = &payload[offset..offset + take];

            let mut header = [0u8; HEADER_LEN];
            header[0..4].copy_from_slice(&(chunk.len() as u32).to_be_bytes());
            header[4..8].copy_from_slice(&msg_id.to_be_bytes());
            header[8] = more as u8;

            self.pipe
                .write_all(&header)
                .await
                .map_err(|_| TransportError::Closed)?;
            self.pipe
                .write_all(chunk)
                .await
                .map_err(|_| TransportError::Closed)?;
            self.pipe
                .flush()
                .await
                .map_err(|_| TransportError::Closed)?;

            offset += take;
            if !more {
                break;
            }
        }

        Ok(())
    }
}

impl<R> TransportReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(pipe: R) -> Self {
        Self {
            pipe,
            reassembly: HashMap::new(),
        }
    }

    /// Read chunks off the pipe, reassembling full payloads as they
    /// complete. Returns `Ok(None)` on clean end-of-pipe; a partial chunk
    /// at EOF is discarded silently.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let mut header = [0u8; HEADER_LEN];
            if !read_exact_or_eof(&mut self.pipe, &mut header).await? {
                return Ok(None);
            }

            let chunk_len = u32::from_be_bytes(header[0..4].try_into().unwrap()) as usize;
            let msg_id = u32::from_be_bytes(header[4..8].try_into().unwrap());
            let more = header[8] != 0;

            let mut chunk = vec![0u8; chunk_len];
            if !read_exact_or_eof(&mut self.pipe, &mut chunk).await? {
                // Partial chunk at EOF: discard silently.
                return Ok(None);
            }

            let entry = self.reassembly.entry(msg_id).or_insert_with(Vec::new);
            entry.extend_from_slice(&chunk);

            if !more {
                let payload = self.reassembly.remove(&msg_id).unwrap_or_default();
                return Ok(Some(payload));
            }
        }
    }
}

/// Reads exactly `buf.len()` bytes, or reports a clean EOF if the pipe
/// closes before any byte of this read lands (returns `Ok(false)`).
/// An EOF mid-read is treated as "partial chunk at EOF": also `Ok(false)`,
/// so a partial final chunk is dropped rather than surfaced as an error.
async fn read_exact_or_eof<S: AsyncRead + Unpin>(
    pipe: &mut S,
    buf: &mut [u8],
) -> Result<bool, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = pipe
            .read(&mut buf[filled..])
            .await
            .map_err(|_| TransportError::Closed)?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trip_small_payload() {
        let (a, b) = duplex(4096);
        let (_, mut tx) = Transport::new(a).split();
        let (mut rx, _) = Transport::new(b).split();

        tx.send(b"hello").await.unwrap();
        let got = rx.receive().await.unwrap().unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn round_trip_multi_chunk_payload() {
        let (a, b) = duplex(1 << 20);
        let (_, mut tx) = Transport::new(a).split();
        let (mut rx, _) = Transport::new(b).split();

        let payload = vec![7u8; MAX_MSG_SIZE * 3 + 123];
        tx.send(&payload).await.unwrap();
        let got = rx.receive().await.unwrap().unwrap();
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn interleaved_messages_reassemble_independently() {
        let (a, b) = duplex(1 << 20);
        let (_, mut tx) = Transport::new(a).split();
        let (mut rx, _) = Transport::new(b).split();

        tx.send(&vec![1u8; MAX_MSG_SIZE + 10]).await.unwrap();
        tx.send(&vec![2u8; 5]).await.unwrap();

        let first = rx.receive().await.unwrap().unwrap();
        let second = rx.receive().await.unwrap().unwrap();
        assert_eq!(first, vec![1u8; MAX_MSG_SIZE + 10]);
        assert_eq!(second, vec![2u8; 5]);
    }

    #[tokio::test]
    async fn eof_yields_none() {
        let (a, b) = duplex(4096);
        let (mut rx, _) = Transport::new(b).split();
        drop(a);
        assert!(rx.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fresh_id_wraps() {
        let (a, _b) = duplex(4096);
        let (_, mut tx) = Transport::new(a).split();
        tx.next_id = u32::MAX;
        assert_eq!(tx.fresh_id(), u32::MAX);
        assert_eq!(tx.next_id, 0);
    }
}
