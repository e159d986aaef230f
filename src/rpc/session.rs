//! Bidirectional JSON-RPC session layer.
//!
//! Grounded on `original_source/hw3/jsonrpc.py`'s `Session` class for
//! the dispatch/correlation semantics, realized with `tokio::spawn` +
//! `JoinSet` for background handler jobs (replacing the original's
//! manual `pending_jobs` bookkeeping), and a mutex-serialized
//! [`TransportWriter`] so only one task at a time writes to the wire
//! even though requests, responses, and handler replies all originate
//! from different tasks.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::rpc::completion::{self, Completer};
use crate::rpc::protocol::{classify, Disconnected, Inbound, JsonRpcError, Request, RequestId, Response};
use crate::transport::{Transport, TransportReader, TransportWriter};

type HandlerResult = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, JsonRpcError>> + Send>>;
type HandlerFn = dyn Fn(Vec<Value>) -> HandlerResult + Send + Sync;

/// Registers a method name to an async handler. `register_handler` is an
/// idempotent upsert: re-registering the same name replaces the handler.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, JsonRpcError>> + Send + 'static,
    {
        Handler(Arc::new(move |params| Box::pin(f(params))))
    }

    async fn call(&self, params: Vec<Value>) -> Result<Value, JsonRpcError> {
        (self.0)(params).await
    }
}

struct Shared<W> {
    writer: Mutex<TransportWriter<W>>,
    handlers: Mutex<HashMap<String, Handler>>,
    pending_requests: Mutex<HashMap<RequestId, Completer<Response>>>,
    next_id: Mutex<RequestId>,
    running: std::sync::atomic::AtomicBool,
}

/// A bidirectional JSON-RPC session over one framed transport.
///
/// Exposes `request`/`register_handler` symmetrically, so the same type
/// serves both the client-facing role (primary answering client calls)
/// and the reverse-call role (primary pushing `receive_message` back to
/// a logged-in client).
pub struct Session<W> {
    shared: Arc<Shared<W>>,
}

impl<W> Clone for Session<W> {
    fn clone(&self) -> Self {
        Session {
            shared: self.shared.clone(),
        }
    }
}

/// Spawns a session's event loop; returned alongside the [`Session`]
/// handle so callers can `.await` it to observe the session ending.
pub struct EventLoop<R, W> {
    reader: TransportReader<R>,
    shared: Arc<Shared<W>>,
}

pub fn spawn_session<S>(pipe: S) -> (Session<S::Write>, EventLoop<S::Read, S::Write>)
where
    S: SplitPipe,
{
    let (reader, writer) = pipe.split_pipe();
    let shared = Arc::new(Shared {
        writer: Mutex::new(writer),
        handlers: Mutex::new(HashMap::new()),
        pending_requests: Mutex::new(HashMap::new()),
        next_id: Mutex::new(0),
        // Flipped true here rather than at the top of `EventLoop::run`:
        // every call site spawns the event loop and may issue a request
        // immediately after, with no guaranteed yield in between for the
        // spawned task to reach its own first line. `send`/`request` only
        // need the writer half, so a session is usable as soon as it's
        // handed out; `run` still flips this back to `false` on exit.
        running: std::sync::atomic::AtomicBool::new(true),
    });

    (
        Session {
            shared: shared.clone(),
        },
        EventLoop { reader, shared },
    )
}

/// Adapter so `spawn_session` can accept either a raw duplex pipe or an
/// already-split transport.
pub trait SplitPipe {
    type Read: AsyncRead + Unpin + Send + 'static;
    type Write: AsyncWrite + Unpin + Send + 'static;
    fn split_pipe(self) -> (TransportReader<Self::Read>, TransportWriter<Self::Write>);
}

impl<S> SplitPipe for S
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Read = tokio::io::ReadHalf<S>;
    type Write = tokio::io::WriteHalf<S>;

    fn split_pipe(self) -> (TransportReader<Self::Read>, TransportWriter<Self::Write>) {
        Transport::new(self).split()
    }
}

impl<W> Session<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Idempotent upsert; last registration wins.
    pub async fn register_handler(&self, name: impl Into<String>, handler: Handler) {
        self.shared.handlers.lock().await.insert(name.into(), handler);
    }

    /// Whether this session's event loop is still draining its transport.
    /// Replication callers poll this before reusing a downstream link.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn fresh_id(&self) -> RequestId {
        let mut id = self.shared.next_id.lock().await;
        let prev = *id;
        *id = id.wrapping_add(1);
        prev
    }

    async fn send_wire(&self, req: &Request) -> Result<(), Disconnected> {
        let bytes = serde_json::to_vec(req).expect("Request always serializes");
        let mut writer = self.shared.writer.lock().await;
        writer.send(&bytes).await.map_err(|_| Disconnected)
    }

    /// Send a notification: fire-and-forget, no response expected.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), Disconnected> {
        if !self.is_running() {
            return Err(Disconnected);
        }
        let req = Request::new(method, params, None);
        self.send_wire(&req).await
    }

    /// Send a request and suspend until the matching response arrives.
    /// Fails with [`Disconnected`] if the session's event loop is not
    /// running, or if it terminates while this call is suspended.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Response, Disconnected> {
        if !self.is_running() {
            return Err(Disconnected);
        }

        let id = self.fresh_id().await;
        let (completer, awaiting) = completion::slot();
        self.shared.pending_requests.lock().await.insert(id, completer);

        let req = Request::new(method, params, Some(id));
        if self.send_wire(&req).await.is_err() {
            self.shared.pending_requests.lock().await.remove(&id);
            return Err(Disconnected);
        }

        awaiting.read().await.map_err(|_| Disconnected)
    }

    async fn report_error_nofail(&self, error: JsonRpcError) {
        let resp = Response::failure(None, error);
        let bytes = match serde_json::to_vec(&resp) {
            Ok(b) => b,
            Err(_) => return,
        };
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.send(&bytes).await;
    }

    async fn handle_and_respond(&self, req: Request) {
        let handler = self.shared.handlers.lock().await.get(&req.method).cloned();

        let outcome = match handler {
            None => {
                if !req.is_notification() {
                    self.report_error_nofail_with_id(req.id, JsonRpcError::no_such_method(&req.method))
                        .await;
                }
                return;
            }
            Some(handler) => handler.call(req.params).await,
        };

        if req.is_notification() {
            return;
        }

        let resp = match outcome {
            Ok(result) => Response::success(req.id, result),
            Err(error) => Response::failure(req.id, error),
        };

        let bytes = match serde_json::to_vec(&resp) {
            Ok(b) => b,
            Err(_) => return,
        };
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.send(&bytes).await;
    }

    async fn report_error_nofail_with_id(&self, id: Option<RequestId>, error: JsonRpcError) {
        let resp = Response::failure(id, error);
        if let Ok(bytes) = serde_json::to_vec(&resp) {
            let mut writer = self.shared.writer.lock().await;
            let _ = writer.send(&bytes).await;
        }
    }
}

impl<R, W> EventLoop<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Drains the transport forever, dispatching each payload, until the
    /// pipe closes. Cancels all background handler
    /// jobs and any suspended `request` callers on exit.
    pub async fn run(mut self) {
        let session = Session {
            shared: self.shared.clone(),
        };

        let mut jobs: JoinSet<()> = JoinSet::new();

        loop {
            let payload = match self.reader.receive().await {
                Ok(Some(p)) => p,
                Ok(None) => break,
                Err(_) => break,
            };

            let value: Value = match serde_json::from_slice(&payload) {
                Ok(v) => v,
                Err(_) => {
                    let sess = session.clone();
                    jobs.spawn(async move {
                        sess.report_error_nofail(JsonRpcError::bad_request(Value::Null))
                            .await;
                    });
                    continue;
                }
            };

            match classify(value) {
                Inbound::Request(req) => {
                    let sess = session.clone();
                    jobs.spawn(async move {
                        sess.handle_and_respond(req).await;
                    });
                }
                Inbound::Response(resp) => {
                    let Some(id) = resp.id else {
                        debug!("ignoring response with null id");
                        continue;
                    };
                    let completer = session.shared.pending_requests.lock().await.remove(&id);
                    match completer {
                        Some(completer) => completer.fill(resp),
                        None => {
                            let sess = session.clone();
                            jobs.spawn(async move {
                                sess.report_error_nofail(JsonRpcError::no_such_request(Value::Null))
                                    .await;
                            });
                        }
                    }
                }
                Inbound::Malformed(value) => {
                    let sess = session.clone();
                    jobs.spawn(async move {
                        sess.report_error_nofail(JsonRpcError::bad_request(value)).await;
                    });
                }
            }
        }

        session
            .shared
            .running
            .store(false, std::sync::atomic::Ordering::SeqCst);

        warn!("rpc event loop exited, cancelling {} handler job(s)", jobs.len());
        jobs.shutdown().await;

        // Drop every outstanding completer: each suspended `request` caller's
        // `awaiting.read()` resolves to `Canceled`, surfaced to them as
        // `Disconnected`.
        session.shared.pending_requests.lock().await.clear();
    }
}
