//! RpcPeer: the per-connection state machine.
//!
//! A peer owns one reliable, ordered byte stream and multiplexes many
//! concurrent calls over it. Both endpoints are symmetric: either side may
//! register services and call the other on the same connection. The key
//! invariant is that only the reader task reads the stream — every inbound
//! frame is routed from there.
//!
//! ```text
//!                  ┌──────────────────────────────────┐
//!                  │             RpcPeer              │
//!                  ├──────────────────────────────────┤
//!                  │  writer: AsyncMutex<WriteHalf>   │  ← write lock
//!                  │  state:  Mutex<PeerState>        │  ← state mutex
//!                  │    next_request_id               │
//!                  │    pending:  id → oneshot::Sender│
//!                  │    services: name → handler map  │
//!                  └───────────────┬──────────────────┘
//!                                  │
//!                            reader task
//!                                  │
//!              ┌───────────────────┴────────────────────┐
//!              │                                        │
//!     response? (bit 31 set)                  request? (bit 31 clear)
//!              │                                        │
//!   ┌──────────▼──────────┐             ┌───────────────▼──────────────┐
//!   │ Deliver payload +   │             │ Spawn dispatch task: resolve │
//!   │ error tag to the    │             │ handler, decode → invoke →   │
//!   │ pending slot        │             │ encode, write response frame │
//!   └─────────────────────┘             └──────────────────────────────┘
//! ```
//!
//! Outbound calls allocate a 30-bit correlation ID, park a one-shot slot in
//! the pending map, write the request under the write lock, and await the
//! slot with a timeout. The reader fulfills the slot when the matching
//! response arrives; peer teardown fulfills every remaining slot with
//! `ConnectionClosed`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::frame::{parse_error_payload, Frame, CORRELATION_MASK};
use crate::service::{DispatchError, HandlerMap, MethodHandler};
use crate::{
    CallContext, Codec, ErrorCode, PostcardCodec, RpcError, ServiceTable, Session, TransportError,
};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

fn default_call_timeout() -> Duration {
    std::env::var("PEERWIRE_CALL_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_CALL_TIMEOUT)
}

type WriteHalf = Box<dyn AsyncWrite + Send + Unpin>;
type ReadHalf = Box<dyn AsyncRead + Send + Unpin>;
type CloseObserver = Box<dyn FnOnce(Option<TransportError>) + Send>;

/// Construction options for [`RpcPeer`].
pub struct PeerOptions {
    /// Upper bound on each outbound call. Defaults to 30 seconds, or
    /// `PEERWIRE_CALL_TIMEOUT_MS` when set.
    pub call_timeout: Duration,
    /// Externally-supplied session. A fresh one is created when `None`.
    pub session: Option<Arc<Session>>,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            call_timeout: default_call_timeout(),
            session: None,
        }
    }
}

/// A raw response as delivered to a pending slot: the payload bytes plus the
/// error tag recovered from bit 30 of the response ID.
#[derive(Debug)]
pub struct RawResponse {
    pub is_error: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Draining,
    Closed,
}

struct PeerState {
    next_request_id: u32,
    pending: HashMap<u32, oneshot::Sender<RawResponse>>,
    services: HashMap<String, HandlerMap>,
    on_close: Option<CloseObserver>,
    lifecycle: Lifecycle,
    /// Set exactly once, at the Open → Draining transition.
    terminal: Option<Option<TransportError>>,
    reader: Option<JoinHandle<()>>,
}

impl PeerState {
    /// Allocate the next request ID: monotonic from 1, bits 31 and 30 always
    /// clear so the full value doubles as the correlation, wrap skips 0.
    fn next_id(&mut self) -> u32 {
        if self.next_request_id == 0 {
            self.next_request_id = 1;
        }
        let id = self.next_request_id;
        self.next_request_id = (self.next_request_id + 1) & CORRELATION_MASK;
        if self.next_request_id == 0 {
            self.next_request_id = 1;
        }
        id
    }
}

/// One endpoint of a symmetric RPC connection.
///
/// Created with [`RpcPeer::new`], which takes exclusive ownership of the
/// stream and spawns the reader task (so construction must happen inside a
/// tokio runtime). Services may be registered at any time; calls may be made
/// from any task.
pub struct RpcPeer<C: Codec = PostcardCodec> {
    codec: C,
    writer: AsyncMutex<WriteHalf>,
    state: Mutex<PeerState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    session: Arc<Session>,
    call_timeout: Duration,
}

impl RpcPeer<PostcardCodec> {
    /// Bind `stream` to a new peer with default options and start its reader.
    pub fn new<S>(stream: S) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_options(stream, PeerOptions::default())
    }

    /// Bind `stream` with explicit options.
    pub fn with_options<S>(stream: S, options: PeerOptions) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_codec(stream, options)
    }
}

impl<C: Codec> RpcPeer<C> {
    /// Bind `stream` with an explicit codec type.
    pub fn with_codec<S>(stream: S, options: PeerOptions) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let peer = Arc::new(Self {
            codec: C::default(),
            writer: AsyncMutex::new(Box::new(write_half)),
            state: Mutex::new(PeerState {
                next_request_id: 1,
                pending: HashMap::new(),
                services: HashMap::new(),
                on_close: None,
                lifecycle: Lifecycle::Open,
                terminal: None,
                reader: None,
            }),
            shutdown_tx,
            shutdown_rx,
            session: options.session.unwrap_or_default(),
            call_timeout: options.call_timeout,
        });

        let handle = tokio::spawn(Arc::clone(&peer).reader_loop(Box::new(read_half)));
        peer.state.lock().reader = Some(handle);
        peer
    }

    /// The ambient session shared by every handler invocation on this peer.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Register a handler table under `name`, replacing any previous table.
    pub fn register_service(&self, name: impl Into<String>, table: ServiceTable<C>) {
        let name = name.into();
        let mut state = self.state.lock();
        if state.services.insert(name.clone(), table.into_methods()).is_some() {
            tracing::warn!(service = %name, "re-registering service; previous handler table replaced");
        }
    }

    /// Call `service.method` with a typed request, awaiting the typed response.
    pub async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let payload = self.codec.encode(request)?;
        let response = self.call_bytes(method, payload).await?;
        if response.is_error {
            let (code, message) = parse_error_payload(&response.payload);
            return Err(RpcError::Remote { code, message });
        }
        Ok(self.codec.decode(&response.payload)?)
    }

    /// Call `service.method` with a pre-encoded payload.
    ///
    /// Returns the raw payload bytes together with the error tag; most users
    /// want [`RpcPeer::call`], which also maps error responses to
    /// [`RpcError::Remote`].
    pub async fn call_bytes(&self, method: &str, payload: Vec<u8>) -> Result<RawResponse, RpcError> {
        let (request_id, slot) = {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Open {
                return Err(RpcError::ConnectionClosed);
            }
            let id = state.next_id();
            let (tx, rx) = oneshot::channel();
            state.pending.insert(id, tx);
            (id, rx)
        };

        let mut guard = PendingGuard {
            peer: self,
            request_id,
            active: true,
        };

        let frame = Frame::Request {
            id: request_id,
            method: method.to_string(),
            payload,
        };
        self.write_frame(&frame).await?;

        match tokio::time::timeout(self.call_timeout, slot).await {
            Ok(Ok(response)) => {
                guard.disarm();
                Ok(response)
            }
            Ok(Err(_)) => {
                // Slot dropped without delivery: the peer drained it at shutdown.
                guard.disarm();
                Err(RpcError::ConnectionClosed)
            }
            Err(_elapsed) => {
                tracing::warn!(
                    request_id,
                    method,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "call timed out waiting for response"
                );
                // The guard evicts the slot; a late response for this ID is dropped.
                Err(RpcError::Timeout)
            }
        }
    }

    /// Register a function invoked exactly once when the peer terminates,
    /// with `None` for a clean closure or the terminal transport error.
    ///
    /// Setting an observer on an already-terminated peer invokes it
    /// immediately with the captured terminal error.
    pub fn set_close_observer<F>(&self, observer: F)
    where
        F: FnOnce(Option<TransportError>) + Send + 'static,
    {
        let mut state = self.state.lock();
        if let Some(error) = state.terminal.clone() {
            drop(state);
            observer(error);
        } else {
            if state.on_close.is_some() {
                tracing::warn!("replacing existing close observer");
            }
            state.on_close = Some(Box::new(observer));
        }
    }

    /// True once the peer has begun shutting down. Calls made from this point
    /// return [`RpcError::ConnectionClosed`] immediately.
    pub fn is_closed(&self) -> bool {
        self.state.lock().lifecycle != Lifecycle::Open
    }

    /// Wait for the peer to terminate and yield the terminal error
    /// (`None` for a clean closure or an explicit [`RpcPeer::close`]).
    pub async fn wait(&self) -> Option<TransportError> {
        let mut shutdown = self.shutdown_rx.clone();
        let _ = shutdown.wait_for(|stopped| *stopped).await;
        self.state.lock().terminal.clone().flatten()
    }

    /// Shut the peer down: stop the reader, close the stream, fulfill every
    /// pending slot with `ConnectionClosed`. Idempotent.
    pub async fn close(&self) {
        self.terminate(None);
        let reader = self.state.lock().reader.take();
        if let Some(handle) = reader {
            handle.abort();
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "error shutting down write half");
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Single-writer transition to the terminal state. The first caller
    /// (reader on stream error, `close()`, or a failed write) wins; everyone
    /// else returns immediately.
    fn terminate(&self, error: Option<TransportError>) {
        let (pending, observer) = {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Open {
                return;
            }
            state.lifecycle = Lifecycle::Draining;
            state.terminal = Some(error.clone());
            state.services.clear();
            (std::mem::take(&mut state.pending), state.on_close.take())
        };

        // Outside the lock: dropping the senders fulfills every waiting call
        // with ConnectionClosed.
        let drained = pending.len();
        drop(pending);
        if drained > 0 {
            tracing::debug!(drained, "drained pending calls at shutdown");
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(observer) = observer {
            observer(error);
        }
        self.state.lock().lifecycle = Lifecycle::Closed;
    }

    /// Encode and emit one frame under the write lock. A failed write marks
    /// the stream broken and terminates the peer.
    async fn write_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame.encode()?;
        let mut writer = self.writer.lock().await;
        let result = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        drop(writer);

        if let Err(e) = result {
            let error = TransportError::from(e);
            self.terminate(Some(error.clone()));
            return Err(error);
        }
        Ok(())
    }

    /// The reader task: sole consumer of the stream's read half. Runs until
    /// the stream errors or `close()` signals shutdown.
    async fn reader_loop(self: Arc<Self>, mut reader: ReadHalf) {
        let mut shutdown = self.shutdown_rx.clone();
        let terminal = loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => {
                    // close() already performed the terminal transition.
                    tracing::trace!("reader stopping on shutdown signal");
                    return;
                }
                frame = Frame::read_from(&mut reader) => frame,
            };

            match frame {
                Ok(Frame::Response {
                    correlation,
                    is_error,
                    payload,
                }) => self.deliver_response(correlation, is_error, payload),
                Ok(Frame::Request {
                    id,
                    method,
                    payload,
                }) => {
                    tracing::trace!(request_id = id, method = %method, "dispatching inbound request");
                    let peer = Arc::clone(&self);
                    tokio::spawn(async move {
                        peer.dispatch(id, method, payload).await;
                    });
                }
                Err(TransportError::Closed) => break None,
                Err(e) => break Some(e),
            }
        };

        match &terminal {
            Some(e) => tracing::warn!(error = %e, "reader terminating on stream error"),
            None => tracing::debug!("stream closed; reader exiting"),
        }
        self.terminate(terminal);
    }

    /// Hand a response payload to its pending slot, if the call is still
    /// outstanding. Late or duplicate responses are dropped.
    fn deliver_response(&self, correlation: u32, is_error: bool, payload: Vec<u8>) {
        let slot = self.state.lock().pending.remove(&correlation);
        match slot {
            Some(tx) => {
                if tx.send(RawResponse { is_error, payload }).is_err() {
                    tracing::trace!(correlation, "caller went away before delivery");
                }
            }
            None => {
                tracing::debug!(correlation, is_error, "no pending call for response; dropping");
            }
        }
    }

    /// One spawned task per inbound request.
    async fn dispatch(self: Arc<Self>, request_id: u32, method: String, payload: Vec<u8>) {
        let frame = match self.invoke(&method, payload).await {
            Ok(bytes) => Frame::Response {
                correlation: request_id & CORRELATION_MASK,
                is_error: false,
                payload: bytes,
            },
            Err(e) => {
                tracing::debug!(
                    request_id,
                    method = %method,
                    code = %e.code,
                    message = %e.message,
                    "request failed"
                );
                Frame::error_response(request_id, e.code, &e.message)
            }
        };

        if let Err(e) = self.write_frame(&frame).await {
            tracing::warn!(request_id, error = %e, "failed to write response frame");
        }
    }

    /// Resolve `service.method` and run the handler. Handler panics are
    /// caught and reported as `InternalError` so a crashing handler cannot
    /// strand the remote caller.
    async fn invoke(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
        let (service_name, method_name) = match method.split_once('.') {
            Some((service, method)) if !service.is_empty() && !method.is_empty() => {
                (service, method)
            }
            _ => {
                return Err(DispatchError::new(
                    ErrorCode::InvalidRequest,
                    format!("invalid method name format: {method:?}"),
                ));
            }
        };

        let handler: MethodHandler = {
            let state = self.state.lock();
            let table = state.services.get(service_name).ok_or_else(|| {
                DispatchError::new(
                    ErrorCode::MethodNotFound,
                    format!("service {service_name} not found"),
                )
            })?;
            table
                .get(method_name)
                .cloned()
                .ok_or_else(|| {
                    DispatchError::new(
                        ErrorCode::MethodNotFound,
                        format!("method {method_name} not found"),
                    )
                })?
        };

        // Handlers run without any internal lock held.
        let ctx = CallContext::new(Arc::clone(&self.session), self.shutdown_rx.clone());
        match AssertUnwindSafe(handler(ctx, payload)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("panic in handler: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("panic in handler: {s}")
                } else {
                    "panic in handler".to_string()
                };
                Err(DispatchError::internal(message))
            }
        }
    }
}

/// Removes the pending slot when a call is abandoned (cancelled caller,
/// timeout, or an error before the response arrived).
struct PendingGuard<'a, C: Codec> {
    peer: &'a RpcPeer<C>,
    request_id: u32,
    active: bool,
}

impl<C: Codec> PendingGuard<'_, C> {
    fn disarm(&mut self) {
        self.active = false;
    }
}

impl<C: Codec> Drop for PendingGuard<'_, C> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if self
            .peer
            .state
            .lock()
            .pending
            .remove(&self.request_id)
            .is_some()
        {
            tracing::debug!(
                request_id = self.request_id,
                "removed pending slot for abandoned call"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ERROR_BIT, RESPONSE_BIT};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pair() -> (Arc<RpcPeer>, Arc<RpcPeer>) {
        let (a, b) = tokio::io::duplex(256 * 1024);
        (RpcPeer::new(a), RpcPeer::new(b))
    }

    /// A peer whose remote end never answers (but stays open).
    fn silent_pair() -> (tokio::io::DuplexStream, Arc<RpcPeer>) {
        let (raw, stream) = tokio::io::duplex(256 * 1024);
        (raw, RpcPeer::new(stream))
    }

    #[tokio::test]
    async fn allocated_ids_are_nonzero_and_flag_free() {
        let (peer, _other) = pair();
        let mut state = peer.state.lock();
        let mut last = 0;
        for _ in 0..1000 {
            let id = state.next_id();
            assert_ne!(id, 0);
            assert_eq!(id & (RESPONSE_BIT | ERROR_BIT), 0);
            assert!(id > last);
            last = id;
        }
    }

    #[tokio::test]
    async fn id_allocation_wraps_past_the_30_bit_range_skipping_zero() {
        let (peer, _other) = pair();
        let mut state = peer.state.lock();
        state.next_request_id = CORRELATION_MASK;
        let id = state.next_id();
        assert_eq!(id, CORRELATION_MASK);
        assert_eq!(state.next_id(), 1);
    }

    #[tokio::test]
    async fn abandoned_call_cleans_its_pending_slot() {
        let (_raw, peer) = silent_pair();

        let caller = Arc::clone(&peer);
        let task = tokio::spawn(async move {
            let _ = caller.call_bytes("Svc.Method", vec![1, 2, 3]).await;
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while peer.state.lock().pending.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                panic!("call did not register a pending slot in time");
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        task.abort();
        let _ = task.await;

        assert!(peer.state.lock().pending.is_empty());
    }

    #[tokio::test]
    async fn calls_after_close_fail_immediately() {
        let (peer, _other) = pair();
        peer.close().await;
        let err = peer.call_bytes("Svc.Method", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_observer_fires_once() {
        let (peer, _other) = pair();
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&fired);
        peer.set_close_observer(move |error| {
            assert!(error.is_none());
            observed.fetch_add(1, Ordering::SeqCst);
        });

        peer.close().await;
        peer.close().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn late_observer_sees_the_captured_terminal_error() {
        let (peer, _other) = pair();
        peer.close().await;

        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&fired);
        peer.set_close_observer(move |error| {
            assert!(error.is_none());
            observed.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_drains_in_flight_calls_with_connection_closed() {
        let (_raw, peer) = silent_pair();

        let caller = Arc::clone(&peer);
        let call = tokio::spawn(async move { caller.call_bytes("Svc.Slow", vec![]).await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while peer.state.lock().pending.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                panic!("call did not register a pending slot in time");
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        peer.close().await;
        let result = call.await.unwrap();
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
    }
}
