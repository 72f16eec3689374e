//! Statically-typed service handler tables.
//!
//! A [`ServiceTable`] maps method names to erased async closures. Each entry
//! owns its concrete request/response types and encapsulates
//! decode → invoke → encode, so the dispatcher never inspects payloads or
//! types — it resolves a name and runs the closure. Code generators targeting
//! this runtime emit one `ServiceTable` per IDL service; hand-written tables
//! look the same.
//!
//! Handlers use the single-return form `(ctx, request) -> response`.
//! Business-level failures belong inside the response message; only
//! framework-level failures (unknown method, undecodable payload) travel as
//! error-response frames.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::{CallContext, Codec, ErrorCode, PostcardCodec};

/// A framework-level dispatch failure, written back as an error-response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub code: ErrorCode,
    pub message: String,
}

impl DispatchError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for DispatchError {}

/// Erased method handler: raw payload in, raw payload (or dispatch error) out.
pub(crate) type MethodHandler = Arc<
    dyn Fn(CallContext, Vec<u8>) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, DispatchError>> + Send>>
        + Send
        + Sync,
>;

/// Erased per-service method map, as stored in the peer's registry.
pub(crate) type HandlerMap = HashMap<String, MethodHandler>;

/// Builder for one service's handler table.
///
/// ```ignore
/// let table = ServiceTable::new()
///     .method("Add", |_ctx, req: AddRequest| async move {
///         AddResponse { result: req.a + req.b }
///     });
/// peer.register_service("Calculator", table);
/// ```
pub struct ServiceTable<C: Codec = PostcardCodec> {
    methods: HandlerMap,
    _codec: PhantomData<C>,
}

impl<C: Codec> Default for ServiceTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> ServiceTable<C> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            _codec: PhantomData,
        }
    }

    /// Register a typed handler under `name`, replacing any previous entry.
    pub fn method<Req, Resp, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Resp> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: MethodHandler = Arc::new(move |ctx, payload| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let codec = C::default();
                let request: Req = codec.decode(&payload).map_err(|e| {
                    DispatchError::internal(format!("failed to decode request: {e}"))
                })?;
                let response = handler(ctx, request).await;
                codec
                    .encode(&response)
                    .map_err(|e| DispatchError::internal(format!("failed to encode response: {e}")))
            })
        });
        self.methods.insert(name.into(), erased);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub(crate) fn into_methods(self) -> HandlerMap {
        self.methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::sync::watch;

    #[derive(Serialize, Deserialize)]
    struct Echo {
        text: String,
    }

    fn test_context() -> CallContext {
        let (_tx, rx) = watch::channel(false);
        // The sender is dropped, which reads as shutdown; fine for these tests.
        CallContext::new(Arc::new(crate::Session::new()), rx)
    }

    #[tokio::test]
    async fn handler_decodes_invokes_encodes() {
        let table: ServiceTable = ServiceTable::new().method("Echo", |_ctx, req: Echo| async move {
            Echo {
                text: req.text.to_uppercase(),
            }
        });
        let map = table.into_methods();
        let handler = map.get("Echo").unwrap();

        let codec = PostcardCodec;
        let payload = codec
            .encode(&Echo {
                text: "hi".to_string(),
            })
            .unwrap();
        let out = handler(test_context(), payload).await.unwrap();
        let back: Echo = codec.decode(&out).unwrap();
        assert_eq!(back.text, "HI");
    }

    #[tokio::test]
    async fn undecodable_payload_is_internal_error() {
        let table: ServiceTable =
            ServiceTable::new().method("Echo", |_ctx, req: Echo| async move { req });
        let map = table.into_methods();
        let handler = map.get("Echo").unwrap();

        let err = handler(test_context(), vec![]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(err.message.contains("decode"));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let table: ServiceTable = ServiceTable::new()
            .method("M", |_ctx, req: Echo| async move { req })
            .method("M", |_ctx, _req: Echo| async move {
                Echo {
                    text: "second".to_string(),
                }
            });
        assert_eq!(table.len(), 1);
    }
}
