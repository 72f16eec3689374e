//! Per-connection ambient state.
//!
//! A [`Session`] is a type-keyed store shared by every handler invocation on
//! one peer. A fresh store is created per peer unless the constructor is
//! given one, so two peers can deliberately share a session (e.g. a
//! reconnecting client carrying auth state across connections).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

/// Type-keyed key/value store attached to a peer.
#[derive(Default)]
pub struct Session {
    values: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value of the same type.
    pub fn set<T: Send + Sync + 'static>(&self, value: T) {
        self.values.write().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Fetch a clone of the stored value of type `T`, if any.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.values
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }

    /// Remove the stored value of type `T`. Returns whether one was present.
    pub fn remove<T: Send + Sync + 'static>(&self) -> bool {
        self.values.write().remove(&TypeId::of::<T>()).is_some()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("len", &self.values.read().len())
            .finish()
    }
}

/// Context handed to every handler invocation.
///
/// Carries the peer's [`Session`] and its shutdown signal. Handlers doing
/// long-running work should poll [`CallContext::cancelled`] so peer teardown
/// can interrupt them.
#[derive(Debug, Clone)]
pub struct CallContext {
    session: Arc<Session>,
    shutdown: watch::Receiver<bool>,
}

impl CallContext {
    pub(crate) fn new(session: Arc<Session>, shutdown: watch::Receiver<bool>) -> Self {
        Self { session, shutdown }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// True once the owning peer has begun shutting down.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves when the owning peer shuts down.
    pub async fn cancelled(&self) {
        let mut shutdown = self.shutdown.clone();
        // wait_for errors only if the peer is gone, which counts as shutdown.
        let _ = shutdown.wait_for(|stopped| *stopped).await;
    }
}
