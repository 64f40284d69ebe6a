//! Store adapter traits.
//!
//! The core never produces SQL. It talks to a backing store only through:
//!
//! - [`StoreAdapter`] - opens one connection per session
//! - [`StoreConnection`] - fetch, transactional write batch, routine call
//! - [`AbortSignal`] - raised when the owning session is closed mid-flight
//!
//! All operations integrate with asupersync's structured concurrency via
//! `Cx` for cancellation. Timeouts belong to the adapter and must be
//! reported as `Error::Transient`.

use crate::plan::{FetchRequest, FetchResult, RoutineCall, WriteBatch, WriteResult};
use crate::row::Row;
use asupersync::{Cx, Outcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag telling a connection its session is gone.
///
/// Cloning shares the flag. Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    raised: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Factory for store connections.
pub trait StoreAdapter: Send + Sync {
    /// The connection type handed to sessions.
    type Conn: StoreConnection;

    /// Open a connection bound to a session's abort signal.
    ///
    /// Dropping the returned connection releases it.
    fn connect(
        &self,
        cx: &Cx,
        signal: AbortSignal,
    ) -> impl Future<Output = Outcome<Self::Conn, crate::Error>> + Send;
}

/// One live connection to the backing store.
pub trait StoreConnection: Send + Sync {
    /// Execute a read request.
    ///
    /// Base rows, joined rows and every include path must be answered by
    /// this single call. If the abort signal is raised while the fetch runs
    /// the connection must stop and fail with `Error::Cancelled`.
    fn fetch(
        &self,
        cx: &Cx,
        request: &FetchRequest,
    ) -> impl Future<Output = Outcome<FetchResult, crate::Error>> + Send;

    /// Apply a batch of writes as one transaction.
    ///
    /// Either every operation takes effect or none does.
    fn apply(
        &self,
        cx: &Cx,
        batch: &WriteBatch,
    ) -> impl Future<Output = Outcome<WriteResult, crate::Error>> + Send;

    /// Invoke a named server-side routine.
    fn invoke(
        &self,
        cx: &Cx,
        call: &RoutineCall,
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_signal_is_shared_and_sticky() {
        let signal = AbortSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_raised());
        signal.raise();
        assert!(observer.is_raised());
        signal.raise();
        assert!(observer.is_raised());
    }
}
