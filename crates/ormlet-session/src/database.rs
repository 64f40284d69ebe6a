//! Session factory.
//!
//! A [`Database`] owns the store adapter, the entity registry and the
//! routine registry. Each [`Session`] it opens gets its own connection and
//! its own tracking table; nothing mutable is shared between sessions.

use crate::config::SessionConfig;
use crate::routine::RoutineRegistry;
use crate::{Session, SessionParts};
use asupersync::{Cx, Outcome};
use ormlet_core::{AbortSignal, Error, Registry, StoreAdapter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Session statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Sessions opened since the database was created
    pub sessions_opened: usize,
    /// Sessions whose connection is still held
    pub sessions_open: usize,
}

pub struct Database<A: StoreAdapter> {
    adapter: A,
    registry: Arc<Registry>,
    routines: Arc<RoutineRegistry>,
    config: SessionConfig,
    opened: AtomicUsize,
    /// Decremented by sessions when they release their connection.
    open: Arc<AtomicUsize>,
}

impl<A: StoreAdapter> std::fmt::Debug for Database<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("schemas", &self.registry.len())
            .field("routines", &self.routines.len())
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<A: StoreAdapter> Database<A> {
    /// Create a database over a validated registry.
    #[allow(clippy::result_large_err)]
    pub fn new(adapter: A, registry: Registry) -> Result<Self, Error> {
        registry.validate()?;
        Ok(Self {
            adapter,
            registry: Arc::new(registry),
            routines: Arc::new(RoutineRegistry::new()),
            config: SessionConfig::default(),
            opened: AtomicUsize::new(0),
            open: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Declare the stored routines sessions may invoke.
    #[allow(clippy::result_large_err)]
    pub fn with_routines(mut self, routines: RoutineRegistry) -> Result<Self, Error> {
        routines.validate(&self.registry)?;
        self.routines = Arc::new(routines);
        Ok(self)
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn routines(&self) -> &Arc<RoutineRegistry> {
        &self.routines
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            sessions_opened: self.opened.load(Ordering::Relaxed),
            sessions_open: self.open.load(Ordering::Relaxed),
        }
    }

    /// Open a session with its own connection.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn open(&self, cx: &Cx) -> Outcome<Session<A::Conn>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let signal = AbortSignal::new();
        let conn = match self.adapter.connect(cx, signal.clone()).await {
            Outcome::Ok(conn) => conn,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.open.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(
            conn,
            SessionParts {
                signal,
                registry: Arc::clone(&self.registry),
                routines: Arc::clone(&self.routines),
                config: self.config.clone(),
                open: Arc::clone(&self.open),
            },
        );
        tracing::debug!(session = session.id(), "session opened");
        Outcome::Ok(session)
    }
}
