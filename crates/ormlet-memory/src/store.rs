//! The in-memory store adapter.
//!
//! [`MemoryStore`] keeps every table behind one mutex and hands out
//! [`MemoryConnection`]s that answer fetches, apply write batches as a
//! single transaction and run registered routines. Faults can be injected
//! to exercise timeout and disconnect handling, and a fetch hook lets tests
//! act while a fetch is in flight.

use crate::config::MemoryStoreConfig;
use crate::engine::{self, Interrupt};
use crate::table::TableSet;
use asupersync::{Cx, Outcome};
use ormlet_core::{
    AbortSignal, Error, FetchRequest, FetchResult, Registry, Result, RoutineCall, Row,
    StoreAdapter, StoreConnection, TransientErrorKind, TransientStoreError, Value, WriteBatch,
    WriteResult,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A server-side routine: reads the tables, returns rows.
pub type RoutineFn = dyn Fn(&TableSet, &[Value]) -> Result<Vec<Row>> + Send + Sync;

type FetchHook = dyn Fn(&FetchRequest) + Send + Sync;

/// A failure to report on the next store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Timeout,
    Disconnect,
}

impl Fault {
    fn into_error(self) -> Error {
        match self {
            Fault::Timeout => {
                Error::Transient(TransientStoreError::timeout("memory store deadline exceeded"))
            }
            Fault::Disconnect => Error::Transient(TransientStoreError::disconnected(
                "memory store connection lost",
            )),
        }
    }
}

/// Store call statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Connections opened since the store was created
    pub connections_opened: usize,
    /// Connections not yet dropped
    pub connections_open: usize,
    pub fetches: usize,
    /// Write batches received (committed or not)
    pub batches: usize,
    pub invocations: usize,
}

struct State {
    tables: TableSet,
    faults: VecDeque<Fault>,
    routines: HashMap<String, Arc<RoutineFn>>,
    fetch_hook: Option<Arc<FetchHook>>,
}

struct Inner {
    config: MemoryStoreConfig,
    state: Mutex<State>,
    connections_opened: AtomicUsize,
    connections_open: AtomicUsize,
    fetches: AtomicUsize,
    batches: AtomicUsize,
    invocations: AtomicUsize,
}

/// Tables held in memory, shared by every clone.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Empty tables for every schema of the registry.
    pub fn new(registry: &Registry, config: MemoryStoreConfig) -> Self {
        let tables = TableSet::new(registry, config.enforce_foreign_keys);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    tables,
                    faults: VecDeque::new(),
                    routines: HashMap::new(),
                    fetch_hook: None,
                }),
                connections_opened: AtomicUsize::new(0),
                connections_open: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
                batches: AtomicUsize::new(0),
                invocations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn from_registry(registry: &Registry) -> Self {
        Self::new(registry, MemoryStoreConfig::default())
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a row directly, with the same checks a write batch gets.
    ///
    /// Returns the generated (column, value) pairs.
    #[allow(clippy::result_large_err)]
    pub fn seed(&self, table: &str, values: &[(&str, Value)]) -> Result<Vec<(String, Value)>> {
        let values: Vec<(String, Value)> = values
            .iter()
            .map(|(column, value)| ((*column).to_string(), value.clone()))
            .collect();
        self.state().tables.insert(table, &values)
    }

    /// Snapshot of a table's rows; empty for unknown tables.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state().tables.rows(table).to_vec()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state().tables.rows(table).len()
    }

    /// Run `f` against the current tables.
    pub fn read<R>(&self, f: impl FnOnce(&TableSet) -> R) -> R {
        f(&self.state().tables)
    }

    /// Every table as JSON, for inspection and debugging.
    pub fn dump_json(&self) -> serde_json::Value {
        self.state().tables.to_json()
    }

    /// Register (or replace) a routine.
    pub fn register_routine<F>(&self, name: impl Into<String>, routine: F)
    where
        F: Fn(&TableSet, &[Value]) -> Result<Vec<Row>> + Send + Sync + 'static,
    {
        self.state().routines.insert(name.into(), Arc::new(routine));
    }

    /// Fail the next store call with `fault`. Faults queue up in order.
    pub fn inject_fault(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    /// Run `hook` at the start of every fetch, before any row is read.
    pub fn on_fetch<F>(&self, hook: F)
    where
        F: Fn(&FetchRequest) + Send + Sync + 'static,
    {
        self.state().fetch_hook = Some(Arc::new(hook));
    }

    pub fn clear_fetch_hook(&self) {
        self.state().fetch_hook = None;
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            connections_opened: self.inner.connections_opened.load(Ordering::Relaxed),
            connections_open: self.inner.connections_open.load(Ordering::Relaxed),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            batches: self.inner.batches.load(Ordering::Relaxed),
            invocations: self.inner.invocations.load(Ordering::Relaxed),
        }
    }

    fn take_fault(&self) -> Option<Error> {
        self.state().faults.pop_front().map(Fault::into_error)
    }

    fn open_connection(&self, cx: &Cx, signal: AbortSignal) -> Outcome<MemoryConnection, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let limit = self.inner.config.max_connections;
        let reserved = self.inner.connections_open.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |open| (open < limit).then_some(open + 1),
        );
        if reserved.is_err() {
            return Outcome::Err(Error::Transient(TransientStoreError {
                kind: TransientErrorKind::Unavailable,
                message: format!("all {limit} memory store connections are in use"),
                source: None,
            }));
        }
        self.inner.connections_opened.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(open = self.stats().connections_open, "memory connection opened");
        Outcome::Ok(MemoryConnection {
            store: self.clone(),
            signal,
        })
    }
}

impl StoreAdapter for MemoryStore {
    type Conn = MemoryConnection;

    fn connect(
        &self,
        cx: &Cx,
        signal: AbortSignal,
    ) -> impl Future<Output = Outcome<Self::Conn, Error>> + Send {
        let outcome = self.open_connection(cx, signal);
        async move { outcome }
    }
}

/// One connection to a [`MemoryStore`]; dropping it releases the slot.
pub struct MemoryConnection {
    store: MemoryStore,
    signal: AbortSignal,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("aborted", &self.signal.is_raised())
            .finish_non_exhaustive()
    }
}

impl MemoryConnection {
    /// Common entry checks; `Some` is the early answer of the call.
    fn begin<T>(&self, cx: &Cx, counter: &AtomicUsize) -> Option<Outcome<T, Error>> {
        if let Some(reason) = cx.cancel_reason() {
            return Some(Outcome::Cancelled(reason));
        }
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.store.take_fault() {
            tracing::debug!(error = %err, "injected fault");
            return Some(Outcome::Err(err));
        }
        if self.signal.is_raised() {
            return Some(Outcome::Err(Error::Cancelled));
        }
        None
    }

    fn fetch_now(&self, cx: &Cx, request: &FetchRequest) -> Outcome<FetchResult, Error> {
        if let Some(early) = self.begin(cx, &self.store.inner.fetches) {
            return early;
        }
        let hook = self.store.state().fetch_hook.clone();
        if let Some(hook) = hook {
            hook(request);
        }

        let state = self.store.state();
        let interrupt = Interrupt {
            signal: &self.signal,
            every: self.store.inner.config.abort_check_interval,
        };
        match engine::fetch(&state.tables, request, &interrupt) {
            Ok(result) => {
                tracing::trace!(
                    table = %request.table,
                    rows = result.rows.len(),
                    includes = result.included.len(),
                    "memory fetch"
                );
                Outcome::Ok(result)
            }
            Err(e) => Outcome::Err(e),
        }
    }

    fn apply_now(&self, cx: &Cx, batch: &WriteBatch) -> Outcome<WriteResult, Error> {
        if let Some(early) = self.begin(cx, &self.store.inner.batches) {
            return early;
        }
        let mut state = self.store.state();
        let mut working = state.tables.clone();
        let mut result = WriteResult::default();
        for op in &batch.ops {
            match working.apply(op) {
                Ok(generated) => {
                    result.generated.push(generated);
                    result.affected.push(1);
                }
                Err(e) => {
                    tracing::debug!(table = op.table(), error = %e, "batch rolled back");
                    return Outcome::Err(e);
                }
            }
        }
        state.tables = working;
        tracing::trace!(ops = batch.len(), "batch committed");
        Outcome::Ok(result)
    }

    fn invoke_now(&self, cx: &Cx, call: &RoutineCall) -> Outcome<Vec<Row>, Error> {
        if let Some(early) = self.begin(cx, &self.store.inner.invocations) {
            return early;
        }
        let state = self.store.state();
        let Some(routine) = state.routines.get(&call.name).cloned() else {
            return Outcome::Err(Error::Custom(format!("unknown routine '{}'", call.name)));
        };
        routine(&state.tables, &call.params).map_or_else(Outcome::Err, Outcome::Ok)
    }
}

impl StoreConnection for MemoryConnection {
    fn fetch(
        &self,
        cx: &Cx,
        request: &FetchRequest,
    ) -> impl Future<Output = Outcome<FetchResult, Error>> + Send {
        let outcome = self.fetch_now(cx, request);
        async move { outcome }
    }

    fn apply(
        &self,
        cx: &Cx,
        batch: &WriteBatch,
    ) -> impl Future<Output = Outcome<WriteResult, Error>> + Send {
        let outcome = self.apply_now(cx, batch);
        async move { outcome }
    }

    fn invoke(
        &self,
        cx: &Cx,
        call: &RoutineCall,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let outcome = self.invoke_now(cx, call);
        async move { outcome }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.store
            .inner
            .connections_open
            .fetch_sub(1, Ordering::AcqRel);
        tracing::trace!("memory connection released");
    }
}
