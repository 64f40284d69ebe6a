//! Sessions, change tracking and relation loading for ormlet.
//!
//! `ormlet-session` is the **unit-of-work layer**. A [`Session`] owns one
//! store connection and one tracking table, materializes query results
//! through its identity map, loads relations according to the configured
//! [`LoadingStrategy`], and writes every pending change in one batch on
//! [`Session::commit`].
//!
//! # Design
//!
//! - **Explicit states**: records carry tagged lifecycle states; commit
//!   never diffs snapshots.
//! - **Atomic commit**: the tracker only moves after the adapter confirms
//!   the whole batch.
//! - **Cancel-correct**: operations take `&Cx` and return `Outcome`; a
//!   [`SessionCloser`] aborts in-flight work from another task.
//!
//! # Example
//!
//! ```ignore
//! let mut session = unwrap(db.open(&cx).await);
//! let shippers = session.fetch(&cx, &session.query("shippers")).await;
//! shippers[0].set("phone", "(503) 555-9831")?;
//! session.commit(&cx).await;
//! ```

pub mod change_tracker;
pub mod config;
pub mod database;
pub mod flush;
pub mod load_tracker;
pub mod loader;
pub mod projected;
pub mod routine;

pub use change_tracker::{ChangeTracker, ObjectKey};
pub use config::SessionConfig;
pub use database::{Database, DatabaseStats};
pub use flush::{CommitSummary, FlushOrderer, FlushPlan, FlushStep};
pub use load_tracker::{LoadStats, LoadTracker};
pub use loader::RecordScope;
pub use projected::{Group, Projected, ProjectedValue};
pub use routine::{ResultShape, RoutineParam, RoutineRegistry, RoutineRows, RoutineSignature};

use asupersync::{Cx, Outcome};
use ormlet_core::{
    AbortSignal, Error, FetchRequest, FetchResult, IncludeSpec, InvalidOperationError,
    InvalidOperationKind, Lifecycle, LoadingStrategy, RecordRef, Registry, Related, Result,
    StoreConnection, ValidationError, ValidationErrorKind, Value,
};
use ormlet_query::include::{merge_path, segments};
use ormlet_query::{Query, QueryPlan};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared state a session is opened with.
pub(crate) struct SessionParts {
    pub(crate) signal: AbortSignal,
    pub(crate) registry: Arc<Registry>,
    pub(crate) routines: Arc<RoutineRegistry>,
    pub(crate) config: SessionConfig,
    pub(crate) open: Arc<AtomicUsize>,
}

/// Closes a session from outside the task using it.
#[derive(Debug, Clone)]
pub struct SessionCloser {
    signal: AbortSignal,
}

impl SessionCloser {
    /// Raise the session's abort signal.
    ///
    /// An in-flight fetch stops and answers `Error::Cancelled`; the session
    /// then releases its connection and forgets its tracked records.
    pub fn close(&self) {
        self.signal.raise();
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_raised()
    }
}

/// A unit of work over one store connection.
pub struct Session<C: StoreConnection> {
    id: u64,
    /// `None` once released.
    conn: Option<C>,
    signal: AbortSignal,
    registry: Arc<Registry>,
    routines: Arc<RoutineRegistry>,
    config: SessionConfig,
    orderer: FlushOrderer,
    tracker: ChangeTracker,
    loads: LoadTracker,
    round_trips: usize,
    open: Arc<AtomicUsize>,
}

impl<C: StoreConnection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &self.conn.is_some())
            .field("tracked", &self.tracker.tracked_count())
            .field("round_trips", &self.round_trips)
            .finish_non_exhaustive()
    }
}

impl<C: StoreConnection> Session<C> {
    pub(crate) fn new(conn: C, parts: SessionParts) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let loads = LoadTracker::new()
            .with_threshold(parts.config.n1_threshold)
            .enabled(parts.config.n1_detection);
        Self {
            id,
            conn: Some(conn),
            signal: parts.signal,
            orderer: FlushOrderer::from_registry(&parts.registry),
            registry: parts.registry,
            routines: parts.routines,
            config: parts.config,
            tracker: ChangeTracker::new(id),
            loads,
            round_trips: 0,
            open: parts.open,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Adapter calls made so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips
    }

    pub fn load_stats(&self) -> LoadStats {
        self.loads.stats()
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some() && !self.signal.is_raised()
    }

    /// A handle that can close this session from another task.
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            signal: self.signal.clone(),
        }
    }

    /// Release the connection and detach every tracked record.
    pub fn close(mut self) {
        self.signal.raise();
        self.release();
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn);
            self.tracker.clear();
            self.open.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(session = self.id, "session released its connection");
        }
    }

    /// Fail with `Cancelled` once the session has been closed.
    fn ensure_open(&mut self) -> Result<()> {
        if self.signal.is_raised() {
            self.release();
        }
        if self.conn.is_none() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    // ==================== Tracking ====================

    /// Start a query over a registered schema.
    pub fn query(&self, schema: &str) -> Query {
        Query::new(Arc::clone(&self.registry), schema)
    }

    /// Track an existing record as `Unchanged`.
    #[allow(clippy::result_large_err)]
    pub fn attach(&mut self, record: &RecordRef) -> Result<()> {
        self.ensure_open()?;
        self.check_registered(record)?;
        self.tracker.attach(record)?;
        record.set_loading_strategy(Some(self.config.loading));
        Ok(())
    }

    /// Track a new record, inserted on commit.
    #[allow(clippy::result_large_err)]
    pub fn add(&mut self, record: &RecordRef) -> Result<()> {
        self.ensure_open()?;
        self.check_registered(record)?;
        self.tracker.add(record)
    }

    /// Mark a record for deletion on commit.
    #[allow(clippy::result_large_err)]
    pub fn remove(&mut self, record: &RecordRef) -> Result<()> {
        self.ensure_open()?;
        self.tracker.remove(record)
    }

    fn check_registered(&self, record: &RecordRef) -> Result<()> {
        self.registry.require(record.schema_name()).map(|_| ())
    }

    pub fn state_of(&self, record: &RecordRef) -> Lifecycle {
        self.tracker.state_of(record)
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker.tracked_count()
    }

    pub fn entries(&self) -> Vec<RecordRef> {
        self.tracker.entries()
    }

    // ==================== Reading ====================

    async fn run_fetch(&mut self, cx: &Cx, request: &FetchRequest) -> Outcome<FetchResult, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        if self.config.trace_plans {
            tracing::debug!(session = self.id, plan = %request, "fetch");
        }
        self.round_trips += 1;
        let Some(conn) = self.conn.as_ref() else {
            return Outcome::Err(Error::Cancelled);
        };
        let outcome = conn.fetch(cx, request).await;
        if self.signal.is_raised() {
            tracing::debug!(session = self.id, "fetch aborted by close");
            self.release();
            return Outcome::Err(Error::Cancelled);
        }
        outcome
    }

    /// Materialize base rows, joined rows and include paths.
    fn materialize(&mut self, plan: &QueryPlan, result: &FetchResult) -> Result<Vec<RecordScope>> {
        let mut scopes = Vec::with_capacity(result.rows.len());
        let mut owners: Vec<RecordRef> = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let record = self.resolve(&plan.schema, &row.base, plan.loading)?;
            let mut joined = Vec::with_capacity(row.joined.len());
            for (schema, joined_row) in plan.joined.iter().zip(&row.joined) {
                joined.push(match joined_row {
                    Some(joined_row) => Some(self.resolve(schema, joined_row, plan.loading)?),
                    None => None,
                });
            }
            if !owners.iter().any(|seen| seen.ptr_eq(&record)) {
                owners.push(record.clone());
            }
            scopes.push(RecordScope::with_joined(record, joined));
        }
        for spec in &plan.request.includes {
            loader::stitch(
                &mut self.tracker,
                &self.registry,
                spec,
                &owners,
                result,
                plan.loading,
            )?;
        }
        Ok(scopes)
    }

    fn resolve(
        &mut self,
        schema: &Arc<ormlet_core::Schema>,
        row: &ormlet_core::Row,
        loading: Option<LoadingStrategy>,
    ) -> Result<RecordRef> {
        let (record, fresh) = self.tracker.resolve(schema, row)?;
        if fresh {
            record.set_loading_strategy(loading);
        }
        Ok(record)
    }

    async fn enumerate(&mut self, cx: &Cx, plan: &QueryPlan) -> Outcome<Vec<RecordScope>, Error> {
        let result = match self.run_fetch(cx, &plan.request).await {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let scopes = self.materialize(plan, &result);
        tracing::debug!(
            session = self.id,
            schema = plan.schema.name(),
            rows = result.rows.len(),
            includes = result.included.len(),
            "query enumerated"
        );
        scopes.map_or_else(Outcome::Err, Outcome::Ok)
    }

    /// Validate a query; nothing is sent when this fails.
    fn plan(&mut self, query: &Query) -> Result<QueryPlan> {
        self.ensure_open()?;
        query.build()
    }

    /// Enumerate a query as records.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(session = self.id, schema = query.schema_name()))]
    pub async fn fetch(&mut self, cx: &Cx, query: &Query) -> Outcome<Vec<RecordRef>, Error> {
        let plan = match self.plan(query).and_then(|plan| {
            plan.expect_records()?;
            Ok(plan)
        }) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        match self.enumerate(cx, &plan).await {
            Outcome::Ok(scopes) => {
                Outcome::Ok(scopes.into_iter().map(|scope| scope.record().clone()).collect())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Enumerate a query carrying a projection.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(session = self.id, schema = query.schema_name()))]
    pub async fn fetch_projected(&mut self, cx: &Cx, query: &Query) -> Outcome<Vec<Projected>, Error> {
        let plan = match self.plan(query) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let columns = match plan.expect_projection() {
            Ok(columns) => columns.to_vec(),
            Err(e) => return Outcome::Err(e),
        };
        match self.enumerate(cx, &plan).await {
            Outcome::Ok(scopes) => Outcome::Ok(
                scopes
                    .iter()
                    .map(|scope| Projected::evaluate(&columns, scope))
                    .collect(),
            ),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Enumerate a grouped query as groups of records.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(session = self.id, schema = query.schema_name()))]
    pub async fn fetch_grouped(
        &mut self,
        cx: &Cx,
        query: &Query,
    ) -> Outcome<Vec<Group<RecordRef>>, Error> {
        let (plan, key) = match self.plan(query).and_then(|plan| {
            plan.expect_records()?;
            let key = plan.expect_grouping()?.clone();
            Ok((plan, key))
        }) {
            Ok(planned) => planned,
            Err(e) => return Outcome::Err(e),
        };
        match self.enumerate(cx, &plan).await {
            Outcome::Ok(scopes) => Outcome::Ok(projected::group(
                scopes
                    .into_iter()
                    .map(|scope| (key.evaluate(&scope), scope.record().clone())),
            )),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Enumerate a grouped query with a projection as groups of projected rows.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(session = self.id, schema = query.schema_name()))]
    pub async fn fetch_grouped_projected(
        &mut self,
        cx: &Cx,
        query: &Query,
    ) -> Outcome<Vec<Group<Projected>>, Error> {
        let plan = match self.plan(query) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let (key, columns) = match (plan.expect_grouping(), plan.expect_projection()) {
            (Ok(key), Ok(columns)) => (key.clone(), columns.to_vec()),
            (Err(e), _) | (_, Err(e)) => return Outcome::Err(e),
        };
        match self.enumerate(cx, &plan).await {
            Outcome::Ok(scopes) => Outcome::Ok(projected::group(scopes.iter().map(|scope| {
                (key.evaluate(scope), Projected::evaluate(&columns, scope))
            }))),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Number of rows a query matches.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(session = self.id, schema = query.schema_name()))]
    pub async fn count(&mut self, cx: &Cx, query: &Query) -> Outcome<u64, Error> {
        let plan = match self.plan(query) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        match self.run_fetch(cx, &plan.count_request()).await {
            Outcome::Ok(result) => {
                Outcome::Ok(result.count.unwrap_or(result.rows.len() as u64))
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// First record in the query's order.
    pub async fn first(&mut self, cx: &Cx, query: &Query) -> Outcome<Option<RecordRef>, Error> {
        match self.fetch(cx, &query.clone().limit(1)).await {
            Outcome::Ok(records) => Outcome::Ok(records.into_iter().next()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Last record in the query's order: the order is reversed, then limited.
    pub async fn last(&mut self, cx: &Cx, query: &Query) -> Outcome<Option<RecordRef>, Error> {
        let reversed = query.clone().reverse_order().limit(1);
        match self.fetch(cx, &reversed).await {
            Outcome::Ok(records) => Outcome::Ok(records.into_iter().next()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Record by primary key; tracked instances are returned without I/O.
    ///
    /// A tracked record marked for removal reads as `None`.
    #[tracing::instrument(level = "debug", skip(self, cx, key), fields(session = self.id))]
    pub async fn find(
        &mut self,
        cx: &Cx,
        schema: &str,
        key: &[Value],
    ) -> Outcome<Option<RecordRef>, Error> {
        if let Err(e) = self.ensure_open() {
            return Outcome::Err(e);
        }
        let target = match self.registry.require(schema) {
            Ok(target) => Arc::clone(target),
            Err(e) => return Outcome::Err(e),
        };
        let names = target.primary_key_names();
        if names.len() != key.len() {
            return Outcome::Err(Error::Validation(ValidationError::new(
                ValidationErrorKind::Shape,
                schema,
                format!("primary key has {} column(s), got {}", names.len(), key.len()),
            )));
        }
        if let Some(tracked) = self.tracker.lookup(schema, key) {
            return Outcome::Ok((tracked.lifecycle() != Lifecycle::Removed).then(|| tracked.clone()));
        }

        let pairs: Vec<(String, Value)> = names
            .iter()
            .map(|name| (*name).to_string())
            .zip(key.iter().cloned())
            .collect();
        let request = FetchRequest::by_key(schema, &pairs);
        let result = match self.run_fetch(cx, &request).await {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let Some(row) = result.rows.first() else {
            return Outcome::Ok(None);
        };
        match self.resolve(&target, &row.base, None) {
            Ok(record) => Outcome::Ok(Some(record)),
            Err(e) => Outcome::Err(e),
        }
    }

    // ==================== Relations ====================

    fn check_owner(&self, record: &RecordRef) -> Result<()> {
        match record.owner() {
            Some(owner) if owner != self.id => {
                Err(Error::InvalidOperation(InvalidOperationError::new(
                    InvalidOperationKind::ForeignSession,
                    record.schema_name(),
                    format!("{} is tracked by another session", record.describe()),
                )))
            }
            _ => Ok(()),
        }
    }

    fn relation_spec(&self, record: &RecordRef, path: &str) -> Result<IncludeSpec> {
        let mut specs = Vec::new();
        merge_path(&self.registry, record.schema(), &mut specs, path)?;
        specs.pop().ok_or_else(|| {
            Error::Validation(
                ValidationError::new(
                    ValidationErrorKind::UnknownRelation,
                    record.schema_name(),
                    "empty relation path",
                )
                .at(path),
            )
        })
    }

    /// Read a navigational attribute.
    ///
    /// A cached value is returned as is. Otherwise a deferred record fetches
    /// the relation once and caches it; explicit and eager records answer an
    /// absent value without I/O.
    #[tracing::instrument(level = "debug", skip(self, cx, record), fields(session = self.id, record = %record.describe()))]
    pub async fn navigate(
        &mut self,
        cx: &Cx,
        record: &RecordRef,
        relation: &str,
    ) -> Outcome<Related, Error> {
        let spec = match self
            .ensure_open()
            .and_then(|()| self.check_owner(record))
            .and_then(|()| self.relation_spec(record, relation))
        {
            Ok(spec) => spec,
            Err(e) => return Outcome::Err(e),
        };
        if !spec.nested.is_empty() {
            return Outcome::Err(Error::Validation(
                ValidationError::new(
                    ValidationErrorKind::Shape,
                    record.schema_name(),
                    "navigate takes a single relation name; use load_relation for paths",
                )
                .at(relation),
            ));
        }
        if let Some(cached) = record.related(relation) {
            return Outcome::Ok(cached);
        }
        let collection = spec.hop.collection;
        match record.loading_strategy().unwrap_or(self.config.loading) {
            LoadingStrategy::Explicit | LoadingStrategy::Eager => {
                Outcome::Ok(Related::absent(collection))
            }
            LoadingStrategy::Deferred => match self.load_single(cx, record, spec).await {
                Outcome::Ok(()) => Outcome::Ok(
                    record
                        .related(relation)
                        .unwrap_or_else(|| Related::absent(collection)),
                ),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
        }
    }

    /// Populate a (dotted) relation path, one level at a time.
    ///
    /// Levels that are already loaded are not fetched again.
    #[tracing::instrument(level = "debug", skip(self, cx, record), fields(session = self.id, record = %record.describe()))]
    pub async fn load_relation(
        &mut self,
        cx: &Cx,
        record: &RecordRef,
        path: &str,
    ) -> Outcome<(), Error> {
        if let Err(e) = self
            .ensure_open()
            .and_then(|()| self.check_owner(record))
            .and_then(|()| self.relation_spec(record, path).map(|_| ()))
        {
            return Outcome::Err(e);
        }
        let parts: Vec<String> = segments(path).into_iter().map(str::to_string).collect();
        let mut pending = vec![(record.clone(), 0usize)];
        while let Some((current, depth)) = pending.pop() {
            let name = &parts[depth];
            if current.is_loaded(name) {
                if depth + 1 < parts.len() {
                    let children = current
                        .related(name)
                        .map(|related| related.records())
                        .unwrap_or_default();
                    pending.extend(children.into_iter().map(|child| (child, depth + 1)));
                }
                continue;
            }
            let spec = match self.relation_spec(&current, &parts[depth..].join(".")) {
                Ok(spec) => spec,
                Err(e) => return Outcome::Err(e),
            };
            match self.load_single(cx, &current, spec).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(())
    }

    /// Fetch one relation (and any nested levels) for a single record.
    ///
    /// A NULL local key or a record without a primary key resolves to an
    /// absent value without I/O.
    async fn load_single(&mut self, cx: &Cx, record: &RecordRef, spec: IncludeSpec) -> Outcome<(), Error> {
        let local = record.get(&spec.hop.local_key).unwrap_or(Value::Null);
        if local.is_null() || record.key().is_none() {
            record.set_related(&spec.hop.name, Related::absent(spec.hop.collection));
            return Outcome::Ok(());
        }
        self.loads.record_load(record.schema_name(), &spec.hop.name);

        let mut request = FetchRequest::by_key(record.schema_name(), &record.key_pairs());
        request.includes = vec![spec];
        let result = match self.run_fetch(cx, &request).await {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let loading = record.loading_strategy();
        for spec in &request.includes {
            if let Err(e) = loader::stitch(
                &mut self.tracker,
                &self.registry,
                spec,
                std::slice::from_ref(record),
                &result,
                loading,
            ) {
                return Outcome::Err(e);
            }
        }
        tracing::trace!(
            session = self.id,
            record = %record.describe(),
            path = %request.includes.iter().map(|spec| spec.path.as_str()).collect::<Vec<_>>().join(","),
            "relation loaded"
        );
        Outcome::Ok(())
    }

    // ==================== Writing ====================

    /// Write every pending change in one transaction.
    ///
    /// On failure nothing in the tracker moves: states, changed fields and
    /// keys stay exactly as they were before the call.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(session = self.id))]
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<CommitSummary, Error> {
        if let Err(e) = self.ensure_open() {
            return Outcome::Err(e);
        }
        let plan = self.orderer.plan(&self.tracker);
        if plan.is_empty() {
            plan.settle();
            tracing::debug!(session = self.id, "nothing to commit");
            return Outcome::Ok(CommitSummary::default());
        }
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        if self.config.trace_plans {
            tracing::debug!(session = self.id, ops = ?plan.batch.ops, "write batch");
        }

        self.round_trips += 1;
        let Some(conn) = self.conn.as_ref() else {
            return Outcome::Err(Error::Cancelled);
        };
        let outcome = conn.apply(cx, &plan.batch).await;
        if self.signal.is_raised() {
            self.release();
            return Outcome::Err(Error::Cancelled);
        }
        let result = match outcome {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => {
                tracing::debug!(session = self.id, error = %e, "commit rejected");
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let summary = plan.complete(&mut self.tracker, &result);
        tracing::info!(
            session = self.id,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "commit complete"
        );
        Outcome::Ok(summary)
    }

    // ==================== Routines ====================

    /// Invoke a stored routine.
    ///
    /// The call is checked against the routine's signature before anything
    /// is sent; a mismatch is a `SignatureError` and costs no round trip.
    #[tracing::instrument(level = "debug", skip(self, cx, params), fields(session = self.id))]
    pub async fn invoke(
        &mut self,
        cx: &Cx,
        name: &str,
        params: Vec<Value>,
    ) -> Outcome<RoutineRows, Error> {
        if let Err(e) = self.ensure_open() {
            return Outcome::Err(e);
        }
        let routines = Arc::clone(&self.routines);
        let (call, signature) = match routines.prepare(name, params) {
            Ok(prepared) => prepared,
            Err(e) => return Outcome::Err(e),
        };
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        self.round_trips += 1;
        let Some(conn) = self.conn.as_ref() else {
            return Outcome::Err(Error::Cancelled);
        };
        let outcome = conn.invoke(cx, &call).await;
        if self.signal.is_raised() {
            self.release();
            return Outcome::Err(Error::Cancelled);
        }
        let rows = match outcome {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(session = self.id, routine = name, rows = rows.len(), "routine returned");
        RoutineRows::shape(signature, &self.registry, rows).map_or_else(Outcome::Err, Outcome::Ok)
    }
}

impl<C: StoreConnection> Drop for Session<C> {
    fn drop(&mut self) {
        self.release();
    }
}
