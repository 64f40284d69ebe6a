//! ormlet - a small unit-of-work data-access layer.
//!
//! ormlet tracks records fetched through a [`Session`], writes every pending
//! change in one atomic batch on commit, and loads relations deferred,
//! explicitly or eagerly. Queries are described with an immutable builder and
//! lowered into dialect-neutral plans; a [`StoreAdapter`] executes them.
//!
//! - Queries are validated before any I/O
//! - Records keep one identity per session
//! - Commits are all-or-nothing
//! - Every operation is cancel-correct through asupersync
//!
//! # Quick Start
//!
//! ```ignore
//! use ormlet::prelude::*;
//!
//! async fn rename_shipper(cx: &Cx) -> Result<()> {
//!     let db = ormlet::memory::northwind::database()?;
//!     let mut session = match db.open(cx).await {
//!         Outcome::Ok(session) => session,
//!         Outcome::Err(e) => return Err(e),
//!         _ => return Err(Error::Cancelled),
//!     };
//!
//!     let query = session.query("shippers").filter(Expr::col("shipper_id").eq(1));
//!     if let Outcome::Ok(Some(shipper)) = session.first(cx, &query).await {
//!         shipper.set("company_name", "Speedy Express Ltd.")?;
//!     }
//!     let _ = session.commit(cx).await;
//!     Ok(())
//! }
//! ```
//!
//! # Crates
//!
//! - `ormlet-core`: values, rows, schemas, records, plans and the adapter traits
//! - `ormlet-query`: expressions, the query builder and projections
//! - `ormlet-session`: databases, sessions, change tracking and routines
//! - `ormlet-memory`: the in-memory adapter and the Northwind fixture

pub use ormlet_core::{
    // asupersync re-exports
    Budget,
    Cx,
    Outcome,
    RegionId,
    TaskId,
    // Adapter boundary
    AbortSignal,
    StoreAdapter,
    StoreConnection,
    // Errors
    ConstraintKind,
    ConstraintViolationError,
    Error,
    InvalidOperationError,
    InvalidOperationKind,
    Result,
    SchemaError,
    SchemaErrorKind,
    SignatureError,
    TransientErrorKind,
    TransientStoreError,
    TypeError,
    ValidationError,
    ValidationErrorKind,
    // Data model
    ColumnInfo,
    FieldDef,
    FromRow,
    FromValue,
    Lifecycle,
    LinkTable,
    LoadingStrategy,
    RecordRef,
    RecordSnapshot,
    Registry,
    Related,
    RelationDef,
    RelationKind,
    Row,
    Schema,
    SchemaBuilder,
    SqlType,
    Value,
    // Lowered plans
    FetchRequest,
    FetchResult,
    RoutineCall,
    WriteBatch,
    WriteOp,
    WriteResult,
};
pub use ormlet_query::{CollectionItem, Expr, Projection, Query, QueryPlan, RelatedExpr};
pub use ormlet_session::{
    CommitSummary, Database, DatabaseStats, Group, LoadStats, Projected, ProjectedValue,
    ResultShape, RoutineParam, RoutineRegistry, RoutineRows, RoutineSignature, Session,
    SessionCloser, SessionConfig,
};

/// Lowered plan types, for adapter authors.
pub mod plan {
    pub use ormlet_core::plan::*;
}

/// The in-memory adapter and the Northwind fixture.
pub mod memory {
    pub use ormlet_memory::*;
}

/// Everything an application usually needs.
///
/// ```ignore
/// use ormlet::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CollectionItem, CommitSummary, Cx, Database, Error, Expr, FieldDef, Lifecycle,
        LoadingStrategy, Outcome, Projection, Query, RecordRef, Registry, Related, RelationDef,
        Result, RoutineRegistry, RoutineSignature, Row, Schema, Session, SessionConfig, SqlType,
        Value,
    };
}
