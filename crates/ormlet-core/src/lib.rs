//! Core types and traits for ormlet.
//!
//! This crate provides the foundational abstractions shared by the query
//! builder, the session layer and store adapters:
//!
//! - `Value` and `Row` for dynamically typed data
//! - `Schema` and `Registry` for entity metadata
//! - `RecordRef` for tracked in-memory records
//! - `FetchRequest`/`WriteBatch` plans and their evaluation
//! - `StoreAdapter`/`StoreConnection`, the only way to reach a store
//! - `Outcome` and `Cx` re-exported from asupersync

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod adapter;
pub mod error;
pub mod eval;
pub mod plan;
pub mod record;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;

pub use adapter::{AbortSignal, StoreAdapter, StoreConnection};
pub use error::{
    ConstraintKind, ConstraintViolationError, Error, InvalidOperationError, InvalidOperationKind,
    Result, SchemaError, SchemaErrorKind, SignatureError, TransientErrorKind, TransientStoreError,
    TypeError, ValidationError, ValidationErrorKind,
};
pub use eval::{Scope, aggregate, order_cmp};
pub use plan::{
    AggregateFunc, ColumnRef, ColumnSource, CompareOp, Direction, FetchMode, FetchRequest,
    FetchResult, IncludeSpec, IncludedRows, JoinKind, JoinSpec, LinkHop, Operand, OrderKey,
    Predicate, RelationHop, ResultRow, RoutineCall, ScalarFunc, TextOp, WriteBatch, WriteOp,
    WriteResult,
};
pub use record::{Lifecycle, LoadingStrategy, RecordRef, RecordSnapshot, Related};
pub use row::{ColumnInfo, FromRow, FromValue, Row};
pub use schema::{FieldDef, LinkTable, Registry, RelationDef, RelationKind, Schema, SchemaBuilder};
pub use types::SqlType;
pub use value::{Value, hash_values};
