//! Query building for ormlet.
//!
//! `Query` is a lazy, immutable description of a read: filters, joins,
//! ordering, grouping, include paths and a projection over one schema.
//! [`Query::build`] validates it against the registry and lowers it into a
//! dialect-neutral [`ormlet_core::FetchRequest`]; no SQL is produced here.

pub mod expr;
pub mod include;
mod lower;
pub mod projection;
pub mod query;

pub use expr::{Expr, RelatedExpr};
pub use projection::{CollectionItem, Projection, ProjectionItem};
pub use query::{ProjectedColumn, Query, QueryPlan};
