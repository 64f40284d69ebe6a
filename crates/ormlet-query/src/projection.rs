//! Projection shapes.
//!
//! A projection turns each fetched row into a [`ProjectionItem`] list chosen
//! by the caller: scalar values (fields, paths, functions, collection
//! counts), whole records (the base record or a joined one) and related
//! collections. A collection may carry a filter that is applied to its
//! elements after they are materialized, which is the only way to filter
//! per element inside a collection.

use crate::expr::Expr;

/// One named item of a projection.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionItem {
    /// A value computed from the row.
    Value { alias: String, expr: Expr },
    /// A whole record: the base record (`source == None`) or a joined one.
    Record {
        alias: String,
        source: Option<String>,
    },
    /// A related collection, optionally filtered per element.
    Collection {
        alias: String,
        collection: CollectionItem,
    },
}

impl ProjectionItem {
    pub fn alias(&self) -> &str {
        match self {
            ProjectionItem::Value { alias, .. }
            | ProjectionItem::Record { alias, .. }
            | ProjectionItem::Collection { alias, .. } => alias,
        }
    }
}

/// A related collection inside a projection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionItem {
    pub relation: String,
    pub filter: Option<Expr>,
}

impl CollectionItem {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            filter: None,
        }
    }

    /// Keep only the elements matching `expr` (evaluated per element).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }
}

impl From<&str> for CollectionItem {
    fn from(relation: &str) -> Self {
        Self::new(relation)
    }
}

impl From<String> for CollectionItem {
    fn from(relation: String) -> Self {
        Self::new(relation)
    }
}

/// Builder for a projection.
///
/// ```ignore
/// let shape = Projection::new()
///     .value("region", Expr::col("region_description").trim())
///     .collection(
///         "eastern",
///         CollectionItem::new("territories")
///             .filter(Expr::col("territory_description").starts_with("B")),
///     );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    items: Vec<ProjectionItem>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// A computed value.
    pub fn value(mut self, alias: impl Into<String>, expr: Expr) -> Self {
        self.items.push(ProjectionItem::Value {
            alias: alias.into(),
            expr,
        });
        self
    }

    /// Shorthand for `value(name, Expr::col(name))`.
    pub fn field(self, path: impl Into<String>) -> Self {
        let path = path.into();
        let alias = path.rsplit('.').next().unwrap_or(&path).to_string();
        self.value(alias, Expr::Column(path))
    }

    /// The query's own record.
    pub fn record(mut self, alias: impl Into<String>) -> Self {
        self.items.push(ProjectionItem::Record {
            alias: alias.into(),
            source: None,
        });
        self
    }

    /// The record joined under `join_alias`.
    pub fn joined(mut self, alias: impl Into<String>, join_alias: impl Into<String>) -> Self {
        self.items.push(ProjectionItem::Record {
            alias: alias.into(),
            source: Some(join_alias.into()),
        });
        self
    }

    pub fn collection(
        mut self,
        alias: impl Into<String>,
        collection: impl Into<CollectionItem>,
    ) -> Self {
        self.items.push(ProjectionItem::Collection {
            alias: alias.into(),
            collection: collection.into(),
        });
        self
    }

    pub fn items(&self) -> &[ProjectionItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
