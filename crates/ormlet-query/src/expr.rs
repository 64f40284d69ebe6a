//! Expressions for filters, ordering keys, grouping keys and projections.
//!
//! Expressions name columns by path: `"city"` is a field of the query's
//! schema, `"region.region_description"` follows a reference relation, and
//! `"c.city"` reads a joined schema through its alias. Paths are resolved
//! (and rejected) when the query is built, never when it is composed.

use ormlet_core::{AggregateFunc, CompareOp, ScalarFunc, TextOp, Value};

/// A filter, key or value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column path
    Column(String),

    /// Literal value
    Literal(Value),

    /// Comparison (a = b, a > b, ...)
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },

    And(Vec<Expr>),

    Or(Vec<Expr>),

    Not(Box<Expr>),

    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },

    In {
        expr: Box<Expr>,
        values: Vec<Value>,
        negated: bool,
    },

    /// Substring tests on text
    Text {
        expr: Box<Expr>,
        op: TextOp,
        pattern: String,
    },

    Function {
        func: ScalarFunc,
        arg: Box<Expr>,
    },

    /// Some element of a collection relation matches
    Any {
        relation: String,
        filter: Option<Box<Expr>>,
    },

    /// Every element of a collection relation matches
    All {
        relation: String,
        filter: Box<Expr>,
    },

    /// Number of (matching) elements of a collection relation
    Count {
        relation: String,
        filter: Option<Box<Expr>>,
    },

    /// The collection holds the element with this primary key
    ContainsKey {
        relation: String,
        key: Value,
    },

    /// Aggregate over another schema, e.g. the minimum order id
    Subquery {
        schema: String,
        func: AggregateFunc,
        column: Option<String>,
    },
}

impl Expr {
    // ==================== Constructors ====================

    /// Column (or column path) reference.
    pub fn col(path: impl Into<String>) -> Self {
        Expr::Column(path.into())
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn null() -> Self {
        Expr::Literal(Value::Null)
    }

    /// Quantifiers and counts over a collection relation.
    pub fn related(relation: impl Into<String>) -> RelatedExpr {
        RelatedExpr {
            relation: relation.into(),
        }
    }

    /// Minimum of a column across a whole schema.
    pub fn min(schema: impl Into<String>, column: impl Into<String>) -> Self {
        Self::subquery(schema, AggregateFunc::Min, Some(column.into()))
    }

    /// Maximum of a column across a whole schema.
    pub fn max(schema: impl Into<String>, column: impl Into<String>) -> Self {
        Self::subquery(schema, AggregateFunc::Max, Some(column.into()))
    }

    pub fn sum(schema: impl Into<String>, column: impl Into<String>) -> Self {
        Self::subquery(schema, AggregateFunc::Sum, Some(column.into()))
    }

    pub fn avg(schema: impl Into<String>, column: impl Into<String>) -> Self {
        Self::subquery(schema, AggregateFunc::Avg, Some(column.into()))
    }

    /// Number of rows in a schema.
    pub fn count_rows(schema: impl Into<String>) -> Self {
        Self::subquery(schema, AggregateFunc::Count, None)
    }

    fn subquery(schema: impl Into<String>, func: AggregateFunc, column: Option<String>) -> Self {
        Expr::Subquery {
            schema: schema.into(),
            func,
            column,
        }
    }

    // ==================== Comparison Operators ====================

    fn compare(self, op: CompareOp, other: impl Into<Expr>) -> Self {
        Expr::Compare {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    /// Equal to (=)
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Eq, other)
    }

    /// Not equal to (<>)
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Ne, other)
    }

    /// Less than (<)
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Lt, other)
    }

    /// Less than or equal to (<=)
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Le, other)
    }

    /// Greater than (>)
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Gt, other)
    }

    /// Greater than or equal to (>=)
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Ge, other)
    }

    // ==================== Logical Operators ====================

    /// Logical AND, flattening nested conjunctions.
    pub fn and(self, other: impl Into<Expr>) -> Self {
        let mut terms = match self {
            Expr::And(terms) => terms,
            other => vec![other],
        };
        match other.into() {
            Expr::And(more) => terms.extend(more),
            other => terms.push(other),
        }
        Expr::And(terms)
    }

    /// Logical OR, flattening nested disjunctions.
    pub fn or(self, other: impl Into<Expr>) -> Self {
        let mut terms = match self {
            Expr::Or(terms) => terms,
            other => vec![other],
        };
        match other.into() {
            Expr::Or(more) => terms.extend(more),
            other => terms.push(other),
        }
        Expr::Or(terms)
    }

    /// Logical NOT
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    // ==================== Null Checks ====================

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    // ==================== Membership ====================

    /// IN (list)
    pub fn in_list<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// NOT IN (list)
    pub fn not_in<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    // ==================== Text ====================

    fn text(self, op: TextOp, pattern: impl Into<String>) -> Self {
        Expr::Text {
            expr: Box::new(self),
            op,
            pattern: pattern.into(),
        }
    }

    pub fn contains(self, pattern: impl Into<String>) -> Self {
        self.text(TextOp::Contains, pattern)
    }

    pub fn starts_with(self, pattern: impl Into<String>) -> Self {
        self.text(TextOp::StartsWith, pattern)
    }

    pub fn ends_with(self, pattern: impl Into<String>) -> Self {
        self.text(TextOp::EndsWith, pattern)
    }

    // ==================== Functions ====================

    fn function(self, func: ScalarFunc) -> Self {
        Expr::Function {
            func,
            arg: Box::new(self),
        }
    }

    pub fn trim(self) -> Self {
        self.function(ScalarFunc::Trim)
    }

    pub fn upper(self) -> Self {
        self.function(ScalarFunc::Upper)
    }

    pub fn lower(self) -> Self {
        self.function(ScalarFunc::Lower)
    }

    pub fn length(self) -> Self {
        self.function(ScalarFunc::Length)
    }

    /// Does this expression produce a boolean?
    pub fn is_predicate(&self) -> bool {
        match self {
            Expr::Compare { .. }
            | Expr::And(_)
            | Expr::Or(_)
            | Expr::Not(_)
            | Expr::IsNull { .. }
            | Expr::In { .. }
            | Expr::Text { .. }
            | Expr::Any { .. }
            | Expr::All { .. }
            | Expr::ContainsKey { .. } => true,
            Expr::Literal(value) => matches!(value, Value::Bool(_)),
            Expr::Column(_)
            | Expr::Function { .. }
            | Expr::Count { .. }
            | Expr::Subquery { .. } => false,
        }
    }
}

/// Builder for collection-level quantifiers, see [`Expr::related`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedExpr {
    relation: String,
}

impl RelatedExpr {
    /// The collection is not empty.
    pub fn exists(self) -> Expr {
        Expr::Any {
            relation: self.relation,
            filter: None,
        }
    }

    /// Some element satisfies `filter` (evaluated against the element).
    pub fn any(self, filter: Expr) -> Expr {
        Expr::Any {
            relation: self.relation,
            filter: Some(Box::new(filter)),
        }
    }

    /// Every element satisfies `filter`.
    pub fn all(self, filter: Expr) -> Expr {
        Expr::All {
            relation: self.relation,
            filter: Box::new(filter),
        }
    }

    /// Number of elements, usable as a value.
    pub fn count(self) -> Expr {
        Expr::Count {
            relation: self.relation,
            filter: None,
        }
    }

    /// Number of elements satisfying `filter`.
    pub fn count_where(self, filter: Expr) -> Expr {
        Expr::Count {
            relation: self.relation,
            filter: Some(Box::new(filter)),
        }
    }

    /// The collection holds the element with this primary key.
    pub fn contains(self, key: impl Into<Value>) -> Expr {
        Expr::ContainsKey {
            relation: self.relation,
            key: key.into(),
        }
    }
}

// Conversion from Value to Expr
impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::BigInt(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Literal(Value::Double(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_or_flatten() {
        let e = Expr::col("a")
            .eq(1)
            .and(Expr::col("b").eq(2))
            .and(Expr::col("c").eq(3));
        match e {
            Expr::And(terms) => assert_eq!(terms.len(), 3),
            other => panic!("unexpected: {other:?}"),
        }
        let e = Expr::col("a").eq(1).or(Expr::col("b").eq(2).or(Expr::col("c").eq(3)));
        match e {
            Expr::Or(terms) => assert_eq!(terms.len(), 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn predicate_classification() {
        assert!(Expr::col("unit_price").gt(80).is_predicate());
        assert!(Expr::related("territories").exists().is_predicate());
        assert!(!Expr::related("territories").count().is_predicate());
        assert!(!Expr::col("city").is_predicate());
        assert!(Expr::lit(true).is_predicate());
        assert!(!Expr::min("orders", "order_id").is_predicate());
    }

    #[test]
    fn in_list_converts_values() {
        let e = Expr::col("product_id").in_list([1, 2, 3]);
        match e {
            Expr::In { values, negated, .. } => {
                assert!(!negated);
                assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
