//! Evaluation of lowered predicates and operands.
//!
//! Evaluation is generic over a [`Scope`], which knows how to read a column
//! and how to follow a relation from "the current row". Store adapters
//! implement it over their stored rows; the session implements it over
//! materialized records for projections, grouping and collection filters.
//!
//! Predicates use SQL three-valued logic: comparisons against NULL are
//! unknown, and a row matches only when its predicate is known true.

use crate::plan::{
    AggregateFunc, ColumnRef, CompareOp, Direction, Operand, OrderKey, Predicate, RelationHop,
    ScalarFunc, TextOp,
};
use crate::value::Value;
use std::cmp::Ordering;

/// The row an expression is evaluated against.
pub trait Scope: Sized {
    /// Value of a column, NULL when it cannot be resolved.
    fn column(&self, column: &ColumnRef) -> Value;

    /// Scopes for the rows reachable through `hop`.
    fn related(&self, hop: &RelationHop) -> Vec<Self>;

    /// Aggregate over a whole table, NULL when the scope cannot see tables.
    fn subquery(&self, table: &str, func: AggregateFunc, column: Option<&str>) -> Value;
}

impl Operand {
    pub fn evaluate<S: Scope>(&self, scope: &S) -> Value {
        match self {
            Operand::Column(column) => scope.column(column),
            Operand::Literal(value) => value.clone(),
            Operand::Function { func, arg } => apply_function(*func, arg.evaluate(scope)),
            Operand::RelatedCount { hop, filter } => {
                let related = scope.related(hop);
                let count = match filter {
                    Some(filter) => related.iter().filter(|s| filter.matches(*s)).count(),
                    None => related.len(),
                };
                Value::BigInt(i64::try_from(count).unwrap_or(i64::MAX))
            }
            Operand::Subquery {
                table,
                func,
                column,
            } => scope.subquery(table, *func, column.as_deref()),
        }
    }
}

fn apply_function(func: ScalarFunc, value: Value) -> Value {
    let Value::Text(text) = value else {
        return Value::Null;
    };
    match func {
        ScalarFunc::Trim => Value::Text(text.trim().to_string()),
        ScalarFunc::Upper => Value::Text(text.to_uppercase()),
        ScalarFunc::Lower => Value::Text(text.to_lowercase()),
        ScalarFunc::Length => Value::BigInt(i64::try_from(text.chars().count()).unwrap_or(i64::MAX)),
    }
}

impl Predicate {
    /// Does the scope satisfy the predicate (known true)?
    pub fn matches<S: Scope>(&self, scope: &S) -> bool {
        self.evaluate(scope) == Some(true)
    }

    /// Three-valued evaluation; `None` is unknown.
    pub fn evaluate<S: Scope>(&self, scope: &S) -> Option<bool> {
        match self {
            Predicate::Compare { left, op, right } => {
                let ordering = left.evaluate(scope).compare(&right.evaluate(scope))?;
                Some(match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::Ne => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::Le => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::Ge => ordering != Ordering::Less,
                })
            }
            Predicate::In {
                operand,
                values,
                negated,
            } => {
                let value = operand.evaluate(scope);
                if value.is_null() {
                    return None;
                }
                let found = values.iter().any(|candidate| value.sql_eq(candidate));
                Some(found != *negated)
            }
            Predicate::Text {
                operand,
                op,
                pattern,
            } => match operand.evaluate(scope) {
                Value::Null => None,
                Value::Text(text) => Some(match op {
                    TextOp::Contains => text.contains(pattern.as_str()),
                    TextOp::StartsWith => text.starts_with(pattern.as_str()),
                    TextOp::EndsWith => text.ends_with(pattern.as_str()),
                }),
                _ => Some(false),
            },
            Predicate::IsNull { operand, negated } => {
                Some(operand.evaluate(scope).is_null() != *negated)
            }
            Predicate::Truthy(operand) => operand.evaluate(scope).as_bool(),
            Predicate::Any { hop, filter } => {
                let related = scope.related(hop);
                Some(match filter {
                    Some(filter) => related.iter().any(|s| filter.matches(s)),
                    None => !related.is_empty(),
                })
            }
            Predicate::All { hop, filter } => {
                Some(scope.related(hop).iter().all(|s| filter.matches(s)))
            }
            Predicate::And(terms) => {
                let mut unknown = false;
                for term in terms {
                    match term.evaluate(scope) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown { None } else { Some(true) }
            }
            Predicate::Or(terms) => {
                let mut unknown = false;
                for term in terms {
                    match term.evaluate(scope) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown { None } else { Some(false) }
            }
            Predicate::Not(inner) => inner.evaluate(scope).map(|b| !b),
        }
    }
}

/// Compare two scopes by a list of ordering keys (NULLs sort first).
pub fn order_cmp<S: Scope>(keys: &[OrderKey], a: &S, b: &S) -> Ordering {
    for key in keys {
        let ordering = key.operand.evaluate(a).sort_cmp(&key.operand.evaluate(b));
        let ordering = match key.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Fold column values with an aggregate function.
///
/// NULLs are ignored. `Count` counts non-NULL values; callers counting rows
/// pass a non-NULL marker per row. `Sum` and `Avg` yield `Double` unless
/// every input is an integer.
pub fn aggregate(values: impl IntoIterator<Item = Value>, func: AggregateFunc) -> Value {
    let values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    match func {
        AggregateFunc::Count => Value::BigInt(i64::try_from(values.len()).unwrap_or(i64::MAX)),
        AggregateFunc::Min => values
            .into_iter()
            .min_by(|a, b| a.sort_cmp(b))
            .unwrap_or(Value::Null),
        AggregateFunc::Max => values
            .into_iter()
            .max_by(|a, b| a.sort_cmp(b))
            .unwrap_or(Value::Null),
        AggregateFunc::Sum | AggregateFunc::Avg => {
            if values.is_empty() {
                return Value::Null;
            }
            let all_integers = values.iter().all(|v| v.as_i64().is_some());
            if all_integers && func == AggregateFunc::Sum {
                return Value::BigInt(values.iter().filter_map(Value::as_i64).sum());
            }
            let total: f64 = values.iter().filter_map(Value::as_f64).sum();
            if func == AggregateFunc::Sum {
                Value::Double(total)
            } else {
                Value::Double(total / values.len() as f64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ColumnSource;
    use crate::row::Row;

    /// A scope over one row with an in-memory list of children.
    struct TestScope {
        row: Row,
        children: Vec<Row>,
    }

    impl Scope for TestScope {
        fn column(&self, column: &ColumnRef) -> Value {
            match column.source {
                ColumnSource::Base => self
                    .row
                    .get_by_name(&column.column)
                    .cloned()
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }

        fn related(&self, _hop: &RelationHop) -> Vec<Self> {
            self.children
                .iter()
                .map(|row| TestScope {
                    row: row.clone(),
                    children: Vec::new(),
                })
                .collect()
        }

        fn subquery(&self, _table: &str, _func: AggregateFunc, _column: Option<&str>) -> Value {
            Value::Int(10248)
        }
    }

    fn hop() -> RelationHop {
        RelationHop {
            name: "territories".into(),
            table: "territories".into(),
            local_key: "region_id".into(),
            remote_key: "region_id".into(),
            link: None,
            collection: true,
        }
    }

    fn territory(name: &str) -> Row {
        Row::new(vec!["territory_description".into()], vec![Value::Text(name.into())])
    }

    fn region() -> TestScope {
        TestScope {
            row: Row::new(
                vec!["region_id".into(), "region_description".into(), "note".into()],
                vec![Value::Int(3), Value::Text("Northern".into()), Value::Null],
            ),
            children: vec![territory("Atlanta"), territory("Savannah"), territory("Austin")],
        }
    }

    fn col(name: &str) -> Operand {
        Operand::Column(ColumnRef::base(name))
    }

    #[test]
    fn comparisons_against_null_are_unknown() {
        let p = Predicate::Compare {
            left: col("note"),
            op: CompareOp::Eq,
            right: Operand::Literal(Value::Text("x".into())),
        };
        assert_eq!(p.evaluate(&region()), None);
        assert!(!Predicate::Not(Box::new(p)).matches(&region()));
    }

    #[test]
    fn quantifiers_over_related_rows() {
        let starts_with_a = Predicate::Text {
            operand: col("territory_description"),
            op: TextOp::StartsWith,
            pattern: "A".into(),
        };
        let any = Predicate::Any {
            hop: hop(),
            filter: Some(Box::new(starts_with_a.clone())),
        };
        let all = Predicate::All {
            hop: hop(),
            filter: Box::new(starts_with_a),
        };
        assert!(any.matches(&region()));
        assert!(!all.matches(&region()));

        let fewer_than_12 = Predicate::Compare {
            left: Operand::RelatedCount {
                hop: hop(),
                filter: None,
            },
            op: CompareOp::Lt,
            right: Operand::Literal(Value::Int(12)),
        };
        assert!(fewer_than_12.matches(&region()));
    }

    #[test]
    fn kleene_and_or() {
        let unknown = Predicate::IsNull {
            operand: col("note"),
            negated: true,
        };
        let unknown_cmp = Predicate::Compare {
            left: col("note"),
            op: CompareOp::Eq,
            right: Operand::Literal(Value::Int(1)),
        };
        let is_true = Predicate::In {
            operand: col("region_id"),
            values: vec![Value::Int(1), Value::BigInt(3)],
            negated: false,
        };
        assert_eq!(
            Predicate::Or(vec![unknown_cmp.clone(), is_true.clone()]).evaluate(&region()),
            Some(true)
        );
        assert_eq!(
            Predicate::And(vec![unknown_cmp, is_true]).evaluate(&region()),
            None
        );
        assert_eq!(unknown.evaluate(&region()), Some(false));
    }

    #[test]
    fn functions_and_subqueries() {
        let trimmed = Operand::Function {
            func: ScalarFunc::Trim,
            arg: Box::new(Operand::Literal(Value::Text(" Boston  ".into()))),
        };
        assert_eq!(trimmed.evaluate(&region()), Value::Text("Boston".into()));
        let sub = Operand::Subquery {
            table: "orders".into(),
            func: AggregateFunc::Min,
            column: Some("order_id".into()),
        };
        assert_eq!(sub.evaluate(&region()), Value::Int(10248));
    }

    #[test]
    fn aggregates_skip_nulls() {
        let values = vec![Value::Int(3), Value::Null, Value::Decimal("4.5".into())];
        assert_eq!(aggregate(values.clone(), AggregateFunc::Count), Value::BigInt(2));
        assert_eq!(aggregate(values.clone(), AggregateFunc::Min), Value::Int(3));
        assert_eq!(aggregate(values, AggregateFunc::Sum), Value::Double(7.5));
        assert_eq!(aggregate(Vec::new(), AggregateFunc::Max), Value::Null);
    }
}
