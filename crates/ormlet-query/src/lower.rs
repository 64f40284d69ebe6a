//! Resolution of expression paths and lowering into plan operands.
//!
//! A [`Lowerer`] works against one schema (the query's, or a collection's
//! element schema inside a quantifier). In store mode the lowered
//! expression is evaluated by the adapter. In client mode it is evaluated
//! after materialization, so every relation it traverses is recorded as an
//! include path the fetch must bring back.

use crate::expr::Expr;
use crate::include::segments;
use ormlet_core::{
    AggregateFunc, ColumnRef, ColumnSource, CompareOp, Operand, Predicate, Registry, RelationHop,
    Schema, SqlType, ValidationError, ValidationErrorKind,
};
use std::sync::Arc;

pub(crate) struct Lowerer<'a> {
    registry: &'a Registry,
    schema: Arc<Schema>,
    joins: &'a [(String, Arc<Schema>)],
    /// Include prefix in client mode, `None` in store mode.
    prefix: Option<String>,
    needs: Vec<String>,
}

impl<'a> Lowerer<'a> {
    pub(crate) fn new(
        registry: &'a Registry,
        schema: &Arc<Schema>,
        joins: &'a [(String, Arc<Schema>)],
    ) -> Self {
        Self {
            registry,
            schema: Arc::clone(schema),
            joins,
            prefix: None,
            needs: Vec::new(),
        }
    }

    /// Evaluate against materialized records instead of the store.
    pub(crate) fn client(mut self) -> Self {
        self.prefix = Some(String::new());
        self
    }

    /// Include paths the lowered expressions rely on.
    pub(crate) fn into_needs(self) -> Vec<String> {
        self.needs
    }

    fn error(&self, kind: ValidationErrorKind, message: String) -> ValidationError {
        ValidationError::new(kind, self.schema.name(), message)
    }

    fn need(&mut self, relative: &str) {
        if let Some(prefix) = &self.prefix {
            let path = if prefix.is_empty() {
                relative.to_string()
            } else {
                format!("{prefix}.{relative}")
            };
            if !self.needs.contains(&path) {
                self.needs.push(path);
            }
        }
    }

    // ==================== Paths ====================

    /// Resolve a column path to a column reference and its declared type.
    pub(crate) fn column(&mut self, path: &str) -> Result<(ColumnRef, SqlType), ValidationError> {
        let parts = segments(path);
        let Some((&last, walk)) = parts.split_last() else {
            return Err(self
                .error(ValidationErrorKind::UnknownField, "empty column path".into())
                .at(path));
        };

        if let Some((&first, _)) = walk.split_first() {
            if let Some(index) = self.joins.iter().position(|(alias, _)| alias == first) {
                let joined = &self.joins[index].1;
                if walk.len() > 1 {
                    return Err(self
                        .error(
                            ValidationErrorKind::UnknownField,
                            format!("joined columns are addressed as '{first}.<field>'"),
                        )
                        .at(path));
                }
                let field = joined.field(last).ok_or_else(|| {
                    ValidationError::new(
                        ValidationErrorKind::UnknownField,
                        joined.name(),
                        format!("'{last}' is not a field of '{}'", joined.name()),
                    )
                    .at(path)
                })?;
                return Ok((
                    ColumnRef {
                        source: ColumnSource::Joined(index),
                        column: last.to_string(),
                    },
                    field.ty,
                ));
            }
        }

        let mut schema = Arc::clone(&self.schema);
        let mut hops = Vec::with_capacity(walk.len());
        for (i, &name) in walk.iter().enumerate() {
            let Some(relation) = schema.relation(name) else {
                let kind = if i == 0 && !self.joins.is_empty() {
                    ValidationErrorKind::UnknownAlias
                } else {
                    ValidationErrorKind::UnknownRelation
                };
                return Err(ValidationError::new(
                    kind,
                    schema.name(),
                    format!(
                        "'{name}' is neither a relation of '{}' nor a join alias",
                        schema.name()
                    ),
                )
                .at(path));
            };
            if relation.is_collection() {
                return Err(ValidationError::new(
                    ValidationErrorKind::CollectionElement,
                    schema.name(),
                    format!(
                        "'{name}' is a collection; its elements can only be referenced through \
                         related(\"{name}\").any/all/count/contains or a filtered projected collection"
                    ),
                )
                .at(path));
            }
            hops.push(RelationHop::from_relation(relation));
            schema = self.target(&schema, &relation.target, path)?;
        }

        let field = schema.field(last).ok_or_else(|| {
            ValidationError::new(
                ValidationErrorKind::UnknownField,
                schema.name(),
                format!("'{last}' is not a field of '{}'", schema.name()),
            )
            .at(path)
        })?;
        let ty = field.ty;

        if hops.is_empty() {
            return Ok((ColumnRef::base(last), ty));
        }
        self.need(&walk.join("."));
        Ok((
            ColumnRef {
                source: ColumnSource::Path(hops),
                column: last.to_string(),
            },
            ty,
        ))
    }

    fn target(
        &self,
        owner: &Schema,
        name: &str,
        path: &str,
    ) -> Result<Arc<Schema>, ValidationError> {
        self.registry.get(name).cloned().ok_or_else(|| {
            ValidationError::new(
                ValidationErrorKind::UnknownSchema,
                owner.name(),
                format!("relation target '{name}' is not registered"),
            )
            .at(path)
        })
    }

    /// Resolve a relation of the current schema for a quantifier.
    pub(crate) fn relation(
        &mut self,
        name: &str,
    ) -> Result<(RelationHop, Arc<Schema>), ValidationError> {
        let relation = self.schema.relation(name).ok_or_else(|| {
            self.error(
                ValidationErrorKind::UnknownRelation,
                format!("'{name}' is not a relation of '{}'", self.schema.name()),
            )
            .at(name)
        })?;
        let hop = RelationHop::from_relation(relation);
        let target = self.target(&self.schema, &relation.target, name)?;
        self.need(name);
        Ok((hop, target))
    }

    /// A lowerer for the element schema of `relation`.
    fn nested(&self, relation: &str, target: Arc<Schema>) -> Lowerer<'a> {
        Lowerer {
            registry: self.registry,
            schema: target,
            joins: &[],
            prefix: self.prefix.as_ref().map(|prefix| {
                if prefix.is_empty() {
                    relation.to_string()
                } else {
                    format!("{prefix}.{relation}")
                }
            }),
            needs: Vec::new(),
        }
    }

    /// Lower a filter evaluated per element of `relation`.
    pub(crate) fn element_predicate(
        &mut self,
        relation: &str,
        target: Arc<Schema>,
        expr: &Expr,
    ) -> Result<Predicate, ValidationError> {
        let mut nested = self.nested(relation, target);
        let predicate = nested.predicate(expr)?;
        for path in nested.needs {
            if !self.needs.contains(&path) {
                self.needs.push(path);
            }
        }
        Ok(predicate)
    }

    // ==================== Expressions ====================

    /// Lower an expression in value position.
    pub(crate) fn operand(&mut self, expr: &Expr) -> Result<Operand, ValidationError> {
        match expr {
            Expr::Column(path) => Ok(Operand::Column(self.column(path)?.0)),
            Expr::Literal(value) => Ok(Operand::Literal(value.clone())),
            Expr::Function { func, arg } => Ok(Operand::Function {
                func: *func,
                arg: Box::new(self.operand(arg)?),
            }),
            Expr::Count { relation, filter } => {
                let (hop, target) = self.relation(relation)?;
                let filter = match filter {
                    Some(filter) => Some(Box::new(self.element_predicate(relation, target, filter)?)),
                    None => None,
                };
                Ok(Operand::RelatedCount { hop, filter })
            }
            Expr::Subquery {
                schema,
                func,
                column,
            } if self.prefix.is_none() => self.subquery(schema, *func, column.as_deref()),
            Expr::Subquery { schema, .. } => Err(self
                .error(
                    ValidationErrorKind::Shape,
                    format!("aggregates over '{schema}' can only be used in filters and ordering"),
                )
                .at(schema.as_str())),
            other => Err(self.error(
                ValidationErrorKind::ExpressionKind,
                format!("boolean expression used as a value: {other:?}"),
            )),
        }
    }

    fn subquery(
        &self,
        schema: &str,
        func: AggregateFunc,
        column: Option<&str>,
    ) -> Result<Operand, ValidationError> {
        let target = self.registry.get(schema).ok_or_else(|| {
            self.error(
                ValidationErrorKind::UnknownSchema,
                format!("schema '{schema}' is not registered"),
            )
            .at(schema)
        })?;
        match column {
            Some(column) if target.field(column).is_none() => {
                return Err(ValidationError::new(
                    ValidationErrorKind::UnknownField,
                    target.name(),
                    format!("'{column}' is not a field of '{schema}'"),
                )
                .at(column));
            }
            None if func != AggregateFunc::Count => {
                return Err(self.error(
                    ValidationErrorKind::Shape,
                    format!("{func:?} over '{schema}' needs a column"),
                ));
            }
            _ => {}
        }
        Ok(Operand::Subquery {
            table: schema.to_string(),
            func,
            column: column.map(str::to_string),
        })
    }

    /// Lower an expression in predicate position.
    pub(crate) fn predicate(&mut self, expr: &Expr) -> Result<Predicate, ValidationError> {
        match expr {
            Expr::Compare { left, op, right } => Ok(Predicate::Compare {
                left: self.operand(left)?,
                op: *op,
                right: self.operand(right)?,
            }),
            Expr::And(terms) => Ok(Predicate::And(
                terms
                    .iter()
                    .map(|term| self.predicate(term))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Or(terms) => Ok(Predicate::Or(
                terms
                    .iter()
                    .map(|term| self.predicate(term))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Not(inner) => Ok(Predicate::Not(Box::new(self.predicate(inner)?))),
            Expr::IsNull { expr, negated } => Ok(Predicate::IsNull {
                operand: self.operand(expr)?,
                negated: *negated,
            }),
            Expr::In {
                expr,
                values,
                negated,
            } => Ok(Predicate::In {
                operand: self.operand(expr)?,
                values: values.clone(),
                negated: *negated,
            }),
            Expr::Text { expr, op, pattern } => Ok(Predicate::Text {
                operand: self.operand(expr)?,
                op: *op,
                pattern: pattern.clone(),
            }),
            Expr::Any { relation, filter } => {
                let (hop, target) = self.relation(relation)?;
                let filter = match filter {
                    Some(filter) => Some(Box::new(self.element_predicate(relation, target, filter)?)),
                    None => None,
                };
                Ok(Predicate::Any { hop, filter })
            }
            Expr::All { relation, filter } => {
                let (hop, target) = self.relation(relation)?;
                let filter = Box::new(self.element_predicate(relation, target, filter)?);
                Ok(Predicate::All { hop, filter })
            }
            Expr::ContainsKey { relation, key } => {
                let (hop, target) = self.relation(relation)?;
                let [pk] = target.primary_key_names()[..] else {
                    return Err(self
                        .error(
                            ValidationErrorKind::Shape,
                            format!("'{relation}' elements have a composite key"),
                        )
                        .at(relation.as_str()));
                };
                let filter = Predicate::Compare {
                    left: Operand::Column(ColumnRef::base(pk)),
                    op: CompareOp::Eq,
                    right: Operand::Literal(key.clone()),
                };
                Ok(Predicate::Any {
                    hop,
                    filter: Some(Box::new(filter)),
                })
            }
            Expr::Literal(value) if expr.is_predicate() => {
                Ok(Predicate::Truthy(Operand::Literal(value.clone())))
            }
            Expr::Column(path) => {
                let (column, ty) = self.column(path)?;
                if ty == SqlType::Boolean {
                    Ok(Predicate::Truthy(Operand::Column(column)))
                } else {
                    Err(self
                        .error(
                            ValidationErrorKind::ExpressionKind,
                            format!("{} column used as a predicate", ty.name()),
                        )
                        .at(path.as_str()))
                }
            }
            other => Err(self.error(
                ValidationErrorKind::ExpressionKind,
                format!("value expression used as a predicate: {other:?}"),
            )),
        }
    }
}
