//! The immutable query builder.

use crate::expr::Expr;
use crate::include::merge_path;
use crate::lower::Lowerer;
use crate::projection::{Projection, ProjectionItem};
use ormlet_core::{
    ColumnRef, Direction, Error, FetchMode, FetchRequest, JoinKind, JoinSpec, LoadingStrategy,
    Operand, OrderKey, Predicate, Registry, RelationHop, Result, Schema, ValidationError,
    ValidationErrorKind,
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct JoinClause {
    kind: JoinKind,
    schema: String,
    alias: String,
    on: Vec<(String, String)>,
}

/// A lazy, immutable description of a read over one schema.
///
/// Every builder method consumes the query and returns a new one; clone a
/// base query to derive several variants from it. Nothing touches the
/// store until a session enumerates the query.
///
/// # Example
///
/// ```ignore
/// let plan = session
///     .query("products")
///     .filter(Expr::col("category.category_name").eq("Beverages"))
///     .order_by_desc(Expr::col("unit_price"))
///     .limit(3)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    registry: Arc<Registry>,
    schema: String,
    filters: Vec<Expr>,
    joins: Vec<JoinClause>,
    order: Vec<(Expr, Direction)>,
    reversed: bool,
    group: Option<Expr>,
    includes: Vec<String>,
    projection: Option<Projection>,
    limit: Option<u64>,
    offset: Option<u64>,
    loading: Option<LoadingStrategy>,
}

impl Query {
    /// Create a query over the named schema.
    pub fn new(registry: Arc<Registry>, schema: impl Into<String>) -> Self {
        Self {
            registry,
            schema: schema.into(),
            filters: Vec::new(),
            joins: Vec::new(),
            order: Vec::new(),
            reversed: false,
            group: None,
            includes: Vec::new(),
            projection: None,
            limit: None,
            offset: None,
            loading: None,
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Add a condition; conditions are AND-combined.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filters.push(expr);
        self
    }

    /// Inner join `schema` as `alias` on (local column path, joined column) pairs.
    pub fn join(
        self,
        schema: impl Into<String>,
        alias: impl Into<String>,
        on: &[(&str, &str)],
    ) -> Self {
        self.push_join(JoinKind::Inner, schema.into(), alias.into(), on)
    }

    /// Like [`join`](Self::join), keeping base rows without a match.
    pub fn left_join(
        self,
        schema: impl Into<String>,
        alias: impl Into<String>,
        on: &[(&str, &str)],
    ) -> Self {
        self.push_join(JoinKind::Left, schema.into(), alias.into(), on)
    }

    /// Every combination of base rows with rows of `schema`; relate them with `filter`.
    pub fn cross_join(self, schema: impl Into<String>, alias: impl Into<String>) -> Self {
        self.push_join(JoinKind::Cross, schema.into(), alias.into(), &[])
    }

    fn push_join(
        mut self,
        kind: JoinKind,
        schema: String,
        alias: String,
        on: &[(&str, &str)],
    ) -> Self {
        self.joins.push(JoinClause {
            kind,
            schema,
            alias,
            on: on
                .iter()
                .map(|&(local, remote)| (local.to_string(), remote.to_string()))
                .collect(),
        });
        self
    }

    /// Group materialized results by `key` (see `Session::fetch_grouped`).
    pub fn group_by(mut self, key: Expr) -> Self {
        self.group = Some(key);
        self
    }

    /// Order ascending by `key`, replacing any previous ordering.
    pub fn order_by(mut self, key: Expr) -> Self {
        self.order = vec![(key, Direction::Asc)];
        self
    }

    /// Order descending by `key`, replacing any previous ordering.
    pub fn order_by_desc(mut self, key: Expr) -> Self {
        self.order = vec![(key, Direction::Desc)];
        self
    }

    /// Secondary ascending key.
    pub fn then_by(mut self, key: Expr) -> Self {
        self.order.push((key, Direction::Asc));
        self
    }

    /// Secondary descending key.
    pub fn then_by_desc(mut self, key: Expr) -> Self {
        self.order.push((key, Direction::Desc));
        self
    }

    /// Flip every ordering key; without keys, order by primary key descending.
    ///
    /// Ordered plans end with the primary key as a tie-breaker, so
    /// `reverse_order().limit(1)` is the last record of the ordered sequence.
    pub fn reverse_order(mut self) -> Self {
        self.reversed = !self.reversed;
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Eagerly load a relation path (e.g. `"territories.region"`).
    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.includes.push(path.into());
        self
    }

    /// Shape results with a projection (see `Session::fetch_projected`).
    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Loading strategy for records this query materializes.
    pub fn with_loading(mut self, strategy: LoadingStrategy) -> Self {
        self.loading = Some(strategy);
        self
    }

    pub fn has_projection(&self) -> bool {
        self.projection.is_some()
    }

    pub fn has_grouping(&self) -> bool {
        self.group.is_some()
    }

    /// Validate and lower the query. Performs no I/O.
    #[tracing::instrument(level = "trace", skip(self), fields(schema = %self.schema))]
    pub fn build(&self) -> Result<QueryPlan> {
        let registry = self.registry.as_ref();
        let schema = Arc::clone(registry.require(&self.schema)?);

        let mut joined: Vec<(String, Arc<Schema>)> = Vec::with_capacity(self.joins.len());
        let mut join_specs = Vec::with_capacity(self.joins.len());
        for clause in &self.joins {
            let (spec, target) = self.lower_join(&schema, &joined, clause)?;
            joined.push((clause.alias.clone(), target));
            join_specs.push(spec);
        }

        let mut store = Lowerer::new(registry, &schema, &joined);
        let mut terms = self
            .filters
            .iter()
            .map(|expr| store.predicate(expr))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let predicate = match terms.len() {
            0 => None,
            1 => terms.pop(),
            _ => Some(Predicate::And(terms)),
        };
        let order = self
            .order
            .iter()
            .map(|(key, direction)| {
                Ok(OrderKey {
                    operand: store.operand(key)?,
                    direction: *direction,
                })
            })
            .collect::<std::result::Result<Vec<_>, ValidationError>>()?;
        let order = if order.is_empty() && !self.reversed {
            order
        } else {
            let order = break_ties_by_key(order, &schema);
            if self.reversed {
                reverse_keys(order)
            } else {
                order
            }
        };

        let mut client = Lowerer::new(registry, &schema, &joined).client();
        let group_key = self
            .group
            .as_ref()
            .map(|key| client.operand(key))
            .transpose()?;
        let projection = self
            .projection
            .as_ref()
            .map(|projection| lower_projection(&mut client, &joined, projection))
            .transpose()?;

        let mut includes = Vec::new();
        for path in self.includes.iter().chain(client.into_needs().iter()) {
            merge_path(registry, &schema, &mut includes, path)?;
        }

        let request = FetchRequest {
            table: schema.name().to_string(),
            joins: join_specs,
            predicate,
            order,
            limit: self.limit,
            offset: self.offset,
            includes,
            mode: FetchMode::Rows,
        };
        tracing::trace!(plan = %request, "lowered query");

        Ok(QueryPlan {
            schema,
            joined: joined.into_iter().map(|(_, schema)| schema).collect(),
            request,
            projection,
            group_key,
            loading: self.loading,
        })
    }

    fn lower_join(
        &self,
        schema: &Arc<Schema>,
        earlier: &[(String, Arc<Schema>)],
        clause: &JoinClause,
    ) -> std::result::Result<(JoinSpec, Arc<Schema>), ValidationError> {
        if earlier.iter().any(|(alias, _)| *alias == clause.alias)
            || schema.relation(&clause.alias).is_some()
        {
            return Err(self
                .invalid(
                    ValidationErrorKind::UnknownAlias,
                    format!("join alias '{}' is already in use", clause.alias),
                )
                .at(clause.alias.as_str()));
        }
        let target = self.registry.get(&clause.schema).cloned().ok_or_else(|| {
            self.invalid(
                ValidationErrorKind::UnknownSchema,
                format!("joined schema '{}' is not registered", clause.schema),
            )
            .at(clause.schema.as_str())
        })?;
        if clause.kind != JoinKind::Cross && clause.on.is_empty() {
            return Err(self.invalid(
                ValidationErrorKind::Shape,
                format!("join '{}' needs at least one key pair", clause.alias),
            ));
        }

        let mut lowerer = Lowerer::new(&self.registry, schema, earlier);
        let mut on: Vec<(ColumnRef, String)> = Vec::with_capacity(clause.on.len());
        for (local, remote) in &clause.on {
            let (column, _) = lowerer.column(local)?;
            if target.field(remote).is_none() {
                return Err(ValidationError::new(
                    ValidationErrorKind::UnknownField,
                    target.name(),
                    format!("'{remote}' is not a field of '{}'", target.name()),
                )
                .at(format!("{}.{remote}", clause.alias)));
            }
            on.push((column, remote.clone()));
        }
        let spec = JoinSpec {
            kind: clause.kind,
            table: clause.schema.clone(),
            alias: clause.alias.clone(),
            on,
        };
        Ok((spec, target))
    }

    fn invalid(&self, kind: ValidationErrorKind, message: String) -> ValidationError {
        ValidationError::new(kind, self.schema.as_str(), message)
    }

    /// Dialect-free rendering of the lowered plan.
    pub fn describe(&self) -> Result<String> {
        Ok(self.build()?.request.to_string())
    }
}

/// Primary-key columns not already ordered on go last, ascending, so every
/// ordered plan has a total order and its reverse is an exact mirror.
fn break_ties_by_key(mut order: Vec<OrderKey>, schema: &Schema) -> Vec<OrderKey> {
    for column in schema.primary_key_names() {
        let operand = Operand::Column(ColumnRef::base(column));
        if !order.iter().any(|key| key.operand == operand) {
            order.push(OrderKey {
                operand,
                direction: Direction::Asc,
            });
        }
    }
    order
}

fn reverse_keys(order: Vec<OrderKey>) -> Vec<OrderKey> {
    order
        .into_iter()
        .map(|key| OrderKey {
            direction: match key.direction {
                Direction::Asc => Direction::Desc,
                Direction::Desc => Direction::Asc,
            },
            ..key
        })
        .collect()
}

fn lower_projection(
    lowerer: &mut Lowerer<'_>,
    joined: &[(String, Arc<Schema>)],
    projection: &Projection,
) -> std::result::Result<Vec<ProjectedColumn>, ValidationError> {
    let mut columns: Vec<ProjectedColumn> = Vec::with_capacity(projection.items().len());
    for item in projection.items() {
        if columns.iter().any(|column| column.alias() == item.alias()) {
            return Err(ValidationError::new(
                ValidationErrorKind::Shape,
                "projection",
                format!("alias '{}' is used twice", item.alias()),
            )
            .at(item.alias()));
        }
        let column = match item {
            ProjectionItem::Value { alias, expr } => ProjectedColumn::Value {
                alias: alias.clone(),
                operand: lowerer.operand(expr)?,
            },
            ProjectionItem::Record { alias, source } => {
                let join = match source {
                    None => None,
                    Some(join_alias) => Some(
                        joined
                            .iter()
                            .position(|(name, _)| name == join_alias)
                            .ok_or_else(|| {
                                ValidationError::new(
                                    ValidationErrorKind::UnknownAlias,
                                    "projection",
                                    format!("'{join_alias}' is not a join alias"),
                                )
                                .at(join_alias.as_str())
                            })?,
                    ),
                };
                ProjectedColumn::Record {
                    alias: alias.clone(),
                    join,
                }
            }
            ProjectionItem::Collection { alias, collection } => {
                let (hop, target) = lowerer.relation(&collection.relation)?;
                let filter = match &collection.filter {
                    Some(filter) => Some(lowerer.element_predicate(
                        &collection.relation,
                        target,
                        filter,
                    )?),
                    None => None,
                };
                ProjectedColumn::Collection {
                    alias: alias.clone(),
                    hop,
                    filter,
                }
            }
        };
        columns.push(column);
    }
    Ok(columns)
}

/// One lowered projection item.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectedColumn {
    Value {
        alias: String,
        operand: Operand,
    },
    /// Base record (`join == None`) or the n-th joined record.
    Record {
        alias: String,
        join: Option<usize>,
    },
    /// Related records, filtered per element after materialization.
    Collection {
        alias: String,
        hop: RelationHop,
        filter: Option<Predicate>,
    },
}

impl ProjectedColumn {
    pub fn alias(&self) -> &str {
        match self {
            ProjectedColumn::Value { alias, .. }
            | ProjectedColumn::Record { alias, .. }
            | ProjectedColumn::Collection { alias, .. } => alias,
        }
    }
}

/// A validated, lowered query.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Schema of the base rows.
    pub schema: Arc<Schema>,
    /// Schemas of joined rows, positional with `request.joins`.
    pub joined: Vec<Arc<Schema>>,
    /// What the adapter executes, include paths already merged.
    pub request: FetchRequest,
    pub projection: Option<Vec<ProjectedColumn>>,
    /// Grouping key, evaluated against materialized records.
    pub group_key: Option<Operand>,
    pub loading: Option<LoadingStrategy>,
}

impl QueryPlan {
    /// The same read answering only the number of matching rows.
    pub fn count_request(&self) -> FetchRequest {
        FetchRequest {
            includes: Vec::new(),
            order: Vec::new(),
            mode: FetchMode::Count,
            ..self.request.clone()
        }
    }

    /// Fail unless the plan enumerates plain records.
    pub fn expect_records(&self) -> Result<()> {
        if self.projection.is_some() {
            return Err(Error::Validation(ValidationError::new(
                ValidationErrorKind::Shape,
                self.schema.name(),
                "query carries a projection; enumerate it with fetch_projected",
            )));
        }
        Ok(())
    }

    /// Fail unless the plan carries a projection.
    pub fn expect_projection(&self) -> Result<&[ProjectedColumn]> {
        self.projection.as_deref().ok_or_else(|| {
            Error::Validation(ValidationError::new(
                ValidationErrorKind::Shape,
                self.schema.name(),
                "query has no projection",
            ))
        })
    }

    /// Fail unless the plan carries a grouping key.
    pub fn expect_grouping(&self) -> Result<&Operand> {
        self.group_key.as_ref().ok_or_else(|| {
            Error::Validation(ValidationError::new(
                ValidationErrorKind::Shape,
                self.schema.name(),
                "query has no grouping key",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::CollectionItem;
    use ormlet_core::{
        ColumnSource, FieldDef, LinkTable, RelationDef, SqlType, Value,
    };

    fn registry() -> Arc<Registry> {
        let regions = Schema::builder("regions")
            .field(FieldDef::new("region_id", SqlType::Integer).primary_key())
            .field(FieldDef::new("region_description", SqlType::Text))
            .relation(RelationDef::one_to_many(
                "territories",
                "territories",
                "region_id",
                "region_id",
            ))
            .build()
            .unwrap();
        let territories = Schema::builder("territories")
            .field(FieldDef::new("territory_id", SqlType::Text).primary_key())
            .field(FieldDef::new("territory_description", SqlType::Text))
            .field(FieldDef::new("region_id", SqlType::Integer))
            .relation(RelationDef::many_to_one(
                "region",
                "regions",
                "region_id",
                "region_id",
            ))
            .build()
            .unwrap();
        let employees = Schema::builder("employees")
            .field(FieldDef::new("employee_id", SqlType::Integer).primary_key().generated())
            .field(FieldDef::new("last_name", SqlType::Text))
            .field(FieldDef::new("city", SqlType::Text).nullable())
            .relation(RelationDef::many_to_many(
                "territories",
                "territories",
                "employee_id",
                LinkTable::new("employee_territories", "employee_id", "territory_id"),
                "territory_id",
            ))
            .build()
            .unwrap();
        let customers = Schema::builder("customers")
            .field(FieldDef::new("customer_id", SqlType::Text).primary_key())
            .field(FieldDef::new("city", SqlType::Text).nullable())
            .build()
            .unwrap();
        Arc::new(
            Registry::new()
                .register(regions)
                .unwrap()
                .register(territories)
                .unwrap()
                .register(employees)
                .unwrap()
                .register(customers)
                .unwrap(),
        )
    }

    fn validation_kind(result: Result<QueryPlan>) -> ValidationErrorKind {
        match result {
            Err(Error::Validation(e)) => e.kind,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn builder_is_immutable_and_composable() {
        let base = Query::new(registry(), "territories").filter(Expr::col("region_id").eq(1));
        let narrowed = base
            .clone()
            .filter(Expr::col("territory_description").starts_with("B"));
        let base_plan = base.build().unwrap();
        let narrowed_plan = narrowed.build().unwrap();
        assert!(matches!(base_plan.request.predicate, Some(Predicate::Compare { .. })));
        assert!(matches!(narrowed_plan.request.predicate, Some(Predicate::And(ref t)) if t.len() == 2));
    }

    #[test]
    fn reference_paths_lower_to_hops() {
        let plan = Query::new(registry(), "territories")
            .filter(Expr::col("region.region_description").eq("Eastern"))
            .build()
            .unwrap();
        let Some(Predicate::Compare {
            left: Operand::Column(column),
            ..
        }) = plan.request.predicate
        else {
            panic!("unexpected predicate");
        };
        assert!(matches!(column.source, ColumnSource::Path(ref hops) if hops[0].name == "region"));
        // filters run in the store, nothing to include
        assert!(plan.request.includes.is_empty());
    }

    #[test]
    fn per_element_filter_on_collection_is_rejected() {
        let query = Query::new(registry(), "regions")
            .include("territories")
            .filter(Expr::col("territories.territory_description").starts_with("B"));
        assert_eq!(validation_kind(query.build()), ValidationErrorKind::CollectionElement);

        let ordered = Query::new(registry(), "employees")
            .order_by(Expr::col("territories.territory_id"));
        assert_eq!(validation_kind(ordered.build()), ValidationErrorKind::CollectionElement);
    }

    #[test]
    fn quantifiers_reference_collection_elements() {
        let plan = Query::new(registry(), "regions")
            .filter(
                Expr::related("territories")
                    .any(Expr::col("territory_description").starts_with("B")),
            )
            .filter(Expr::related("territories").count().lt(12))
            .build()
            .unwrap();
        assert!(matches!(plan.request.predicate, Some(Predicate::And(ref t)) if t.len() == 2));

        let plan = Query::new(registry(), "employees")
            .filter(Expr::related("territories").contains("01581"))
            .build()
            .unwrap();
        assert!(matches!(plan.request.predicate, Some(Predicate::Any { .. })));
    }

    #[test]
    fn unknown_names_fail_validation() {
        let r = registry();
        assert_eq!(
            validation_kind(Query::new(r.clone(), "regions").filter(Expr::col("name").eq(1)).build()),
            ValidationErrorKind::UnknownField
        );
        assert_eq!(
            validation_kind(Query::new(r.clone(), "regions").include("countries").build()),
            ValidationErrorKind::UnknownRelation
        );
        assert_eq!(
            validation_kind(
                Query::new(r.clone(), "employees")
                    .cross_join("customers", "c")
                    .filter(Expr::col("x.city").eq(Expr::col("city")))
                    .build()
            ),
            ValidationErrorKind::UnknownAlias
        );
        assert!(matches!(
            Query::new(r, "suppliers").build(),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn expression_kinds_are_checked() {
        let r = registry();
        assert_eq!(
            validation_kind(Query::new(r.clone(), "employees").filter(Expr::col("city")).build()),
            ValidationErrorKind::ExpressionKind
        );
        assert_eq!(
            validation_kind(
                Query::new(r, "employees")
                    .order_by(Expr::col("city").eq("London"))
                    .build()
            ),
            ValidationErrorKind::ExpressionKind
        );
    }

    #[test]
    fn joins_resolve_aliases() {
        let plan = Query::new(registry(), "employees")
            .cross_join("customers", "c")
            .filter(Expr::col("c.city").eq(Expr::col("city")))
            .build()
            .unwrap();
        assert_eq!(plan.joined.len(), 1);
        assert_eq!(plan.request.joins[0].kind, JoinKind::Cross);
        let Some(Predicate::Compare {
            left: Operand::Column(left),
            ..
        }) = plan.request.predicate
        else {
            panic!("unexpected predicate");
        };
        assert_eq!(left.source, ColumnSource::Joined(0));

        let missing_keys = Query::new(registry(), "employees").join("customers", "c", &[]);
        assert!(missing_keys.build().is_err());
    }

    #[test]
    fn projections_pull_in_what_they_read() {
        let plan = Query::new(registry(), "regions")
            .project(
                Projection::new()
                    .value("region", Expr::col("region_description").trim())
                    .value("territory_count", Expr::related("territories").count())
                    .collection(
                        "b_territories",
                        CollectionItem::new("territories")
                            .filter(Expr::col("territory_description").starts_with("B")),
                    ),
            )
            .build()
            .unwrap();
        let columns = plan.expect_projection().unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(plan.request.includes.len(), 1);
        assert_eq!(plan.request.includes[0].path, "territories");
        assert!(plan.expect_records().is_err());
        assert!(plan.expect_grouping().is_err());
    }

    #[test]
    fn grouping_by_reference_path_includes_it() {
        let plan = Query::new(registry(), "territories")
            .group_by(Expr::col("region.region_description"))
            .build()
            .unwrap();
        assert!(plan.expect_grouping().is_ok());
        assert_eq!(plan.request.includes[0].path, "region");
    }

    #[test]
    fn order_then_limit_and_count_request() {
        let plan = Query::new(registry(), "employees")
            .order_by_desc(Expr::col("employee_id"))
            .then_by(Expr::col("last_name"))
            .limit(1)
            .build()
            .unwrap();
        assert_eq!(plan.request.order.len(), 2);
        assert_eq!(plan.request.order[0].direction, Direction::Desc);
        assert_eq!(plan.request.limit, Some(1));
        let count = plan.count_request();
        assert_eq!(count.mode, FetchMode::Count);
        assert!(count.order.is_empty());
    }

    #[test]
    fn reverse_order_flips_keys_or_uses_the_key() {
        let plan = Query::new(registry(), "employees")
            .reverse_order()
            .limit(1)
            .build()
            .unwrap();
        assert_eq!(plan.request.order.len(), 1);
        assert_eq!(plan.request.order[0].direction, Direction::Desc);
        assert_eq!(plan.request.order[0].operand.to_string(), "employee_id");

        let plan = Query::new(registry(), "employees")
            .order_by(Expr::col("last_name"))
            .then_by_desc(Expr::col("city"))
            .reverse_order()
            .build()
            .unwrap();
        assert_eq!(plan.request.order[0].direction, Direction::Desc);
        assert_eq!(plan.request.order[1].direction, Direction::Asc);
        assert_eq!(plan.request.order[2].operand.to_string(), "employee_id");
        assert_eq!(plan.request.order[2].direction, Direction::Desc);
    }

    #[test]
    fn ordered_plans_end_with_the_key() {
        let plan = Query::new(registry(), "employees")
            .order_by(Expr::col("city"))
            .build()
            .unwrap();
        let keys: Vec<String> = plan
            .request
            .order
            .iter()
            .map(|key| key.operand.to_string())
            .collect();
        assert_eq!(keys, vec!["city", "employee_id"]);
        assert_eq!(plan.request.order[1].direction, Direction::Asc);

        // Already ordered on the key: nothing appended.
        let plan = Query::new(registry(), "employees")
            .order_by_desc(Expr::col("employee_id"))
            .build()
            .unwrap();
        assert_eq!(plan.request.order.len(), 1);

        let plan = Query::new(registry(), "employees").build().unwrap();
        assert!(plan.request.order.is_empty());
    }

    #[test]
    fn describe_renders_the_plan() {
        let text = Query::new(registry(), "employees")
            .filter(Expr::col("last_name").eq(Value::from("Fuller")))
            .include("territories.region")
            .describe()
            .unwrap();
        assert!(text.starts_with("fetch employees"));
        assert!(text.contains("where last_name = 'Fuller'"));
        assert!(text.contains("include territories.region"));
    }
}
