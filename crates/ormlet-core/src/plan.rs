//! Dialect-neutral requests exchanged with the store adapter.
//!
//! Queries are lowered into these types before enumeration. Column paths
//! are already resolved against the registry, so an adapter needs no schema
//! knowledge to evaluate a [`FetchRequest`]: every relation traversal is
//! spelled out as a [`RelationHop`].

use crate::row::Row;
use crate::schema::RelationDef;
use crate::value::Value;
use std::fmt;

/// One step along a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationHop {
    /// Relation name on the owning schema.
    pub name: String,
    /// Target table.
    pub table: String,
    /// Column on the owning row.
    pub local_key: String,
    /// Column on the target row.
    pub remote_key: String,
    pub link: Option<LinkHop>,
    pub collection: bool,
}

/// Link table traversal for many-to-many hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHop {
    pub table: String,
    pub local_column: String,
    pub remote_column: String,
}

impl RelationHop {
    pub fn from_relation(relation: &RelationDef) -> Self {
        Self {
            name: relation.name.clone(),
            table: relation.target.clone(),
            local_key: relation.local_key.clone(),
            remote_key: relation.remote_key.clone(),
            link: relation.link.as_ref().map(|link| LinkHop {
                table: link.table.clone(),
                local_column: link.local_column.clone(),
                remote_column: link.remote_column.clone(),
            }),
            collection: relation.is_collection(),
        }
    }
}

/// Where a column value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// The row being evaluated.
    Base,
    /// The n-th joined row.
    Joined(usize),
    /// Follow to-one hops from the row being evaluated.
    Path(Vec<RelationHop>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub source: ColumnSource,
    pub column: String,
}

impl ColumnRef {
    pub fn base(column: impl Into<String>) -> Self {
        Self {
            source: ColumnSource::Base,
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunc {
    Trim,
    Upper,
    Lower,
    Length,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Min,
    Max,
    Sum,
    Avg,
}

/// A value-producing expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Literal(Value),
    Function {
        func: ScalarFunc,
        arg: Box<Operand>,
    },
    /// Number of related rows, optionally filtered.
    RelatedCount {
        hop: RelationHop,
        filter: Option<Box<Predicate>>,
    },
    /// Aggregate over a whole table, independent of the current row.
    Subquery {
        table: String,
        func: AggregateFunc,
        column: Option<String>,
    },
}

/// A boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    In {
        operand: Operand,
        values: Vec<Value>,
        negated: bool,
    },
    Text {
        operand: Operand,
        op: TextOp,
        pattern: String,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    /// A boolean-valued operand.
    Truthy(Operand),
    /// Some related row satisfies the filter (or exists, without one).
    Any {
        hop: RelationHop,
        filter: Option<Box<Predicate>>,
    },
    /// Every related row satisfies the filter.
    All {
        hop: RelationHop,
        filter: Box<Predicate>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub operand: Operand,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

/// A joined table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    /// (column on the existing rows, column on the joined table)
    pub on: Vec<(ColumnRef, String)>,
}

/// A relation to fetch alongside the rows that own it.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeSpec {
    /// Dotted path from the base table ("territories.region").
    pub path: String,
    pub hop: RelationHop,
    pub nested: Vec<IncludeSpec>,
}

impl IncludeSpec {
    /// Visit this spec and every nested one, parents first.
    pub fn walk<'a>(&'a self, out: &mut Vec<&'a IncludeSpec>) {
        out.push(self);
        for child in &self.nested {
            child.walk(out);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// Return the rows.
    #[default]
    Rows,
    /// Return only the number of matching rows.
    Count,
}

/// A complete read request over one base table.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub table: String,
    pub joins: Vec<JoinSpec>,
    pub predicate: Option<Predicate>,
    pub order: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub includes: Vec<IncludeSpec>,
    pub mode: FetchMode,
}

impl FetchRequest {
    /// Plain scan of a table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            joins: Vec::new(),
            predicate: None,
            order: Vec::new(),
            limit: None,
            offset: None,
            includes: Vec::new(),
            mode: FetchMode::Rows,
        }
    }

    /// Rows of `table` whose key columns equal `key`.
    pub fn by_key(table: impl Into<String>, key: &[(String, Value)]) -> Self {
        let mut request = Self::table(table);
        let terms: Vec<Predicate> = key
            .iter()
            .map(|(column, value)| Predicate::Compare {
                left: Operand::Column(ColumnRef::base(column.clone())),
                op: CompareOp::Eq,
                right: Operand::Literal(value.clone()),
            })
            .collect();
        request.predicate = Some(Predicate::And(terms));
        request
    }

    /// Every include spec, parents before children.
    pub fn all_includes(&self) -> Vec<&IncludeSpec> {
        let mut out = Vec::new();
        for include in &self.includes {
            include.walk(&mut out);
        }
        out
    }
}

/// One base row with the rows joined to it (positionally, per `JoinSpec`).
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub base: Row,
    pub joined: Vec<Option<Row>>,
}

/// Related rows fetched for one include path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncludedRows {
    pub path: String,
    /// Distinct target rows.
    pub rows: Vec<Row>,
    /// Link pairs (owner local key, target remote key) for many-to-many.
    pub links: Vec<(Value, Value)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub rows: Vec<ResultRow>,
    pub included: Vec<IncludedRows>,
    /// Set for `FetchMode::Count`.
    pub count: Option<u64>,
}

impl FetchResult {
    pub fn included(&self, path: &str) -> Option<&IncludedRows> {
        self.included.iter().find(|set| set.path == path)
    }
}

/// A single write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        table: String,
        values: Vec<(String, Value)>,
        /// Columns the store must generate and report back.
        generated: Vec<String>,
    },
    Update {
        table: String,
        key: Vec<(String, Value)>,
        changes: Vec<(String, Value)>,
    },
    Delete {
        table: String,
        key: Vec<(String, Value)>,
    },
}

impl WriteOp {
    pub fn table(&self) -> &str {
        match self {
            WriteOp::Insert { table, .. }
            | WriteOp::Update { table, .. }
            | WriteOp::Delete { table, .. } => table,
        }
    }
}

/// Writes applied in one transaction, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Outcome of a committed batch, positional with `WriteBatch::ops`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    /// Generated (column, value) pairs; empty for updates and deletes.
    pub generated: Vec<Vec<(String, Value)>>,
    pub affected: Vec<u64>,
}

/// A routine invocation, already checked against its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineCall {
    pub name: String,
    pub params: Vec<Value>,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(column) => match &column.source {
                ColumnSource::Base => write!(f, "{}", column.column),
                ColumnSource::Joined(i) => write!(f, "join#{}.{}", i, column.column),
                ColumnSource::Path(hops) => {
                    for hop in hops {
                        write!(f, "{}.", hop.name)?;
                    }
                    write!(f, "{}", column.column)
                }
            },
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::Function { func, arg } => write!(f, "{func:?}({arg})"),
            Operand::RelatedCount { hop, filter } => match filter {
                Some(filter) => write!(f, "count({} where {})", hop.name, filter),
                None => write!(f, "count({})", hop.name),
            },
            Operand::Subquery {
                table,
                func,
                column,
            } => write!(
                f,
                "({:?} {} of {})",
                func,
                column.as_deref().unwrap_or("*"),
                table
            ),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { left, op, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Predicate::In {
                operand,
                values,
                negated,
            } => {
                let items: Vec<String> = values.iter().map(ToString::to_string).collect();
                let not = if *negated { "not " } else { "" };
                write!(f, "{} {}in ({})", operand, not, items.join(", "))
            }
            Predicate::Text {
                operand,
                op,
                pattern,
            } => write!(f, "{operand} {op:?} '{pattern}'"),
            Predicate::IsNull { operand, negated } => {
                if *negated {
                    write!(f, "{operand} is not null")
                } else {
                    write!(f, "{operand} is null")
                }
            }
            Predicate::Truthy(operand) => write!(f, "{operand}"),
            Predicate::Any { hop, filter } => match filter {
                Some(filter) => write!(f, "any {} ({})", hop.name, filter),
                None => write!(f, "any {}", hop.name),
            },
            Predicate::All { hop, filter } => write!(f, "all {} ({})", hop.name, filter),
            Predicate::And(terms) => write_joined(f, terms, " and "),
            Predicate::Or(terms) => write_joined(f, terms, " or "),
            Predicate::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[Predicate], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{term}")?;
    }
    write!(f, ")")
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            FetchMode::Rows => write!(f, "fetch {}", self.table)?,
            FetchMode::Count => write!(f, "count {}", self.table)?,
        }
        for join in &self.joins {
            write!(f, "\n  {:?} join {} as {}", join.kind, join.table, join.alias)?;
            for (left, right) in &join.on {
                write!(
                    f,
                    " on {} = {}.{}",
                    Operand::Column(left.clone()),
                    join.alias,
                    right
                )?;
            }
        }
        if let Some(predicate) = &self.predicate {
            write!(f, "\n  where {predicate}")?;
        }
        if !self.order.is_empty() {
            let keys: Vec<String> = self
                .order
                .iter()
                .map(|key| format!("{} {:?}", key.operand, key.direction))
                .collect();
            write!(f, "\n  order by {}", keys.join(", "))?;
        }
        if let Some(offset) = self.offset {
            write!(f, "\n  offset {offset}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, "\n  limit {limit}")?;
        }
        for include in self.all_includes() {
            write!(f, "\n  include {}", include.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LinkTable;

    #[test]
    fn hop_from_many_to_many_relation() {
        let relation = RelationDef::many_to_many(
            "territories",
            "territories",
            "employee_id",
            LinkTable::new("employee_territories", "employee_id", "territory_id"),
            "territory_id",
        );
        let hop = RelationHop::from_relation(&relation);
        assert!(hop.collection);
        assert_eq!(
            hop.link.as_ref().map(|l| l.table.as_str()),
            Some("employee_territories")
        );
    }

    #[test]
    fn by_key_request_renders() {
        let request = FetchRequest::by_key(
            "shippers",
            &[("shipper_id".to_string(), Value::Int(4))],
        );
        assert_eq!(request.to_string(), "fetch shippers\n  where (shipper_id = 4)");
    }
}
