//! Evaluation of fetch requests over stored tables.
//!
//! A request is answered in one pass: base rows are joined, filtered,
//! ordered and sliced, then every include path is resolved against the
//! surviving rows, level by level.

use crate::table::TableSet;
use ormlet_core::{
    AbortSignal, AggregateFunc, ColumnRef, ColumnSource, Error, FetchMode, FetchRequest,
    FetchResult, IncludeSpec, IncludedRows, JoinKind, JoinSpec, RelationHop, Result, ResultRow,
    Row, Scope, Value, aggregate, order_cmp,
};

/// Polls the abort signal while rows are scanned.
pub(crate) struct Interrupt<'a> {
    pub(crate) signal: &'a AbortSignal,
    pub(crate) every: usize,
}

impl Interrupt<'_> {
    #[allow(clippy::result_large_err)]
    fn check(&self) -> Result<()> {
        if self.signal.is_raised() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn poll(&self, scanned: usize) -> Result<()> {
        if scanned % self.every.max(1) == 0 {
            self.check()?;
        }
        Ok(())
    }
}

/// A stored row (plus its joined rows) as an evaluation scope.
pub(crate) struct StoredScope<'a> {
    tables: &'a TableSet,
    row: &'a Row,
    joined: Vec<Option<&'a Row>>,
}

impl<'a> StoredScope<'a> {
    fn new(tables: &'a TableSet, row: &'a Row) -> Self {
        Self {
            tables,
            row,
            joined: Vec::new(),
        }
    }

    fn result_row(&self) -> ResultRow {
        ResultRow {
            base: self.row.clone(),
            joined: self.joined.iter().map(|row| row.cloned()).collect(),
        }
    }
}

/// Rows reachable from `row` through `hop`, in target table order.
pub(crate) fn related_rows<'a>(tables: &'a TableSet, row: &Row, hop: &RelationHop) -> Vec<&'a Row> {
    let Some(local) = row.get_by_name(&hop.local_key).filter(|v| !v.is_null()) else {
        return Vec::new();
    };
    let remote_keys: Vec<&Value> = match &hop.link {
        Some(link) => tables
            .rows(&link.table)
            .iter()
            .filter(|pair| {
                pair.get_by_name(&link.local_column)
                    .is_some_and(|v| v.sql_eq(local))
            })
            .filter_map(|pair| pair.get_by_name(&link.remote_column))
            .collect(),
        None => vec![local],
    };
    tables
        .rows(&hop.table)
        .iter()
        .filter(|target| {
            target
                .get_by_name(&hop.remote_key)
                .is_some_and(|remote| remote_keys.iter().any(|key| remote.sql_eq(key)))
        })
        .collect()
}

impl Scope for StoredScope<'_> {
    fn column(&self, column: &ColumnRef) -> Value {
        let row = match &column.source {
            ColumnSource::Base => Some(self.row),
            ColumnSource::Joined(index) => self.joined.get(*index).copied().flatten(),
            ColumnSource::Path(hops) => hops.iter().try_fold(self.row, |current, hop| {
                related_rows(self.tables, current, hop).into_iter().next()
            }),
        };
        row.and_then(|row| row.get_by_name(&column.column))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn related(&self, hop: &RelationHop) -> Vec<Self> {
        related_rows(self.tables, self.row, hop)
            .into_iter()
            .map(|row| StoredScope::new(self.tables, row))
            .collect()
    }

    fn subquery(&self, table: &str, func: AggregateFunc, column: Option<&str>) -> Value {
        let rows = self.tables.rows(table);
        match column {
            Some(column) => aggregate(
                rows.iter()
                    .map(|row| row.get_by_name(column).cloned().unwrap_or(Value::Null)),
                func,
            ),
            None => aggregate(rows.iter().map(|_| Value::Int(1)), func),
        }
    }
}

/// Extend every row combination with the rows of one joined table.
#[allow(clippy::result_large_err)]
fn join<'a>(
    tables: &'a TableSet,
    combos: Vec<StoredScope<'a>>,
    spec: &JoinSpec,
) -> Result<Vec<StoredScope<'a>>> {
    let candidates = tables.table(&spec.table)?.rows();
    let mut out = Vec::with_capacity(combos.len());
    for combo in combos {
        let keys: Vec<(Value, &str)> = spec
            .on
            .iter()
            .map(|(left, right)| (combo.column(left), right.as_str()))
            .collect();
        let mut matched = false;
        for candidate in candidates {
            let hit = spec.kind == JoinKind::Cross
                || keys.iter().all(|(value, column)| {
                    !value.is_null()
                        && candidate
                            .get_by_name(column)
                            .is_some_and(|stored| stored.sql_eq(value))
                });
            if hit {
                matched = true;
                let mut joined = combo.joined.clone();
                joined.push(Some(candidate));
                out.push(StoredScope {
                    tables,
                    row: combo.row,
                    joined,
                });
            }
        }
        if !matched && spec.kind == JoinKind::Left {
            let mut joined = combo.joined;
            joined.push(None);
            out.push(StoredScope {
                tables,
                row: combo.row,
                joined,
            });
        }
    }
    Ok(out)
}

/// Collect the rows of one include path and recurse into nested paths.
#[allow(clippy::result_large_err)]
fn include<'a>(
    tables: &'a TableSet,
    spec: &IncludeSpec,
    owners: &[&'a Row],
    out: &mut Vec<IncludedRows>,
) -> Result<()> {
    tables.table(&spec.hop.table)?;
    let mut targets: Vec<&'a Row> = Vec::new();
    let mut links: Vec<(Value, Value)> = Vec::new();
    for owner in owners {
        if let (Some(link), Some(local)) = (&spec.hop.link, owner.get_by_name(&spec.hop.local_key))
        {
            for pair in tables.rows(&link.table) {
                let (Some(left), Some(right)) = (
                    pair.get_by_name(&link.local_column),
                    pair.get_by_name(&link.remote_column),
                ) else {
                    continue;
                };
                if left.sql_eq(local) && !links.iter().any(|(l, r)| l == left && r == right) {
                    links.push((left.clone(), right.clone()));
                }
            }
        }
        for target in related_rows(tables, owner, &spec.hop) {
            if !targets.iter().any(|seen| std::ptr::eq(*seen, target)) {
                targets.push(target);
            }
        }
    }
    out.push(IncludedRows {
        path: spec.path.clone(),
        rows: targets.iter().map(|row| (*row).clone()).collect(),
        links,
    });
    for nested in &spec.nested {
        include(tables, nested, &targets, out)?;
    }
    Ok(())
}

/// Answer a fetch request.
#[allow(clippy::result_large_err)]
pub(crate) fn fetch(
    tables: &TableSet,
    request: &FetchRequest,
    interrupt: &Interrupt<'_>,
) -> Result<FetchResult> {
    interrupt.check()?;
    let mut combos: Vec<StoredScope<'_>> = tables
        .table(&request.table)?
        .rows()
        .iter()
        .map(|row| StoredScope::new(tables, row))
        .collect();
    for spec in &request.joins {
        combos = join(tables, combos, spec)?;
    }

    let mut matched = Vec::with_capacity(combos.len());
    for (scanned, scope) in combos.into_iter().enumerate() {
        interrupt.poll(scanned)?;
        if request
            .predicate
            .as_ref()
            .is_none_or(|predicate| predicate.matches(&scope))
        {
            matched.push(scope);
        }
    }
    if !request.order.is_empty() {
        matched.sort_by(|a, b| order_cmp(&request.order, a, b));
    }
    let offset = usize::try_from(request.offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = request
        .limit
        .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
    let page: Vec<StoredScope<'_>> = matched.into_iter().skip(offset).take(limit).collect();
    interrupt.check()?;

    if request.mode == FetchMode::Count {
        return Ok(FetchResult {
            count: Some(page.len() as u64),
            ..FetchResult::default()
        });
    }

    let mut owners: Vec<&Row> = Vec::new();
    for scope in &page {
        if !owners.iter().any(|seen| std::ptr::eq(*seen, scope.row)) {
            owners.push(scope.row);
        }
    }
    let mut included = Vec::new();
    for spec in &request.includes {
        include(tables, spec, &owners, &mut included)?;
    }
    Ok(FetchResult {
        rows: page.iter().map(StoredScope::result_row).collect(),
        included,
        count: None,
    })
}
