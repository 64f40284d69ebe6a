//! Populating navigational attributes from fetched rows.
//!
//! Every include path of a fetch comes back as a flat set of target rows
//! (plus link pairs for many-to-many). Stitching materializes those rows
//! through the identity map and hangs them off their owners, level by
//! level, so the caller sees a populated graph after one round trip.

use crate::change_tracker::ChangeTracker;
use ormlet_core::{
    AggregateFunc, ColumnRef, ColumnSource, FetchResult, IncludeSpec, LoadingStrategy, RecordRef,
    Registry, RelationHop, Related, Result, Scope, Value, hash_values,
};
use std::collections::HashMap;

/// Records grouped by the hash of one column value.
struct KeyIndex {
    buckets: HashMap<u64, Vec<(Value, RecordRef)>>,
}

impl KeyIndex {
    fn build(records: &[RecordRef], column: &str) -> Self {
        let mut buckets: HashMap<u64, Vec<(Value, RecordRef)>> = HashMap::new();
        for record in records {
            let value = record.get(column).unwrap_or(Value::Null);
            if value.is_null() {
                continue;
            }
            buckets
                .entry(hash_values(std::slice::from_ref(&value)))
                .or_default()
                .push((value, record.clone()));
        }
        Self { buckets }
    }

    fn matching(&self, value: &Value) -> impl Iterator<Item = &RecordRef> {
        self.buckets
            .get(&hash_values(std::slice::from_ref(value)))
            .into_iter()
            .flatten()
            .filter(move |(candidate, _)| candidate.sql_eq(value))
            .map(|(_, record)| record)
    }
}

/// Hang the rows fetched for `spec` (and its nested specs) off `owners`.
///
/// Owners whose local key is NULL get an absent value. Returns the number
/// of records newly tracked.
pub(crate) fn stitch(
    tracker: &mut ChangeTracker,
    registry: &Registry,
    spec: &IncludeSpec,
    owners: &[RecordRef],
    result: &FetchResult,
    loading: Option<LoadingStrategy>,
) -> Result<usize> {
    let target = registry.require(&spec.hop.table)?;
    let mut targets: Vec<RecordRef> = Vec::new();
    let mut fresh = 0;
    if let Some(included) = result.included(&spec.path) {
        for row in &included.rows {
            let (record, is_new) = tracker.resolve(target, row)?;
            if is_new {
                record.set_loading_strategy(loading);
                fresh += 1;
            }
            if !targets.iter().any(|seen| seen.ptr_eq(&record)) {
                targets.push(record);
            }
        }
    }

    let index = KeyIndex::build(&targets, &spec.hop.remote_key);
    let links = result
        .included(&spec.path)
        .map(|included| included.links.as_slice())
        .unwrap_or_default();

    for owner in owners {
        let local = owner.get(&spec.hop.local_key).unwrap_or(Value::Null);
        let mut matched: Vec<RecordRef> = Vec::new();
        if !local.is_null() {
            if spec.hop.link.is_some() {
                for (owner_key, remote) in links {
                    if owner_key.sql_eq(&local) {
                        extend_distinct(&mut matched, index.matching(remote));
                    }
                }
            } else {
                extend_distinct(&mut matched, index.matching(&local));
            }
        }
        let related = if spec.hop.collection {
            Related::Many(matched)
        } else {
            Related::One(matched.into_iter().next())
        };
        owner.set_related(&spec.hop.name, related);
    }

    for nested in &spec.nested {
        fresh += stitch(tracker, registry, nested, &targets, result, loading)?;
    }
    Ok(fresh)
}

fn extend_distinct<'a>(out: &mut Vec<RecordRef>, records: impl Iterator<Item = &'a RecordRef>) {
    for record in records {
        if !out.iter().any(|seen| seen.ptr_eq(record)) {
            out.push(record.clone());
        }
    }
}

/// A materialized record (plus its joined records) as an evaluation scope.
///
/// Relations are read from the navigational cache only; an unloaded
/// relation reads as NULL or as an empty collection.
#[derive(Debug, Clone)]
pub struct RecordScope {
    record: RecordRef,
    joined: Vec<Option<RecordRef>>,
}

impl RecordScope {
    pub fn new(record: RecordRef) -> Self {
        Self {
            record,
            joined: Vec::new(),
        }
    }

    pub fn with_joined(record: RecordRef, joined: Vec<Option<RecordRef>>) -> Self {
        Self { record, joined }
    }

    pub fn record(&self) -> &RecordRef {
        &self.record
    }

    pub fn joined(&self, index: usize) -> Option<&RecordRef> {
        self.joined.get(index).and_then(Option::as_ref)
    }
}

impl Scope for RecordScope {
    fn column(&self, column: &ColumnRef) -> Value {
        let record = match &column.source {
            ColumnSource::Base => Some(self.record.clone()),
            ColumnSource::Joined(index) => self.joined(*index).cloned(),
            ColumnSource::Path(hops) => hops.iter().try_fold(self.record.clone(), |current, hop| {
                current
                    .related(&hop.name)
                    .and_then(|related| related.as_one().cloned())
            }),
        };
        record
            .and_then(|record| record.get(&column.column))
            .unwrap_or(Value::Null)
    }

    fn related(&self, hop: &RelationHop) -> Vec<Self> {
        self.record
            .related(&hop.name)
            .map(|related| related.records())
            .unwrap_or_default()
            .into_iter()
            .map(RecordScope::new)
            .collect()
    }

    fn subquery(&self, _table: &str, _func: AggregateFunc, _column: Option<&str>) -> Value {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormlet_core::{
        FieldDef, IncludedRows, LinkTable, Operand, Predicate, RelationDef, Row, Schema, SqlType,
        TextOp,
    };

    fn registry() -> Registry {
        Registry::new()
            .register(
                Schema::builder("employees")
                    .field(FieldDef::new("employee_id", SqlType::Integer).primary_key())
                    .field(FieldDef::new("last_name", SqlType::Text))
                    .field(FieldDef::new("reports_to", SqlType::Integer).nullable())
                    .relation(RelationDef::many_to_one(
                        "manager",
                        "employees",
                        "reports_to",
                        "employee_id",
                    ))
                    .relation(RelationDef::many_to_many(
                        "territories",
                        "territories",
                        "employee_id",
                        LinkTable::new("employee_territories", "employee_id", "territory_id"),
                        "territory_id",
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .register(
                Schema::builder("territories")
                    .field(FieldDef::new("territory_id", SqlType::Text).primary_key())
                    .field(FieldDef::new("territory_description", SqlType::Text))
                    .build()
                    .unwrap(),
            )
            .unwrap()
    }

    fn employee(registry: &Registry, id: i32, name: &str, reports_to: Option<i32>) -> RecordRef {
        RecordRef::new(registry.get("employees").unwrap())
            .with("employee_id", id)
            .unwrap()
            .with("last_name", name)
            .unwrap()
            .with("reports_to", reports_to)
            .unwrap()
    }

    fn territory(id: &str, name: &str) -> Row {
        Row::new(
            vec!["territory_id".into(), "territory_description".into()],
            vec![Value::Text(id.into()), Value::Text(name.into())],
        )
    }

    fn spec(registry: &Registry, name: &str) -> IncludeSpec {
        let relation = registry.get("employees").unwrap().relation(name).unwrap();
        IncludeSpec {
            path: name.to_string(),
            hop: RelationHop::from_relation(relation),
            nested: Vec::new(),
        }
    }

    #[test]
    fn many_to_many_rows_follow_link_pairs() {
        let registry = registry();
        let mut tracker = ChangeTracker::new(1);
        let davolio = employee(&registry, 1, "Davolio", Some(2));
        let fuller = employee(&registry, 2, "Fuller", None);
        let result = FetchResult {
            included: vec![IncludedRows {
                path: "territories".into(),
                rows: vec![territory("06897", "Wilton"), territory("19713", "Neward")],
                links: vec![
                    (Value::Int(1), Value::Text("06897".into())),
                    (Value::Int(1), Value::Text("19713".into())),
                    (Value::Int(2), Value::Text("19713".into())),
                ],
            }],
            ..FetchResult::default()
        };

        let fresh = stitch(
            &mut tracker,
            &registry,
            &spec(&registry, "territories"),
            &[davolio.clone(), fuller.clone()],
            &result,
            Some(LoadingStrategy::Eager),
        )
        .unwrap();
        assert_eq!(fresh, 2);
        assert_eq!(davolio.related("territories").unwrap().len(), 2);
        let shared = &fuller.related("territories").unwrap().records()[0];
        assert!(shared.ptr_eq(&davolio.related("territories").unwrap().records()[1]));
        assert_eq!(shared.loading_strategy(), Some(LoadingStrategy::Eager));
    }

    #[test]
    fn null_foreign_key_yields_absent_reference() {
        let registry = registry();
        let mut tracker = ChangeTracker::new(1);
        let fuller = employee(&registry, 2, "Fuller", None);
        stitch(
            &mut tracker,
            &registry,
            &spec(&registry, "manager"),
            &[fuller.clone()],
            &FetchResult::default(),
            None,
        )
        .unwrap();
        assert!(fuller.is_loaded("manager"));
        assert!(fuller.related("manager").unwrap().as_one().is_none());
    }

    #[test]
    fn scope_reads_loaded_relations_only() {
        let registry = registry();
        let davolio = employee(&registry, 1, "Davolio", Some(2));
        let fuller = employee(&registry, 2, "Fuller", None);
        let scope = RecordScope::new(davolio.clone());
        let hop = spec(&registry, "manager").hop;
        let manager_name = ColumnRef {
            source: ColumnSource::Path(vec![hop]),
            column: "last_name".into(),
        };
        assert_eq!(scope.column(&manager_name), Value::Null);

        davolio.set_related("manager", Related::One(Some(fuller)));
        assert_eq!(scope.column(&manager_name), Value::Text("Fuller".into()));

        let starts_with_f = Predicate::Text {
            operand: Operand::Column(manager_name),
            op: TextOp::StartsWith,
            pattern: "F".into(),
        };
        assert!(starts_with_f.matches(&scope));
    }
}
