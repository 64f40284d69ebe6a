//! Shaped query results: projections and groups.

use crate::loader::RecordScope;
use ormlet_core::{RecordRef, Result, Row, Scope, Value, hash_values};
use ormlet_query::ProjectedColumn;
use std::collections::HashMap;

/// One value of a projected row.
#[derive(Debug, Clone)]
pub enum ProjectedValue {
    Value(Value),
    /// A whole record; `None` for an unmatched left join.
    Record(Option<RecordRef>),
    /// Related records that passed the per-element filter.
    Collection(Vec<RecordRef>),
}

/// A projected row, items in projection order.
#[derive(Debug, Clone, Default)]
pub struct Projected {
    items: Vec<(String, ProjectedValue)>,
}

impl Projected {
    pub(crate) fn evaluate(columns: &[ProjectedColumn], scope: &RecordScope) -> Self {
        let items = columns
            .iter()
            .map(|column| {
                let value = match column {
                    ProjectedColumn::Value { operand, .. } => {
                        ProjectedValue::Value(operand.evaluate(scope))
                    }
                    ProjectedColumn::Record { join: None, .. } => {
                        ProjectedValue::Record(Some(scope.record().clone()))
                    }
                    ProjectedColumn::Record {
                        join: Some(index), ..
                    } => ProjectedValue::Record(scope.joined(*index).cloned()),
                    ProjectedColumn::Collection { hop, filter, .. } => ProjectedValue::Collection(
                        scope
                            .related(hop)
                            .into_iter()
                            .filter(|element| {
                                filter
                                    .as_ref()
                                    .is_none_or(|predicate| predicate.matches(element))
                            })
                            .map(|element| element.record().clone())
                            .collect(),
                    ),
                };
                (column.alias().to_string(), value)
            })
            .collect();
        Self { items }
    }

    pub fn items(&self) -> &[(String, ProjectedValue)] {
        &self.items
    }

    pub fn get(&self, alias: &str) -> Option<&ProjectedValue> {
        self.items
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, value)| value)
    }

    /// A scalar item; NULL for unknown aliases and non-scalar items.
    pub fn value(&self, alias: &str) -> Value {
        match self.get(alias) {
            Some(ProjectedValue::Value(value)) => value.clone(),
            _ => Value::Null,
        }
    }

    pub fn record(&self, alias: &str) -> Option<&RecordRef> {
        match self.get(alias) {
            Some(ProjectedValue::Record(record)) => record.as_ref(),
            _ => None,
        }
    }

    pub fn collection(&self, alias: &str) -> &[RecordRef] {
        match self.get(alias) {
            Some(ProjectedValue::Collection(records)) => records,
            _ => &[],
        }
    }

    /// The scalar items as a row, for mapping onto an ad hoc type.
    pub fn to_row(&self) -> Row {
        let (names, values): (Vec<String>, Vec<Value>) = self
            .items
            .iter()
            .filter_map(|(alias, value)| match value {
                ProjectedValue::Value(value) => Some((alias.clone(), value.clone())),
                _ => None,
            })
            .unzip();
        Row::new(names, values)
    }

    /// Map the scalar items onto an ad hoc type.
    #[allow(clippy::result_large_err)]
    pub fn map<T: ormlet_core::FromRow>(&self) -> Result<T> {
        T::from_row(&self.to_row())
    }
}

/// Members sharing one grouping key.
#[derive(Debug, Clone)]
pub struct Group<T> {
    pub key: Value,
    pub members: Vec<T>,
}

impl<T> Group<T> {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn same_key(a: &Value, b: &Value) -> bool {
    (a.is_null() && b.is_null()) || a.sql_eq(b)
}

/// Group keyed items, groups and members in first-seen order.
///
/// NULL keys form one group.
pub(crate) fn group<T>(keyed: impl IntoIterator<Item = (Value, T)>) -> Vec<Group<T>> {
    let mut groups: Vec<Group<T>> = Vec::new();
    let mut index: HashMap<u64, Vec<usize>> = HashMap::new();
    for (key, member) in keyed {
        let bucket = index.entry(hash_values(std::slice::from_ref(&key))).or_default();
        if let Some(&at) = bucket.iter().find(|&&at| same_key(&groups[at].key, &key)) {
            groups[at].members.push(member);
        } else {
            bucket.push(groups.len());
            groups.push(Group {
                key,
                members: vec![member],
            });
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormlet_core::{ColumnRef, FieldDef, Operand, Schema, SqlType};
    use std::sync::Arc;

    fn product(name: &str, category: i32, price: f64) -> RecordRef {
        let schema = Arc::new(
            Schema::builder("products")
                .field(FieldDef::new("product_id", SqlType::Integer).primary_key())
                .field(FieldDef::new("product_name", SqlType::Text))
                .field(FieldDef::new("category_id", SqlType::Integer))
                .field(FieldDef::new("unit_price", SqlType::Double))
                .build()
                .unwrap(),
        );
        RecordRef::new(&schema)
            .with("product_name", name)
            .unwrap()
            .with("category_id", category)
            .unwrap()
            .with("unit_price", price)
            .unwrap()
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let keyed = vec![
            (Value::Int(2), "Chang"),
            (Value::Int(1), "Chai"),
            (Value::BigInt(2), "Aniseed Syrup"),
            (Value::Null, "Mystery"),
            (Value::Null, "Unknown"),
        ];
        let groups = group(keyed);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].key, Value::Int(2));
        assert_eq!(groups[0].members, ["Chang", "Aniseed Syrup"]);
        assert_eq!(groups[2].len(), 2);
    }

    #[test]
    fn evaluates_values_and_records() {
        let chai = product("Chai", 1, 18.0);
        let columns = vec![
            ProjectedColumn::Value {
                alias: "name".into(),
                operand: Operand::Column(ColumnRef::base("product_name")),
            },
            ProjectedColumn::Record {
                alias: "product".into(),
                join: None,
            },
        ];
        let projected = Projected::evaluate(&columns, &RecordScope::new(chai.clone()));
        assert_eq!(projected.value("name"), Value::Text("Chai".into()));
        assert!(projected.record("product").unwrap().ptr_eq(&chai));
        assert!(projected.collection("product").is_empty());

        let row = projected.to_row();
        assert_eq!(row.len(), 1);
        let name: String = row.get_named("name").unwrap();
        assert_eq!(name, "Chai");
    }
}
