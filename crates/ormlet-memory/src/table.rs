//! Stored tables and constraint-checked writes.
//!
//! Every registered schema gets one table. Rows are kept in insertion order
//! with the schema's shared column metadata, so a stored row can be handed
//! to a session as is.

use ormlet_core::{
    ConstraintKind, ConstraintViolationError, Error, Registry, RelationKind, Result, Row, Schema,
    TypeError, Value, WriteOp,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Rows of one schema.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Arc<Schema>,
    rows: Vec<Row>,
    /// Next auto-increment value; `None` once the sequence passed `i64::MAX`.
    next_id: Option<i64>,
}

impl Table {
    fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            next_id: Some(1),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the row whose columns equal `key`.
    fn position(&self, key: &[(String, Value)]) -> Option<usize> {
        self.rows.iter().position(|row| {
            key.iter().all(|(column, value)| {
                row.get_by_name(column)
                    .is_some_and(|stored| stored.sql_eq(value))
            })
        })
    }

    fn key_pairs(&self, row: &Row) -> Vec<(String, Value)> {
        self.schema
            .primary_key()
            .iter()
            .map(|&index| {
                (
                    self.schema.fields()[index].name.clone(),
                    row.get(index).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    fn violation(&self, kind: ConstraintKind, row: &Row, message: String) -> Error {
        Error::Constraint(ConstraintViolationError {
            kind,
            schema: self.schema.name().to_string(),
            key: self.key_pairs(row),
            message,
        })
    }
}

/// Every table of a store.
#[derive(Debug, Clone)]
pub struct TableSet {
    tables: HashMap<String, Table>,
    enforce_foreign_keys: bool,
}

impl TableSet {
    pub(crate) fn new(registry: &Registry, enforce_foreign_keys: bool) -> Self {
        let tables = registry
            .schemas()
            .map(|schema| (schema.name().to_string(), Table::new(Arc::clone(schema))))
            .collect();
        Self {
            tables,
            enforce_foreign_keys,
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| Error::unknown_schema(name))
    }

    /// Rows of a table; empty for unknown tables.
    pub fn rows(&self, name: &str) -> &[Row] {
        self.tables.get(name).map_or(&[], |table| table.rows())
    }

    /// Table names, sorted.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Apply one write; returns the generated (column, value) pairs.
    #[allow(clippy::result_large_err)]
    pub(crate) fn apply(&mut self, op: &WriteOp) -> Result<Vec<(String, Value)>> {
        match op {
            WriteOp::Insert { table, values, .. } => self.insert(table, values),
            WriteOp::Update {
                table,
                key,
                changes,
            } => self.update(table, key, changes).map(|()| Vec::new()),
            WriteOp::Delete { table, key } => self.delete(table, key).map(|()| Vec::new()),
        }
    }

    /// Insert a row; generated integer columns left NULL get the next id.
    #[allow(clippy::result_large_err)]
    pub(crate) fn insert(
        &mut self,
        name: &str,
        given: &[(String, Value)],
    ) -> Result<Vec<(String, Value)>> {
        let table = self.table(name)?;
        let schema = Arc::clone(&table.schema);
        let mut values = vec![Value::Null; schema.fields().len()];
        for (column, value) in given {
            let index = schema
                .field_index(column)
                .ok_or_else(|| Error::unknown_column(name, column))?;
            values[index] = value.clone();
        }

        let mut next_id = table.next_id;
        let mut assigned = Vec::new();
        for (index, field) in schema.fields().iter().enumerate() {
            if !(field.generated && field.ty.is_integer()) {
                continue;
            }
            if values[index].is_null() {
                let id = next_id.ok_or_else(|| exhausted(name, &field.name))?;
                values[index] = field.ty.generated(id);
                assigned.push((field.name.clone(), values[index].clone()));
                next_id = id.checked_add(1);
            } else if let Some(explicit) = values[index].as_i64() {
                next_id = match (next_id, explicit.checked_add(1)) {
                    (Some(next), Some(after)) => Some(next.max(after)),
                    _ => None,
                };
            }
        }

        let row = Row::with_columns(schema.columns(), values);
        self.check_row(table, &row, None)?;
        if let Some(table) = self.tables.get_mut(name) {
            table.rows.push(row);
            table.next_id = next_id;
        }
        Ok(assigned)
    }

    #[allow(clippy::result_large_err)]
    fn update(
        &mut self,
        name: &str,
        key: &[(String, Value)],
        changes: &[(String, Value)],
    ) -> Result<()> {
        let table = self.table(name)?;
        let index = table.position(key).ok_or_else(|| missing_row(name, key))?;
        let schema = &table.schema;
        let mut values = table.rows[index].values().to_vec();
        for (column, value) in changes {
            let at = schema
                .field_index(column)
                .ok_or_else(|| Error::unknown_column(name, column))?;
            if schema.fields()[at].primary_key && !values[at].sql_eq(value) {
                return Err(table.violation(
                    ConstraintKind::PrimaryKey,
                    &table.rows[index],
                    format!("primary key column '{column}' cannot change"),
                ));
            }
            values[at] = value.clone();
        }
        let row = Row::with_columns(schema.columns(), values);
        self.check_row(table, &row, Some(index))?;
        if let Some(table) = self.tables.get_mut(name) {
            table.rows[index] = row;
        }
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn delete(&mut self, name: &str, key: &[(String, Value)]) -> Result<()> {
        let table = self.table(name)?;
        let index = table.position(key).ok_or_else(|| missing_row(name, key))?;
        self.check_unreferenced(table, index)?;
        if let Some(table) = self.tables.get_mut(name) {
            table.rows.remove(index);
        }
        Ok(())
    }

    /// NOT NULL, type, primary key, unique and foreign key checks.
    ///
    /// `skip` is the index of the row being replaced by an update.
    #[allow(clippy::result_large_err)]
    fn check_row(&self, table: &Table, row: &Row, skip: Option<usize>) -> Result<()> {
        let schema = &table.schema;
        let others = || {
            table
                .rows
                .iter()
                .enumerate()
                .filter(move |(i, _)| Some(*i) != skip)
                .map(|(_, other)| other)
        };

        for (index, field) in schema.fields().iter().enumerate() {
            let value = row.get(index).unwrap_or(&Value::Null);
            if value.is_null() {
                if !field.nullable {
                    return Err(table.violation(
                        ConstraintKind::NotNull,
                        row,
                        format!("'{}.{}' may not be NULL", schema.name(), field.name),
                    ));
                }
                continue;
            }
            if !field.ty.accepts(value) {
                return Err(Error::Type(TypeError {
                    expected: field.ty.name(),
                    actual: value.type_name().to_string(),
                    column: Some(field.name.clone()),
                }));
            }
            if field.unique
                && others().any(|other| other.get(index).is_some_and(|v| v.sql_eq(value)))
            {
                return Err(table.violation(
                    ConstraintKind::Unique,
                    row,
                    format!("duplicate value {} for '{}.{}'", value, schema.name(), field.name),
                ));
            }
        }

        let key = schema.primary_key();
        let same_key = |other: &Row| {
            key.iter()
                .all(|&i| matches!((other.get(i), row.get(i)), (Some(a), Some(b)) if a.sql_eq(b)))
        };
        if others().any(same_key) {
            return Err(table.violation(
                ConstraintKind::PrimaryKey,
                row,
                format!("duplicate primary key in '{}'", schema.name()),
            ));
        }

        if !self.enforce_foreign_keys {
            return Ok(());
        }
        for relation in schema
            .relations()
            .iter()
            .filter(|relation| relation.kind == RelationKind::ManyToOne)
        {
            let Some(local) = row.get_by_name(&relation.local_key).filter(|v| !v.is_null()) else {
                continue;
            };
            let target = self.table(&relation.target)?;
            let found = target.rows.iter().any(|candidate| {
                candidate
                    .get_by_name(&relation.remote_key)
                    .is_some_and(|remote| remote.sql_eq(local))
            });
            if !found {
                return Err(table.violation(
                    ConstraintKind::ForeignKey,
                    row,
                    format!(
                        "'{}.{}' = {} has no matching '{}' row",
                        schema.name(),
                        relation.local_key,
                        local,
                        relation.target
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Reject deleting a row that other rows still reference.
    #[allow(clippy::result_large_err)]
    fn check_unreferenced(&self, table: &Table, index: usize) -> Result<()> {
        if !self.enforce_foreign_keys {
            return Ok(());
        }
        let row = &table.rows[index];
        let name = table.schema.name();
        for other in self.tables.values() {
            for relation in other.schema.relations().iter().filter(|relation| {
                relation.kind == RelationKind::ManyToOne && relation.target == name
            }) {
                let Some(key) = row.get_by_name(&relation.remote_key).filter(|v| !v.is_null())
                else {
                    continue;
                };
                let referenced = other.rows.iter().enumerate().any(|(i, candidate)| {
                    !(other.schema.name() == name && i == index)
                        && candidate
                            .get_by_name(&relation.local_key)
                            .is_some_and(|local| local.sql_eq(key))
                });
                if referenced {
                    return Err(table.violation(
                        ConstraintKind::ForeignKey,
                        row,
                        format!(
                            "row is still referenced by '{}.{}'",
                            other.schema.name(),
                            relation.local_key
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Tables as a JSON object of row arrays.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for name in self.table_names() {
            let rows = self
                .rows(name)
                .iter()
                .map(|row| {
                    serde_json::Value::Object(
                        row.iter()
                            .map(|(column, value)| (column.to_string(), value.to_json()))
                            .collect(),
                    )
                })
                .collect();
            out.insert(name.to_string(), serde_json::Value::Array(rows));
        }
        serde_json::Value::Object(out)
    }
}

fn exhausted(table: &str, column: &str) -> Error {
    Error::Constraint(ConstraintViolationError {
        kind: ConstraintKind::PrimaryKey,
        schema: table.to_string(),
        key: Vec::new(),
        message: format!("no values left to generate for '{column}'"),
    })
}

fn missing_row(name: &str, key: &[(String, Value)]) -> Error {
    let shown: Vec<String> = key
        .iter()
        .map(|(column, value)| format!("{column} = {value}"))
        .collect();
    Error::Constraint(ConstraintViolationError {
        kind: ConstraintKind::RowMissing,
        schema: name.to_string(),
        key: key.to_vec(),
        message: format!("no '{}' row where {}", name, shown.join(" and ")),
    })
}
