//! In-memory records and their lifecycle state.
//!
//! A [`RecordRef`] is a shared handle to one row of a schema. Cloning the
//! handle never copies the row: every clone observes the same values,
//! lifecycle state and navigational cache, and identity is the handle
//! itself (`ptr_eq`). Sessions hand out the same handle for the same
//! primary key, so a record fetched twice is one object.
//!
//! Lifecycle transitions are recorded explicitly when a record is attached,
//! added, removed, mutated or committed. Nothing compares snapshots.

use crate::error::{
    Error, InvalidOperationError, InvalidOperationKind, Result, TypeError,
};
use crate::row::{FromRow, FromValue, Row};
use crate::schema::Schema;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle state of a record with respect to a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Not tracked by any session.
    #[default]
    Detached,
    /// Loaded (or attached) and not modified since.
    Unchanged,
    /// New record, inserted on commit.
    Added,
    /// Loaded record with changed fields, updated on commit.
    Modified,
    /// Marked for deletion, deleted on commit.
    Removed,
}

impl Lifecycle {
    /// Does commit have to write anything for a record in this state?
    pub const fn is_pending(self) -> bool {
        matches!(
            self,
            Lifecycle::Added | Lifecycle::Modified | Lifecycle::Removed
        )
    }
}

/// When navigational attributes get populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadingStrategy {
    /// Fetch on first navigation, then reuse the cached value.
    #[default]
    Deferred,
    /// Only `load_relation` populates; navigation never performs I/O.
    Explicit,
    /// Populated by the query's include paths in the same round trip.
    Eager,
}

/// The value of a navigational attribute.
#[derive(Clone)]
pub enum Related {
    /// Reference relation; `None` when the foreign key is unset or dangling.
    One(Option<RecordRef>),
    /// Collection relation.
    Many(Vec<RecordRef>),
}

impl Related {
    /// The absent value for a relation of the given shape.
    pub fn absent(collection: bool) -> Self {
        if collection {
            Related::Many(Vec::new())
        } else {
            Related::One(None)
        }
    }

    pub fn as_one(&self) -> Option<&RecordRef> {
        match self {
            Related::One(record) => record.as_ref(),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[RecordRef] {
        match self {
            Related::One(_) => &[],
            Related::Many(records) => records,
        }
    }

    /// Records reachable through this attribute.
    pub fn records(&self) -> Vec<RecordRef> {
        match self {
            Related::One(record) => record.iter().cloned().collect(),
            Related::Many(records) => records.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(record) => usize::from(record.is_some()),
            Related::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Related::One(None) => write!(f, "One(None)"),
            Related::One(Some(record)) => write!(f, "One({})", record.describe()),
            Related::Many(records) => write!(f, "Many({} records)", records.len()),
        }
    }
}

#[derive(Debug, Default)]
struct RecordState {
    values: Vec<Value>,
    changed: BTreeSet<usize>,
    lifecycle: Lifecycle,
    owner: Option<u64>,
    loading: Option<LoadingStrategy>,
    navigation: HashMap<String, Related>,
}

/// Shared handle to one record.
#[derive(Clone)]
pub struct RecordRef {
    schema: Arc<Schema>,
    state: Arc<Mutex<RecordState>>,
}

/// Values and pending changes of a record, read under one lock.
#[derive(Debug, Clone)]
pub struct RecordSnapshot {
    pub values: Vec<Value>,
    pub changed: Vec<usize>,
    pub lifecycle: Lifecycle,
}

impl RecordRef {
    /// A detached record with every field NULL.
    pub fn new(schema: &Arc<Schema>) -> Self {
        let values = vec![Value::Null; schema.fields().len()];
        Self::from_values(schema, values)
    }

    fn from_values(schema: &Arc<Schema>, values: Vec<Value>) -> Self {
        Self {
            schema: Arc::clone(schema),
            state: Arc::new(Mutex::new(RecordState {
                values,
                ..RecordState::default()
            })),
        }
    }

    /// Builder-style `set` for constructing new records.
    pub fn with(self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(field, value)?;
        Ok(self)
    }

    /// Materialize a detached record from a row carrying every schema field.
    pub fn from_row(schema: &Arc<Schema>, row: &Row) -> Result<Self> {
        let mut values = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            let value = row.get_by_name(&field.name).ok_or_else(|| {
                Error::Type(TypeError {
                    expected: field.ty.name(),
                    actual: "missing column".to_string(),
                    column: Some(field.name.clone()),
                })
            })?;
            values.push(value.clone());
        }
        Ok(Self::from_values(schema, values))
    }

    /// Build a detached record from a JSON object keyed by field name.
    ///
    /// Fields absent from the object stay NULL; unknown keys are rejected.
    pub fn from_json(schema: &Arc<Schema>, json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(Error::Type(TypeError {
                expected: "JSON object",
                actual: json.to_string(),
                column: None,
            }));
        };
        let record = Self::new(schema);
        for (key, value) in map {
            record.set(key, Value::from_json(value)?)?;
        }
        Ok(record)
    }

    /// Render the scalar fields as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let state = self.lock();
        let map: serde_json::Map<String, serde_json::Value> = self
            .schema
            .fields()
            .iter()
            .zip(state.values.iter())
            .map(|(field, value)| (field.name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }

    fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn schema_name(&self) -> &str {
        self.schema.name()
    }

    /// Same underlying record?
    pub fn ptr_eq(&self, other: &RecordRef) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Current value of a field; `None` for unknown fields.
    pub fn get(&self, field: &str) -> Option<Value> {
        let index = self.schema.field_index(field)?;
        Some(self.lock().values[index].clone())
    }

    /// Typed field access.
    #[allow(clippy::result_large_err)]
    pub fn get_as<T: FromValue>(&self, field: &str) -> Result<T> {
        let value = self
            .get(field)
            .ok_or_else(|| Error::unknown_column(self.schema.name(), field))?;
        T::from_value(&value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(field.to_string());
                Error::Type(te)
            }
            other => other,
        })
    }

    /// Change a field value.
    ///
    /// On a tracked `Unchanged` record this transitions it to `Modified`
    /// and records the field as changed. Writing an equal value is not a
    /// change. Key fields of persisted records cannot change, and a record
    /// marked for removal cannot be mutated.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let index = self
            .schema
            .field_index(field)
            .ok_or_else(|| Error::unknown_column(self.schema.name(), field))?;
        let def = &self.schema.fields()[index];

        if value.is_null() && !def.nullable && !def.generated {
            return Err(Error::Type(TypeError {
                expected: def.ty.name(),
                actual: "NULL for non-nullable field".to_string(),
                column: Some(def.name.clone()),
            }));
        }
        if !def.ty.accepts(&value) {
            return Err(Error::Type(TypeError {
                expected: def.ty.name(),
                actual: value.type_name().to_string(),
                column: Some(def.name.clone()),
            }));
        }

        let mut state = self.lock();
        if state.values[index] == value {
            return Ok(());
        }
        match state.lifecycle {
            Lifecycle::Removed => {
                return Err(self.invalid(
                    InvalidOperationKind::Removed,
                    format!("cannot set '{field}' on a record marked for removal"),
                ));
            }
            Lifecycle::Unchanged | Lifecycle::Modified if def.primary_key => {
                return Err(self.invalid(
                    InvalidOperationKind::KeyChange,
                    format!("primary key field '{field}' of a persisted record cannot change"),
                ));
            }
            Lifecycle::Unchanged => {
                state.lifecycle = Lifecycle::Modified;
                state.changed.insert(index);
            }
            Lifecycle::Modified => {
                state.changed.insert(index);
            }
            Lifecycle::Detached | Lifecycle::Added => {}
        }
        state.values[index] = value;
        Ok(())
    }

    fn invalid(&self, kind: InvalidOperationKind, message: String) -> Error {
        Error::InvalidOperation(InvalidOperationError::new(
            kind,
            self.schema.name(),
            message,
        ))
    }

    /// Primary key values, or `None` while any key field is NULL.
    pub fn key(&self) -> Option<Vec<Value>> {
        let state = self.lock();
        let key: Vec<Value> = self
            .schema
            .primary_key()
            .iter()
            .map(|&i| state.values[i].clone())
            .collect();
        if key.iter().any(Value::is_null) {
            None
        } else {
            Some(key)
        }
    }

    /// Primary key as (column, value) pairs, NULLs included.
    pub fn key_pairs(&self) -> Vec<(String, Value)> {
        let state = self.lock();
        self.schema
            .primary_key()
            .iter()
            .map(|&i| (self.schema.fields()[i].name.clone(), state.values[i].clone()))
            .collect()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    /// Names of fields changed since the record was loaded or last committed.
    pub fn changed_fields(&self) -> Vec<String> {
        let state = self.lock();
        state
            .changed
            .iter()
            .map(|&i| self.schema.fields()[i].name.clone())
            .collect()
    }

    /// Is the navigational attribute populated?
    pub fn is_loaded(&self, relation: &str) -> bool {
        self.lock().navigation.contains_key(relation)
    }

    /// Cached navigational attribute, without I/O.
    pub fn related(&self, relation: &str) -> Option<Related> {
        self.lock().navigation.get(relation).cloned()
    }

    /// Names of populated navigational attributes.
    pub fn loaded_relations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().navigation.keys().cloned().collect();
        names.sort();
        names
    }

    /// Values as a row in schema field order.
    pub fn to_row(&self) -> Row {
        Row::with_columns(self.schema.columns(), self.lock().values.clone())
    }

    /// Map the record onto an ad hoc type.
    #[allow(clippy::result_large_err)]
    pub fn map<T: FromRow>(&self) -> Result<T> {
        T::from_row(&self.to_row())
    }

    /// Short "schema(key)" label for logs.
    pub fn describe(&self) -> String {
        let pairs: Vec<String> = self
            .key_pairs()
            .into_iter()
            .map(|(column, value)| format!("{column}={value}"))
            .collect();
        format!("{}({})", self.schema.name(), pairs.join(", "))
    }

    // ------------------------------------------------------------------
    // Tracking hooks for the session layer
    // ------------------------------------------------------------------

    /// Id of the session tracking this record.
    pub fn owner(&self) -> Option<u64> {
        self.lock().owner
    }

    /// Start tracking under `owner` in the given state.
    pub fn begin_tracking(&self, owner: u64, lifecycle: Lifecycle) {
        let mut state = self.lock();
        state.owner = Some(owner);
        state.lifecycle = lifecycle;
        state.changed.clear();
    }

    /// Stop tracking: the record becomes `Detached` with no pending changes.
    pub fn end_tracking(&self) {
        let mut state = self.lock();
        state.owner = None;
        state.lifecycle = Lifecycle::Detached;
        state.changed.clear();
    }

    /// Overwrite the lifecycle state.
    pub fn mark(&self, lifecycle: Lifecycle) {
        self.lock().lifecycle = lifecycle;
    }

    /// Apply store-generated values and reset to `Unchanged`.
    pub fn accept_changes(&self, generated: &[(usize, Value)]) {
        let mut state = self.lock();
        for (index, value) in generated {
            if let Some(slot) = state.values.get_mut(*index) {
                *slot = value.clone();
            }
        }
        state.changed.clear();
        state.lifecycle = Lifecycle::Unchanged;
    }

    /// Read values, changed fields and state under one lock.
    pub fn snapshot(&self) -> RecordSnapshot {
        let state = self.lock();
        RecordSnapshot {
            values: state.values.clone(),
            changed: state.changed.iter().copied().collect(),
            lifecycle: state.lifecycle,
        }
    }

    /// Populate a navigational attribute.
    pub fn set_related(&self, relation: &str, related: Related) {
        self.lock()
            .navigation
            .insert(relation.to_string(), related);
    }

    /// Drop every cached navigational attribute.
    pub fn clear_related(&self) {
        self.lock().navigation.clear();
    }

    /// Loading strategy chosen by the query that materialized the record.
    pub fn loading_strategy(&self) -> Option<LoadingStrategy> {
        self.lock().loading
    }

    pub fn set_loading_strategy(&self, strategy: Option<LoadingStrategy>) {
        self.lock().loading = strategy;
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let mut loaded: Vec<&String> = state.navigation.keys().collect();
        loaded.sort();
        f.debug_struct("RecordRef")
            .field("schema", &self.schema.name())
            .field("values", &state.values)
            .field("lifecycle", &state.lifecycle)
            .field("loaded", &loaded)
            .finish()
    }
}
