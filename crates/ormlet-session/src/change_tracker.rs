//! Change tracking for a session.
//!
//! The tracker is the session's identity map: one [`RecordRef`] per
//! (schema, primary key). Records carry their own lifecycle state, which
//! the tracker moves explicitly on attach, add and remove; the record
//! itself moves `Unchanged -> Modified` when a field is set. Commit reads
//! the pending states, nothing is ever diffed against a snapshot.

use ormlet_core::{
    Error, InvalidOperationError, InvalidOperationKind, Lifecycle, RecordRef, Result, Row, Schema,
    Value, hash_values,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Unique key for a record in the identity map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    schema: String,
    /// Hash of the primary key value(s).
    pk_hash: u64,
}

impl ObjectKey {
    pub fn new(schema: &str, key: &[Value]) -> Self {
        Self {
            schema: schema.to_string(),
            pk_hash: hash_values(key),
        }
    }

    /// Key of a record, `None` while its primary key is incomplete.
    pub fn of(record: &RecordRef) -> Option<Self> {
        record
            .key()
            .map(|key| Self::new(record.schema_name(), &key))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn pk_hash(&self) -> u64 {
        self.pk_hash
    }
}

/// Tracks the records of one session.
#[derive(Debug)]
pub struct ChangeTracker {
    session: u64,
    /// Records with a key: `Unchanged`, `Modified` or `Removed`.
    identity: HashMap<ObjectKey, RecordRef>,
    /// Records to insert, in the order they were added.
    added: Vec<RecordRef>,
}

impl ChangeTracker {
    pub fn new(session: u64) -> Self {
        Self {
            session,
            identity: HashMap::new(),
            added: Vec::new(),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session
    }

    fn invalid(record: &RecordRef, kind: InvalidOperationKind, message: String) -> Error {
        Error::InvalidOperation(InvalidOperationError::new(
            kind,
            record.schema_name(),
            message,
        ))
    }

    /// Is the record tracked by this session?
    pub fn contains(&self, record: &RecordRef) -> bool {
        record.owner() == Some(self.session)
    }

    fn check_foreign(&self, record: &RecordRef) -> Result<()> {
        match record.owner() {
            Some(owner) if owner != self.session => Err(Self::invalid(
                record,
                InvalidOperationKind::ForeignSession,
                format!("{} is tracked by another session", record.describe()),
            )),
            _ => Ok(()),
        }
    }

    /// Track an existing record as `Unchanged`.
    ///
    /// Attaching an instance this session already tracks is a no-op.
    #[tracing::instrument(level = "trace", skip(self, record), fields(record = %record.describe()))]
    pub fn attach(&mut self, record: &RecordRef) -> Result<()> {
        self.check_foreign(record)?;
        if self.contains(record) {
            return Ok(());
        }
        let Some(key) = ObjectKey::of(record) else {
            return Err(Self::invalid(
                record,
                InvalidOperationKind::MissingKey,
                format!("{} has no primary key value", record.describe()),
            ));
        };
        if self.identity.contains_key(&key) || self.added_with_key(&key) {
            return Err(Self::invalid(
                record,
                InvalidOperationKind::IdentityConflict,
                format!(
                    "another instance of {} is already tracked",
                    record.describe()
                ),
            ));
        }
        record.begin_tracking(self.session, Lifecycle::Unchanged);
        self.identity.insert(key, record.clone());
        Ok(())
    }

    fn added_with_key(&self, key: &ObjectKey) -> bool {
        self.added
            .iter()
            .any(|added| ObjectKey::of(added).as_ref() == Some(key))
    }

    /// Track a new record as `Added`.
    #[tracing::instrument(level = "trace", skip(self, record), fields(record = %record.describe()))]
    pub fn add(&mut self, record: &RecordRef) -> Result<()> {
        if record.owner().is_some() {
            return Err(Self::invalid(
                record,
                InvalidOperationKind::AlreadyTracked,
                format!("{} is already tracked", record.describe()),
            ));
        }
        if let Some(key) = ObjectKey::of(record) {
            if self.identity.contains_key(&key) || self.added_with_key(&key) {
                return Err(Self::invalid(
                    record,
                    InvalidOperationKind::IdentityConflict,
                    format!(
                        "another instance of {} is already tracked",
                        record.describe()
                    ),
                ));
            }
        }
        record.begin_tracking(self.session, Lifecycle::Added);
        self.added.push(record.clone());
        Ok(())
    }

    /// Mark a record for deletion.
    ///
    /// Removing an `Added` record simply stops tracking it.
    #[tracing::instrument(level = "trace", skip(self, record), fields(record = %record.describe()))]
    pub fn remove(&mut self, record: &RecordRef) -> Result<()> {
        self.check_foreign(record)?;
        if !self.contains(record) {
            return Err(Self::invalid(
                record,
                InvalidOperationKind::NotTracked,
                format!("{} is not tracked by this session", record.describe()),
            ));
        }
        match record.lifecycle() {
            Lifecycle::Added => {
                self.added.retain(|added| !added.ptr_eq(record));
                record.end_tracking();
            }
            Lifecycle::Unchanged | Lifecycle::Modified => record.mark(Lifecycle::Removed),
            Lifecycle::Removed | Lifecycle::Detached => {}
        }
        Ok(())
    }

    /// Lifecycle state of a record as seen by this session.
    pub fn state_of(&self, record: &RecordRef) -> Lifecycle {
        if self.contains(record) {
            record.lifecycle()
        } else {
            Lifecycle::Detached
        }
    }

    /// The tracked instance for a key, if any.
    pub fn lookup(&self, schema: &str, key: &[Value]) -> Option<&RecordRef> {
        self.identity.get(&ObjectKey::new(schema, key))
    }

    /// Materialize a fetched row through the identity map.
    ///
    /// A row whose key is already tracked yields the tracked instance with
    /// its in-memory values; otherwise a new `Unchanged` record is tracked.
    /// The flag is `true` for newly tracked records.
    pub fn resolve(&mut self, schema: &Arc<Schema>, row: &Row) -> Result<(RecordRef, bool)> {
        let mut key = Vec::with_capacity(schema.primary_key().len());
        for &index in schema.primary_key() {
            let name = &schema.fields()[index].name;
            let value = row
                .get_by_name(name)
                .ok_or_else(|| Error::unknown_column(schema.name(), name))?;
            key.push(value.clone());
        }
        let object_key = ObjectKey::new(schema.name(), &key);
        if let Some(existing) = self.identity.get(&object_key) {
            return Ok((existing.clone(), false));
        }
        let record = RecordRef::from_row(schema, row)?;
        record.begin_tracking(self.session, Lifecycle::Unchanged);
        self.identity.insert(object_key, record.clone());
        Ok((record, true))
    }

    pub fn tracked_count(&self) -> usize {
        self.identity.len() + self.added.len()
    }

    /// Would a commit write anything?
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || self
                .identity
                .values()
                .any(|record| record.lifecycle().is_pending())
    }

    /// Every tracked record: added records first, in insertion order.
    pub fn entries(&self) -> Vec<RecordRef> {
        let mut keyed: Vec<(&ObjectKey, &RecordRef)> = self.identity.iter().collect();
        keyed.sort_by(|a, b| {
            (a.0.schema.as_str(), a.0.pk_hash).cmp(&(b.0.schema.as_str(), b.0.pk_hash))
        });
        self.added
            .iter()
            .cloned()
            .chain(keyed.into_iter().map(|(_, record)| record.clone()))
            .collect()
    }

    pub(crate) fn added(&self) -> &[RecordRef] {
        &self.added
    }

    /// Keyed records in a pending state (`Modified` or `Removed`).
    pub(crate) fn pending_keyed(&self) -> Vec<RecordRef> {
        let mut pending: Vec<(&ObjectKey, &RecordRef)> = self
            .identity
            .iter()
            .filter(|(_, record)| record.lifecycle().is_pending())
            .collect();
        pending.sort_by(|a, b| {
            (a.0.schema.as_str(), a.0.pk_hash).cmp(&(b.0.schema.as_str(), b.0.pk_hash))
        });
        pending.into_iter().map(|(_, record)| record.clone()).collect()
    }

    /// Move an inserted record from the added list into the identity map.
    pub(crate) fn promote(&mut self, record: &RecordRef) {
        self.added.retain(|added| !added.ptr_eq(record));
        if let Some(key) = ObjectKey::of(record) {
            self.identity.insert(key, record.clone());
        }
    }

    /// Stop tracking a deleted record.
    pub(crate) fn forget(&mut self, record: &RecordRef) {
        self.identity.retain(|_, tracked| !tracked.ptr_eq(record));
        record.end_tracking();
    }

    /// Detach every record.
    pub fn clear(&mut self) {
        for record in self.identity.values().chain(self.added.iter()) {
            record.end_tracking();
        }
        self.identity.clear();
        self.added.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormlet_core::{FieldDef, SqlType};

    fn shippers() -> Arc<Schema> {
        Arc::new(
            Schema::builder("shippers")
                .field(FieldDef::new("shipper_id", SqlType::Integer).primary_key().generated())
                .field(FieldDef::new("company_name", SqlType::Text))
                .build()
                .unwrap(),
        )
    }

    fn shipper(id: i32, name: &str) -> RecordRef {
        RecordRef::new(&shippers())
            .with("shipper_id", id)
            .unwrap()
            .with("company_name", name)
            .unwrap()
    }

    fn kind(err: Error) -> InvalidOperationKind {
        match err {
            Error::InvalidOperation(e) => e.kind,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn attach_tracks_unchanged_and_is_idempotent() {
        let mut tracker = ChangeTracker::new(1);
        let record = shipper(1, "Speedy Express");
        tracker.attach(&record).unwrap();
        tracker.attach(&record).unwrap();
        assert_eq!(tracker.state_of(&record), Lifecycle::Unchanged);
        assert_eq!(tracker.tracked_count(), 1);
        assert!(!tracker.has_changes());
    }

    #[test]
    fn attach_rejects_conflicts() {
        let mut tracker = ChangeTracker::new(1);
        tracker.attach(&shipper(1, "Speedy Express")).unwrap();

        let twin = shipper(1, "Speedy Express");
        assert_eq!(
            kind(tracker.attach(&twin).unwrap_err()),
            InvalidOperationKind::IdentityConflict
        );

        let keyless = RecordRef::new(&shippers()).with("company_name", "x").unwrap();
        assert_eq!(
            kind(tracker.attach(&keyless).unwrap_err()),
            InvalidOperationKind::MissingKey
        );

        let mut other = ChangeTracker::new(2);
        let foreign = shipper(2, "United Package");
        other.attach(&foreign).unwrap();
        assert_eq!(
            kind(tracker.attach(&foreign).unwrap_err()),
            InvalidOperationKind::ForeignSession
        );
    }

    #[test]
    fn add_then_remove_untracks() {
        let mut tracker = ChangeTracker::new(1);
        let record = RecordRef::new(&shippers())
            .with("company_name", "Lightning Express")
            .unwrap();
        tracker.add(&record).unwrap();
        assert_eq!(record.lifecycle(), Lifecycle::Added);
        assert!(tracker.has_changes());
        assert_eq!(
            kind(tracker.add(&record).unwrap_err()),
            InvalidOperationKind::AlreadyTracked
        );

        tracker.remove(&record).unwrap();
        assert_eq!(record.lifecycle(), Lifecycle::Detached);
        assert_eq!(tracker.tracked_count(), 0);
        assert_eq!(
            kind(tracker.remove(&record).unwrap_err()),
            InvalidOperationKind::NotTracked
        );
    }

    #[test]
    fn remove_marks_persisted_records() {
        let mut tracker = ChangeTracker::new(1);
        let record = shipper(3, "Federal Shipping");
        tracker.attach(&record).unwrap();
        record.set("company_name", "Federal Shipping Co").unwrap();
        assert_eq!(record.lifecycle(), Lifecycle::Modified);

        tracker.remove(&record).unwrap();
        assert_eq!(record.lifecycle(), Lifecycle::Removed);
        tracker.remove(&record).unwrap();
        assert_eq!(record.lifecycle(), Lifecycle::Removed);
        assert_eq!(tracker.pending_keyed().len(), 1);
    }

    #[test]
    fn resolve_returns_the_tracked_instance() {
        let mut tracker = ChangeTracker::new(1);
        let schema = shippers();
        let row = Row::new(
            vec!["shipper_id".into(), "company_name".into()],
            vec![Value::Int(1), Value::Text("Speedy Express".into())],
        );
        let (first, fresh) = tracker.resolve(&schema, &row).unwrap();
        assert!(fresh);
        first.set("company_name", "Speedy").unwrap();

        let (second, fresh) = tracker.resolve(&schema, &row).unwrap();
        assert!(!fresh);
        assert!(second.ptr_eq(&first));
        assert_eq!(second.get("company_name"), Some(Value::Text("Speedy".into())));
        assert!(tracker.lookup("shippers", &[Value::BigInt(1)]).is_some());
    }

    #[test]
    fn clear_detaches_everything() {
        let mut tracker = ChangeTracker::new(1);
        let record = shipper(1, "Speedy Express");
        tracker.attach(&record).unwrap();
        tracker.clear();
        assert_eq!(record.lifecycle(), Lifecycle::Detached);
        assert_eq!(record.owner(), None);
        assert_eq!(tracker.tracked_count(), 0);
    }
}
