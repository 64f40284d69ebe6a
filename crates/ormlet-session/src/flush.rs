//! Turning tracked changes into one ordered write batch.
//!
//! Writes are ordered so that foreign keys hold at every step:
//! - INSERT parent-first (shallower tables first)
//! - UPDATE in tracker order
//! - DELETE child-first (deeper tables first)
//!
//! The plan remembers which record produced each operation, so the
//! adapter's positional [`WriteResult`] can be folded back into the tracker
//! once, and only once, the batch has committed.

use crate::change_tracker::ChangeTracker;
use ormlet_core::{
    Lifecycle, RecordRef, Registry, RelationKind, Value, WriteBatch, WriteOp, WriteResult,
};
use std::collections::HashMap;

/// Orders write operations by foreign-key depth.
///
/// A table depends on the tables its foreign keys point at. Depth 0 means no
/// dependencies; a table's depth is one more than its deepest dependency.
/// Self references and cycles are ignored.
#[derive(Debug, Default)]
pub struct FlushOrderer {
    /// Table -> tables it depends on (has a foreign key to).
    dependencies: HashMap<String, Vec<String>>,
}

impl FlushOrderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive dependencies from every relation in the registry.
    pub fn from_registry(registry: &Registry) -> Self {
        let mut orderer = Self::new();
        for schema in registry.schemas() {
            orderer.dependencies.entry(schema.name().to_string()).or_default();
            for relation in schema.relations() {
                match relation.kind {
                    // Foreign key on the owning schema.
                    RelationKind::ManyToOne => {
                        orderer.depend(schema.name(), &relation.target);
                    }
                    // Foreign key on the target schema.
                    RelationKind::OneToMany | RelationKind::OneToOne => {
                        orderer.depend(&relation.target, schema.name());
                    }
                    RelationKind::ManyToMany => {
                        if let Some(link) = &relation.link {
                            orderer.depend(&link.table, schema.name());
                            orderer.depend(&link.table, &relation.target);
                        }
                    }
                }
            }
        }
        orderer
    }

    /// Register a table's dependencies directly.
    pub fn register_table(&mut self, table: &str, depends_on: &[&str]) {
        for parent in depends_on {
            self.depend(table, parent);
        }
    }

    fn depend(&mut self, child: &str, parent: &str) {
        if child == parent {
            return;
        }
        let parents = self.dependencies.entry(child.to_string()).or_default();
        if !parents.iter().any(|p| p == parent) {
            parents.push(parent.to_string());
        }
    }

    /// Foreign-key depth of a table.
    pub fn depth(&self, table: &str) -> usize {
        let mut visiting = Vec::new();
        self.depth_inner(table, &mut visiting)
    }

    fn depth_inner<'a>(&'a self, table: &'a str, visiting: &mut Vec<&'a str>) -> usize {
        if visiting.contains(&table) {
            return 0;
        }
        let Some(parents) = self.dependencies.get(table) else {
            return 0;
        };
        visiting.push(table);
        let depth = parents
            .iter()
            .map(|parent| self.depth_inner(parent, visiting) + 1)
            .max()
            .unwrap_or(0);
        visiting.pop();
        depth
    }

    /// Plan the writes for every pending record in the tracker.
    pub fn plan(&self, tracker: &ChangeTracker) -> FlushPlan {
        let mut inserts: Vec<(WriteOp, FlushStep)> = Vec::new();
        let mut updates: Vec<(WriteOp, FlushStep)> = Vec::new();
        let mut deletes: Vec<(WriteOp, FlushStep)> = Vec::new();
        let mut settle = Vec::new();

        for record in tracker.added() {
            inserts.push(insert_op(record));
        }
        for record in tracker.pending_keyed() {
            let snapshot = record.snapshot();
            match snapshot.lifecycle {
                Lifecycle::Modified if snapshot.changed.is_empty() => settle.push(record),
                Lifecycle::Modified => {
                    let fields = record.schema().fields();
                    let changes = snapshot
                        .changed
                        .iter()
                        .map(|&i| (fields[i].name.clone(), snapshot.values[i].clone()))
                        .collect();
                    let op = WriteOp::Update {
                        table: record.schema_name().to_string(),
                        key: record.key_pairs(),
                        changes,
                    };
                    updates.push((op, FlushStep::Update(record)));
                }
                Lifecycle::Removed => {
                    let op = WriteOp::Delete {
                        table: record.schema_name().to_string(),
                        key: record.key_pairs(),
                    };
                    deletes.push((op, FlushStep::Delete(record)));
                }
                _ => {}
            }
        }

        // Stable sorts keep add order within one table.
        inserts.sort_by_key(|(op, _)| self.depth(op.table()));
        deletes.sort_by_key(|(op, _)| std::cmp::Reverse(self.depth(op.table())));

        let (ops, steps): (Vec<WriteOp>, Vec<FlushStep>) = inserts
            .into_iter()
            .chain(updates)
            .chain(deletes)
            .unzip();
        FlushPlan {
            batch: WriteBatch { ops },
            steps,
            settle,
        }
    }
}

fn insert_op(record: &RecordRef) -> (WriteOp, FlushStep) {
    let snapshot = record.snapshot();
    let mut values = Vec::new();
    let mut generated = Vec::new();
    for (field, value) in record.schema().fields().iter().zip(snapshot.values) {
        if field.generated && value.is_null() {
            generated.push(field.name.clone());
        } else {
            values.push((field.name.clone(), value));
        }
    }
    let op = WriteOp::Insert {
        table: record.schema_name().to_string(),
        values,
        generated,
    };
    (op, FlushStep::Insert(record.clone()))
}

/// The record behind one operation of the batch.
#[derive(Debug, Clone)]
pub enum FlushStep {
    Insert(RecordRef),
    Update(RecordRef),
    Delete(RecordRef),
}

/// An ordered batch plus what to do with the tracker once it commits.
#[derive(Debug, Default)]
pub struct FlushPlan {
    pub batch: WriteBatch,
    /// Positional with `batch.ops`.
    pub steps: Vec<FlushStep>,
    /// Modified records whose changes all reverted; nothing to write.
    settle: Vec<RecordRef>,
}

impl FlushPlan {
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Reset records that need no write.
    pub(crate) fn settle(&self) {
        for record in &self.settle {
            record.accept_changes(&[]);
        }
    }

    /// Fold a committed batch back into the tracker.
    ///
    /// Inserted records take their generated values and join the identity
    /// map, updated ones become `Unchanged`, deleted ones are untracked.
    pub(crate) fn complete(
        self,
        tracker: &mut ChangeTracker,
        result: &WriteResult,
    ) -> CommitSummary {
        self.settle();
        let mut summary = CommitSummary::default();
        for (index, step) in self.steps.into_iter().enumerate() {
            match step {
                FlushStep::Insert(record) => {
                    let generated: Vec<(usize, Value)> = result
                        .generated
                        .get(index)
                        .into_iter()
                        .flatten()
                        .filter_map(|(column, value)| {
                            record
                                .schema()
                                .field_index(column)
                                .map(|i| (i, value.clone()))
                        })
                        .collect();
                    record.accept_changes(&generated);
                    tracker.promote(&record);
                    summary.inserted += 1;
                }
                FlushStep::Update(record) => {
                    record.accept_changes(&[]);
                    summary.updated += 1;
                }
                FlushStep::Delete(record) => {
                    tracker.forget(&record);
                    summary.deleted += 1;
                }
            }
        }
        summary
    }
}

/// Counts of rows written by a commit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CommitSummary {
    /// Total number of operations performed.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}
