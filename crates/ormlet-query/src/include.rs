//! Include paths for eager loading.
//!
//! `include("territories.region")` asks for the `territories` collection of
//! every fetched employee and, for each territory, its `region`. Paths are
//! merged into one tree so shared prefixes are fetched once.

use ormlet_core::{
    IncludeSpec, Registry, RelationHop, Schema, ValidationError, ValidationErrorKind,
};
use std::sync::Arc;

/// Split a dotted path, ignoring empty segments ("a..b", "a.", " ").
pub fn segments(path: &str) -> Vec<&str> {
    path.trim()
        .split('.')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// Merge one include path into `specs`, validating each relation name.
pub fn merge_path(
    registry: &Registry,
    schema: &Arc<Schema>,
    specs: &mut Vec<IncludeSpec>,
    path: &str,
) -> Result<(), ValidationError> {
    let parts = segments(path);
    if parts.is_empty() {
        return Ok(());
    }
    merge(registry, schema, specs, &parts, "", path)
}

fn merge(
    registry: &Registry,
    schema: &Arc<Schema>,
    specs: &mut Vec<IncludeSpec>,
    parts: &[&str],
    prefix: &str,
    original: &str,
) -> Result<(), ValidationError> {
    let Some((&name, rest)) = parts.split_first() else {
        return Ok(());
    };
    let relation = schema.relation(name).ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::UnknownRelation,
            schema.name(),
            format!("'{name}' is not a relation of '{}'", schema.name()),
        )
        .at(original)
    })?;
    let target = registry.get(&relation.target).ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::UnknownRelation,
            schema.name(),
            format!("relation '{name}' targets unregistered schema '{}'", relation.target),
        )
        .at(original)
    })?;
    let path = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    };

    let index = match specs.iter().position(|spec| spec.hop.name == name) {
        Some(index) => index,
        None => {
            specs.push(IncludeSpec {
                path: path.clone(),
                hop: RelationHop::from_relation(relation),
                nested: Vec::new(),
            });
            specs.len() - 1
        }
    };
    merge(
        registry,
        target,
        &mut specs[index].nested,
        rest,
        &path,
        original,
    )
}
