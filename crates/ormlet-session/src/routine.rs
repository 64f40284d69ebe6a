//! Stored-routine signatures and result shapes.
//!
//! Routines live in the store; the registry only knows their signatures.
//! Every call is checked here, so a mismatched call never reaches the
//! adapter.

use ormlet_core::{
    Error, FromRow, RecordRef, Registry, Result, Row, RoutineCall, SignatureError, SqlType, Value,
};
use std::collections::HashMap;

/// One declared routine parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineParam {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

impl RoutineParam {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// What a routine returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultShape {
    /// Rows of arbitrary columns, mapped by the caller.
    AdHoc,
    /// Rows carrying every field of a registered schema.
    Schema(String),
}

/// Name, parameters and result shape of a stored routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineSignature {
    pub name: String,
    pub params: Vec<RoutineParam>,
    pub shape: ResultShape,
}

impl RoutineSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            shape: ResultShape::AdHoc,
        }
    }

    pub fn param(mut self, param: RoutineParam) -> Self {
        self.params.push(param);
        self
    }

    /// Results are records of `schema`.
    pub fn returns(mut self, schema: impl Into<String>) -> Self {
        self.shape = ResultShape::Schema(schema.into());
        self
    }

    fn mismatch(&self, position: Option<usize>, message: String) -> Error {
        Error::Signature(SignatureError {
            routine: self.name.clone(),
            position,
            message,
        })
    }

    /// Check a call's parameters against the signature.
    #[allow(clippy::result_large_err)]
    pub fn check(&self, params: &[Value]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(self.mismatch(
                None,
                format!(
                    "expected {} parameter(s), got {}",
                    self.params.len(),
                    params.len()
                ),
            ));
        }
        for (position, (param, value)) in self.params.iter().zip(params).enumerate() {
            if value.is_null() {
                if !param.nullable {
                    return Err(self.mismatch(
                        Some(position),
                        format!("'{}' is not nullable", param.name),
                    ));
                }
            } else if !param.ty.accepts(value) {
                return Err(self.mismatch(
                    Some(position),
                    format!(
                        "'{}' expects {}, got {}",
                        param.name,
                        param.ty.name(),
                        value.type_name()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Known stored routines, by name.
#[derive(Debug, Clone, Default)]
pub struct RoutineRegistry {
    routines: HashMap<String, RoutineSignature>,
}

impl RoutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signature, replacing any previous one with the same name.
    pub fn register(mut self, signature: RoutineSignature) -> Self {
        self.routines.insert(signature.name.clone(), signature);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RoutineSignature> {
        self.routines.get(name)
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }

    /// Check every schema-shaped result against the entity registry.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        for signature in self.routines.values() {
            if let ResultShape::Schema(schema) = &signature.shape {
                registry.require(schema)?;
            }
        }
        Ok(())
    }

    /// Resolve and check a call; performs no I/O.
    #[allow(clippy::result_large_err)]
    pub fn prepare(&self, name: &str, params: Vec<Value>) -> Result<(RoutineCall, &RoutineSignature)> {
        let signature = self.get(name).ok_or_else(|| {
            Error::Signature(SignatureError {
                routine: name.to_string(),
                position: None,
                message: "unknown routine".to_string(),
            })
        })?;
        signature.check(&params)?;
        let call = RoutineCall {
            name: name.to_string(),
            params,
        };
        Ok((call, signature))
    }
}

/// Rows returned by a routine.
#[derive(Debug, Clone)]
pub enum RoutineRows {
    Rows(Vec<Row>),
    /// Detached records of the declared schema.
    Records(Vec<RecordRef>),
}

impl RoutineRows {
    /// Shape raw rows according to the signature.
    #[allow(clippy::result_large_err)]
    pub(crate) fn shape(
        signature: &RoutineSignature,
        registry: &Registry,
        rows: Vec<Row>,
    ) -> Result<Self> {
        match &signature.shape {
            ResultShape::AdHoc => Ok(RoutineRows::Rows(rows)),
            ResultShape::Schema(name) => {
                let schema = registry.require(name)?;
                let records = rows
                    .iter()
                    .map(|row| RecordRef::from_row(schema, row))
                    .collect::<Result<Vec<_>>>()?;
                Ok(RoutineRows::Records(records))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RoutineRows::Rows(rows) => rows.len(),
            RoutineRows::Records(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map every row onto an ad hoc type.
    #[allow(clippy::result_large_err)]
    pub fn map<T: FromRow>(&self) -> Result<Vec<T>> {
        match self {
            RoutineRows::Rows(rows) => rows.iter().map(T::from_row).collect(),
            RoutineRows::Records(records) => records.iter().map(RecordRef::map).collect(),
        }
    }

    pub fn records(&self) -> &[RecordRef] {
        match self {
            RoutineRows::Records(records) => records,
            RoutineRows::Rows(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routines() -> RoutineRegistry {
        RoutineRegistry::new()
            .register(RoutineSignature::new("ten_most_expensive_products"))
            .register(
                RoutineSignature::new("most_expensive_products")
                    .param(RoutineParam::new("count", SqlType::Integer)),
            )
            .register(
                RoutineSignature::new("customers_by_city")
                    .param(RoutineParam::new("city", SqlType::Text).nullable()),
            )
    }

    fn position(err: Error) -> Option<usize> {
        match err {
            Error::Signature(e) => e.position,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn matching_calls_are_prepared() {
        let routines = routines();
        let (call, signature) = routines
            .prepare("most_expensive_products", vec![Value::Int(5)])
            .unwrap();
        assert_eq!(call.params, vec![Value::Int(5)]);
        assert_eq!(signature.shape, ResultShape::AdHoc);
        routines
            .prepare("customers_by_city", vec![Value::Null])
            .unwrap();
    }

    #[test]
    fn mismatches_are_signature_errors() {
        let routines = routines();
        assert!(matches!(
            routines.prepare("no_such_routine", vec![]),
            Err(Error::Signature(_))
        ));
        assert_eq!(
            position(
                routines
                    .prepare("ten_most_expensive_products", vec![Value::Int(1)])
                    .unwrap_err()
            ),
            None
        );
        assert_eq!(
            position(
                routines
                    .prepare("most_expensive_products", vec![Value::Text("5".into())])
                    .unwrap_err()
            ),
            Some(0)
        );
        assert_eq!(
            position(
                routines
                    .prepare("most_expensive_products", vec![Value::Null])
                    .unwrap_err()
            ),
            Some(0)
        );
    }

    #[test]
    fn ad_hoc_rows_map_onto_types() {
        struct Priced {
            name: String,
            price: f64,
        }
        impl FromRow for Priced {
            fn from_row(row: &Row) -> Result<Self> {
                Ok(Self {
                    name: row.get_named("product_name")?,
                    price: row.get_named("unit_price")?,
                })
            }
        }

        let rows = RoutineRows::Rows(vec![Row::new(
            vec!["product_name".into(), "unit_price".into()],
            vec![Value::Text("Côte de Blaye".into()), Value::Double(263.5)],
        )]);
        let mapped: Vec<Priced> = rows.map().unwrap();
        assert_eq!(mapped[0].name, "Côte de Blaye");
        assert!((mapped[0].price - 263.5).abs() < f64::EPSILON);
        assert!(rows.records().is_empty());
    }
}
