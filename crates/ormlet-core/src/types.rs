//! Scalar field types.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Declared type of a schema field or routine parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Double,
    /// Fixed-point number such as money
    Decimal,
    Text,
    Blob,
    Date,
    Timestamp,
}

impl SqlType {
    /// Get the type name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Decimal => "DECIMAL",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
        }
    }

    /// Can a non-NULL value be stored in a field of this type?
    ///
    /// Widening is allowed (an `Int` fits a `BigInt` or `Decimal` field);
    /// narrowing and cross-family conversions are not. NULL is handled by
    /// the field's nullability, not here.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (SqlType::Boolean, Value::Bool(_))
            | (SqlType::Integer, Value::Int(_))
            | (SqlType::BigInt, Value::Int(_) | Value::BigInt(_))
            | (SqlType::Double, Value::Int(_) | Value::BigInt(_) | Value::Double(_))
            | (
                SqlType::Decimal,
                Value::Int(_) | Value::BigInt(_) | Value::Double(_) | Value::Decimal(_),
            )
            | (SqlType::Text, Value::Text(_))
            | (SqlType::Blob, Value::Bytes(_))
            | (SqlType::Date, Value::Date(_))
            | (SqlType::Timestamp, Value::Timestamp(_)) => true,
            (SqlType::Integer, Value::BigInt(v)) => i32::try_from(*v).is_ok(),
            _ => false,
        }
    }

    /// Is this an integer type a store may generate (auto-increment)?
    pub const fn is_integer(self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }

    /// Build a value of this type from a generated integer.
    pub fn generated(self, id: i64) -> Value {
        match self {
            SqlType::Integer => i32::try_from(id).map_or(Value::BigInt(id), Value::Int),
            _ => Value::BigInt(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_is_accepted() {
        assert!(SqlType::BigInt.accepts(&Value::Int(1)));
        assert!(SqlType::Decimal.accepts(&Value::Int(10)));
        assert!(SqlType::Integer.accepts(&Value::BigInt(10)));
        assert!(!SqlType::Integer.accepts(&Value::BigInt(i64::MAX)));
        assert!(!SqlType::Integer.accepts(&Value::Text("10".into())));
        assert!(!SqlType::Text.accepts(&Value::Int(10)));
    }

    #[test]
    fn generated_keys_fit_declared_width() {
        assert_eq!(SqlType::Integer.generated(4), Value::Int(4));
        assert_eq!(SqlType::BigInt.generated(4), Value::BigInt(4));
    }
}
