//! Scalar types shared by field declarations and resolved expressions

use serde::{Deserialize, Serialize};

/// Built-in scalar type of a field or a resolved expression.
///
/// The schema front-end resolves expression types where it can; expressions
/// whose type cannot be resolved statically carry `None` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalarType {
    String,
    Boolean,
    Int,
    BigInt,
    Float,
    Decimal,
    DateTime,
    Json,
    Bytes,
}

impl ScalarType {
    /// Scalar types that policy lowering can carry through a comparison
    /// as a typed variable. Everything else degrades to an opaque operand.
    pub fn is_comparable(&self) -> bool {
        matches!(
            self,
            ScalarType::Boolean | ScalarType::Int | ScalarType::String
        )
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScalarType::String => "String",
            ScalarType::Boolean => "Boolean",
            ScalarType::Int => "Int",
            ScalarType::BigInt => "BigInt",
            ScalarType::Float => "Float",
            ScalarType::Decimal => "Decimal",
            ScalarType::DateTime => "DateTime",
            ScalarType::Json => "Json",
            ScalarType::Bytes => "Bytes",
        };
        write!(f, "{}", name)
    }
}
