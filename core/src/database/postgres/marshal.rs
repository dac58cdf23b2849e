//! Column-major array binding for set-based statements.
//!
//! A batch of rows becomes one parallel array per column, bound to an
//! `UNNEST($1::t[], ...)` statement. Capability and shape problems are
//! caught here, before anything reaches the wire.

use std::error::Error;

use bytes::BytesMut;
use thiserror::Error;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type as PgType};

use crate::database::sql_value::{SqlRow, SqlValue};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MarshalError {
    #[error("no element type could be derived for column '{0}': every value is NULL")]
    MissingElementType(String),

    #[error("element type '{0}' has no array binding")]
    UnknownElementType(String),

    #[error("value of kind {value} cannot bind as element type '{expected}'")]
    TypeMismatch { value: &'static str, expected: &'static str },

    #[error("row shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// A named array element type with its postgres scalar and array types
/// resolved. Construction is the capability check: unknown names fail here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgArrayType {
    name: &'static str,
    element: PgType,
    array: PgType,
}

impl PgArrayType {
    pub fn new(type_name: &str) -> Result<Self, MarshalError> {
        let (name, element, array) = match type_name {
            "bool" => ("bool", PgType::BOOL, PgType::BOOL_ARRAY),
            "int2" => ("int2", PgType::INT2, PgType::INT2_ARRAY),
            "int4" => ("int4", PgType::INT4, PgType::INT4_ARRAY),
            "int8" => ("int8", PgType::INT8, PgType::INT8_ARRAY),
            "float8" => ("float8", PgType::FLOAT8, PgType::FLOAT8_ARRAY),
            "numeric" => ("numeric", PgType::NUMERIC, PgType::NUMERIC_ARRAY),
            "text" => ("text", PgType::TEXT, PgType::TEXT_ARRAY),
            "timestamptz" => {
                ("timestamptz", PgType::TIMESTAMPTZ, PgType::TIMESTAMPTZ_ARRAY)
            }
            "date" => ("date", PgType::DATE, PgType::DATE_ARRAY),
            "uuid" => ("uuid", PgType::UUID, PgType::UUID_ARRAY),
            "jsonb" => ("jsonb", PgType::JSONB, PgType::JSONB_ARRAY),
            "bytea" => ("bytea", PgType::BYTEA, PgType::BYTEA_ARRAY),
            other => return Err(MarshalError::UnknownElementType(other.to_string())),
        };
        Ok(PgArrayType { name, element, array })
    }

    /// Derives the element type from a value, for schemas discovered at
    /// runtime. NULL carries no type and cannot drive inference.
    pub fn for_value(value: &SqlValue) -> Result<Self, MarshalError> {
        match value.sql_type_name() {
            Some(name) => PgArrayType::new(name),
            None => Err(MarshalError::UnknownElementType("null".to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn array_type(&self) -> &PgType {
        &self.array
    }

    pub fn element_type(&self) -> &PgType {
        &self.element
    }

    fn accepts_value(&self, value: &SqlValue) -> bool {
        match value.sql_type_name() {
            None => true, // NULL binds into any array
            Some(name) => name == self.name,
        }
    }
}

/// One column's worth of values, ready to bind as a single array parameter.
#[derive(Debug)]
pub struct PgScalarArray {
    values: Vec<SqlValue>,
    ty: PgArrayType,
}

impl PgScalarArray {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn element_type_name(&self) -> &'static str {
        self.ty.name()
    }
}

impl ToSql for PgScalarArray {
    fn to_sql(
        &self,
        ty: &PgType,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.values.to_sql(ty, out)
    }

    fn accepts(ty: &PgType) -> bool {
        matches!(ty.kind(), Kind::Array(_))
    }

    to_sql_checked!();
}

/// Builds one array parameter from a column of values, validating each value
/// against the declared element type. An empty input marshals to an empty
/// array rather than an error.
pub fn scalar_array(
    values: Vec<SqlValue>,
    element_type: PgArrayType,
) -> Result<PgScalarArray, MarshalError> {
    for value in &values {
        if !element_type.accepts_value(value) {
            return Err(MarshalError::TypeMismatch {
                value: value.kind_name(),
                expected: element_type.name(),
            });
        }
    }
    Ok(PgScalarArray { values, ty: element_type })
}

/// A target column paired with its array element type.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub element_type: PgArrayType,
}

/// Pivots row-major rows into one array per spec'd column. Every row must
/// carry exactly the spec'd columns; a NULL is used where a row has the
/// column with a NULL value.
pub fn row_arrays(
    rows: &[SqlRow],
    specs: &[ColumnSpec],
) -> Result<Vec<PgScalarArray>, MarshalError> {
    let mut columns: Vec<Vec<SqlValue>> = specs.iter().map(|_| Vec::with_capacity(rows.len())).collect();

    for (row_index, row) in rows.iter().enumerate() {
        if row.len() != specs.len() {
            return Err(MarshalError::ShapeMismatch(format!(
                "row {} has {} columns, expected {}",
                row_index,
                row.len(),
                specs.len()
            )));
        }
        for (spec_index, spec) in specs.iter().enumerate() {
            let value = row.get(&spec.name).ok_or_else(|| {
                MarshalError::ShapeMismatch(format!(
                    "row {} is missing column '{}'",
                    row_index, spec.name
                ))
            })?;
            columns[spec_index].push(value.clone());
        }
    }

    specs
        .iter()
        .zip(columns)
        .map(|(spec, values)| scalar_array(values, spec.element_type.clone()))
        .collect()
}
