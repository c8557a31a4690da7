//! Field metadata, rows, and row decoding.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// Column type as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    VarChar,
    Bit,
    Json,
    NewDecimal,
    Enum,
    Set,
    Blob,
    VarString,
    String,
    Geometry,
}

impl ColumnType {
    /// Map a native type code to a column type.
    pub fn from_code(code: u8) -> Option<Self> {
        let ty = match code {
            0x00 => Self::Decimal,
            0x01 => Self::Tiny,
            0x02 => Self::Short,
            0x03 => Self::Long,
            0x04 => Self::Float,
            0x05 => Self::Double,
            0x06 => Self::Null,
            0x07 => Self::Timestamp,
            0x08 => Self::LongLong,
            0x09 => Self::Int24,
            0x0a => Self::Date,
            0x0b => Self::Time,
            0x0c => Self::DateTime,
            0x0d => Self::Year,
            0x0f => Self::VarChar,
            0x10 => Self::Bit,
            0xf5 => Self::Json,
            0xf6 => Self::NewDecimal,
            0xf7 => Self::Enum,
            0xf8 => Self::Set,
            0xfc => Self::Blob,
            0xfd => Self::VarString,
            0xfe => Self::String,
            0xff => Self::Geometry,
            _ => return None,
        };
        Some(ty)
    }

    /// Returns true for integer column types.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Tiny | Self::Short | Self::Long | Self::LongLong | Self::Int24 | Self::Year
        )
    }
}

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Column name (or alias)
    pub name: String,
    /// Originating table, if the column maps to one
    pub table: Option<String>,
    /// Column type
    pub column_type: ColumnType,
    /// Whether the column may contain NULL
    pub nullable: bool,
    /// Whether an integer column is unsigned
    pub unsigned: bool,
}

impl Field {
    /// Create a nullable, signed field without table information.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            table: None,
            column_type,
            nullable: true,
            unsigned: false,
        }
    }

    /// Attach the originating table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Mark the field NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A row of values sharing the field metadata of its result.
#[derive(Debug, Clone)]
pub struct Row {
    fields: Arc<[Field]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(fields: Arc<[Field]>, values: Vec<Value>) -> Self {
        Self { fields, values }
    }

    /// Field metadata of the result this row belongs to.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Raw values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Take the raw values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value by column index.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Raw value by column name (first match).
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let idx = self.fields.iter().position(|f| f.name == name)?;
        self.values.get(idx)
    }

    /// Decode the value at `idx`.
    pub fn try_get<T: FromValue>(&self, idx: usize) -> Result<T> {
        let value = self
            .values
            .get(idx)
            .ok_or_else(|| Error::Decode(format!("column index {} out of range", idx)))?;
        T::decode(value)
    }

    /// Decode the value of the column named `name`.
    pub fn try_get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get_by_name(name)
            .ok_or_else(|| Error::Decode(format!("no column named {}", name)))?;
        T::decode(value)
    }

    /// Decode the whole row.
    pub fn decode<T: FromRow>(&self) -> Result<T> {
        T::from_row(self)
    }
}

/// Trait for decoding a row into a Rust type.
pub trait FromRow: Sized {
    /// Decode a row.
    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

impl FromRow for Vec<Value> {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.values.clone())
    }
}

macro_rules! impl_from_row_tuple {
    ($n:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(row: &Row) -> Result<Self> {
                if row.len() < $n {
                    return Err(Error::Decode("not enough columns for tuple".into()));
                }
                Ok(($(row.try_get::<$name>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1; T1 0);
impl_from_row_tuple!(2; T1 0, T2 1);
impl_from_row_tuple!(3; T1 0, T2 1, T3 2);
impl_from_row_tuple!(4; T1 0, T2 1, T3 2, T4 3);
impl_from_row_tuple!(5; T1 0, T2 1, T3 2, T4 3, T5 4);
impl_from_row_tuple!(6; T1 0, T2 1, T3 2, T4 3, T5 4, T6 5);
impl_from_row_tuple!(7; T1 0, T2 1, T3 2, T4 3, T5 4, T6 5, T7 6);
impl_from_row_tuple!(8; T1 0, T2 1, T3 2, T4 3, T5 4, T6 5, T7 6, T8 7);

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let fields: Arc<[Field]> = vec![
            Field::new("id", ColumnType::LongLong).not_null(),
            Field::new("name", ColumnType::VarString).with_table("users"),
        ]
        .into();
        Row::new(fields, vec![Value::Int(7), Value::from("ada")])
    }

    #[test]
    fn test_access_by_index_and_name() {
        let row = sample();
        assert_eq!(row.len(), 2);
        assert_eq!(row.try_get::<i64>(0).unwrap(), 7);
        assert_eq!(row.try_get_by_name::<String>("name").unwrap(), "ada");
        assert!(row.get_by_name("missing").is_none());
        assert!(row.try_get::<i64>(5).is_err());
    }

    #[test]
    fn test_tuple_decode() {
        let row = sample();
        let (id, name): (u32, String) = row.decode().unwrap();
        assert_eq!((id, name.as_str()), (7, "ada"));
        assert!(row.decode::<(i32, String, i32)>().is_err());
    }

    #[test]
    fn test_column_type_codes() {
        assert_eq!(ColumnType::from_code(0x08), Some(ColumnType::LongLong));
        assert_eq!(ColumnType::from_code(0xfd), Some(ColumnType::VarString));
        assert_eq!(ColumnType::from_code(0x42), None);
        assert!(ColumnType::LongLong.is_integer());
        assert!(!ColumnType::Blob.is_integer());
    }
}
