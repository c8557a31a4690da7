//! Column values and decoding into Rust types.

use crate::error::{Error, Result};

/// A single column value as produced by the native engine.
///
/// Text-protocol results arrive as `Bytes`; binary-protocol results use the
/// typed variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point number
    Double(f64),
    /// String or binary payload
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the payload as UTF-8 text, if this is a valid UTF-8 byte value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(bytes) => simdutf8::basic::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        }
    )*};
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::UInt(u64::from(v))
            }
        }
    )*};
}

impl_from_signed!(i8, i16, i32, i64);
impl_from_unsigned!(u8, u16, u32, u64);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Bytes(v.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Trait for decoding a [`Value`] into a Rust type.
///
/// - `from_null()` handles SQL NULL
/// - `from_value()` handles everything else
pub trait FromValue: Sized {
    /// Decode from NULL.
    ///
    /// Default implementation returns an error. Override for types that can
    /// represent NULL (like `Option<T>`).
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    /// Decode from a non-NULL value.
    fn from_value(value: &Value) -> Result<Self>;

    /// Decode any value, dispatching NULL to [`from_null`](Self::from_null).
    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Self::from_null(),
            other => Self::from_value(other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_value(value: &Value) -> Result<Self> {
        T::from_value(value).map(Some)
    }
}

fn text<'a>(bytes: &'a [u8], target: &str) -> Result<&'a str> {
    simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Decode(format!("invalid UTF-8 for {}: {}", target, e)))
}

macro_rules! impl_from_value_int {
    ($($t:ty),*) => {$(
        impl FromValue for $t {
            fn from_value(value: &Value) -> Result<Self> {
                let out_of_range =
                    || Error::Decode(format!("value {:?} out of range for {}", value, stringify!($t)));
                match value {
                    Value::Int(v) => <$t>::try_from(*v).map_err(|_e| out_of_range()),
                    Value::UInt(v) => <$t>::try_from(*v).map_err(|_e| out_of_range()),
                    Value::Bytes(bytes) => text(bytes, stringify!($t))?
                        .trim()
                        .parse()
                        .map_err(|e| Error::Decode(format!("invalid {}: {}", stringify!($t), e))),
                    other => Err(Error::Decode(format!(
                        "cannot decode {:?} as {}",
                        other,
                        stringify!($t)
                    ))),
                }
            }
        }
    )*};
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Double(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            Value::UInt(v) => Ok(*v as f64),
            Value::Bytes(bytes) => text(bytes, "f64")?
                .trim()
                .parse()
                .map_err(|e| Error::Decode(format!("invalid f64: {}", e))),
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(*v != 0),
            Value::UInt(v) => Ok(*v != 0),
            Value::Bytes(bytes) => match text(bytes, "bool")?.trim() {
                "1" | "true" | "TRUE" => Ok(true),
                "0" | "false" | "FALSE" => Ok(false),
                other => Err(Error::Decode(format!("invalid bool: {}", other))),
            },
            other => Err(Error::Decode(format!("cannot decode {:?} as bool", other))),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(bytes) => text(bytes, "String").map(str::to_owned),
            Value::Int(v) => Ok(v.to_string()),
            Value::UInt(v) => Ok(v.to_string()),
            Value::Double(v) => Ok(v.to_string()),
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(bytes) => Ok(bytes.clone()),
            other => Err(Error::Decode(format!("cannot decode {:?} as bytes", other))),
        }
    }
}

impl FromValue for Value {
    fn from_null() -> Result<Self> {
        Ok(Value::Null)
    }

    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

/// Trait for turning a set of Rust values into statement parameters.
pub trait ToParams {
    /// Convert into positional parameters.
    fn to_params(self) -> Vec<Value>;
}

impl ToParams for () {
    fn to_params(self) -> Vec<Value> {
        Vec::new()
    }
}

impl ToParams for Vec<Value> {
    fn to_params(self) -> Vec<Value> {
        self
    }
}

impl ToParams for &[Value] {
    fn to_params(self) -> Vec<Value> {
        self.to_vec()
    }
}

impl<const N: usize> ToParams for [Value; N] {
    fn to_params(self) -> Vec<Value> {
        self.into()
    }
}

macro_rules! impl_to_params_tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Into<Value>),+> ToParams for ($($name,)+) {
            fn to_params(self) -> Vec<Value> {
                vec![$(self.$idx.into()),+]
            }
        }
    };
}

impl_to_params_tuple!(A 0);
impl_to_params_tuple!(A 0, B 1);
impl_to_params_tuple!(A 0, B 1, C 2);
impl_to_params_tuple!(A 0, B 1, C 2, D 3);
impl_to_params_tuple!(A 0, B 1, C 2, D 3, E 4);
impl_to_params_tuple!(A 0, B 1, C 2, D 3, E 4, F 5);
