//! Record operation.
//!
//! - [`Record`]
//! - [`Value`]
//! - [`FromValue`]
//! - [`FromRecord`]
//!
//! - [`Index`]
//! - [`DecodeError`]
use std::{borrow::Cow, fmt, sync::Arc};

use crate::common::ByteStr;

/// Column type identifiers the row reader understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    Nullable(Box<ColumnType>),
}

impl ColumnType {
    /// Parse a wire type name, e.g. `Int32` or `Nullable(String)`.
    pub fn parse(name: &str) -> Result<ColumnType, DecodeError> {
        let name = name.trim();
        if let Some(inner) = name.strip_prefix("Nullable(").and_then(|n| n.strip_suffix(')')) {
            return Ok(ColumnType::Nullable(Box::new(ColumnType::parse(inner)?)));
        }
        Ok(match name {
            "Int8" => ColumnType::Int8,
            "Int16" => ColumnType::Int16,
            "Int32" => ColumnType::Int32,
            "Int64" => ColumnType::Int64,
            "UInt8" => ColumnType::UInt8,
            "UInt16" => ColumnType::UInt16,
            "UInt32" => ColumnType::UInt32,
            "UInt64" => ColumnType::UInt64,
            "Float32" => ColumnType::Float32,
            "Float64" => ColumnType::Float64,
            "String" => ColumnType::String,
            _ => return Err(DecodeError::UnknownType(name.to_string())),
        })
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nullable(inner) => write!(f, "Nullable({inner})"),
            Self::Int8 => f.write_str("Int8"),
            Self::Int16 => f.write_str("Int16"),
            Self::Int32 => f.write_str("Int32"),
            Self::Int64 => f.write_str("Int64"),
            Self::UInt8 => f.write_str("UInt8"),
            Self::UInt16 => f.write_str("UInt16"),
            Self::UInt32 => f.write_str("UInt32"),
            Self::UInt64 => f.write_str("UInt64"),
            Self::Float32 => f.write_str("Float32"),
            Self::Float64 => f.write_str("Float64"),
            Self::String => f.write_str("String"),
        }
    }
}

/// One column of a result schema.
#[derive(Clone, Debug)]
pub struct Column {
    pub(crate) name: ByteStr,
    pub(crate) ty: ColumnType,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &ColumnType {
        &self.ty
    }
}

/// Result schema shared by every record of one response.
#[derive(Debug, Default)]
pub struct Schema {
    pub(crate) columns: Vec<Column>,
}

impl Schema {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == *name)
    }
}

/// One row of named, typed values.
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn new(schema: Arc<Schema>, values: Vec<Value>) -> Record {
        Record { schema, values }
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the record contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Try get and decode a value by position or column name.
    pub fn try_get<I: Index, T: FromValue>(&self, idx: I) -> Result<T, DecodeError> {
        let nth = idx.position(&self.schema)?;
        T::from_value(&self.values[nth])
    }

    /// Raw value by position.
    pub fn value(&self, nth: usize) -> Option<&Value> {
        self.values.get(nth)
    }

    /// Try decode type using [`FromRecord`] implementation.
    pub fn decode<D: FromRecord>(&self) -> Result<D, DecodeError> {
        D::from_record(self)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (column, value) in self.schema.columns.iter().zip(&self.values) {
            dbg.key(&column.name).value(&format_args!("{value}"));
        }
        dbg.finish()
    }
}

/// A single decoded value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(ByteStr),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    const fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Int8(_) => "Int8",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::UInt8(_) => "UInt8",
            Value::UInt16(_) => "UInt16",
            Value::UInt32(_) => "UInt32",
            Value::UInt64(_) => "UInt64",
            Value::Float32(_) => "Float32",
            Value::Float64(_) => "Float64",
            Value::String(_) => "String",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("\\N"),
            Value::Int8(v) => v.fmt(f),
            Value::Int16(v) => v.fmt(f),
            Value::Int32(v) => v.fmt(f),
            Value::Int64(v) => v.fmt(f),
            Value::UInt8(v) => v.fmt(f),
            Value::UInt16(v) => v.fmt(f),
            Value::UInt32(v) => v.fmt(f),
            Value::UInt64(v) => v.fmt(f),
            Value::Float32(v) => v.fmt(f),
            Value::Float64(v) => v.fmt(f),
            Value::String(v) => f.write_str(v),
        }
    }
}

// ===== Traits =====

/// Type that can be constructed from a record.
pub trait FromRecord: Sized {
    /// Construct self from record.
    fn from_record(record: &Record) -> Result<Self, DecodeError>;
}

impl FromRecord for () {
    fn from_record(_: &Record) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_record_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRecord for ($($t),*,)
        where
            $($t: FromValue),*
        {
            fn from_record(record: &Record) -> Result<Self, DecodeError> {
                Ok((
                    $(record.try_get($i)?),*,
                ))
            }
        }
    };
}

from_record_tuple!(T0 0);
from_record_tuple!(T0 0, T1 1);
from_record_tuple!(T0 0, T1 1, T2 2);
from_record_tuple!(T0 0, T1 1, T2 2, T3 3);

/// A type that can be constructed from a [`Value`].
pub trait FromValue: Sized {
    /// Try decode self from a value.
    fn from_value(value: &Value) -> Result<Self, DecodeError>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value.is_null() {
            true => Ok(None),
            false => T::from_value(value).map(Some),
        }
    }
}

macro_rules! int_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, DecodeError> {
                    let mismatch = || DecodeError::Mismatch {
                        target: stringify!($ty),
                        found: value.kind(),
                    };
                    match value {
                        Value::Int8(v) => (*v).try_into().map_err(|_| mismatch()),
                        Value::Int16(v) => (*v).try_into().map_err(|_| mismatch()),
                        Value::Int32(v) => (*v).try_into().map_err(|_| mismatch()),
                        Value::Int64(v) => (*v).try_into().map_err(|_| mismatch()),
                        Value::UInt8(v) => (*v).try_into().map_err(|_| mismatch()),
                        Value::UInt16(v) => (*v).try_into().map_err(|_| mismatch()),
                        Value::UInt32(v) => (*v).try_into().map_err(|_| mismatch()),
                        Value::UInt64(v) => (*v).try_into().map_err(|_| mismatch()),
                        // text formats carry numbers as strings
                        Value::String(v) => v.trim().parse().map_err(|_| mismatch()),
                        Value::Null => Err(DecodeError::Null),
                        _ => Err(mismatch()),
                    }
                }
            }
        )*
    };
}

int_from_value!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Float32(v) => Ok(*v as f64),
            Value::Float64(v) => Ok(*v),
            Value::Int8(v) => Ok(*v as f64),
            Value::Int16(v) => Ok(*v as f64),
            Value::Int32(v) => Ok(*v as f64),
            Value::Int64(v) => Ok(*v as f64),
            Value::UInt8(v) => Ok(*v as f64),
            Value::UInt16(v) => Ok(*v as f64),
            Value::UInt32(v) => Ok(*v as f64),
            Value::UInt64(v) => Ok(*v as f64),
            Value::String(v) => v.trim().parse().map_err(|_| DecodeError::Mismatch {
                target: "f64",
                found: value.kind(),
            }),
            Value::Null => Err(DecodeError::Null),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match u8::from_value(value)? {
            0 => Ok(false),
            _ => Ok(true),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Err(DecodeError::Null),
            Value::String(v) => Ok(v.to_string()),
            other => Ok(other.to_string()),
        }
    }
}

/// Type that can be used for indexing a column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the column position.
    fn position(self, schema: &Schema) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, schema: &Schema) -> Result<usize, DecodeError> {
        match self < schema.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    fn position(self, schema: &Schema) -> Result<usize, DecodeError> {
        schema
            .position(self)
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding a record value.
pub enum DecodeError {
    /// Server sent non utf8 text.
    Utf8(std::str::Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static, str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Value does not fit the requested type.
    Mismatch {
        target: &'static str,
        found: &'static str,
    },
    /// Value is null.
    Null,
    /// Column type the reader does not understand.
    UnknownType(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::Mismatch { target, found } => {
                write!(f, "cannot decode {target} from {found}")
            },
            Self::Null => write!(f, "unexpected NULL value"),
            Self::UnknownType(name) => write!(f, "unknown column type: {name:?}"),
        }
    }
}

from!(<std::str::Utf8Error>e => Self::Utf8(e));
from!(<std::string::FromUtf8Error>e => Self::Utf8(e.utf8_error()));

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
