//! Row to record mapping.
//!
//! Driver values arrive as [`Value`]s; each entity field type knows how to
//! coerce the handful of value shapes a driver may hand back for it.
//!
//! | Field type                 | Accepted values                                   |
//! |----------------------------|---------------------------------------------------|
//! | `String`                   | text, UTF-8 bytes, timestamps, numbers            |
//! | `i8`..`i64`                | integers, base-10 text or bytes, booleans         |
//! | `u8`..`u64`                | integers (signed values are reinterpreted), text  |
//! | `bool`                     | `1`/`0`, `"1"`/`"true"`/`"0"`/`"false"`           |
//! | `f32`, `f64`               | floats, integers, decimal text                    |
//! | [`Timestamp`]              | timestamps, text in one of the two known formats  |
//! | `Vec<String>`              | comma-separated text                              |
//!
//! `NULL` becomes the zero value for non-`Option` fields and `None` otherwise.

use crate::case::{pascal_case, snake_case};
use crate::entity::{Entity, Field};
use crate::error::{ErrorKind, Result};
use crate::row::Row;
use crate::value::{Timestamp, Value};
use exn::ResultExt;

/// The family a field type belongs to, which selects its DDL fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Integer,
    Unsigned,
    Boolean,
    String,
    Float,
    Timestamp,
    StringList,
}

/// A Rust type usable as an entity field.
pub trait FieldType: Sized {
    const KIND: FieldKind;
    const NULLABLE: bool = false;
    /// Storage width in bytes, for the integer families.
    const BYTES: u8 = 0;

    fn to_value(&self) -> Value;

    /// Coerce a driver value into this type.
    fn from_value(value: Value) -> Result<Self>;

    fn is_zero(&self) -> bool;
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T> {
    exn::bail!(ErrorKind::Conversion(format!("cannot read {} as {target}", value.kind_name())))
}

fn text_of(value: Value) -> std::result::Result<String, Value> {
    match value {
        Value::Text(text) => Ok(text),
        Value::Bytes(bytes) => String::from_utf8(bytes).map_err(|err| Value::Bytes(err.into_bytes())),
        other => Err(other),
    }
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::String;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(String::new()),
            Value::Timestamp(ts) => Ok(ts.to_sql_string()),
            Value::Int(v) => Ok(v.to_string()),
            Value::UInt(v) => Ok(v.to_string()),
            Value::Real(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            other => text_of(other).or_else(|other| mismatch(&other, "string")),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

macro_rules! impl_signed {
    ($($t:ty),*) => {$(
        impl FieldType for $t {
            const KIND: FieldKind = FieldKind::Integer;
            const BYTES: u8 = (<$t>::BITS / 8) as u8;

            fn to_value(&self) -> Value {
                Value::Int(i64::from(*self))
            }

            fn from_value(value: Value) -> Result<Self> {
                let wide: i64 = match value {
                    Value::Null => 0,
                    Value::Int(v) => v,
                    Value::Bool(v) => i64::from(v),
                    Value::UInt(v) => i64::try_from(v)
                        .or_raise(|| ErrorKind::Conversion(format!("{v} overflows {}", stringify!($t))))?,
                    other => {
                        let text = text_of(other).or_else(|other| mismatch(&other, stringify!($t)))?;
                        text.trim()
                            .parse::<i64>()
                            .or_raise(|| ErrorKind::Conversion(format!("{text:?} is not a base-10 integer")))?
                    },
                };
                <$t>::try_from(wide).or_raise(|| ErrorKind::Conversion(format!("{wide} overflows {}", stringify!($t))))
            }

            fn is_zero(&self) -> bool {
                *self == 0
            }
        }
    )*};
}
impl_signed!(i8, i16, i32, i64);

macro_rules! impl_unsigned {
    ($($t:ty),*) => {$(
        impl FieldType for $t {
            const KIND: FieldKind = FieldKind::Unsigned;
            const BYTES: u8 = (<$t>::BITS / 8) as u8;

            fn to_value(&self) -> Value {
                Value::UInt(u64::from(*self))
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Null => Ok(0),
                    // Signed integers are reinterpreted bit for bit, truncated to width.
                    Value::Int(v) => Ok(v as $t),
                    Value::UInt(v) => Ok(v as $t),
                    Value::Bool(v) => Ok(<$t>::from(v)),
                    other => {
                        let text = text_of(other).or_else(|other| mismatch(&other, stringify!($t)))?;
                        text.trim()
                            .parse::<$t>()
                            .or_raise(|| ErrorKind::Conversion(format!("{text:?} is not a base-10 {}", stringify!($t))))
                    },
                }
            }

            fn is_zero(&self) -> bool {
                *self == 0
            }
        }
    )*};
}
impl_unsigned!(u8, u16, u32, u64);

impl FieldType for bool {
    const KIND: FieldKind = FieldKind::Boolean;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(false),
            Value::Bool(v) => Ok(v),
            Value::Int(v) => Ok(v == 1),
            Value::UInt(v) => Ok(v == 1),
            other => {
                let text = text_of(other).or_else(|other| mismatch(&other, "bool"))?;
                Ok(matches!(text.trim(), "1" | "true"))
            },
        }
    }

    fn is_zero(&self) -> bool {
        !*self
    }
}

macro_rules! impl_float {
    ($($t:ty),*) => {$(
        impl FieldType for $t {
            const KIND: FieldKind = FieldKind::Float;

            fn to_value(&self) -> Value {
                Value::Real(f64::from(*self))
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Null => Ok(0.0),
                    Value::Real(v) => Ok(v as $t),
                    Value::Int(v) => Ok(v as $t),
                    Value::UInt(v) => Ok(v as $t),
                    other => {
                        let text = text_of(other).or_else(|other| mismatch(&other, stringify!($t)))?;
                        text.trim()
                            .parse::<$t>()
                            .or_raise(|| ErrorKind::Conversion(format!("{text:?} is not a decimal number")))
                    },
                }
            }

            fn is_zero(&self) -> bool {
                *self == 0.0
            }
        }
    )*};
}
impl_float!(f32, f64);

impl FieldType for Timestamp {
    const KIND: FieldKind = FieldKind::Timestamp;

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Timestamp(ts) => Ok(ts),
            other => {
                let text = text_of(other).or_else(|other| mismatch(&other, "timestamp"))?;
                Self::parse(&text)
            },
        }
    }

    fn is_zero(&self) -> bool {
        Timestamp::is_zero(self)
    }
}

impl FieldType for Vec<String> {
    const KIND: FieldKind = FieldKind::StringList;

    fn to_value(&self) -> Value {
        Value::Text(self.join(","))
    }

    fn from_value(value: Value) -> Result<Self> {
        let text = String::from_value(value)?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(text.split(',').map(str::to_string).collect())
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;
    const BYTES: u8 = T::BYTES;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldType::to_value)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

/// Find the field a driver column maps onto: exact name first, then the
/// PascalCase form of the field name, then the snake_case form of the column.
pub fn resolve_field<'f>(fields: &'f [Field], column: &str) -> Option<&'f Field> {
    fields
        .iter()
        .find(|f| f.name == column || f.column == column)
        .or_else(|| fields.iter().find(|f| pascal_case(f.name) == column))
        .or_else(|| {
            let snake = snake_case(column);
            fields.iter().find(|f| f.name == snake)
        })
}

/// Build a record from a driver row.
///
/// With a non-empty `projection` only the projected columns are mapped and
/// every other field keeps its zero value. Columns that match no field are
/// skipped.
pub fn map_row<T: Entity>(row: Row, projection: &[String]) -> Result<T> {
    let mut record = T::default();
    let fields = T::fields();
    for (column, value) in row {
        if !projection.is_empty() && !projection.iter().any(|p| p.trim() == column) {
            continue;
        }
        let Some(field) = resolve_field(fields, &column) else {
            tracing::trace!(column = %column, "No field for column");
            continue;
        };
        record
            .assign(field.name, value)
            .or_raise(|| ErrorKind::Conversion(format!("column {column}")))?;
    }
    Ok(record)
}

/// Eagerly turn byte sequences into text, as MySQL-family drivers return
/// most character columns as bytes.
#[cfg(any(test, feature = "mysql"))]
pub(crate) fn bytes_to_text(row: Row) -> Row {
    row.into_iter()
        .map(|(column, value)| match value {
            Value::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => (column, Value::Text(text)),
                Err(err) => (column, Value::Bytes(err.into_bytes())),
            },
            other => (column, other),
        })
        .collect()
}
