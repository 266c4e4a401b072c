//! Driver-neutral column values.

use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use std::fmt;
use std::hash::{Hash, Hasher};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// A single column value, as bound to a statement or read back from a row.
///
/// Equality and hashing compare floating point values by bit pattern, which
/// makes `Value` usable inside cache keys (`NaN == NaN` here).
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(Timestamp),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, used in conversion errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::UInt(_) => "unsigned integer",
            Self::Real(_) => "float",
            Self::Text(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::UInt(value) => i64::try_from(*value).ok(),
            Self::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(value) => Some(*value),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {},
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::UInt(v) => v.hash(state),
            Self::Real(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
            Self::Bytes(v) => v.hash(state),
            Self::Timestamp(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
            Self::Timestamp(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Self::Int(i64::from(value))
            }
        }
    )*};
}
impl_from_signed!(i8, i16, i32, i64);

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Self::UInt(u64::from(value))
            }
        }
    )*};
}
impl_from_unsigned!(u8, u16, u32, u64);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Real(f64::from(value))
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}
impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}
impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Self::Timestamp(value)
    }
}
impl From<PrimitiveDateTime> for Value {
    fn from(value: PrimitiveDateTime) -> Self {
        Self::Timestamp(Timestamp(value))
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Build a `Vec<Value>` from heterogeneous arguments.
///
/// ```
/// use kiln_orm::{args, Value};
///
/// let args = args!["a@x", 1, true];
/// assert_eq!(args, vec![Value::from("a@x"), Value::Int(1), Value::Bool(true)]);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($arg)),+]
    };
}

/// Timestamp without a time zone, at second precision.
///
/// Only two textual forms are accepted when parsing:
///
/// - `YYYY-MM-DDTHH:MM` (16 characters or more; trailing text is ignored)
/// - `YYYY-MM-DD HH:MM:SS` (19 characters or more; trailing text is ignored)
///
/// Anything else is rejected rather than silently becoming the zero value.
/// The zero value ([`Default`]) is the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub PrimitiveDateTime);

impl Default for Timestamp {
    fn default() -> Self {
        Self(PrimitiveDateTime::new(OffsetDateTime::UNIX_EPOCH.date(), OffsetDateTime::UNIX_EPOCH.time()))
    }
}

impl Timestamp {
    /// Current UTC wall-clock time, truncated to whole seconds.
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        let now = now.replace_nanosecond(0).unwrap_or(now);
        Self(PrimitiveDateTime::new(now.date(), now.time()))
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let seconds = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let minutes = format_description!("[year]-[month]-[day]T[hour]:[minute]");
        if let Some(head) = input.get(..19).filter(|h| h.as_bytes().get(10) == Some(&b' ')) {
            if let Ok(parsed) = PrimitiveDateTime::parse(head, seconds) {
                return Ok(Self(parsed));
            }
        }
        let head = input
            .get(..16)
            .filter(|h| h.as_bytes().get(10) == Some(&b'T'))
            .ok_or_raise(|| ErrorKind::Conversion(format!("unrecognised timestamp: {input:?}")))?;
        PrimitiveDateTime::parse(head, minutes)
            .map(Self)
            .map_err(|_| exn::Exn::new(ErrorKind::Conversion(format!("unrecognised timestamp: {input:?}"))))
    }

    /// Render as `YYYY-MM-DD HH:MM:SS`, the form every supported dialect
    /// accepts for a timestamp literal.
    pub fn to_sql_string(&self) -> String {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        self.0.format(format).unwrap_or_default()
    }

    /// Render as ISO-8601 `YYYY-MM-DDTHH:MM`.
    pub fn to_iso_minutes(&self) -> String {
        let format = format_description!("[year]-[month]-[day]T[hour]:[minute]");
        self.0.format(format).unwrap_or_default()
    }

    /// Seconds between two timestamps, ignoring sign.
    pub fn abs_diff_seconds(&self, other: &Self) -> u64 {
        (self.0 - other.0).whole_seconds().unsigned_abs()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_string())
    }
}

impl From<PrimitiveDateTime> for Timestamp {
    fn from(value: PrimitiveDateTime) -> Self {
        Self(value)
    }
}
