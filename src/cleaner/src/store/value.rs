//! Driver-independent column values.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use chrono::{DateTime, SecondsFormat};
use uuid::Uuid;

/// Offset of the CQL `date` encoding: day 2^31 is the Unix epoch.
const CQL_DATE_EPOCH: i64 = 1 << 31;

/// A single non-null CQL value.
///
/// Every CQL type has a variant here so that any primary key value read from
/// the store can be bound back into the `DELETE` that removes its row.
#[derive(Debug, Clone)]
pub enum ColumnValue {
    Text(String),
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Counter(i64),
    Float(f32),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    /// Days, with 2^31 as the Unix epoch.
    Date(u32),
    /// Nanoseconds since midnight.
    Time(i64),
    Uuid(Uuid),
    TimeUuid(Uuid),
    Inet(IpAddr),
    Blob(Vec<u8>),
    /// Two's complement big-endian bytes, as received.
    Varint(Vec<u8>),
    Decimal {
        unscaled: Vec<u8>,
        scale: i32,
    },
    Duration {
        months: i32,
        days: i32,
        nanoseconds: i64,
    },
    /// The legacy empty value, distinct from null.
    Empty,
    List(Vec<ColumnValue>),
    Set(Vec<ColumnValue>),
    Map(Vec<(ColumnValue, ColumnValue)>),
    Vector(Vec<ColumnValue>),
    Tuple(Vec<Option<ColumnValue>>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, Option<ColumnValue>)>,
    },
}

impl ColumnValue {
    /// Integer view, used for `WRITETIME`, `TTL` and token columns.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::TinyInt(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) | Self::Counter(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        use ColumnValue::*;
        match (self, other) {
            (Text(a), Text(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (TinyInt(a), TinyInt(b)) => a == b,
            (SmallInt(a), SmallInt(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (BigInt(a), BigInt(b)) => a == b,
            (Counter(a), Counter(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Timestamp(a), Timestamp(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (TimeUuid(a), TimeUuid(b)) => a == b,
            (Inet(a), Inet(b)) => a == b,
            (Blob(a), Blob(b)) | (Varint(a), Varint(b)) => a == b,
            (
                Decimal {
                    unscaled: a,
                    scale: sa,
                },
                Decimal {
                    unscaled: b,
                    scale: sb,
                },
            ) => a == b && sa == sb,
            (
                Duration {
                    months: ma,
                    days: da,
                    nanoseconds: na,
                },
                Duration {
                    months: mb,
                    days: db,
                    nanoseconds: nb,
                },
            ) => (ma, da, na) == (mb, db, nb),
            (Empty, Empty) => true,
            (List(a), List(b)) | (Set(a), Set(b)) | (Vector(a), Vector(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Tuple(a), Tuple(b)) => a == b,
            (
                Udt {
                    keyspace: ka,
                    name: na,
                    fields: fa,
                },
                Udt {
                    keyspace: kb,
                    name: nb,
                    fields: fb,
                },
            ) => ka == kb && na == nb && fa == fb,
            _ => false,
        }
    }
}

impl Eq for ColumnValue {}

impl Hash for ColumnValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Text(v) => v.hash(state),
            Self::Boolean(v) => v.hash(state),
            Self::TinyInt(v) => v.hash(state),
            Self::SmallInt(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::BigInt(v) | Self::Counter(v) | Self::Timestamp(v) | Self::Time(v) => {
                v.hash(state)
            }
            Self::Float(v) => v.to_bits().hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::Date(v) => v.hash(state),
            Self::Uuid(v) | Self::TimeUuid(v) => v.hash(state),
            Self::Inet(v) => v.hash(state),
            Self::Blob(v) | Self::Varint(v) => v.hash(state),
            Self::Decimal { unscaled, scale } => {
                unscaled.hash(state);
                scale.hash(state);
            }
            Self::Duration {
                months,
                days,
                nanoseconds,
            } => (months, days, nanoseconds).hash(state),
            Self::Empty => {}
            Self::List(v) | Self::Set(v) | Self::Vector(v) => v.hash(state),
            Self::Map(v) => v.hash(state),
            Self::Tuple(v) => v.hash(state),
            Self::Udt {
                keyspace,
                name,
                fields,
            } => {
                keyspace.hash(state);
                name.hash(state);
                fields.hash(state);
            }
        }
    }
}

/// Textual rendering used for logging and for the selective-delete match.
impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(v) => f.write_str(v),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::TinyInt(v) => write!(f, "{v}"),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) | Self::Counter(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Timestamp(ms) => match DateTime::from_timestamp_millis(*ms) {
                Some(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
                None => write!(f, "{ms}"),
            },
            Self::Date(days) => {
                let offset = i64::from(*days) - CQL_DATE_EPOCH;
                match offset
                    .checked_mul(86_400)
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                {
                    Some(ts) => write!(f, "{}", ts.date_naive()),
                    None => write!(f, "{offset}"),
                }
            }
            Self::Time(nanos) => {
                let secs = nanos.div_euclid(1_000_000_000);
                let sub = nanos.rem_euclid(1_000_000_000);
                match u32::try_from(secs).ok().zip(u32::try_from(sub).ok()).and_then(
                    |(secs, sub)| chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, sub),
                ) {
                    Some(time) => write!(f, "{time}"),
                    None => write!(f, "{nanos}"),
                }
            }
            Self::Uuid(v) | Self::TimeUuid(v) => write!(f, "{v}"),
            Self::Inet(v) => write!(f, "{v}"),
            Self::Blob(v) => write!(f, "0x{}", hex::encode(v)),
            Self::Varint(v) => match varint_to_i128(v) {
                Some(n) => write!(f, "{n}"),
                None => write!(f, "0x{}", hex::encode(v)),
            },
            Self::Decimal { unscaled, scale } => match varint_to_i128(unscaled) {
                Some(n) => f.write_str(&render_decimal(n, *scale)),
                None => write!(f, "0x{}E{}", hex::encode(unscaled), -i64::from(*scale)),
            },
            Self::Duration {
                months,
                days,
                nanoseconds,
            } => write!(f, "{months}mo{days}d{nanoseconds}ns"),
            Self::Empty => Ok(()),
            Self::List(v) | Self::Vector(v) => write_seq(f, "[", v.iter().map(Some), "]"),
            Self::Set(v) => write_seq(f, "{", v.iter().map(Some), "}"),
            Self::Tuple(v) => write_seq(f, "(", v.iter().map(Option::as_ref), ")"),
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Udt { fields, .. } => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match value {
                        Some(value) => write!(f, "{name}: {value}")?,
                        None => write!(f, "{name}: null")?,
                    }
                }
                f.write_str("}")
            }
        }
    }
}

fn write_seq<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: impl Iterator<Item = Option<&'a ColumnValue>>,
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        match item {
            Some(value) => write!(f, "{value}")?,
            None => f.write_str("null")?,
        }
    }
    f.write_str(close)
}

/// Sign-extend a two's complement big-endian integer that fits in 128 bits.
fn varint_to_i128(bytes: &[u8]) -> Option<i128> {
    if bytes.is_empty() || bytes.len() > 16 {
        return None;
    }
    let fill = if bytes[0] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut buf = [fill; 16];
    buf[16 - bytes.len()..].copy_from_slice(bytes);
    Some(i128::from_be_bytes(buf))
}

fn render_decimal(unscaled: i128, scale: i32) -> String {
    if scale <= 0 {
        return format!("{unscaled}E{}", -i64::from(scale));
    }
    let digits = unscaled.unsigned_abs().to_string();
    let scale = scale as usize;
    let sign = if unscaled < 0 { "-" } else { "" };
    if digits.len() > scale {
        let (int, frac) = digits.split_at(digits.len() - scale);
        format!("{sign}{int}.{frac}")
    } else {
        format!("{sign}0.{}{digits}", "0".repeat(scale - digits.len()))
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::BigInt(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Uuid> for ColumnValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}
