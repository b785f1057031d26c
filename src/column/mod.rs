//! Column Module
//!
//! Block-structured, immutable, in-memory column storage.
//!
//! ## Responsibilities
//! - Map row keys to (block index, offset) with a shift/mask pair
//! - Serve lock-free reads from frozen blocks
//! - Reinterpret nanosecond `i64` columns as instants or zoned date-times
//!   without copying
//!
//! ## Layering
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ DynColumn (closed set of column variants)            │
//! └──────────────┬───────────────────────┬───────────────┘
//!                │                       │
//!                ▼                       ▼
//!   ┌──────────────────────┐   ┌─────────────────────────┐
//!   │ ImmutableColumnStore │◄──│ TimeColumnStore<Codec>  │
//!   │        <T>           │   │ (nanos + conversion fns)│
//!   └──────────┬───────────┘   └─────────────────────────┘
//!              │ Arc (shared, read-only)
//!              ▼
//!   ┌──────────────────────┐
//!   │ BlockDirectory<T>    │
//!   │ flat or two-level    │
//!   └──────────────────────┘
//! ```

mod directory;
mod immutable;
mod time;

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{AtlasError, Result};

pub use directory::{BlockDirectory, BlockLayout, BlockSlice, BlockSlices, ChunkIter};
pub use immutable::{BlockLoader, ImmutableColumnStore};
pub use time::{
    epoch_nanos, make_instant, make_zoned, parse_zone, InstantCodec, TimeChunk,
    TimeColumnStore, TimeCodec, TimeLoader, ZonedCodec, NULL_NANOS,
};

/// Logical row identifier
pub type RowKey = u64;

// =============================================================================
// Value Kinds
// =============================================================================

/// Declared logical type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Instant,
    ZonedDateTime(Tz),
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Byte => write!(f, "Byte"),
            ValueKind::Char => write!(f, "Char"),
            ValueKind::Short => write!(f, "Short"),
            ValueKind::Int => write!(f, "Int"),
            ValueKind::Long => write!(f, "Long"),
            ValueKind::Float => write!(f, "Float"),
            ValueKind::Double => write!(f, "Double"),
            ValueKind::Instant => write!(f, "Instant"),
            ValueKind::ZonedDateTime(zone) => write!(f, "ZonedDateTime[{}]", zone.name()),
        }
    }
}

impl ValueKind {
    /// True for kinds stored as nanoseconds since the epoch
    pub fn is_temporal(&self) -> bool {
        matches!(self, ValueKind::Instant | ValueKind::ZonedDateTime(_))
    }
}

// =============================================================================
// Primitive Storage Types
// =============================================================================

/// A fixed-width value that can live in a block.
///
/// Every primitive has a designated null sentinel returned for rows whose
/// block was never allocated.
pub trait Primitive: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Absent-value sentinel
    const NULL: Self;

    /// Logical kind of a plain column of this type
    const KIND: ValueKind;

    /// Encoded width in bytes
    const WIDTH: usize;

    fn put_le(self, buf: &mut impl BufMut);

    fn get_le(buf: &mut impl Buf) -> Self;

    /// Wrap a store of this type in the matching [`DynColumn`] variant
    fn wrap(store: ImmutableColumnStore<Self>) -> DynColumn;

    /// Convert to a dynamically typed value, mapping the sentinel to `Value::Null`
    fn into_value(self) -> Value;

    fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// Zero-copy reinterpretation of a store of this type.
    /// Only the identity reinterpretation is supported by default.
    fn reinterpret(store: &ImmutableColumnStore<Self>, target: ValueKind) -> Result<DynColumn> {
        if target == Self::KIND {
            Ok(Self::wrap(store.clone()))
        } else {
            Err(AtlasError::UnsupportedReinterpretation {
                from: Self::KIND,
                to: target,
            })
        }
    }
}

macro_rules! impl_primitive {
    ($ty:ty, $variant:ident, $null:expr, $put:ident, $get:ident) => {
        impl Primitive for $ty {
            const NULL: Self = $null;
            const KIND: ValueKind = ValueKind::$variant;
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn put_le(self, buf: &mut impl BufMut) {
                buf.$put(self);
            }

            fn get_le(buf: &mut impl Buf) -> Self {
                buf.$get()
            }

            fn wrap(store: ImmutableColumnStore<Self>) -> DynColumn {
                DynColumn::$variant(store)
            }

            fn into_value(self) -> Value {
                if self.is_null() {
                    Value::Null
                } else {
                    Value::$variant(self)
                }
            }
        }
    };
}

impl_primitive!(i8, Byte, i8::MIN, put_i8, get_i8);
impl_primitive!(u16, Char, u16::MAX, put_u16_le, get_u16_le);
impl_primitive!(i16, Short, i16::MIN, put_i16_le, get_i16_le);
impl_primitive!(i32, Int, i32::MIN, put_i32_le, get_i32_le);
impl_primitive!(f32, Float, -f32::MAX, put_f32_le, get_f32_le);
impl_primitive!(f64, Double, -f64::MAX, put_f64_le, get_f64_le);

impl Primitive for i64 {
    const NULL: Self = NULL_NANOS;
    const KIND: ValueKind = ValueKind::Long;
    const WIDTH: usize = 8;

    fn put_le(self, buf: &mut impl BufMut) {
        buf.put_i64_le(self);
    }

    fn get_le(buf: &mut impl Buf) -> Self {
        buf.get_i64_le()
    }

    fn wrap(store: ImmutableColumnStore<Self>) -> DynColumn {
        DynColumn::Long(store)
    }

    fn into_value(self) -> Value {
        if self.is_null() {
            Value::Null
        } else {
            Value::Long(self)
        }
    }

    /// Longs are nanoseconds since the epoch as far as temporal views care
    fn reinterpret(store: &ImmutableColumnStore<Self>, target: ValueKind) -> Result<DynColumn> {
        match target {
            ValueKind::Long => Ok(DynColumn::Long(store.clone())),
            ValueKind::Instant => Ok(DynColumn::Instant(Arc::new(TimeColumnStore::new(
                store.clone(),
                InstantCodec,
            )))),
            ValueKind::ZonedDateTime(zone) => Ok(DynColumn::Zoned(Arc::new(
                TimeColumnStore::new(store.clone(), ZonedCodec::new(zone)),
            ))),
            other => Err(AtlasError::UnsupportedReinterpretation {
                from: ValueKind::Long,
                to: other,
            }),
        }
    }
}

// =============================================================================
// Column Source Capability
// =============================================================================

/// Read surface shared by every column store
pub trait ColumnSource: Send + Sync {
    /// Value presented to callers
    type Value;

    /// Lazy, restartable sequence over a row-key range
    type Chunk<'a>: Iterator<Item = Self::Value> + Clone
    where
        Self: 'a;

    /// Declared logical type
    fn kind(&self) -> ValueKind;

    /// Value at `row_key`, or the null value if its block was never allocated.
    ///
    /// # Panics
    /// If `row_key` is at or beyond the store's capacity.
    fn get(&self, row_key: RowKey) -> Self::Value;

    /// Values for the half-open range `range`.
    ///
    /// # Panics
    /// If the range is inverted or extends beyond the store's capacity.
    fn get_chunk(&self, range: Range<RowKey>) -> Self::Chunk<'_>;
}

// =============================================================================
// Dynamic Values and Columns
// =============================================================================

/// A dynamically typed cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Instant(DateTime<Utc>),
    ZonedDateTime(DateTime<Tz>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Char(v) => match char::from_u32(u32::from(*v)) {
                Some(c) => write!(f, "{}", c),
                None => write!(f, "\\u{{{:04x}}}", v),
            },
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Instant(v) => write!(f, "{}", v.to_rfc3339()),
            Value::ZonedDateTime(v) => write!(f, "{} {}", v.to_rfc3339(), v.timezone().name()),
        }
    }
}

/// Closed set of column variants.
///
/// Primitive variants are cheap to clone (they share their directory);
/// temporal variants are reference counted so zone conversions can hand back
/// the very same instance.
#[derive(Clone)]
pub enum DynColumn {
    Byte(ImmutableColumnStore<i8>),
    Char(ImmutableColumnStore<u16>),
    Short(ImmutableColumnStore<i16>),
    Int(ImmutableColumnStore<i32>),
    Long(ImmutableColumnStore<i64>),
    Float(ImmutableColumnStore<f32>),
    Double(ImmutableColumnStore<f64>),
    Instant(Arc<TimeColumnStore<InstantCodec>>),
    Zoned(Arc<TimeColumnStore<ZonedCodec>>),
}

macro_rules! dispatch_primitive {
    ($self:expr, $store:ident => $body:expr, $time:ident => $time_body:expr) => {
        match $self {
            DynColumn::Byte($store) => $body,
            DynColumn::Char($store) => $body,
            DynColumn::Short($store) => $body,
            DynColumn::Int($store) => $body,
            DynColumn::Long($store) => $body,
            DynColumn::Float($store) => $body,
            DynColumn::Double($store) => $body,
            DynColumn::Instant($time) => $time_body,
            DynColumn::Zoned($time) => $time_body,
        }
    };
}

impl DynColumn {
    pub fn kind(&self) -> ValueKind {
        dispatch_primitive!(self, s => s.kind(), t => t.kind())
    }

    /// Exclusive upper bound on row keys
    pub fn capacity(&self) -> u64 {
        dispatch_primitive!(self, s => s.layout().capacity(), t => t.nanos().layout().capacity())
    }

    /// Dynamically typed value at `row_key`
    pub fn get_value(&self, row_key: RowKey) -> Value {
        match self {
            DynColumn::Byte(s) => s.get(row_key).into_value(),
            DynColumn::Char(s) => s.get(row_key).into_value(),
            DynColumn::Short(s) => s.get(row_key).into_value(),
            DynColumn::Int(s) => s.get(row_key).into_value(),
            DynColumn::Long(s) => s.get(row_key).into_value(),
            DynColumn::Float(s) => s.get(row_key).into_value(),
            DynColumn::Double(s) => s.get(row_key).into_value(),
            DynColumn::Instant(t) => t.get(row_key).map_or(Value::Null, Value::Instant),
            DynColumn::Zoned(t) => t.get(row_key).map_or(Value::Null, Value::ZonedDateTime),
        }
    }

    /// Zero-copy view of this column as `target`
    pub fn reinterpret(&self, target: ValueKind) -> Result<DynColumn> {
        dispatch_primitive!(self, s => s.reinterpret(target), t => t.reinterpret(target))
    }

    /// Zoned view of a temporal column; the same instance when already bound to `zone`
    pub fn to_zone(&self, zone: Tz) -> Result<DynColumn> {
        match self {
            DynColumn::Instant(t) => Ok(DynColumn::Zoned(t.to_zone(zone))),
            DynColumn::Zoned(t) => Ok(DynColumn::Zoned(t.to_zone(zone))),
            other => Err(AtlasError::UnsupportedReinterpretation {
                from: other.kind(),
                to: ValueKind::ZonedDateTime(zone),
            }),
        }
    }

    pub fn as_long(&self) -> Option<&ImmutableColumnStore<i64>> {
        match self {
            DynColumn::Long(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<&Arc<TimeColumnStore<InstantCodec>>> {
        match self {
            DynColumn::Instant(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_zoned(&self) -> Option<&Arc<TimeColumnStore<ZonedCodec>>> {
        match self {
            DynColumn::Zoned(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Debug for DynColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynColumn")
            .field("kind", &self.kind())
            .field("capacity", &self.capacity())
            .finish()
    }
}
