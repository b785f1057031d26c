//! Temporal Reinterpretation
//!
//! Presents a nanosecond `i64` column as instants or zoned date-times.
//!
//! A [`TimeColumnStore`] is the nanosecond store plus a [`TimeCodec`]: the pair
//! of pure conversions between raw nanos and the logical value. Changing the
//! presentation (another zone, plain longs) builds a new store around the same
//! `Arc`'d directory; no values are copied.
//!
//! `i64::MIN` is the null sentinel and always reads back as `None`.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{AtlasError, Result};

use super::directory::{BlockLayout, ChunkIter};
use super::immutable::{BlockLoader, ImmutableColumnStore};
use super::{ColumnSource, DynColumn, RowKey, ValueKind};

/// Raw value meaning "no timestamp"
pub const NULL_NANOS: i64 = i64::MIN;

// =============================================================================
// Conversions
// =============================================================================

/// Instant for `nanos` since the epoch, `None` for the sentinel
pub fn make_instant(nanos: i64) -> Option<DateTime<Utc>> {
    if nanos == NULL_NANOS {
        None
    } else {
        Some(DateTime::<Utc>::from_timestamp_nanos(nanos))
    }
}

/// Zoned date-time for `nanos` since the epoch, `None` for the sentinel
pub fn make_zoned(nanos: i64, zone: Tz) -> Option<DateTime<Tz>> {
    make_instant(nanos).map(|instant| instant.with_timezone(&zone))
}

/// Nanoseconds since the epoch for `value`.
///
/// Fails for instants outside the `i64` nanosecond range and for the one
/// instant that collides with [`NULL_NANOS`].
pub fn epoch_nanos<Z: TimeZone>(value: &DateTime<Z>) -> Result<i64> {
    match value.timestamp_nanos_opt() {
        Some(nanos) if nanos != NULL_NANOS => Ok(nanos),
        _ => Err(AtlasError::TimestampOutOfRange(format!(
            "{} UTC",
            value.naive_utc()
        ))),
    }
}

/// Look up an IANA zone by name
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| AtlasError::UnknownZone(name.to_string()))
}

/// Pair of pure conversions between raw nanos and a logical time value
pub trait TimeCodec: Clone + Send + Sync + 'static {
    type Value: Clone + PartialEq + fmt::Debug + Send + Sync;

    fn kind(&self) -> ValueKind;

    /// `None` exactly when `nanos` is the sentinel
    fn make_value(&self, nanos: i64) -> Option<Self::Value>;

    /// Inverse of [`make_value`](TimeCodec::make_value)
    fn to_nanos(&self, value: &Self::Value) -> Result<i64>;

    /// Wrap a store using this codec in the matching [`DynColumn`] variant
    fn wrap(store: Arc<TimeColumnStore<Self>>) -> DynColumn;
}

/// Zone-free instants in UTC
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstantCodec;

impl TimeCodec for InstantCodec {
    type Value = DateTime<Utc>;

    fn kind(&self) -> ValueKind {
        ValueKind::Instant
    }

    fn make_value(&self, nanos: i64) -> Option<DateTime<Utc>> {
        make_instant(nanos)
    }

    fn to_nanos(&self, value: &DateTime<Utc>) -> Result<i64> {
        epoch_nanos(value)
    }

    fn wrap(store: Arc<TimeColumnStore<Self>>) -> DynColumn {
        DynColumn::Instant(store)
    }
}

/// Date-times bound to one zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonedCodec {
    zone: Tz,
}

impl ZonedCodec {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }
}

impl TimeCodec for ZonedCodec {
    type Value = DateTime<Tz>;

    fn kind(&self) -> ValueKind {
        ValueKind::ZonedDateTime(self.zone)
    }

    fn make_value(&self, nanos: i64) -> Option<DateTime<Tz>> {
        make_zoned(nanos, self.zone)
    }

    // The value's own zone is irrelevant: the instant is what gets stored.
    fn to_nanos(&self, value: &DateTime<Tz>) -> Result<i64> {
        epoch_nanos(value)
    }

    fn wrap(store: Arc<TimeColumnStore<Self>>) -> DynColumn {
        DynColumn::Zoned(store)
    }
}

// =============================================================================
// Time Column Store
// =============================================================================

/// Immutable temporal column stored as nanoseconds since the epoch
pub struct TimeColumnStore<C: TimeCodec> {
    nanos: ImmutableColumnStore<i64>,
    codec: C,
}

impl<C: TimeCodec> TimeColumnStore<C> {
    /// View an existing nanosecond store through `codec`
    pub fn new(nanos: ImmutableColumnStore<i64>, codec: C) -> Self {
        Self { nanos, codec }
    }

    /// Start a bulk load for a new store
    pub fn loader(layout: BlockLayout, codec: C) -> TimeLoader<C> {
        TimeLoader {
            nanos: ImmutableColumnStore::loader(layout),
            codec,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// The underlying nanosecond store
    pub fn nanos(&self) -> &ImmutableColumnStore<i64> {
        &self.nanos
    }

    /// Raw nanos at `row_key`
    #[inline]
    pub fn get_nanos(&self, row_key: RowKey) -> i64 {
        self.nanos.get(row_key)
    }

    /// True when both stores present the same nanosecond blocks
    pub fn shares_nanos_with<D: TimeCodec>(&self, other: &TimeColumnStore<D>) -> bool {
        self.nanos.shares_directory(&other.nanos)
    }

    /// Zero-copy view of this store as `target`.
    ///
    /// Asking for the store's own kind returns this very instance.
    pub fn reinterpret(self: &Arc<Self>, target: ValueKind) -> Result<DynColumn> {
        if target == self.codec.kind() {
            return Ok(C::wrap(Arc::clone(self)));
        }
        match target {
            ValueKind::Long | ValueKind::Instant | ValueKind::ZonedDateTime(_) => {
                self.nanos.reinterpret(target)
            }
            other => Err(AtlasError::UnsupportedReinterpretation {
                from: self.codec.kind(),
                to: other,
            }),
        }
    }
}

impl TimeColumnStore<ZonedCodec> {
    pub fn zone(&self) -> Tz {
        self.codec.zone()
    }

    /// This store bound to `zone`; the same instance if it already is
    pub fn to_zone(self: &Arc<Self>, zone: Tz) -> Arc<Self> {
        if self.codec.zone() == zone {
            return Arc::clone(self);
        }
        Arc::new(TimeColumnStore::new(self.nanos.clone(), ZonedCodec::new(zone)))
    }
}

impl TimeColumnStore<InstantCodec> {
    /// Zoned view over the same nanos
    pub fn to_zone(&self, zone: Tz) -> Arc<TimeColumnStore<ZonedCodec>> {
        Arc::new(TimeColumnStore::new(self.nanos.clone(), ZonedCodec::new(zone)))
    }
}

impl<C: TimeCodec> ColumnSource for TimeColumnStore<C> {
    type Value = Option<C::Value>;
    type Chunk<'a> = TimeChunk<'a, C>
    where
        Self: 'a;

    fn kind(&self) -> ValueKind {
        self.codec.kind()
    }

    #[inline]
    fn get(&self, row_key: RowKey) -> Option<C::Value> {
        self.codec.make_value(self.nanos.get(row_key))
    }

    fn get_chunk(&self, range: Range<RowKey>) -> TimeChunk<'_, C> {
        TimeChunk {
            raw: self.nanos.get_chunk(range),
            codec: &self.codec,
        }
    }
}

impl<C: TimeCodec + fmt::Debug> fmt::Debug for TimeColumnStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeColumnStore")
            .field("codec", &self.codec)
            .field("nanos", &self.nanos)
            .finish()
    }
}

/// Lazy iterator of logical time values over a row-key range
#[derive(Clone)]
pub struct TimeChunk<'a, C: TimeCodec> {
    raw: ChunkIter<'a, i64>,
    codec: &'a C,
}

impl<C: TimeCodec> Iterator for TimeChunk<'_, C> {
    type Item = Option<C::Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.raw.next().map(|nanos| self.codec.make_value(nanos))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}

impl<C: TimeCodec> ExactSizeIterator for TimeChunk<'_, C> {}

// =============================================================================
// Bulk Loading
// =============================================================================

/// Population handle for a [`TimeColumnStore`]
pub struct TimeLoader<C: TimeCodec> {
    nanos: BlockLoader<i64>,
    codec: C,
}

impl<C: TimeCodec> TimeLoader<C> {
    /// Store a logical value; `None` stores the sentinel
    pub fn set(&mut self, row_key: RowKey, value: Option<&C::Value>) -> Result<()> {
        let nanos = match value {
            Some(value) => self.codec.to_nanos(value)?,
            None => NULL_NANOS,
        };
        self.nanos.set(row_key, nanos);
        Ok(())
    }

    /// Store raw nanos
    pub fn set_nanos(&mut self, row_key: RowKey, nanos: i64) {
        self.nanos.set(row_key, nanos);
    }

    /// Copy a contiguous run of raw nanos starting at `start`
    pub fn fill_nanos(&mut self, start: RowKey, nanos: &[i64]) {
        self.nanos.fill_from(start, nanos);
    }

    pub fn finish(self) -> Arc<TimeColumnStore<C>> {
        Arc::new(TimeColumnStore::new(self.nanos.finish(), self.codec))
    }
}
