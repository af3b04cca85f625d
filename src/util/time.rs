//! Integer timestamp conversions used on the wire and in cache entries.

use time::OffsetDateTime;
use time::error::ComponentRange;

/// Unix timestamp in microseconds, the resolution Postgres keeps.
pub fn to_unix_micros(value: OffsetDateTime) -> i64 {
    // Every representable OffsetDateTime fits in i64 microseconds.
    (value.unix_timestamp_nanos() / 1_000) as i64
}

pub fn from_unix_micros(micros: i64) -> Result<OffsetDateTime, ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
}
