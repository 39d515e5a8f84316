//! Geospatial and temporal bucketing keys.
//!
//! Readings are bucketed by a fixed-precision geohash cell and the top of the
//! UTC hour they fall in. The hour label produced here doubles as the join key
//! for data fusion, so it must match the cloud-feed time format byte for byte.

use chrono::{DateTime, Utc};

const BASE32: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Encodes a latitude/longitude pair as a base-32 geohash string.
///
/// Standard geohash bisection: longitude and latitude bits are interleaved,
/// five bits per output character. Precision 5 gives a cell of roughly 4.9 km.
pub fn geohash(latitude: f64, longitude: f64, precision: usize) -> String {
    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lon_lo, mut lon_hi) = (-180.0_f64, 180.0_f64);

    let mut hash = String::with_capacity(precision);
    let mut bits = 0u8;
    let mut ch = 0usize;
    let mut even = true;

    while hash.len() < precision {
        if even {
            let mid = (lon_lo + lon_hi) / 2.0;
            if longitude >= mid {
                ch = (ch << 1) | 1;
                lon_lo = mid;
            } else {
                ch <<= 1;
                lon_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if latitude >= mid {
                ch = (ch << 1) | 1;
                lat_lo = mid;
            } else {
                ch <<= 1;
                lat_hi = mid;
            }
        }
        even = !even;
        bits += 1;
        if bits == 5 {
            hash.push(BASE32[ch] as char);
            bits = 0;
            ch = 0;
        }
    }

    hash
}

/// Truncates a millisecond timestamp to the start of its UTC hour.
fn hour_start(timestamp_millis: i64) -> DateTime<Utc> {
    let secs = timestamp_millis.div_euclid(1000);
    let hour = secs - secs.rem_euclid(3600);
    DateTime::from_timestamp(hour, 0).unwrap_or_default()
}

/// Hour-aligned storage key segment, formatted `YYYYMMDDTHH`.
///
/// Contains no characters that are illegal in a hierarchical store path.
pub fn time_slot_key(timestamp_millis: i64) -> String {
    hour_start(timestamp_millis).format("%Y%m%dT%H").to_string()
}

/// Human-readable hour label, formatted `YYYY-MM-DD HH:00:00`.
///
/// Must stay byte-identical to [`format_datetime`] applied to the same
/// hour-truncated instant; fusion joins on this string.
pub fn hour_label(timestamp_millis: i64) -> String {
    hour_start(timestamp_millis)
        .format("%Y-%m-%d %H:00:00")
        .to_string()
}

/// Formats an instant as `YYYY-MM-DD HH:mm:ss` in UTC.
///
/// Used for cloud-record time fields so they line up with [`hour_label`].
pub fn format_datetime(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S").to_string()
}
