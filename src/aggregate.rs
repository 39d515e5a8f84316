//! Transactional aggregation of readings into spatio-temporal buckets.
//!
//! The merge itself is a pure function of (current bucket, reading) so the
//! store is free to re-invoke it on a write conflict. All concurrency lives
//! in the store's transaction loop; nothing here takes locks.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info};

use crate::keys::{geohash, hour_label, time_slot_key};
use crate::reading::Reading;
use crate::store::{DocumentStore, paths};

/// Geohash precision for bucket cells (5 chars ≈ 4.9 km).
pub const GEOHASH_PRECISION: usize = 5;

/// Static location label for aggregated buckets. Reverse geocoding is wired
/// in for raw single readings elsewhere, not in this path.
const LOCATION_PLACEHOLDER: &str = "County Dublin";

/// Running aggregate of all readings sharing one geohash cell and hour.
///
/// `average_light == total_light / count` holds after every merge; latitude
/// and longitude are weighted running centroids, not the latest point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightBucket {
    pub count: u64,
    pub total_light: f64,
    pub average_light: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub hour_label: String,
    pub location_label: String,
}

/// Folds one reading into a bucket, initializing it on first contact.
///
/// Total and side-effect-free: safe to re-invoke under transaction retry.
pub fn merge(current: Option<LightBucket>, reading: &Reading) -> LightBucket {
    match current {
        None => LightBucket {
            count: 1,
            total_light: reading.light_level,
            average_light: reading.light_level,
            latitude: reading.latitude,
            longitude: reading.longitude,
            hour_label: hour_label(reading.timestamp),
            location_label: LOCATION_PLACEHOLDER.to_string(),
        },
        Some(bucket) => {
            let count = bucket.count + 1;
            let total = bucket.total_light + reading.light_level;
            LightBucket {
                count,
                total_light: total,
                average_light: total / count as f64,
                latitude: (bucket.latitude * bucket.count as f64 + reading.latitude)
                    / count as f64,
                longitude: (bucket.longitude * bucket.count as f64 + reading.longitude)
                    / count as f64,
                hour_label: bucket.hour_label,
                location_label: bucket.location_label,
            }
        }
    }
}

impl From<&LightBucket> for Value {
    fn from(bucket: &LightBucket) -> Value {
        json!({
            "count": bucket.count,
            "total_light": bucket.total_light,
            "average_light": bucket.average_light,
            "latitude": bucket.latitude,
            "longitude": bucket.longitude,
            "hour_label": bucket.hour_label,
            "location_label": bucket.location_label,
        })
    }
}

/// Applies a validated reading to its bucket via a store transaction.
///
/// Invalid readings are logged and dropped without touching the store. A
/// transaction that cannot commit within the store's retry budget is also
/// logged and swallowed: aggregation is best-effort, the triggering event is
/// not redelivered.
#[tracing::instrument(skip(store, reading), fields(lat = reading.latitude, lon = reading.longitude))]
pub async fn aggregate_reading(store: &dyn DocumentStore, reading: &Reading) -> Result<()> {
    if let Some(reason) = reading.rejection_reason() {
        error!(
            reason,
            light_level = reading.light_level,
            "Dropping invalid reading"
        );
        return Ok(());
    }

    let cell = geohash(reading.latitude, reading.longitude, GEOHASH_PRECISION);
    let slot = time_slot_key(reading.timestamp);
    let path = format!("{}/{}/{}", paths::AGGREGATED_DATA, cell, slot);

    let folded = reading.clone();
    let apply = move |current: Option<Value>| -> Value {
        let bucket = merge(
            current.and_then(|doc| serde_json::from_value::<LightBucket>(doc).ok()),
            &folded,
        );
        Value::from(&bucket)
    };

    match store.transaction(&path, &apply).await {
        Ok(()) => {
            info!(%cell, %slot, "Reading aggregated");
            Ok(())
        }
        Err(e) => {
            error!(%cell, %slot, error = %e, "Bucket transaction failed, reading lost");
            Ok(())
        }
    }
}

static READING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persists a raw reading verbatim for audit and export.
///
/// Raw copies are retained regardless of validity; validation happens at
/// aggregation time.
pub async fn record_reading(store: &dyn DocumentStore, reading: &Reading) -> Result<String> {
    let id = format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        READING_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let path = format!("{}/{}", paths::LIGHT_SENSOR_DATA, id);
    store.put(&path, serde_json::to_value(reading)?).await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn reading(lat: f64, lon: f64, ts: i64, light: f64) -> Reading {
        Reading {
            latitude: lat,
            longitude: lon,
            timestamp: ts,
            light_level: light,
        }
    }

    const TS: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z

    #[test]
    fn test_merge_initializes_bucket() {
        let bucket = merge(None, &reading(53.35, -6.26, TS, 12.0));

        assert_eq!(bucket.count, 1);
        assert_eq!(bucket.total_light, 12.0);
        assert_eq!(bucket.average_light, 12.0);
        assert_eq!(bucket.latitude, 53.35);
        assert_eq!(bucket.hour_label, "2024-01-01 00:00:00");
        assert_eq!(bucket.location_label, "County Dublin");
    }

    #[test]
    fn test_merge_maintains_average_invariant() {
        let mut bucket = None;
        for light in [10.0, 20.0, 60.0] {
            let next = merge(bucket, &reading(53.35, -6.26, TS, light));
            assert_eq!(next.average_light, next.total_light / next.count as f64);
            bucket = Some(next);
        }

        let bucket = bucket.unwrap();
        assert_eq!(bucket.count, 3);
        assert_eq!(bucket.total_light, 90.0);
        assert_eq!(bucket.average_light, 30.0);
    }

    #[test]
    fn test_merge_is_commutative_on_count_and_total() {
        let r1 = reading(53.35, -6.26, TS, 10.0);
        let r2 = reading(53.36, -6.27, TS, 30.0);

        let ab = merge(Some(merge(None, &r1)), &r2);
        let ba = merge(Some(merge(None, &r2)), &r1);

        assert_eq!(ab.count, ba.count);
        assert_eq!(ab.total_light, ba.total_light);
        assert_eq!(ab.average_light, ba.average_light);
    }

    #[test]
    fn test_merge_computes_running_centroid() {
        let first = merge(None, &reading(53.0, -6.0, TS, 10.0));
        let second = merge(Some(first), &reading(54.0, -7.0, TS, 10.0));

        assert_eq!(second.latitude, 53.5);
        assert_eq!(second.longitude, -6.5);

        // Weighted, not a plain midpoint: two readings at 53.0 pull harder
        let third = merge(Some(second), &reading(53.0, -6.0, TS, 10.0));
        assert!((third.latitude - 53.333333).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_aggregate_reading_writes_bucket() {
        let store = MemoryStore::new();
        aggregate_reading(&store, &reading(53.3498, -6.2603, TS, 15.0))
            .await
            .unwrap();

        let doc = store
            .get("/aggregated_data/gc7x9/20240101T00")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["count"], 1);
        assert_eq!(doc["average_light"], 15.0);
    }

    #[tokio::test]
    async fn test_aggregate_invalid_reading_is_noop() {
        let store = MemoryStore::new();
        aggregate_reading(&store, &reading(0.0, 0.0, TS, 15.0))
            .await
            .unwrap();

        assert!(
            store
                .children(paths::AGGREGATED_DATA)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_aggregate_same_bucket_accumulates() {
        let store = MemoryStore::new();
        aggregate_reading(&store, &reading(53.3498, -6.2603, TS, 10.0))
            .await
            .unwrap();
        aggregate_reading(&store, &reading(53.3499, -6.2604, TS + 60_000, 30.0))
            .await
            .unwrap();

        let doc = store
            .get("/aggregated_data/gc7x9/20240101T00")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["count"], 2);
        assert_eq!(doc["total_light"], 40.0);
        assert_eq!(doc["average_light"], 20.0);
    }

    #[tokio::test]
    async fn test_record_reading_keeps_raw_copy() {
        let store = MemoryStore::new();
        let id = record_reading(&store, &reading(53.3498, -6.2603, TS, 15.0))
            .await
            .unwrap();

        let doc = store
            .get(&format!("{}/{}", paths::LIGHT_SENSOR_DATA, id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["light_level"], 15.0);
    }
}
