//! Cloud-cover feed ingestion.
//!
//! Pulls the met.no locationforecast for the configured site, extracts the
//! current-hour timeseries entry, and stores it as a [`CloudRecord`] under
//! `/cloud_data`, deduplicated on the formatted observation time. One record
//! per run by construction.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SkyglowConfig;
use crate::fetch::{HttpClient, fetch_json};
use crate::ingest::{RecordKeys, load_existing_keys};
use crate::keys::format_datetime;
use crate::store::{DocumentStore, paths};

const DEDUP_FIELD: &str = "time";

/// A single cloud-cover observation, write-once per `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRecord {
    /// Observation hour, formatted `YYYY-MM-DD HH:mm:ss` (fusion join key).
    pub time: String,
    /// Cloud area fraction in percent, 0–100.
    pub cloud_area_fraction: f64,
    /// Ingestion time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Relevant slice of the locationforecast response shape:
/// `properties.timeseries[].{time, data.instant.details.cloud_area_fraction}`.
#[derive(Debug, Deserialize)]
pub struct Forecast {
    properties: ForecastProperties,
}

#[derive(Debug, Deserialize)]
struct ForecastProperties {
    timeseries: Vec<ForecastPoint>,
}

#[derive(Debug, Deserialize)]
struct ForecastPoint {
    time: DateTime<Utc>,
    data: ForecastData,
}

#[derive(Debug, Deserialize)]
struct ForecastData {
    instant: ForecastInstant,
}

#[derive(Debug, Deserialize)]
struct ForecastInstant {
    details: ForecastDetails,
}

#[derive(Debug, Deserialize)]
struct ForecastDetails {
    cloud_area_fraction: f64,
}

/// Projects the forecast's leading (current-hour) entry to a [`CloudRecord`].
pub fn current_observation(forecast: &Forecast, ingested_at_millis: i64) -> Result<CloudRecord> {
    let point = forecast
        .properties
        .timeseries
        .first()
        .ok_or_else(|| anyhow!("no timeseries data in forecast response"))?;

    Ok(CloudRecord {
        time: format_datetime(point.time),
        cloud_area_fraction: point.data.instant.details.cloud_area_fraction,
        timestamp: ingested_at_millis,
    })
}

/// Fetches the cloud-cover feed and stores the current-hour observation.
///
/// Returns 1 if a new record was stored, 0 if the observation hour was
/// already present.
#[tracing::instrument(skip_all)]
pub async fn ingest<C: HttpClient>(
    client: &C,
    store: &dyn DocumentStore,
    config: &SkyglowConfig,
) -> Result<usize> {
    let url = format!(
        "{}?lat={}&lon={}",
        config.cloud_feed_url, config.site_latitude, config.site_longitude
    );
    let forecast: Forecast = fetch_json(client, &url, &config.met_no_user_agent).await?;

    let observation = current_observation(&forecast, Utc::now().timestamp_millis())?;
    ingest_observation(store, observation).await
}

/// Dedup-and-persist half of [`ingest`], split out so tests can drive it
/// with a canned observation.
pub async fn ingest_observation(
    store: &dyn DocumentStore,
    observation: CloudRecord,
) -> Result<usize> {
    let existing = load_existing_keys(store, paths::CLOUD_DATA, DEDUP_FIELD).await?;
    if existing.contains(&observation.time) {
        debug!(time = %observation.time, "Skipping duplicate cloud observation");
        return Ok(0);
    }

    let (key, _) = RecordKeys::starting_now().next();
    let path = format!("{}/{}", paths::CLOUD_DATA, key);
    store.put(&path, serde_json::to_value(&observation)?).await?;

    info!(
        time = %observation.time,
        cloud_area_fraction = observation.cloud_area_fraction,
        "Cloud observation stored"
    );
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn forecast_json(entries: &[(&str, f64)]) -> Forecast {
        let timeseries: Vec<serde_json::Value> = entries
            .iter()
            .map(|(time, fraction)| {
                serde_json::json!({
                    "time": time,
                    "data": {"instant": {"details": {"cloud_area_fraction": fraction}}}
                })
            })
            .collect();
        serde_json::from_value(serde_json::json!({
            "properties": {"timeseries": timeseries}
        }))
        .unwrap()
    }

    #[test]
    fn test_current_observation_takes_leading_entry() {
        let forecast = forecast_json(&[
            ("2024-01-01T13:00:00Z", 42.5),
            ("2024-01-01T14:00:00Z", 80.0),
        ]);

        let record = current_observation(&forecast, 1_704_114_000_123).unwrap();
        assert_eq!(record.time, "2024-01-01 13:00:00");
        assert_eq!(record.cloud_area_fraction, 42.5);
        assert_eq!(record.timestamp, 1_704_114_000_123);
    }

    #[test]
    fn test_current_observation_requires_timeseries() {
        let forecast = forecast_json(&[]);
        assert!(current_observation(&forecast, 0).is_err());
    }

    #[tokio::test]
    async fn test_ingest_observation_stores_record() {
        let store = MemoryStore::new();
        let record = CloudRecord {
            time: "2024-01-01 13:00:00".to_string(),
            cloud_area_fraction: 42.5,
            timestamp: 1_704_114_000_123,
        };

        assert_eq!(ingest_observation(&store, record).await.unwrap(), 1);

        let records = store.children(paths::CLOUD_DATA).await.unwrap();
        assert_eq!(records.len(), 1);
        let stored = records.values().next().unwrap();
        assert_eq!(stored["cloud_area_fraction"], 42.5);
    }

    #[tokio::test]
    async fn test_ingest_observation_skips_duplicate_hour() {
        let store = MemoryStore::new();
        let record = CloudRecord {
            time: "2024-01-01 13:00:00".to_string(),
            cloud_area_fraction: 42.5,
            timestamp: 1_704_114_000_123,
        };

        assert_eq!(ingest_observation(&store, record.clone()).await.unwrap(), 1);
        // Same hour, later ingestion time: deduplicated on `time`
        let again = CloudRecord {
            timestamp: record.timestamp + 60_000,
            ..record
        };
        assert_eq!(ingest_observation(&store, again).await.unwrap(), 0);
        assert_eq!(store.children(paths::CLOUD_DATA).await.unwrap().len(), 1);
    }
}
