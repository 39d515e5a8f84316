//! Fusion of the three time-keyed datasets into one comparable series.
//!
//! Pure functions of pre-fetched store snapshots: each source is normalized
//! to a time-label-keyed projection, then outer-joined over the union of all
//! time labels. Fields a source lacks default to 0.0 / "".

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::warn;

/// One row of the unified series, keyed by its hour label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnifiedEntry {
    pub time: String,
    pub light_level_aggregated: f64,
    pub cloud_cover_aggregated: f64,
    pub location_aggregated: String,
    pub light_level_open: f64,
    pub cloud_cover_open: f64,
    pub location_open: String,
}

struct AggregatedPoint {
    light_level: f64,
    location: String,
}

struct CloudPoint {
    cloud_cover: f64,
}

struct OpenPoint {
    light_level: f64,
    cloud_cover: f64,
    location: String,
}

static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)%").unwrap());

/// Extracts the first integer percentage from a free-text conditions field.
///
/// Absent input or text with no `NN%` token yields 0 with a warning; the
/// feed's conditions column is free-form and frequently omits a number.
pub fn parse_percentage(conditions: Option<&str>) -> f64 {
    let Some(text) = conditions else {
        warn!("Missing cloud conditions field");
        return 0.0;
    };

    match PERCENT.captures(text).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().parse().unwrap_or(0.0),
        None => {
            warn!(conditions = text, "No percentage in cloud conditions");
            0.0
        }
    }
}

/// Two-level walk of the aggregated subtree: geohash cell, then time slot.
fn normalize_aggregated(snapshot: &BTreeMap<String, Value>) -> HashMap<String, AggregatedPoint> {
    let mut points = HashMap::new();

    for cell in snapshot.values() {
        let Some(slots) = cell.as_object() else {
            continue;
        };
        for bucket in slots.values() {
            let Some(hour) = bucket.get("hour_label").and_then(Value::as_str) else {
                continue;
            };
            let Some(average) = bucket.get("average_light").and_then(Value::as_f64) else {
                continue;
            };
            let location = bucket
                .get("location_label")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();

            points.insert(
                hour.to_string(),
                AggregatedPoint {
                    light_level: average,
                    location,
                },
            );
        }
    }

    points
}

fn normalize_cloud(snapshot: &BTreeMap<String, Value>) -> HashMap<String, CloudPoint> {
    let mut points = HashMap::new();

    for record in snapshot.values() {
        let Some(time) = record.get("time").and_then(Value::as_str) else {
            continue;
        };
        let cloud_cover = record
            .get("cloud_area_fraction")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        points.insert(time.to_string(), CloudPoint { cloud_cover });
    }

    points
}

fn normalize_open(snapshot: &BTreeMap<String, Value>) -> HashMap<String, OpenPoint> {
    let mut points = HashMap::new();

    for record in snapshot.values() {
        let Some(time) = record.get("UT_datetime").and_then(Value::as_str) else {
            continue;
        };

        let brightness = record.get("Brightness").and_then(Value::as_str);
        let light_level = match brightness.map(str::parse::<f64>) {
            Some(Ok(level)) if level.is_finite() => level,
            _ => {
                warn!(time, "Unparseable brightness in open record, using 0");
                0.0
            }
        };

        let cloud_cover =
            parse_percentage(record.get("Conditions").and_then(Value::as_str));
        let location = record
            .get("Site description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        points.insert(
            time.to_string(),
            OpenPoint {
                light_level,
                cloud_cover,
                location,
            },
        );
    }

    points
}

/// Outer-joins the three snapshots over the union of their time labels.
///
/// Performs no I/O; snapshots come from subtree reads done by the caller.
/// The `BTreeMap` result fixes one consistent time ordering for everything
/// downstream.
pub fn fuse(
    aggregated: &BTreeMap<String, Value>,
    cloud: &BTreeMap<String, Value>,
    open: &BTreeMap<String, Value>,
) -> BTreeMap<String, UnifiedEntry> {
    let aggregated = normalize_aggregated(aggregated);
    let cloud = normalize_cloud(cloud);
    let open = normalize_open(open);

    let mut times: Vec<&String> = aggregated
        .keys()
        .chain(cloud.keys())
        .chain(open.keys())
        .collect();
    times.sort();
    times.dedup();

    let mut unified = BTreeMap::new();
    for time in times {
        let mut entry = UnifiedEntry {
            time: time.clone(),
            ..UnifiedEntry::default()
        };
        if let Some(point) = aggregated.get(time) {
            entry.light_level_aggregated = point.light_level;
            entry.location_aggregated = point.location.clone();
        }
        if let Some(point) = cloud.get(time) {
            entry.cloud_cover_aggregated = point.cloud_cover;
        }
        if let Some(point) = open.get(time) {
            entry.light_level_open = point.light_level;
            entry.cloud_cover_open = point.cloud_cover;
            entry.location_open = point.location.clone();
        }
        unified.insert(time.clone(), entry);
    }

    unified
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_percentage_extracts_first_match() {
        assert_eq!(parse_percentage(Some("Mostly Cloudy 40%")), 40.0);
        assert_eq!(parse_percentage(Some("10% then 90%")), 10.0);
    }

    #[test]
    fn test_parse_percentage_defaults_to_zero() {
        assert_eq!(parse_percentage(None), 0.0);
        assert_eq!(parse_percentage(Some("clear")), 0.0);
        assert_eq!(parse_percentage(Some("")), 0.0);
    }

    fn aggregated_snapshot() -> BTreeMap<String, Value> {
        BTreeMap::from([(
            "gc7x9".to_string(),
            json!({
                "20240101T00": {
                    "count": 2,
                    "total_light": 30.0,
                    "average_light": 15.0,
                    "latitude": 53.35,
                    "longitude": -6.26,
                    "hour_label": "2024-01-01 00:00:00",
                    "location_label": "County Dublin"
                }
            }),
        )])
    }

    fn cloud_snapshot() -> BTreeMap<String, Value> {
        BTreeMap::from([(
            "key_-1".to_string(),
            json!({
                "time": "2024-01-01 01:00:00",
                "cloud_area_fraction": 75.0,
                "timestamp": 1_704_070_800_000_i64
            }),
        )])
    }

    fn open_snapshot() -> BTreeMap<String, Value> {
        BTreeMap::from([(
            "key_-2".to_string(),
            json!({
                "UT_datetime": "2024-01-01 00:00:00",
                "Brightness": "21.3",
                "Conditions": "Cloudy 80%",
                "Site description": "Hilltop site",
                "negative_timestamp": "-1704067200000"
            }),
        )])
    }

    #[test]
    fn test_fuse_key_set_is_union_of_sources() {
        let unified = fuse(&aggregated_snapshot(), &cloud_snapshot(), &BTreeMap::new());

        let times: Vec<&str> = unified.keys().map(String::as_str).collect();
        assert_eq!(times, ["2024-01-01 00:00:00", "2024-01-01 01:00:00"]);

        // Each entry defaults the other source's fields
        let first = &unified["2024-01-01 00:00:00"];
        assert_eq!(first.light_level_aggregated, 15.0);
        assert_eq!(first.cloud_cover_aggregated, 0.0);
        assert_eq!(first.location_open, "");

        let second = &unified["2024-01-01 01:00:00"];
        assert_eq!(second.cloud_cover_aggregated, 75.0);
        assert_eq!(second.light_level_aggregated, 0.0);
        assert_eq!(second.location_aggregated, "");
    }

    #[test]
    fn test_fuse_overlays_all_sources_on_shared_key() {
        let unified = fuse(&aggregated_snapshot(), &BTreeMap::new(), &open_snapshot());

        assert_eq!(unified.len(), 1);
        let entry = &unified["2024-01-01 00:00:00"];
        assert_eq!(entry.light_level_aggregated, 15.0);
        assert_eq!(entry.location_aggregated, "County Dublin");
        assert_eq!(entry.light_level_open, 21.3);
        assert_eq!(entry.cloud_cover_open, 80.0);
        assert_eq!(entry.location_open, "Hilltop site");
    }

    #[test]
    fn test_fuse_empty_sources_yield_empty_series() {
        let unified = fuse(&BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new());
        assert!(unified.is_empty());
    }

    #[test]
    fn test_fuse_treats_unparseable_brightness_as_zero() {
        let open = BTreeMap::from([(
            "key_-3".to_string(),
            json!({
                "UT_datetime": "2024-01-01 02:00:00",
                "Brightness": "n/a",
                "Conditions": "clear"
            }),
        )]);

        let unified = fuse(&BTreeMap::new(), &BTreeMap::new(), &open);
        let entry = &unified["2024-01-01 02:00:00"];
        assert_eq!(entry.light_level_open, 0.0);
        assert_eq!(entry.cloud_cover_open, 0.0);
    }
}
