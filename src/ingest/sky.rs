//! Sky-brightness feed ingestion.
//!
//! The feed is an HTML page wrapping one `<pre>` block of CSV text: first
//! line headers, one record per subsequent line. Records are stored verbatim
//! as flat column→value maps under `/open_data`, deduplicated on the
//! `UT_datetime` column.

use anyhow::{Result, anyhow};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::SkyglowConfig;
use crate::fetch::{HttpClient, fetch_text};
use crate::ingest::{RecordKeys, load_existing_keys};
use crate::store::{DocumentStore, paths};

/// Cap on newly accepted records per run: ~4 days of hourly submissions at
/// this site's cadence, bounding per-run write volume.
pub const BATCH_CAP: usize = 96;

const DEDUP_FIELD: &str = "UT_datetime";

static PRE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<pre>(.*?)</pre>").unwrap());

/// One parsed feed record: CSV column name → raw string value.
pub type SkyRecord = BTreeMap<String, String>;

/// Extracts the CSV block from the feed page and parses it into records.
///
/// Rows shorter than the header are padded with empty strings. A payload
/// with no `<pre>` block or no data rows is a terminal parse error.
pub fn parse_records(html: &str) -> Result<Vec<SkyRecord>> {
    let block = PRE_BLOCK
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| anyhow!("no <pre> CSV block in feed payload"))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(block.as_str().trim().as_bytes());

    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut record = SkyRecord::new();
        for (i, header) in headers.iter().enumerate() {
            record.insert(header.to_string(), row.get(i).unwrap_or("").to_string());
        }
        records.push(record);
    }

    if records.is_empty() {
        return Err(anyhow!("no records in feed CSV"));
    }
    Ok(records)
}

/// Fetches the sky-brightness feed and stores new records.
///
/// Returns the count of newly stored records. Fetch and parse failures are
/// terminal for the run; nothing has been written at that point.
#[tracing::instrument(skip_all)]
pub async fn ingest<C: HttpClient>(
    client: &C,
    store: &dyn DocumentStore,
    config: &SkyglowConfig,
) -> Result<usize> {
    let html = fetch_text(client, &config.sky_feed_url).await?;
    ingest_payload(store, &html).await
}

/// Dedup-and-persist half of [`ingest`], split out so tests can drive it
/// with a canned payload.
pub async fn ingest_payload(store: &dyn DocumentStore, html: &str) -> Result<usize> {
    let records = parse_records(html)?;
    let total = records.len();
    info!(parsed = total, "Sky feed parsed");

    let existing = load_existing_keys(store, paths::OPEN_DATA, DEDUP_FIELD).await?;

    let mut seen_in_batch = HashSet::new();
    let mut keys = RecordKeys::starting_now();
    let mut writes = BTreeMap::new();
    let mut skipped = 0usize;

    for (position, mut record) in records.into_iter().enumerate() {
        if writes.len() >= BATCH_CAP {
            warn!(
                deferred = total - position,
                cap = BATCH_CAP,
                "Batch cap reached, remaining records deferred to the next run"
            );
            break;
        }

        let id = record.get(DEDUP_FIELD).cloned().unwrap_or_default();
        if !id.is_empty() && (existing.contains(&id) || !seen_in_batch.insert(id.clone())) {
            debug!(%id, "Skipping duplicate sky record");
            skipped += 1;
            continue;
        }

        let (key, negated) = keys.next();
        record.insert("negative_timestamp".to_string(), negated.to_string());
        writes.insert(
            format!("{}/{}", paths::OPEN_DATA, key),
            serde_json::to_value(&record)?,
        );
    }

    let stored = writes.len();
    if stored == 0 {
        info!("No new sky records to store");
        return Ok(0);
    }

    // One multi-path update; individual records stay independently keyed so
    // a partial failure never rolls back siblings.
    store.update(writes).await?;
    info!(stored, skipped, "Sky feed ingestion complete");
    Ok(stored)
}
