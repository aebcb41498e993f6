//! Upload of current on-time performance to S3.

use crate::analyzers::score::index_entry;
use crate::analyzers::types::{AgencyPerformance, OnTimePerformance, PerformanceIndex};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::info;

pub const SCHEMA_VERSION: u8 = 1;

/// Serializes a value to JSON, gzip-compressed when `gzip` is set.
pub fn encode_json(value: &impl Serialize, gzip: bool) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    if !gzip {
        return Ok(body);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&body)?;
    Ok(encoder.finish()?)
}

/// Serializes a value to JSON and uploads it to an S3 bucket with
/// `application/json` content type.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
    gzip: bool,
) -> Result<()> {
    let body = encode_json(value, gzip)?;

    let mut put = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body.into())
        .content_type("application/json");
    if gzip {
        put = put.content_encoding("gzip");
    }
    put.send()
        .await
        .with_context(|| format!("Failed to upload s3://{bucket}/{key}"))?;

    Ok(())
}

/// Groups rows into one document per agency plus the index.
pub fn build_documents(
    rows: Vec<OnTimePerformance>,
    generated_at: DateTime<Utc>,
) -> (Vec<AgencyPerformance>, PerformanceIndex) {
    let mut by_agency: BTreeMap<String, Vec<OnTimePerformance>> = BTreeMap::new();
    for row in rows {
        by_agency.entry(row.agency_id.clone()).or_default().push(row);
    }

    let mut documents = Vec::with_capacity(by_agency.len());
    let mut entries = Vec::with_capacity(by_agency.len());
    for (agency_id, routes) in by_agency {
        entries.push(index_entry(&agency_id, &routes));
        documents.push(AgencyPerformance {
            schema_version: SCHEMA_VERSION,
            agency_id,
            generated_at,
            routes,
        });
    }

    let index = PerformanceIndex {
        generated_at,
        agencies: entries,
    };
    (documents, index)
}

/// Uploads `performance/agencies/<agency_id>.json` for every agency and
/// `performance/index.json`.
pub async fn publish(
    s3: &aws_sdk_s3::Client,
    bucket: &str,
    rows: Vec<OnTimePerformance>,
    gzip: bool,
) -> Result<usize> {
    let (documents, index) = build_documents(rows, Utc::now());

    for doc in &documents {
        let key = format!("performance/agencies/{}.json", doc.agency_id);
        write_json_to_s3(s3, bucket, &key, doc, gzip).await?;
        info!(agency_id = %doc.agency_id, routes = doc.routes.len(), key = %key, "Uploaded agency performance");
    }
    write_json_to_s3(s3, bucket, "performance/index.json", &index, gzip).await?;

    Ok(documents.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn row(agency_id: &str, route_id: &str, avg: Option<f64>, trips: u64) -> OnTimePerformance {
        OnTimePerformance {
            agency_id: agency_id.into(),
            route_id: route_id.into(),
            route_short_name: None,
            route_long_name: None,
            average_delay_minutes: avg,
            total_trips: trips,
            delayed_trips: trips,
        }
    }

    #[test]
    fn documents_group_by_agency() {
        let rows = vec![
            row("MTA_NYC", "1", Some(2.0), 2),
            row("BART_SF", "R1", Some(1.0), 1),
            row("BART_SF", "R2", Some(4.0), 2),
        ];
        let (docs, index) = build_documents(rows, Utc::now());

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].agency_id, "BART_SF");
        assert_eq!(docs[0].routes.len(), 2);
        assert_eq!(index.agencies[0].total_trips, 3);
        assert_eq!(index.agencies[0].average_delay_minutes, Some(3.0));
        assert_eq!(index.agencies[1].agency_id, "MTA_NYC");
    }

    #[test]
    fn gzip_body_decodes_to_json() {
        let value = row("BART_SF", "R1", None, 1);
        let compressed = encode_json(&value, true).unwrap();

        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded.as_bytes(), encode_json(&value, false).unwrap());
        assert!(decoded.contains("\"average_delay_minutes\":null"));
    }
}
