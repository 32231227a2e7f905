// logpulse/src/ingest.rs
//
// Ingestion pipeline: batch in, Tier-1 points out.
//
// Two wire shapes are accepted per record: the flat form
//   { TimeUnixNano, SeverityText, Body, Attributes: [{key, value}] }
// and the nested OTLP form
//   { resourceLogs: [{ resource: { attributes }, scopeLogs: [{ logRecords }] }] }
//
// Malformed records are dropped with a warning; the batch proceeds. The
// upsert is fire-and-forget (wait=false); an upsert failure fails the batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embed::{EmbedError, Embedder};
use crate::events::{ParsedLog, Tier1Payload};
use crate::fingerprint::Fingerprinter;
use crate::gateway::types::{PointStruct, PointVectors};
use crate::gateway::{GatewayError, VectorGateway};

const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("tier-1 upsert failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),
}

pub struct IngestionPipeline {
    gateway:       Arc<VectorGateway>,
    fingerprinter: Fingerprinter,
    embedder:      Embedder,
    total_ingested: AtomicU64,
}

impl IngestionPipeline {
    pub fn new(gateway: Arc<VectorGateway>, fingerprinter: Fingerprinter) -> Self {
        Self {
            gateway,
            fingerprinter,
            embedder: Embedder,
            total_ingested: AtomicU64::new(0),
        }
    }

    pub fn total_ingested(&self) -> u64 {
        self.total_ingested.load(Ordering::Relaxed)
    }

    /// Ingest one batch; returns the number of accepted Tier-1 points.
    pub async fn ingest_batch(&self, batch: Vec<Value>) -> Result<usize, IngestError> {
        let parsed = parse_batch(&batch);
        if parsed.is_empty() {
            return Ok(0);
        }

        let mut templates = Vec::with_capacity(parsed.len());
        let mut payloads  = Vec::with_capacity(parsed.len());
        for record in &parsed {
            let (template, rhythm_hash) = self.fingerprinter.fingerprint(
                &record.service,
                &record.severity,
                &record.body,
            );
            templates.push(template);
            payloads.push(Tier1Payload::from_parsed(record, rhythm_hash));
        }

        let vectors = self.embedder.tier1_batch(templates).await?;

        let points: Vec<PointStruct> = payloads
            .into_iter()
            .zip(vectors)
            .map(|(payload, vector)| PointStruct {
                id:      Uuid::new_v4().to_string(),
                vectors: PointVectors::Plain(vector),
                payload: serde_json::to_value(&payload).unwrap_or(Value::Null),
            })
            .collect();

        let accepted = points.len();
        self.gateway.upsert_tier1(points).await?;
        self.total_ingested.fetch_add(accepted as u64, Ordering::Relaxed);
        debug!(accepted, "tier-1 batch ingested");
        Ok(accepted)
    }
}

// ── Wire parsing ──────────────────────────────────────────────────────────────

fn parse_batch(batch: &[Value]) -> Vec<ParsedLog> {
    let mut out = Vec::new();
    for (i, record) in batch.iter().enumerate() {
        if record.get("resourceLogs").is_some() {
            parse_otlp_envelope(record, &mut out);
        } else {
            match parse_flat(record) {
                Some(parsed) => out.push(parsed),
                None => warn!(index = i, "dropping malformed log record"),
            }
        }
    }
    out
}

fn ts_seconds_from_nanos(v: &Value) -> Option<i64> {
    let nanos = match v {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse::<i64>().ok()?,
        _ => return None,
    };
    if nanos <= 0 {
        return None;
    }
    Some(nanos / NANOS_PER_SEC)
}

fn flat_attribute(record: &Value, key: &str) -> Option<String> {
    record
        .get("Attributes")?
        .as_array()?
        .iter()
        .find(|attr| attr.get("key").and_then(Value::as_str) == Some(key))
        .and_then(|attr| attr.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_flat(record: &Value) -> Option<ParsedLog> {
    let ts   = ts_seconds_from_nanos(record.get("TimeUnixNano")?)?;
    let body = record.get("Body")?.as_str()?.to_string();
    let severity = record
        .get("SeverityText")
        .and_then(Value::as_str)
        .unwrap_or("INFO")
        .to_string();
    let service = flat_attribute(record, "service.name").unwrap_or_else(|| "unknown".to_string());

    Some(ParsedLog {
        ts,
        service,
        severity,
        body,
        raw: record.clone(),
    })
}

/// OTLP AnyValue → plain string, for attribute resolution.
fn any_value_str(value: &Value) -> Option<String> {
    if let Some(s) = value.get("stringValue").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    if let Some(n) = value.get("intValue") {
        return match n {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        };
    }
    if let Some(f) = value.get("doubleValue").and_then(Value::as_f64) {
        return Some(f.to_string());
    }
    if let Some(b) = value.get("boolValue").and_then(Value::as_bool) {
        return Some(b.to_string());
    }
    None
}

fn otlp_attribute(attrs: Option<&Value>, key: &str) -> Option<String> {
    attrs?
        .as_array()?
        .iter()
        .find(|attr| attr.get("key").and_then(Value::as_str) == Some(key))
        .and_then(|attr| attr.get("value"))
        .and_then(any_value_str)
}

fn parse_otlp_envelope(envelope: &Value, out: &mut Vec<ParsedLog>) {
    let Some(resource_logs) = envelope.get("resourceLogs").and_then(Value::as_array) else {
        warn!("dropping malformed OTLP envelope: resourceLogs is not an array");
        return;
    };

    for resource_log in resource_logs {
        let resource_service = otlp_attribute(
            resource_log
                .get("resource")
                .and_then(|r| r.get("attributes")),
            "service.name",
        );

        let scope_logs = resource_log
            .get("scopeLogs")
            .and_then(Value::as_array)
            .map(|s| s.as_slice())
            .unwrap_or(&[]);

        for scope_log in scope_logs {
            let records = scope_log
                .get("logRecords")
                .and_then(Value::as_array)
                .map(|r| r.as_slice())
                .unwrap_or(&[]);

            for record in records {
                match parse_otlp_record(record, resource_service.as_deref()) {
                    Some(parsed) => out.push(parsed),
                    None => warn!("dropping malformed OTLP log record"),
                }
            }
        }
    }
}

fn parse_otlp_record(record: &Value, resource_service: Option<&str>) -> Option<ParsedLog> {
    let ts   = ts_seconds_from_nanos(record.get("timeUnixNano")?)?;
    let body = record
        .get("body")?
        .get("stringValue")?
        .as_str()?
        .to_string();
    let severity = record
        .get("severityText")
        .and_then(Value::as_str)
        .unwrap_or("INFO")
        .to_string();
    let service = otlp_attribute(record.get("attributes"), "service.name")
        .or_else(|| resource_service.map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    // Normalize the nested record to the flat shape so downstream payloads
    // carry one consistent raw form.
    let raw = json!({
        "TimeUnixNano": ts * NANOS_PER_SEC,
        "SeverityText": severity,
        "Body":         body,
        "Attributes":   [{ "key": "service.name", "value": service }],
    });

    Some(ParsedLog { ts, service, severity, body, raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryBackend;
    use crate::gateway::GatewayConfig;
    use chrono::Utc;

    fn pipeline() -> (IngestionPipeline, Arc<VectorGateway>) {
        let gateway = Arc::new(VectorGateway::new(
            Arc::new(MemoryBackend::new()),
            GatewayConfig::default(),
        ));
        (
            IngestionPipeline::new(Arc::clone(&gateway), Fingerprinter::new(false)),
            gateway,
        )
    }

    fn flat(ts: i64, service: &str, severity: &str, body: &str) -> Value {
        json!({
            "TimeUnixNano": ts * NANOS_PER_SEC,
            "SeverityText": severity,
            "Body":         body,
            "Attributes":   [{ "key": "service.name", "value": service }],
        })
    }

    #[tokio::test]
    async fn flat_batch_lands_in_tier1_with_shared_fingerprint() {
        let (pipeline, gateway) = pipeline();
        gateway.setup_collections(Utc::now().timestamp()).await.unwrap();

        let now = Utc::now().timestamp();
        let n = pipeline
            .ingest_batch(vec![
                flat(now, "svc-a", "INFO", "user 42 ok"),
                flat(now, "svc-a", "INFO", "user 9999 ok"),
                flat(now, "svc-a", "INFO", "user 1 ok"),
            ])
            .await
            .unwrap();
        assert_eq!(n, 3);

        let points = gateway.tier1_window(now - 5, now + 5).await.unwrap();
        assert_eq!(points.len(), 3);
        let hashes: std::collections::HashSet<&str> = points
            .iter()
            .filter_map(|p| p.payload.get("rhythm_hash").and_then(Value::as_str))
            .collect();
        assert_eq!(hashes.len(), 1);
    }

    #[tokio::test]
    async fn malformed_records_are_dropped_not_fatal() {
        let (pipeline, gateway) = pipeline();
        gateway.setup_collections(Utc::now().timestamp()).await.unwrap();

        let now = Utc::now().timestamp();
        let n = pipeline
            .ingest_batch(vec![
                json!({ "Body": "missing timestamp" }),
                json!("not even an object"),
                flat(now, "svc-a", "WARN", "disk 97 percent"),
            ])
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn nested_otlp_envelope_expands_to_records() {
        let (pipeline, gateway) = pipeline();
        gateway.setup_collections(Utc::now().timestamp()).await.unwrap();

        let now = Utc::now().timestamp();
        let envelope = json!({
            "resourceLogs": [{
                "resource": {
                    "attributes": [
                        { "key": "service.name", "value": { "stringValue": "svc-otlp" } }
                    ]
                },
                "scopeLogs": [{
                    "logRecords": [
                        {
                            "timeUnixNano": (now * NANOS_PER_SEC).to_string(),
                            "severityText": "ERROR",
                            "body": { "stringValue": "connection reset by 10.0.0.7" }
                        },
                        {
                            "timeUnixNano": now * NANOS_PER_SEC,
                            "body": { "stringValue": "retry 3 scheduled" }
                        }
                    ]
                }]
            }]
        });

        let n = pipeline.ingest_batch(vec![envelope]).await.unwrap();
        assert_eq!(n, 2);

        let points = gateway.tier1_window(now - 5, now + 5).await.unwrap();
        let services: Vec<&str> = points
            .iter()
            .filter_map(|p| p.payload.get("service").and_then(Value::as_str))
            .collect();
        assert!(services.iter().all(|s| *s == "svc-otlp"));
    }

    #[test]
    fn numeric_string_nanos_accepted() {
        assert_eq!(ts_seconds_from_nanos(&json!("2000000000")), Some(2));
        assert_eq!(ts_seconds_from_nanos(&json!(2_000_000_000i64)), Some(2));
        assert_eq!(ts_seconds_from_nanos(&json!(0)), None);
        assert_eq!(ts_seconds_from_nanos(&json!({"n": 1})), None);
    }
}
