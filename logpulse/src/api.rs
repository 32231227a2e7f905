// logpulse/src/api.rs
//
// HTTP surface under /api/v1 (health at the root): ingestion, ad-hoc
// analysis, forensic queries, the operator control loop, and the live-tail
// endpoint over the local JSONL stream file.
//
// Error mapping: malformed request bodies are 400; failures of the vector
// store or the durable registry surface as 500; per-record parse problems
// never fail a batch.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::analyzer::RhythmAnalyzer;
use crate::control::{ControlRegistry, RULE_ALLOW_LIST};
use crate::forensic::ForensicQuery;
use crate::ingest::IngestionPipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline:      Arc<IngestionPipeline>,
    pub analyzer:      Arc<RhythmAnalyzer>,
    pub forensic:      Arc<ForensicQuery>,
    pub control:       Arc<ControlRegistry>,
    pub live_log_path: PathBuf,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/ingest/stream", post(ingest_stream))
        .route("/analysis/tier1/rhythm_anomalies", post(rhythm_anomalies))
        .route("/analysis/tier2/clusters", post(tier2_clusters))
        .route("/analysis/tier2/triage", post(tier2_triage))
        .route("/analysis/tier2/hybrid", post(tier2_hybrid))
        .route("/control/suppress", post(control_suppress))
        .route("/control/patch", post(control_patch))
        .route("/control/patch/:rhythm_hash", delete(delete_patch))
        .route("/control/suppress/:rhythm_hash", delete(delete_suppression))
        .route("/control/rules", get(control_rules))
        .route("/stream/tail", get(stream_tail));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", v1)
        .with_state(state)
}

// ── Error mapping ─────────────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Internal(m) => {
                error!(error = %m, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    ApiError::Internal(e.to_string())
}

// ── Request bodies ────────────────────────────────────────────────────────────

fn default_window_sec() -> i64 {
    60
}

fn default_duration_sec() -> i64 {
    3600
}

fn default_tail_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
struct RhythmQuery {
    #[serde(default = "default_window_sec")]
    window_sec: i64,
}

#[derive(Debug, Deserialize)]
struct ClusterQuery {
    start_ts:    Option<i64>,
    end_ts:      Option<i64>,
    text_filter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TriageQuery {
    positive_ids: Vec<String>,
    #[serde(default)]
    negative_ids: Vec<String>,
    start_ts:     i64,
    end_ts:       i64,
}

#[derive(Debug, Deserialize)]
struct HybridQuery {
    query_text: String,
    start_ts:   i64,
    end_ts:     i64,
}

#[derive(Debug, Deserialize)]
struct SuppressBody {
    rhythm_hash:  String,
    #[serde(default = "default_duration_sec")]
    duration_sec: i64,
}

#[derive(Debug, Deserialize)]
struct PatchBody {
    rhythm_hash:  String,
    patch_type:   String,
    #[serde(default)]
    context_logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TailParams {
    #[serde(default = "default_tail_limit")]
    limit:  usize,
    filter: Option<String>,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ingest_stream(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let batch: Vec<Value> = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid log batch: {}", e)))?;

    let ingested = state
        .pipeline
        .ingest_batch(batch)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "status": "ok", "tier1_ingested": ingested })))
}

async fn rhythm_anomalies(
    State(state): State<AppState>,
    Json(query): Json<RhythmQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.window_sec <= 0 {
        return Err(ApiError::BadRequest("window_sec must be positive".into()));
    }
    let report = state
        .analyzer
        .run(query.window_sec)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "novel_anomalies":     report.novel_anomalies,
        "frequency_anomalies": report.frequency_anomalies,
    })))
}

async fn tier2_clusters(
    State(state): State<AppState>,
    Json(query): Json<ClusterQuery>,
) -> Result<Json<Value>, ApiError> {
    let clusters = state
        .forensic
        .find_clusters(query.start_ts, query.end_ts, query.text_filter)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "clusters": clusters })))
}

async fn tier2_triage(
    State(state): State<AppState>,
    Json(query): Json<TriageQuery>,
) -> Result<Json<Value>, ApiError> {
    let results = state
        .forensic
        .triage(
            query.positive_ids,
            query.negative_ids,
            query.start_ts,
            query.end_ts,
        )
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "triage_results": results })))
}

async fn tier2_hybrid(
    State(state): State<AppState>,
    Json(query): Json<HybridQuery>,
) -> Result<Json<Value>, ApiError> {
    let results = state
        .forensic
        .hybrid(query.query_text, query.start_ts, query.end_ts)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "anomalies": results })))
}

async fn control_suppress(
    State(state): State<AppState>,
    Json(body): Json<SuppressBody>,
) -> Result<Json<Value>, ApiError> {
    if body.duration_sec <= 0 {
        return Err(ApiError::BadRequest("duration_sec must be positive".into()));
    }
    state.control.suppress(&body.rhythm_hash, body.duration_sec);
    Ok(Json(json!({
        "status":  "ok",
        "message": format!("Hash {} suppressed.", body.rhythm_hash),
    })))
}

async fn control_patch(
    State(state): State<AppState>,
    Json(body): Json<PatchBody>,
) -> Result<Json<Value>, ApiError> {
    if body.patch_type != RULE_ALLOW_LIST {
        return Err(ApiError::BadRequest(format!(
            "unsupported patch_type: {}",
            body.patch_type
        )));
    }
    state
        .control
        .patch(&body.rhythm_hash, "Patched by operator via API", &body.context_logs)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "status":  "ok",
        "message": format!("Hash {} patched and eval case generated.", body.rhythm_hash),
    })))
}

async fn delete_patch(
    State(state): State<AppState>,
    Path(rhythm_hash): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .control
        .delete_patch(&rhythm_hash)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "status":  "ok",
        "message": format!("Patch for {} has been deactivated.", rhythm_hash),
    })))
}

async fn delete_suppression(
    State(state): State<AppState>,
    Path(rhythm_hash): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.control.delete_suppression(&rhythm_hash);
    Ok(Json(json!({
        "status":  "ok",
        "message": format!("Suppression for {} has been removed.", rhythm_hash),
    })))
}

async fn control_rules(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rules = state.control.rules().await.map_err(internal)?;
    Ok(Json(json!({
        "patches":      rules.patches,
        "suppressions": rules.suppressions,
    })))
}

async fn stream_tail(
    State(state): State<AppState>,
    Query(params): Query<TailParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let path = state.live_log_path.clone();
    let limit = params.limit.max(1);
    let filter = params.filter.clone();

    let lines = tokio::task::spawn_blocking(move || read_tail(&path, limit, filter.as_deref()))
        .await
        .map_err(internal)?
        .map_err(internal)?;
    Ok(Json(lines))
}

/// Last `limit` JSON lines of the live stream file, optionally filtered by a
/// case-insensitive substring. With a filter, at most limit×5 lines are kept
/// in memory to bound the window.
fn read_tail(
    path: &std::path::Path,
    limit: usize,
    filter: Option<&str>,
) -> std::io::Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)?;
    let cap = if filter.is_some() { limit * 5 } else { limit };
    let mut window: VecDeque<&str> = VecDeque::with_capacity(cap);
    for line in content.lines() {
        if window.len() == cap {
            window.pop_front();
        }
        window.push_back(line);
    }

    let needle = filter.map(str::to_lowercase);
    let mut results: Vec<Value> = Vec::new();
    for line in window {
        if let Some(ref needle) = needle {
            if !line.to_lowercase().contains(needle.as_str()) {
                continue;
            }
        }
        match serde_json::from_str(line) {
            Ok(value) => results.push(value),
            Err(e) => warn!(error = %e, "skipping unparseable live-log line"),
        }
    }

    if results.len() > limit {
        results.drain(..results.len() - limit);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_respects_limit_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.jsonl");
        let mut lines = Vec::new();
        for i in 0..20 {
            lines.push(format!("{{\"seq\": {}, \"msg\": \"Alpha {}\"}}", i, i));
        }
        lines.push("{broken json".to_string());
        lines.push("{\"seq\": 99, \"msg\": \"beta special\"}".to_string());
        std::fs::write(&path, lines.join("\n")).unwrap();

        let out = read_tail(&path, 5, None).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.last().unwrap()["seq"], 99);

        let filtered = read_tail(&path, 5, Some("SPECIAL")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["seq"], 99);
    }

    #[test]
    fn tail_of_missing_file_is_empty() {
        let out = read_tail(std::path::Path::new("/nonexistent/live.jsonl"), 10, None).unwrap();
        assert!(out.is_empty());
    }
}
