// logpulse/src/events.rs
//
// Shared domain types flowing through logpulse.
// A log record enters as loosely-typed JSON, is parsed into ParsedLog,
// fingerprinted, and indexed as a Tier-1 point. The rhythm analyzer turns
// spiking or novel fingerprints into anomalies; the promotion service folds
// those into Tier-2 event clusters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Ingested log records ──────────────────────────────────────────────────────

/// Canonical form of one log record after parsing either accepted wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedLog {
    pub ts:       i64,      // unix seconds
    pub service:  String,
    pub severity: String,
    pub body:     String,
    pub raw:      Value,    // the original record, carried verbatim
}

/// Payload stored with every Tier-1 point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier1Payload {
    pub rhythm_hash:   String,
    pub service:       String,
    pub severity:      String,
    pub ts:            i64,
    pub body:          String,
    pub full_log_json: Value,
}

impl Tier1Payload {
    pub fn from_parsed(parsed: &ParsedLog, rhythm_hash: String) -> Self {
        Self {
            rhythm_hash,
            service:       parsed.service.clone(),
            severity:      parsed.severity.clone(),
            ts:            parsed.ts,
            body:          parsed.body.clone(),
            full_log_json: parsed.raw.clone(),
        }
    }
}

// ── Detection types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Novelty,
    Frequency,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Novelty   => write!(f, "novelty"),
            Self::Frequency => write!(f, "frequency"),
        }
    }
}

/// One flagged fingerprint, as reported by the rhythm analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub rhythm_hash:     String,
    pub anomaly_type:    AnomalyKind,
    pub anomaly_context: String,
    pub count:           usize,
    pub service:         String,
    pub severity:        String,
    pub body:            String,
    pub ts:              i64,
}

/// A Tier-1 point that belongs to a flagged fingerprint. The promotion
/// service receives every such point so cluster counts and time bounds
/// reflect the full detection window, not just one representative.
#[derive(Debug, Clone)]
pub struct AnomalousPoint {
    pub payload: Tier1Payload,
    pub kind:    AnomalyKind,
    pub context: String,
}

/// Analyzer output for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RhythmReport {
    pub novel_anomalies:     Vec<Anomaly>,
    pub frequency_anomalies: Vec<Anomaly>,
}

impl RhythmReport {
    pub fn is_empty(&self) -> bool {
        self.novel_anomalies.is_empty() && self.frequency_anomalies.is_empty()
    }
}

// ── Tier-2 event clusters ─────────────────────────────────────────────────────

pub const ENTITY_EVENT_CLUSTER: &str = "event_cluster";

/// Payload of one Tier-2 point: a set of Tier-1 points sharing a fingerprint
/// within one detection window, summarized for forensic triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCluster {
    pub entity_type:     String,
    pub rhythm_hash:     String,
    pub start_ts:        i64,
    pub end_ts:          i64,
    pub count:           usize,
    pub service:         String,
    pub severity:        String,
    pub anomaly_type:    AnomalyKind,
    pub anomaly_context: String,
    pub body:            String,
    pub sample_logs:     Vec<Value>,
}

// ── Control rules ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRule {
    pub rhythm_hash: String,
    pub rule:        String,   // "ALLOW_LIST"
    pub reason:      String,
    pub created_ts:  i64,
    pub is_active:   bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub rhythm_hash: String,
    pub expires_at:  i64,
}

/// Snapshot of every active rule, durable and in-memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub patches:      Vec<PatchRule>,
    pub suppressions: Vec<SuppressionEntry>,
}

// ── Forensic query results ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopHit {
    pub id:      String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHit {
    pub cluster_id:     String,
    pub incident_count: u64,
    pub top_hit:        TopHit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageHit {
    pub id:      String,
    pub score:   f32,
    pub payload: Value,
}

// ── Eval capture ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalExpectedOutcome {
    pub is_anomaly: bool,
    pub reason:     String,
}

/// Regression case persisted when an operator patches a false positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    pub description:      String,
    pub rhythm_hash:      String,
    pub context_logs:     Vec<String>,
    pub expected_outcome: EvalExpectedOutcome,
    pub captured_at:      DateTime<Utc>,
}
