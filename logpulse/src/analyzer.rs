// logpulse/src/analyzer.rs
//
// Rhythm analyzer: novelty + frequency-spike detection over fingerprints.
//
// One invocation reads a recent Tier-1 window and a most-recent-first
// historical sample, normalizes the historical counts to the analysis
// window's duration, and classifies every recent fingerprint:
//
//   unknown  + count >= NOVELTY_MIN_COUNT                  → novelty
//   known    + count >  mean + FACTOR·std, count >= floor  → frequency
//
// The std-dev floor of 1.5 keeps sparse baselines from firing on every
// minor fluctuation. Silenced fingerprints are skipped before
// classification, so a suppressed pattern never reaches promotion.
// Invocations are serialized per process through one mutex; an ad-hoc API
// run and the periodic worker can never promote the same window twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::control::ControlRegistry;
use crate::events::{Anomaly, AnomalousPoint, AnomalyKind, RhythmReport, Tier1Payload};
use crate::gateway::types::PointRecord;
use crate::gateway::{GatewayError, VectorGateway};
use crate::promote::PromotionService;

pub const HISTORICAL_SAMPLE_SIZE: usize = 10_000;
pub const NOVELTY_MIN_COUNT: usize = 2;
pub const FREQUENCY_MIN_COUNT: usize = 3;
pub const FREQUENCY_STD_DEV_FACTOR: f64 = 2.5;

/// Floor for the baseline standard deviation; sqrt(mean) alone is unstable
/// for sparse fingerprints.
const STD_DEV_FLOOR: f64 = 1.5;

struct BaselineStat {
    mean:    f64,
    std_dev: f64,
}

pub struct RhythmAnalyzer {
    gateway:   Arc<VectorGateway>,
    control:   Arc<ControlRegistry>,
    promotion: PromotionService,
    gate:      tokio::sync::Mutex<()>,
    runs:      AtomicU64,
}

impl RhythmAnalyzer {
    pub fn new(
        gateway: Arc<VectorGateway>,
        control: Arc<ControlRegistry>,
        promotion: PromotionService,
    ) -> Self {
        Self {
            gateway,
            control,
            promotion,
            gate: tokio::sync::Mutex::new(()),
            runs: AtomicU64::new(0),
        }
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// One analysis pass over the last `window_sec` seconds. Detected
    /// anomalies that survive the control gate are promoted to Tier-2.
    pub async fn run(&self, window_sec: i64) -> Result<RhythmReport, GatewayError> {
        let _serialized = self.gate.lock().await;
        self.runs.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now().timestamp();
        let window_start = now - window_sec;

        let recent = self.gateway.tier1_window(window_start, now).await?;
        if recent.is_empty() {
            return Ok(RhythmReport::default());
        }

        let history = self
            .gateway
            .tier1_history_sample(window_start, HISTORICAL_SAMPLE_SIZE)
            .await?;
        let baseline = baseline_stats(&history, window_sec);

        // Bucket the recent window by fingerprint, keeping every point so
        // promotion sees the full group.
        let mut by_hash: HashMap<String, Vec<Tier1Payload>> = HashMap::new();
        for record in &recent {
            match serde_json::from_value::<Tier1Payload>(record.payload.clone()) {
                Ok(payload) => by_hash.entry(payload.rhythm_hash.clone()).or_default().push(payload),
                Err(e) => warn!(id = %record.id, error = %e, "skipping unreadable tier-1 payload"),
            }
        }

        let mut report = RhythmReport::default();
        let mut to_promote: Vec<AnomalousPoint> = Vec::new();

        let mut hashes: Vec<&String> = by_hash.keys().collect();
        hashes.sort();

        for hash in hashes {
            let points = &by_hash[hash];
            let count = points.len();

            // Control gate comes before classification: silenced patterns
            // never appear in the report or reach promotion.
            if self.control.is_silenced(hash) {
                continue;
            }

            let emitted = match baseline.get(hash.as_str()) {
                None => {
                    if count >= NOVELTY_MIN_COUNT {
                        Some((
                            AnomalyKind::Novelty,
                            format!("New pattern seen {} times.", count),
                        ))
                    } else {
                        None
                    }
                }
                Some(stat) => {
                    let threshold = stat.mean + FREQUENCY_STD_DEV_FACTOR * stat.std_dev;
                    if (count as f64) > threshold && count >= FREQUENCY_MIN_COUNT {
                        Some((
                            AnomalyKind::Frequency,
                            format!(
                                "Count {} breached threshold of {:.1} (normalized mean={:.1}, std_dev={:.1})",
                                count, threshold, stat.mean, stat.std_dev
                            ),
                        ))
                    } else {
                        None
                    }
                }
            };

            let Some((kind, context)) = emitted else { continue };

            let earliest = points
                .iter()
                .min_by_key(|p| p.ts)
                .unwrap_or(&points[0]);
            let anomaly = Anomaly {
                rhythm_hash:     hash.clone(),
                anomaly_type:    kind,
                anomaly_context: context.clone(),
                count,
                service:         earliest.service.clone(),
                severity:        earliest.severity.clone(),
                body:            earliest.body.clone(),
                ts:              earliest.ts,
            };
            match kind {
                AnomalyKind::Novelty   => report.novel_anomalies.push(anomaly),
                AnomalyKind::Frequency => report.frequency_anomalies.push(anomaly),
            }

            to_promote.extend(points.iter().map(|payload| AnomalousPoint {
                payload: payload.clone(),
                kind,
                context: context.clone(),
            }));
        }

        if !to_promote.is_empty() {
            info!(
                novel = report.novel_anomalies.len(),
                frequency = report.frequency_anomalies.len(),
                "anomalies detected, promoting"
            );
            self.promotion.promote(to_promote).await?;
        }

        Ok(report)
    }
}

/// Historical counts normalized to the analysis window. Needs at least two
/// sample points to establish a duration; with fewer, everything recent is
/// treated as unknown.
fn baseline_stats(history: &[PointRecord], window_sec: i64) -> HashMap<String, BaselineStat> {
    if history.len() < 2 {
        return HashMap::new();
    }

    let ts_of = |r: &PointRecord| -> i64 {
        r.payload.get("ts").and_then(serde_json::Value::as_i64).unwrap_or(0)
    };
    // The sample arrives newest-first.
    let newest = ts_of(&history[0]);
    let oldest = ts_of(&history[history.len() - 1]);
    let duration = (newest - oldest).max(1);
    let scale = window_sec as f64 / duration as f64;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in history {
        if let Some(hash) = record.payload.get("rhythm_hash").and_then(serde_json::Value::as_str) {
            *counts.entry(hash.to_string()).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .map(|(hash, total)| {
            let mean = total as f64 * scale;
            let std_dev = mean.sqrt().max(STD_DEV_FLOOR);
            (hash, BaselineStat { mean, std_dev })
        })
        .collect()
}
