// logpulse/src/promote.rs
//
// Promotion: flagged Tier-1 points become Tier-2 event clusters.
//
// Points are grouped by fingerprint; each group becomes one cluster point
// whose time bounds and count cover the whole group, with the earliest
// point supplying the representative service/severity/body and up to five
// raw logs kept as samples. The cluster lands in the daily partition of its
// start_ts, which is created on first use.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::embed::Embedder;
use crate::events::{AnomalousPoint, EventCluster, ENTITY_EVENT_CLUSTER};
use crate::gateway::types::{PointStruct, PointVectors, VectorValue};
use crate::gateway::{GatewayError, VectorGateway, DENSE_VECTOR_NAME, SPARSE_VECTOR_NAME};

const MAX_SAMPLE_LOGS: usize = 5;

pub struct PromotionService {
    gateway:  Arc<VectorGateway>,
    embedder: Embedder,
}

impl PromotionService {
    pub fn new(gateway: Arc<VectorGateway>) -> Self {
        Self {
            gateway,
            embedder: Embedder,
        }
    }

    /// Fold anomalous points into event clusters and upsert them into their
    /// daily partitions. Returns the number of clusters written.
    pub async fn promote(&self, anomalies: Vec<AnomalousPoint>) -> Result<usize, GatewayError> {
        if anomalies.is_empty() {
            return Ok(0);
        }

        let mut groups: HashMap<String, Vec<AnomalousPoint>> = HashMap::new();
        for item in anomalies {
            groups
                .entry(item.payload.rhythm_hash.clone())
                .or_default()
                .push(item);
        }

        // Bucket clusters by target partition so each partition is ensured
        // and written once.
        let mut buckets: HashMap<String, Vec<(EventCluster, String)>> = HashMap::new();
        for (rhythm_hash, mut group) in groups {
            group.sort_by_key(|item| item.payload.ts);
            let first = &group[0];
            let last  = group.last().unwrap_or(first);

            let cluster = EventCluster {
                entity_type:     ENTITY_EVENT_CLUSTER.to_string(),
                rhythm_hash,
                start_ts:        first.payload.ts,
                end_ts:          last.payload.ts,
                count:           group.len(),
                service:         first.payload.service.clone(),
                severity:        first.payload.severity.clone(),
                anomaly_type:    first.kind,
                anomaly_context: first.context.clone(),
                body:            first.payload.body.clone(),
                sample_logs:     group
                    .iter()
                    .take(MAX_SAMPLE_LOGS)
                    .map(|item| item.payload.full_log_json.clone())
                    .collect(),
            };

            let partition = self.gateway.daily_partition_name(cluster.start_ts)?;
            let text = cluster.body.clone();
            buckets.entry(partition).or_default().push((cluster, text));
        }

        let mut written = 0usize;
        for (partition, clusters) in buckets {
            self.gateway.ensure_tier2_partition(&partition).await?;

            let mut points = Vec::with_capacity(clusters.len());
            for (cluster, text) in clusters {
                let (dense, sparse) = tokio::join!(
                    self.embedder.dense(text.clone()),
                    self.embedder.sparse(text),
                );

                let vectors = HashMap::from([
                    (DENSE_VECTOR_NAME.to_string(), VectorValue::Dense(dense?)),
                    (SPARSE_VECTOR_NAME.to_string(), VectorValue::Sparse(sparse?)),
                ]);
                points.push(PointStruct {
                    id:      Uuid::new_v4().to_string(),
                    vectors: PointVectors::Named(vectors),
                    payload: serde_json::to_value(&cluster).unwrap_or(Value::Null),
                });
            }

            let n = points.len();
            self.gateway.upsert_tier2(&partition, points).await?;
            written += n;
            info!(partition = %partition, clusters = n, "anomalies promoted to tier-2");
        }

        Ok(written)
    }
}
