// logpulse/src/forensic.rs
//
// Federated forensic reads over the daily Tier-2 partitions.
//
//   A. find_clusters  — one row per fingerprint: grouped search across the
//      day range, silenced fingerprints dropped, sorted by top-hit score.
//   B. triage         — recommendation by positive/negative anchor points;
//      partitions that do not hold the anchors drop out of the fan-out.
//   C. hybrid         — dense + sparse search per partition fused with
//      reciprocal rank (k = 60) summed across every ranked source.
//
// All three prefer availability over completeness: a failing partition
// shrinks the result set, never the call.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::control::ControlRegistry;
use crate::embed::{Embedder, TIER2_DIM};
use crate::events::{ClusterHit, TopHit, TriageHit};
use crate::gateway::types::{
    Condition, Filter, GroupsRequest, QueryVector, RecommendRequest, SearchRequest,
};
use crate::gateway::{GatewayError, VectorGateway, DENSE_VECTOR_NAME, SPARSE_VECTOR_NAME};

const CLUSTER_GROUP_LIMIT: usize = 100;
const TRIAGE_LIMIT: usize = 50;
const HYBRID_LIMIT: usize = 50;
/// Reciprocal-rank fusion constant.
const RRF_K: f32 = 60.0;

pub struct ForensicQuery {
    gateway:  Arc<VectorGateway>,
    control:  Arc<ControlRegistry>,
    embedder: Embedder,
}

impl ForensicQuery {
    pub fn new(gateway: Arc<VectorGateway>, control: Arc<ControlRegistry>) -> Self {
        Self {
            gateway,
            control,
            embedder: Embedder,
        }
    }

    async fn partitions(
        &self,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
    ) -> Result<Vec<String>, GatewayError> {
        match (start_ts, end_ts) {
            (Some(start), Some(end)) => self.gateway.partitions_for_range(start, end),
            _ => self.gateway.all_tier2_partitions().await,
        }
    }

    // ── Operation A: cluster listing ─────────────────────────────────────────

    pub async fn find_clusters(
        &self,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
        text_filter: Option<String>,
    ) -> Result<Vec<ClusterHit>, GatewayError> {
        let mut filter = Filter::default();
        if let (Some(start), Some(end)) = (start_ts, end_ts) {
            filter = filter.and(Condition::Range {
                key: "start_ts".to_string(),
                gte: Some(start),
                lte: Some(end),
                lt:  None,
            });
        }

        let text = text_filter.filter(|t| !t.trim().is_empty());
        let query_vector = match &text {
            Some(t) => {
                filter = filter.and(Condition::MatchText {
                    key:   "body".to_string(),
                    query: t.clone(),
                });
                self.embedder.dense(t.clone()).await?
            }
            None => vec![0.0; TIER2_DIM],
        };

        let partitions = self.partitions(start_ts, end_ts).await?;
        if partitions.is_empty() {
            return Ok(Vec::new());
        }

        let groups = self
            .gateway
            .federated_search_groups(
                &partitions,
                GroupsRequest {
                    query:      QueryVector::Dense {
                        name:   Some(DENSE_VECTOR_NAME.to_string()),
                        vector: query_vector,
                    },
                    filter:     if filter.is_empty() { None } else { Some(filter) },
                    group_by:   "rhythm_hash".to_string(),
                    group_size: 1,
                    limit:      CLUSTER_GROUP_LIMIT,
                },
            )
            .await;

        // The merge across partitions is unordered; sort globally by the
        // top hit's score before shaping the response.
        let mut ranked: Vec<(f32, ClusterHit)> = groups
            .into_iter()
            .filter(|group| !group.hits.is_empty())
            .filter(|group| !self.control.is_silenced(&group.id))
            .map(|group| {
                let top = &group.hits[0];
                let hit = ClusterHit {
                    cluster_id:     group.id.clone(),
                    incident_count: top
                        .payload
                        .get("count")
                        .and_then(Value::as_u64)
                        .unwrap_or(1),
                    top_hit:        TopHit {
                        id:      top.id.clone(),
                        payload: top.payload.clone(),
                    },
                };
                (top.score, hit)
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.cluster_id.cmp(&b.1.cluster_id))
        });
        debug!(clusters = ranked.len(), "cluster listing assembled");
        Ok(ranked.into_iter().map(|(_, hit)| hit).collect())
    }

    // ── Operation B: recommendation triage ───────────────────────────────────

    pub async fn triage(
        &self,
        positive_ids: Vec<String>,
        negative_ids: Vec<String>,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<TriageHit>, GatewayError> {
        if positive_ids.is_empty() {
            return Ok(Vec::new());
        }

        let partitions = self.gateway.partitions_for_range(start_ts, end_ts)?;
        let mut hits = self
            .gateway
            .federated_recommend(
                &partitions,
                RecommendRequest {
                    positive: positive_ids,
                    negative: negative_ids,
                    using:    DENSE_VECTOR_NAME.to_string(),
                    limit:    TRIAGE_LIMIT,
                },
            )
            .await;

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(TRIAGE_LIMIT);
        Ok(hits
            .into_iter()
            .map(|p| TriageHit {
                id:      p.id,
                score:   p.score,
                payload: p.payload,
            })
            .collect())
    }

    // ── Operation C: hybrid dense+sparse retrieval ───────────────────────────

    pub async fn hybrid(
        &self,
        query_text: String,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<TriageHit>, GatewayError> {
        let partitions = self.gateway.partitions_for_range(start_ts, end_ts)?;
        if partitions.is_empty() {
            return Ok(Vec::new());
        }

        let filter = Filter::range_gte_lte("start_ts", start_ts, end_ts);
        let (dense, sparse) = tokio::join!(
            self.embedder.dense(query_text.clone()),
            self.embedder.sparse(query_text),
        );

        let dense_req = SearchRequest {
            query:  QueryVector::Dense {
                name:   Some(DENSE_VECTOR_NAME.to_string()),
                vector: dense?,
            },
            filter: Some(filter.clone()),
            limit:  HYBRID_LIMIT,
        };
        let sparse_req = SearchRequest {
            query:  QueryVector::Sparse {
                name:   SPARSE_VECTOR_NAME.to_string(),
                vector: sparse?,
            },
            filter: Some(filter),
            limit:  HYBRID_LIMIT,
        };

        let (dense_lists, sparse_lists) = tokio::join!(
            self.gateway.federated_search(&partitions, dense_req),
            self.gateway.federated_search(&partitions, sparse_req),
        );

        // Every (partition, modality) ranked list is one fusion source:
        // score(id) = Σ 1 / (k + rank).
        let mut fused: HashMap<String, (f32, Value)> = HashMap::new();
        for (_, hits) in dense_lists.into_iter().chain(sparse_lists) {
            for (rank, hit) in hits.into_iter().enumerate() {
                let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
                let entry = fused
                    .entry(hit.id)
                    .or_insert_with(|| (0.0, hit.payload));
                entry.0 += contribution;
            }
        }

        let mut out: Vec<TriageHit> = fused
            .into_iter()
            .map(|(id, (score, payload))| TriageHit { id, score, payload })
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        out.truncate(HYBRID_LIMIT);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AnomalousPoint, AnomalyKind, Tier1Payload};
    use crate::evals::EvalCapture;
    use crate::gateway::memory::MemoryBackend;
    use crate::gateway::GatewayConfig;
    use crate::promote::PromotionService;
    use chrono::Utc;
    use serde_json::json;

    struct Fixture {
        forensic: ForensicQuery,
        control:  Arc<ControlRegistry>,
        gateway:  Arc<VectorGateway>,
        _dir:     tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(VectorGateway::new(
            Arc::new(MemoryBackend::new()),
            GatewayConfig::default(),
        ));
        let control = Arc::new(
            ControlRegistry::open(
                &dir.path().join("registry.db"),
                EvalCapture::new(dir.path().join("evals")),
            )
            .await
            .unwrap(),
        );
        Fixture {
            forensic: ForensicQuery::new(Arc::clone(&gateway), Arc::clone(&control)),
            control,
            gateway,
            _dir: dir,
        }
    }

    async fn promote(gateway: &Arc<VectorGateway>, hash: &str, ts: i64, body: &str) {
        PromotionService::new(Arc::clone(gateway))
            .promote(vec![AnomalousPoint {
                payload: Tier1Payload {
                    rhythm_hash:   hash.to_string(),
                    service:       "svc-a".to_string(),
                    severity:      "INFO".to_string(),
                    ts,
                    body:          body.to_string(),
                    full_log_json: json!({ "Body": body }),
                },
                kind:    AnomalyKind::Novelty,
                context: "New pattern seen 2 times.".to_string(),
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cluster_listing_groups_by_fingerprint_and_respects_silencing() {
        let fx = fixture().await;
        let now = Utc::now().timestamp();
        promote(&fx.gateway, "f-a", now, "payment gateway timeout after * ms").await;
        promote(&fx.gateway, "f-b", now, "cache miss ratio above * percent").await;

        let clusters = fx
            .forensic
            .find_clusters(Some(now - 3600), Some(now + 3600), None)
            .await
            .unwrap();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.incident_count == 1));

        fx.control.suppress("f-a", 3600);
        let clusters = fx
            .forensic
            .find_clusters(Some(now - 3600), Some(now + 3600), None)
            .await
            .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].cluster_id, "f-b");
    }

    #[tokio::test]
    async fn text_filter_narrows_and_ranks_by_similarity() {
        let fx = fixture().await;
        let now = Utc::now().timestamp();
        promote(&fx.gateway, "f-pay", now, "payment gateway timeout after * ms").await;
        promote(&fx.gateway, "f-dns", now, "dns resolution failed for host *").await;

        let clusters = fx
            .forensic
            .find_clusters(
                Some(now - 3600),
                Some(now + 3600),
                Some("payment gateway timeout".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].cluster_id, "f-pay");
    }

    #[tokio::test]
    async fn triage_self_match_ranks_first() {
        let fx = fixture().await;
        let now = Utc::now().timestamp();
        promote(&fx.gateway, "f-x", now, "replica lag exceeded * seconds").await;
        promote(&fx.gateway, "f-y", now, "queue depth climbing past * entries").await;

        let clusters = fx
            .forensic
            .find_clusters(Some(now - 3600), Some(now + 3600), None)
            .await
            .unwrap();
        let anchor = clusters
            .iter()
            .find(|c| c.cluster_id == "f-x")
            .map(|c| c.top_hit.id.clone())
            .unwrap();

        let results = fx
            .forensic
            .triage(vec![anchor.clone()], vec![], now - 3600, now + 3600)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, anchor);
        assert!(results
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn triage_without_positives_is_empty() {
        let fx = fixture().await;
        let now = Utc::now().timestamp();
        let results = fx
            .forensic
            .triage(vec![], vec!["whatever".to_string()], now - 10, now)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn hybrid_fuses_dense_and_sparse_ranks() {
        let fx = fixture().await;
        let now = Utc::now().timestamp();
        promote(&fx.gateway, "f-h1", now, "tls handshake failure with upstream *").await;
        promote(&fx.gateway, "f-h2", now, "user quota exhausted for tenant *").await;

        let results = fx
            .forensic
            .hybrid("tls handshake failure".to_string(), now - 3600, now + 3600)
            .await
            .unwrap();
        assert!(!results.is_empty());
        let top_body = results[0]
            .payload
            .get("body")
            .and_then(Value::as_str)
            .unwrap();
        assert!(top_body.contains("tls handshake"));
        // Matched by both modalities: two reciprocal-rank contributions.
        assert!(results[0].score > 1.0 / (RRF_K + 1.0));
    }
}
