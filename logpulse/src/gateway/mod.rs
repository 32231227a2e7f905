// logpulse/src/gateway/mod.rs
//
// Vector-store gateway. Owns collection naming and lifecycle for both tiers,
// and the day-range federation used by the forensic read path:
//
//   Tier-1  — one hot collection, 64-dim dot-product vectors, binary
//             quantization always in RAM, ts payload index. Reset at boot.
//   Tier-2  — one collection per local day, created lazily on first
//             promotion. Named vectors "log_dense_vector" (cosine, INT8
//             scalar quantization) and "bm25_vector" (sparse, IDF).
//
// Every call carries a deadline. Federated reads fan out per partition and
// swallow per-partition failures: availability over completeness.

pub mod backend;
pub mod memory;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeZone};
use futures::future::join_all;
use tracing::{debug, warn};

pub use backend::{GatewayError, VectorBackend};
use types::{
    CollectionSpec, DenseVectorSpec, Distance, Filter, GroupsRequest, OrderDirection,
    PayloadIndex, PointGroup, PointRecord, PointStruct, Quantization, RecommendRequest,
    ScoredPoint, ScrollRequest, SearchRequest, SparseVectorSpec,
};

use crate::embed::{TIER1_DIM, TIER2_DIM};

pub const DENSE_VECTOR_NAME:  &str = "log_dense_vector";
pub const SPARSE_VECTOR_NAME: &str = "bm25_vector";

/// Upper bound on one Tier-1 window read.
const TIER1_SCROLL_LIMIT: usize = 100_000;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub tier1_collection:   String,
    pub tier2_prefix:       String,
    pub replication_factor: u32,
    pub shard_number:       u32,
    pub rpc_deadline:       Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tier1_collection:   "pulse_rhythm_monitor".to_string(),
            tier2_prefix:       "pulse_forensic_index".to_string(),
            replication_factor: 2,
            shard_number:       2,
            rpc_deadline:       Duration::from_secs(30),
        }
    }
}

pub struct VectorGateway {
    backend: Arc<dyn VectorBackend>,
    cfg:     GatewayConfig,
}

impl VectorGateway {
    pub fn new(backend: Arc<dyn VectorBackend>, cfg: GatewayConfig) -> Self {
        Self { backend, cfg }
    }

    // ── Collection specs ──────────────────────────────────────────────────────

    fn tier1_spec(&self) -> CollectionSpec {
        CollectionSpec {
            name:               self.cfg.tier1_collection.clone(),
            dense:              vec![DenseVectorSpec {
                name:         String::new(),
                dim:          TIER1_DIM,
                distance:     Distance::Dot,
                on_disk:      false,
                quantization: Quantization::BinaryAlwaysRam,
            }],
            sparse:             vec![],
            payload_indexes:    vec![PayloadIndex::IntegerRange("ts".to_string())],
            replication_factor: self.cfg.replication_factor,
            shard_number:       self.cfg.shard_number,
        }
    }

    fn tier2_spec(&self, name: &str) -> CollectionSpec {
        CollectionSpec {
            name:               name.to_string(),
            dense:              vec![DenseVectorSpec {
                name:         DENSE_VECTOR_NAME.to_string(),
                dim:          TIER2_DIM,
                distance:     Distance::Cosine,
                on_disk:      true,
                quantization: Quantization::ScalarInt8AlwaysRam,
            }],
            sparse:             vec![SparseVectorSpec {
                name: SPARSE_VECTOR_NAME.to_string(),
                idf:  true,
            }],
            payload_indexes:    vec![
                PayloadIndex::IntegerRange("start_ts".to_string()),
                PayloadIndex::Keyword("service".to_string()),
                PayloadIndex::Keyword("rhythm_hash".to_string()),
                PayloadIndex::FullText("body".to_string()),
            ],
            replication_factor: self.cfg.replication_factor,
            shard_number:       self.cfg.shard_number,
        }
    }

    // ── Daily partition naming ────────────────────────────────────────────────

    /// Partition name for the local date of `ts`. An undeterminable date is
    /// an invariant violation, not a skippable condition.
    pub fn daily_partition_name(&self, ts: i64) -> Result<String, GatewayError> {
        let dt = Local
            .timestamp_opt(ts, 0)
            .single()
            .ok_or(GatewayError::PartitionUndeterminable(ts))?;
        Ok(format!("{}_{}", self.cfg.tier2_prefix, dt.format("%Y_%m_%d")))
    }

    /// Every daily partition name whose local date intersects [start, end].
    pub fn partitions_for_range(
        &self,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<String>, GatewayError> {
        let start = Local
            .timestamp_opt(start_ts, 0)
            .single()
            .ok_or(GatewayError::PartitionUndeterminable(start_ts))?
            .date_naive();
        let end = Local
            .timestamp_opt(end_ts, 0)
            .single()
            .ok_or(GatewayError::PartitionUndeterminable(end_ts))?
            .date_naive();

        let mut names = Vec::new();
        let mut day = start;
        while day <= end {
            names.push(format!("{}_{}", self.cfg.tier2_prefix, day.format("%Y_%m_%d")));
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(names)
    }

    /// All existing Tier-2 partitions, for unranged forensic queries.
    pub async fn all_tier2_partitions(&self) -> Result<Vec<String>, GatewayError> {
        let prefix = format!("{}_", self.cfg.tier2_prefix);
        Ok(self
            .deadline("list_collections", self.backend.list_collections())
            .await?
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Boot-time setup: recreate Tier-1 and reset today's Tier-2 partition so
    /// vector/index configuration changes take effect.
    pub async fn setup_collections(&self, now_ts: i64) -> Result<(), GatewayError> {
        let tier1 = self.cfg.tier1_collection.clone();
        if self.deadline("exists", self.backend.collection_exists(&tier1)).await? {
            self.deadline("delete", self.backend.delete_collection(&tier1)).await?;
        }
        self.deadline("create", self.backend.create_collection(self.tier1_spec()))
            .await?;
        debug!(collection = %tier1, "tier-1 collection recreated");

        let today = self.daily_partition_name(now_ts)?;
        if self.deadline("exists", self.backend.collection_exists(&today)).await? {
            self.deadline("delete", self.backend.delete_collection(&today)).await?;
        }
        self.ensure_tier2_partition(&today).await?;
        Ok(())
    }

    pub async fn ensure_tier2_partition(&self, name: &str) -> Result<(), GatewayError> {
        if self.deadline("exists", self.backend.collection_exists(name)).await? {
            return Ok(());
        }
        warn!(partition = %name, "creating daily tier-2 partition");
        self.deadline("create", self.backend.create_collection(self.tier2_spec(name)))
            .await
    }

    // ── Tier-1 operations ─────────────────────────────────────────────────────

    pub async fn upsert_tier1(&self, points: Vec<PointStruct>) -> Result<(), GatewayError> {
        self.deadline(
            "upsert_tier1",
            self.backend.upsert(&self.cfg.tier1_collection, points, false),
        )
        .await
    }

    /// Tier-1 points with ts in [start, end].
    pub async fn tier1_window(
        &self,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<PointRecord>, GatewayError> {
        self.deadline(
            "tier1_window",
            self.backend.scroll(
                &self.cfg.tier1_collection,
                ScrollRequest {
                    filter:   Some(Filter::range_gte_lte("ts", start_ts, end_ts)),
                    limit:    TIER1_SCROLL_LIMIT,
                    order_by: None,
                },
            ),
        )
        .await
    }

    /// Most-recent-first sample of points strictly before `before_ts`.
    pub async fn tier1_history_sample(
        &self,
        before_ts: i64,
        limit: usize,
    ) -> Result<Vec<PointRecord>, GatewayError> {
        self.deadline(
            "tier1_history",
            self.backend.scroll(
                &self.cfg.tier1_collection,
                ScrollRequest {
                    filter:   Some(Filter {
                        must: vec![types::Condition::Range {
                            key: "ts".to_string(),
                            gte: None,
                            lte: None,
                            lt:  Some(before_ts),
                        }],
                    }),
                    limit,
                    order_by: Some(("ts".to_string(), OrderDirection::Desc)),
                },
            ),
        )
        .await
    }

    // ── Tier-2 operations ─────────────────────────────────────────────────────

    pub async fn upsert_tier2(
        &self,
        partition: &str,
        points: Vec<PointStruct>,
    ) -> Result<(), GatewayError> {
        self.deadline("upsert_tier2", self.backend.upsert(partition, points, false))
            .await
    }

    /// Scroll one Tier-2 partition by filter.
    pub async fn scroll_tier2(
        &self,
        partition: &str,
        req: ScrollRequest,
    ) -> Result<Vec<PointRecord>, GatewayError> {
        self.deadline("scroll_tier2", self.backend.scroll(partition, req)).await
    }

    // ── Federation ────────────────────────────────────────────────────────────

    /// Grouped search across partitions. Per-partition errors are logged and
    /// dropped; the merged result carries whatever responded in time.
    pub async fn federated_search_groups(
        &self,
        partitions: &[String],
        req: GroupsRequest,
    ) -> Vec<PointGroup> {
        let calls = partitions.iter().map(|name| {
            let req = req.clone();
            async move {
                (
                    name.as_str(),
                    self.deadline("search_groups", self.backend.search_groups(name, req))
                        .await,
                )
            }
        });

        let mut merged = Vec::new();
        for (name, result) in join_all(calls).await {
            match result {
                Ok(groups) => merged.extend(groups),
                Err(e) => log_partition_miss(name, "search_groups", &e),
            }
        }
        merged
    }

    pub async fn federated_recommend(
        &self,
        partitions: &[String],
        req: RecommendRequest,
    ) -> Vec<ScoredPoint> {
        let calls = partitions.iter().map(|name| {
            let req = req.clone();
            async move {
                (
                    name.as_str(),
                    self.deadline("recommend", self.backend.recommend(name, req)).await,
                )
            }
        });

        let mut merged = Vec::new();
        for (name, result) in join_all(calls).await {
            match result {
                Ok(hits) => merged.extend(hits),
                Err(e) => log_partition_miss(name, "recommend", &e),
            }
        }
        merged
    }

    /// Per-partition search, keyed by partition, for rank-fusion callers that
    /// need to know which source produced each ranked list.
    pub async fn federated_search(
        &self,
        partitions: &[String],
        req: SearchRequest,
    ) -> Vec<(String, Vec<ScoredPoint>)> {
        let calls = partitions.iter().map(|name| {
            let req = req.clone();
            async move {
                (
                    name.clone(),
                    self.deadline("search", self.backend.search(name, req)).await,
                )
            }
        });

        let mut out = Vec::new();
        for (name, result) in join_all(calls).await {
            match result {
                Ok(hits) => out.push((name, hits)),
                Err(e) => log_partition_miss(&name, "search", &e),
            }
        }
        out
    }

    // ── Deadlines ─────────────────────────────────────────────────────────────

    async fn deadline<T>(
        &self,
        op: &str,
        fut: impl std::future::Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.cfg.rpc_deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::DeadlineExceeded(op.to_string())),
        }
    }
}

fn log_partition_miss(partition: &str, op: &str, err: &GatewayError) {
    match err {
        // Absent days are expected: nothing was promoted that day.
        GatewayError::MissingCollection(_) | GatewayError::MissingAnchor(_) => {
            debug!(partition, op, error = %err, "partition skipped");
        }
        _ => warn!(partition, op, error = %err, "partition read failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryBackend;

    fn gateway() -> VectorGateway {
        VectorGateway::new(Arc::new(MemoryBackend::new()), GatewayConfig::default())
    }

    #[test]
    fn partition_name_tracks_local_date() {
        let gw = gateway();
        // 2025-03-14 12:00:00 local
        let ts = Local
            .with_ymd_and_hms(2025, 3, 14, 12, 0, 0)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(
            gw.daily_partition_name(ts).unwrap(),
            "pulse_forensic_index_2025_03_14"
        );
    }

    #[test]
    fn range_expands_to_every_day_inclusive() {
        let gw = gateway();
        let start = Local.with_ymd_and_hms(2025, 3, 14, 23, 0, 0).single().unwrap();
        let end   = Local.with_ymd_and_hms(2025, 3, 16, 1, 0, 0).single().unwrap();
        let names = gw
            .partitions_for_range(start.timestamp(), end.timestamp())
            .unwrap();
        assert_eq!(
            names,
            vec![
                "pulse_forensic_index_2025_03_14",
                "pulse_forensic_index_2025_03_15",
                "pulse_forensic_index_2025_03_16",
            ]
        );
    }

    #[tokio::test]
    async fn setup_is_idempotent_and_lazy_partitions_stick() {
        let gw = gateway();
        let now = Local::now().timestamp();
        gw.setup_collections(now).await.unwrap();
        gw.setup_collections(now).await.unwrap();

        let name = gw.daily_partition_name(now).unwrap();
        gw.ensure_tier2_partition(&name).await.unwrap();
        assert_eq!(gw.all_tier2_partitions().await.unwrap(), vec![name]);
    }

    #[tokio::test]
    async fn federation_skips_missing_partitions() {
        let gw = gateway();
        let now = Local::now().timestamp();
        gw.setup_collections(now).await.unwrap();

        let partitions = vec![
            gw.daily_partition_name(now).unwrap(),
            "pulse_forensic_index_1999_01_01".to_string(),
        ];
        let groups = gw
            .federated_search_groups(
                &partitions,
                GroupsRequest {
                    query:      types::QueryVector::Dense {
                        name:   Some(DENSE_VECTOR_NAME.to_string()),
                        vector: vec![0.0; TIER2_DIM],
                    },
                    filter:     None,
                    group_by:   "rhythm_hash".to_string(),
                    group_size: 1,
                    limit:      100,
                },
            )
            .await;
        assert!(groups.is_empty());
    }
}
