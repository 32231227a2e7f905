// logpulse/src/gateway/memory.rs
//
// In-process vector backend. DashMap-sharded collections implementing the
// full read contract: filtered scroll/count, dense + sparse scoring with
// store-side IDF, tokenized full-text match, grouped search, and anchor
// recommendation. Stands in for the external store in single-node
// deployments and in tests; the gateway cannot tell the difference.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::backend::{GatewayError, VectorBackend};
use super::types::{
    CollectionSpec, Condition, Distance, Filter, GroupsRequest, OrderDirection, PointGroup,
    PointRecord, PointStruct, PointVectors, QueryVector, RecommendRequest, ScoredPoint,
    ScrollRequest, SearchRequest, SparseVector, VectorValue,
};

#[derive(Debug, Clone)]
struct StoredPoint {
    plain:   Option<Vec<f32>>,
    dense:   HashMap<String, Vec<f32>>,
    sparse:  HashMap<String, SparseVector>,
    payload: Value,
}

struct MemCollection {
    spec:   CollectionSpec,
    points: DashMap<String, StoredPoint>,
}

#[derive(Default)]
pub struct MemoryBackend {
    collections: DashMap<String, Arc<MemCollection>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> Result<Arc<MemCollection>, GatewayError> {
        self.collections
            .get(name)
            .map(|c| Arc::clone(&c))
            .ok_or_else(|| GatewayError::MissingCollection(name.to_string()))
    }
}

// ── Matching and scoring helpers ──────────────────────────────────────────────

fn text_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

fn field_i64(payload: &Value, key: &str) -> Option<i64> {
    payload.get(key).and_then(Value::as_i64)
}

fn field_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn matches_filter(payload: &Value, filter: &Filter) -> bool {
    filter.must.iter().all(|cond| match cond {
        Condition::Range { key, gte, lte, lt } => match field_i64(payload, key) {
            Some(v) => {
                gte.map(|b| v >= b).unwrap_or(true)
                    && lte.map(|b| v <= b).unwrap_or(true)
                    && lt.map(|b| v < b).unwrap_or(true)
            }
            None => false,
        },
        Condition::MatchText { key, query } => match field_str(payload, key) {
            Some(text) => {
                let have = text_tokens(text);
                text_tokens(query).iter().all(|q| have.contains(q))
            }
            None => false,
        },
        Condition::MatchKeyword { key, value } => {
            field_str(payload, key).map(|v| v == value).unwrap_or(false)
        }
    })
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na < 1e-8 || nb < 1e-8 {
        return 0.0;
    }
    dot(a, b) / (na * nb)
}

fn dense_score(distance: Distance, query: &[f32], point: &[f32]) -> f32 {
    match distance {
        Distance::Dot    => dot(query, point),
        Distance::Cosine => cosine(query, point),
    }
}

/// IDF per the BM25 formulation: ln((N - df + 0.5) / (df + 0.5) + 1).
fn idf(n_points: usize, df: usize) -> f32 {
    let n = n_points as f32;
    let d = df as f32;
    ((n - d + 0.5) / (d + 0.5) + 1.0).ln()
}

impl MemCollection {
    fn dense_vector<'a>(
        &self,
        point: &'a StoredPoint,
        name: &Option<String>,
    ) -> Option<(&'a Vec<f32>, Distance)> {
        match name {
            None => {
                let spec = self.spec.dense_field("")?;
                point.plain.as_ref().map(|v| (v, spec.distance))
            }
            Some(n) => {
                let spec = self.spec.dense_field(n)?;
                point.dense.get(n).map(|v| (v, spec.distance))
            }
        }
    }

    /// Document frequency for every index of the query, for IDF weighting.
    fn sparse_stats(&self, field: &str, query: &SparseVector) -> (usize, HashMap<u32, usize>) {
        let mut df: HashMap<u32, usize> = query.indices.iter().map(|i| (*i, 0)).collect();
        let mut n = 0usize;
        for entry in self.points.iter() {
            if let Some(vec) = entry.value().sparse.get(field) {
                n += 1;
                for idx in &vec.indices {
                    if let Some(slot) = df.get_mut(idx) {
                        *slot += 1;
                    }
                }
            }
        }
        (n, df)
    }

    fn score_all(&self, query: &QueryVector, filter: &Option<Filter>) -> Vec<ScoredPoint> {
        let mut hits = Vec::new();

        match query {
            QueryVector::Dense { name, vector } => {
                for entry in self.points.iter() {
                    let point = entry.value();
                    if let Some(f) = filter {
                        if !matches_filter(&point.payload, f) {
                            continue;
                        }
                    }
                    if let Some((pv, distance)) = self.dense_vector(point, name) {
                        hits.push(ScoredPoint {
                            id:      entry.key().clone(),
                            score:   dense_score(distance, vector, pv),
                            payload: point.payload.clone(),
                        });
                    }
                }
            }
            QueryVector::Sparse { name, vector } => {
                let use_idf = self
                    .spec
                    .sparse_field(name)
                    .map(|s| s.idf)
                    .unwrap_or(false);
                let (n, df) = if use_idf {
                    self.sparse_stats(name, vector)
                } else {
                    (0, HashMap::new())
                };

                for entry in self.points.iter() {
                    let point = entry.value();
                    if let Some(f) = filter {
                        if !matches_filter(&point.payload, f) {
                            continue;
                        }
                    }
                    let Some(pv) = point.sparse.get(name) else { continue };

                    let mut score = 0.0f32;
                    for (qi, qval) in vector.indices.iter().zip(&vector.values) {
                        if let Ok(pos) = pv.indices.binary_search(qi) {
                            let weight = if use_idf {
                                idf(n, df.get(qi).copied().unwrap_or(0))
                            } else {
                                1.0
                            };
                            score += qval * pv.values[pos] * weight;
                        }
                    }
                    if score > 0.0 {
                        hits.push(ScoredPoint {
                            id:      entry.key().clone(),
                            score,
                            payload: point.payload.clone(),
                        });
                    }
                }
            }
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits
    }
}

// ── Trait implementation ──────────────────────────────────────────────────────

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn collection_exists(&self, name: &str) -> Result<bool, GatewayError> {
        Ok(self.collections.contains_key(name))
    }

    async fn create_collection(&self, spec: CollectionSpec) -> Result<(), GatewayError> {
        if self.collections.contains_key(&spec.name) {
            return Err(GatewayError::Backend(format!(
                "collection already exists: {}",
                spec.name
            )));
        }
        let name = spec.name.clone();
        self.collections.insert(
            name,
            Arc::new(MemCollection {
                spec,
                points: DashMap::new(),
            }),
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool, GatewayError> {
        Ok(self.collections.remove(name).is_some())
    }

    async fn list_collections(&self) -> Result<Vec<String>, GatewayError> {
        let mut names: Vec<String> = self.collections.iter().map(|c| c.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<PointStruct>,
        _wait: bool,
    ) -> Result<(), GatewayError> {
        let coll = self.collection(collection)?;
        for point in points {
            let stored = match point.vectors {
                PointVectors::Plain(v) => StoredPoint {
                    plain:   Some(v),
                    dense:   HashMap::new(),
                    sparse:  HashMap::new(),
                    payload: point.payload,
                },
                PointVectors::Named(map) => {
                    let mut dense = HashMap::new();
                    let mut sparse = HashMap::new();
                    for (name, value) in map {
                        match value {
                            VectorValue::Dense(v) => {
                                dense.insert(name, v);
                            }
                            VectorValue::Sparse(v) => {
                                sparse.insert(name, v);
                            }
                        }
                    }
                    StoredPoint {
                        plain: None,
                        dense,
                        sparse,
                        payload: point.payload,
                    }
                }
            };
            coll.points.insert(point.id, stored);
        }
        Ok(())
    }

    async fn scroll(
        &self,
        collection: &str,
        req: ScrollRequest,
    ) -> Result<Vec<PointRecord>, GatewayError> {
        let coll = self.collection(collection)?;

        let mut records: Vec<(String, Value)> = coll
            .points
            .iter()
            .filter(|e| {
                req.filter
                    .as_ref()
                    .map(|f| matches_filter(&e.value().payload, f))
                    .unwrap_or(true)
            })
            .map(|e| (e.key().clone(), e.value().payload.clone()))
            .collect();

        match &req.order_by {
            Some((key, dir)) => {
                records.sort_by(|a, b| {
                    let va = field_i64(&a.1, key).unwrap_or(i64::MIN);
                    let vb = field_i64(&b.1, key).unwrap_or(i64::MIN);
                    match dir {
                        OrderDirection::Asc  => va.cmp(&vb).then_with(|| a.0.cmp(&b.0)),
                        OrderDirection::Desc => vb.cmp(&va).then_with(|| a.0.cmp(&b.0)),
                    }
                });
            }
            None => records.sort_by(|a, b| a.0.cmp(&b.0)),
        }

        records.truncate(req.limit);
        Ok(records
            .into_iter()
            .map(|(id, payload)| PointRecord { id, payload })
            .collect())
    }

    async fn count(
        &self,
        collection: &str,
        filter: Option<Filter>,
    ) -> Result<usize, GatewayError> {
        let coll = self.collection(collection)?;
        Ok(coll
            .points
            .iter()
            .filter(|e| {
                filter
                    .as_ref()
                    .map(|f| matches_filter(&e.value().payload, f))
                    .unwrap_or(true)
            })
            .count())
    }

    async fn search(
        &self,
        collection: &str,
        req: SearchRequest,
    ) -> Result<Vec<ScoredPoint>, GatewayError> {
        let coll = self.collection(collection)?;
        let mut hits = coll.score_all(&req.query, &req.filter);
        hits.truncate(req.limit);
        Ok(hits)
    }

    async fn search_groups(
        &self,
        collection: &str,
        req: GroupsRequest,
    ) -> Result<Vec<PointGroup>, GatewayError> {
        let coll = self.collection(collection)?;
        let hits = coll.score_all(&req.query, &req.filter);

        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<ScoredPoint>> = HashMap::new();
        for hit in hits {
            let Some(group_id) = field_str(&hit.payload, &req.group_by).map(str::to_string)
            else {
                continue;
            };
            let bucket = grouped.entry(group_id.clone()).or_insert_with(|| {
                order.push(group_id);
                Vec::new()
            });
            if bucket.len() < req.group_size {
                bucket.push(hit);
            }
        }

        // Hits arrived score-descending, so first-seen order is group order.
        let mut groups: Vec<PointGroup> = order
            .into_iter()
            .filter_map(|id| grouped.remove(&id).map(|hits| PointGroup { id, hits }))
            .collect();
        groups.truncate(req.limit);
        Ok(groups)
    }

    async fn recommend(
        &self,
        collection: &str,
        req: RecommendRequest,
    ) -> Result<Vec<ScoredPoint>, GatewayError> {
        let coll = self.collection(collection)?;
        let spec = coll
            .spec
            .dense_field(&req.using)
            .ok_or_else(|| GatewayError::Backend(format!("no dense field: {}", req.using)))?;
        let distance = spec.distance;
        let dim = spec.dim;

        let lookup = |id: &String| -> Option<Vec<f32>> {
            coll.points
                .get(id)
                .and_then(|p| p.dense.get(&req.using).cloned())
        };

        let positives: Vec<Vec<f32>> = req.positive.iter().filter_map(lookup).collect();
        if positives.is_empty() {
            return Err(GatewayError::MissingAnchor(
                req.positive.first().cloned().unwrap_or_default(),
            ));
        }
        let negatives: Vec<Vec<f32>> = req.negative.iter().filter_map(lookup).collect();

        let mut query = vec![0.0f32; dim];
        for v in &positives {
            for (q, x) in query.iter_mut().zip(v) {
                *q += x / positives.len() as f32;
            }
        }
        for v in &negatives {
            for (q, x) in query.iter_mut().zip(v) {
                *q -= x / negatives.len() as f32;
            }
        }

        let mut hits: Vec<ScoredPoint> = coll
            .points
            .iter()
            .filter_map(|entry| {
                entry.value().dense.get(&req.using).map(|pv| ScoredPoint {
                    id:      entry.key().clone(),
                    score:   dense_score(distance, &query, pv),
                    payload: entry.value().payload.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(req.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use super::super::types::{DenseVectorSpec, Quantization};

    fn plain_spec(name: &str) -> CollectionSpec {
        CollectionSpec {
            name:               name.to_string(),
            dense:              vec![DenseVectorSpec {
                name:         String::new(),
                dim:          4,
                distance:     Distance::Dot,
                on_disk:      false,
                quantization: Quantization::None,
            }],
            sparse:             vec![],
            payload_indexes:    vec![],
            replication_factor: 1,
            shard_number:       1,
        }
    }

    fn point(id: &str, vector: Vec<f32>, payload: Value) -> PointStruct {
        PointStruct {
            id:      id.to_string(),
            vectors: PointVectors::Plain(vector),
            payload,
        }
    }

    #[tokio::test]
    async fn scroll_filters_and_orders() {
        let backend = MemoryBackend::new();
        backend.create_collection(plain_spec("t")).await.unwrap();
        for (id, ts) in [("a", 10), ("b", 30), ("c", 20)] {
            backend
                .upsert("t", vec![point(id, vec![1.0; 4], json!({ "ts": ts }))], false)
                .await
                .unwrap();
        }

        let out = backend
            .scroll(
                "t",
                ScrollRequest {
                    filter:   Some(Filter::range_gte_lte("ts", 15, 40)),
                    limit:    10,
                    order_by: Some(("ts".into(), OrderDirection::Desc)),
                },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn full_text_condition_requires_all_tokens() {
        let backend = MemoryBackend::new();
        backend.create_collection(plain_spec("t")).await.unwrap();
        backend
            .upsert(
                "t",
                vec![
                    point("a", vec![1.0; 4], json!({ "body": "Disk quota exceeded on node" })),
                    point("b", vec![1.0; 4], json!({ "body": "disk healthy" })),
                ],
                false,
            )
            .await
            .unwrap();

        let filter = Filter::default().and(Condition::MatchText {
            key:   "body".into(),
            query: "QUOTA disk".into(),
        });
        let n = backend.count("t", Some(filter)).await.unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn missing_collection_errors() {
        let backend = MemoryBackend::new();
        let err = backend.count("nope", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingCollection(_)));
    }

    #[tokio::test]
    async fn search_orders_by_dot_product() {
        let backend = MemoryBackend::new();
        backend.create_collection(plain_spec("t")).await.unwrap();
        backend
            .upsert(
                "t",
                vec![
                    point("far", vec![-1.0, -1.0, -1.0, -1.0], json!({})),
                    point("near", vec![1.0, 1.0, 1.0, 1.0], json!({})),
                ],
                false,
            )
            .await
            .unwrap();

        let hits = backend
            .search(
                "t",
                SearchRequest {
                    query:  QueryVector::Dense { name: None, vector: vec![1.0; 4] },
                    filter: None,
                    limit:  10,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].score > hits[1].score);
    }
}
