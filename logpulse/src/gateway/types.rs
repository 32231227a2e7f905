// logpulse/src/gateway/types.rs
//
// Typed surface of the external vector store. These shapes are the RPC
// contract: collection specs with named dense/sparse vector fields and
// payload indexes, point upserts, filtered reads, grouped search, and
// recommendation by anchor ids.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Vector data ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values:  Vec<f32>,
}

#[derive(Debug, Clone)]
pub enum VectorValue {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

/// Vectors attached to one point: either the collection's single unnamed
/// vector, or a map of named vector fields.
#[derive(Debug, Clone)]
pub enum PointVectors {
    Plain(Vec<f32>),
    Named(HashMap<String, VectorValue>),
}

#[derive(Debug, Clone)]
pub struct PointStruct {
    pub id:      String,
    pub vectors: PointVectors,
    pub payload: Value,
}

// ── Collection specs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Dot,
    Cosine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    None,
    /// Binary quantization, kept in RAM (Tier-1).
    BinaryAlwaysRam,
    /// Scalar INT8 quantization, kept in RAM (Tier-2).
    ScalarInt8AlwaysRam,
}

#[derive(Debug, Clone)]
pub struct DenseVectorSpec {
    pub name:         String,   // empty = the unnamed default vector
    pub dim:          usize,
    pub distance:     Distance,
    pub on_disk:      bool,
    pub quantization: Quantization,
}

#[derive(Debug, Clone)]
pub struct SparseVectorSpec {
    pub name: String,
    pub idf:  bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadIndex {
    IntegerRange(String),
    Keyword(String),
    FullText(String),
}

#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub name:               String,
    pub dense:              Vec<DenseVectorSpec>,
    pub sparse:             Vec<SparseVectorSpec>,
    pub payload_indexes:    Vec<PayloadIndex>,
    pub replication_factor: u32,
    pub shard_number:       u32,
}

impl CollectionSpec {
    pub fn dense_field(&self, name: &str) -> Option<&DenseVectorSpec> {
        self.dense.iter().find(|d| d.name == name)
    }

    pub fn sparse_field(&self, name: &str) -> Option<&SparseVectorSpec> {
        self.sparse.iter().find(|s| s.name == name)
    }
}

// ── Filters ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Condition {
    /// Integer range on a payload field. Bounds are inclusive where set.
    Range { key: String, gte: Option<i64>, lte: Option<i64>, lt: Option<i64> },
    /// Tokenized, lowercased full-text match: every query token must occur.
    MatchText { key: String, query: String },
    /// Exact keyword equality.
    MatchKeyword { key: String, value: String },
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub must: Vec<Condition>,
}

impl Filter {
    pub fn range_gte_lte(key: &str, gte: i64, lte: i64) -> Self {
        Self {
            must: vec![Condition::Range {
                key: key.to_string(),
                gte: Some(gte),
                lte: Some(lte),
                lt:  None,
            }],
        }
    }

    pub fn and(mut self, cond: Condition) -> Self {
        self.must.push(cond);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum QueryVector {
    Dense { name: Option<String>, vector: Vec<f32> },
    Sparse { name: String, vector: SparseVector },
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query:  QueryVector,
    pub filter: Option<Filter>,
    pub limit:  usize,
}

#[derive(Debug, Clone)]
pub struct GroupsRequest {
    pub query:      QueryVector,
    pub filter:     Option<Filter>,
    pub group_by:   String,
    pub group_size: usize,
    pub limit:      usize,
}

#[derive(Debug, Clone)]
pub struct RecommendRequest {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    /// Named dense vector field the recommendation runs on.
    pub using:    String,
    pub limit:    usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct ScrollRequest {
    pub filter:   Option<Filter>,
    pub limit:    usize,
    /// Order by an integer payload field; unset scrolls in id order.
    pub order_by: Option<(String, OrderDirection)>,
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PointRecord {
    pub id:      String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id:      String,
    pub score:   f32,
    pub payload: Value,
}

/// One group from a grouped search; `id` is the grouped payload value.
#[derive(Debug, Clone)]
pub struct PointGroup {
    pub id:   String,
    pub hits: Vec<ScoredPoint>,
}
