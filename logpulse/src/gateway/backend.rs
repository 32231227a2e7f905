// logpulse/src/gateway/backend.rs
//
// The vector store behind a non-blocking trait. A backend wrapping a
// blocking client must dispatch to a worker pool; a native async client
// implements the methods directly. The gateway only ever talks to this
// trait, so the ingestion and analysis loops never stall on a single RPC.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{
    CollectionSpec, Filter, GroupsRequest, PointGroup, PointRecord, PointStruct,
    RecommendRequest, ScoredPoint, ScrollRequest, SearchRequest,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("collection not found: {0}")]
    MissingCollection(String),

    #[error("recommend anchor not found: {0}")]
    MissingAnchor(String),

    #[error("deadline exceeded for {0}")]
    DeadlineExceeded(String),

    #[error("vector backend failure: {0}")]
    Backend(String),

    #[error("daily partition undeterminable for ts {0}")]
    PartitionUndeterminable(i64),

    #[error("embedding failed: {0}")]
    Embed(#[from] crate::embed::EmbedError),
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, GatewayError>;

    async fn create_collection(&self, spec: CollectionSpec) -> Result<(), GatewayError>;

    /// Returns true when a collection existed and was removed.
    async fn delete_collection(&self, name: &str) -> Result<bool, GatewayError>;

    async fn list_collections(&self) -> Result<Vec<String>, GatewayError>;

    /// `wait=false` requests fire-and-forget commit semantics where the
    /// backend supports them; visibility on the read path is still required.
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<PointStruct>,
        wait: bool,
    ) -> Result<(), GatewayError>;

    async fn scroll(
        &self,
        collection: &str,
        req: ScrollRequest,
    ) -> Result<Vec<PointRecord>, GatewayError>;

    async fn count(&self, collection: &str, filter: Option<Filter>)
        -> Result<usize, GatewayError>;

    async fn search(
        &self,
        collection: &str,
        req: SearchRequest,
    ) -> Result<Vec<ScoredPoint>, GatewayError>;

    async fn search_groups(
        &self,
        collection: &str,
        req: GroupsRequest,
    ) -> Result<Vec<PointGroup>, GatewayError>;

    async fn recommend(
        &self,
        collection: &str,
        req: RecommendRequest,
    ) -> Result<Vec<ScoredPoint>, GatewayError>;
}
