// logpulse/src/embed.rs
//
// Deterministic embedding models.
//
// Three vectorizers, all derived from SHA-256 feature hashing so the service
// needs no ML runtime or model weights:
//
//   - tier1_projection: 64-dim ±1 SimHash of the template. Dot-product
//     similarity; this is the Tier-1 point vector.
//   - dense_embed: 384-dim random-feature-hash embedding of a text. Word
//     n-grams (n=1..3) hashed into ±1 features, summed, L2-normalized.
//     Cosine similarity; this is the Tier-2 "log_dense_vector".
//   - sparse_embed: BM25-style sparse vector. Tokens hash to u32 indices,
//     values are saturating term frequencies; the store applies IDF.
//
// Inference is CPU-bound, so the async wrappers run it on the blocking pool.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::gateway::types::SparseVector;

pub const TIER1_DIM: usize = 64;
pub const TIER2_DIM: usize = 384;

// BM25 term-frequency saturation.
const BM25_K1: f32 = 1.2;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// ── Feature hashing primitives ────────────────────────────────────────────────

fn token_digest(domain: &str, token: &str) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(domain.as_bytes());
    h.update(token.as_bytes());
    h.finalize().into()
}

/// Deterministic ±1 feature vector for a token, spread over `dim` dimensions.
fn token_feature(domain: &str, token: &str, dim: usize, out: &mut [f32]) {
    let digest = token_digest(domain, token);
    for (i, slot) in out.iter_mut().enumerate().take(dim) {
        let byte = digest[(i / 8) % 32];
        let bit  = (byte >> (i % 8)) & 1;
        *slot += if bit == 1 { 1.0 } else { -1.0 };
    }
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokens_of(text: &str) -> Vec<String> {
    normalize_text(text)
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

// ── Tier-1: 64-dim binary projection ──────────────────────────────────────────

/// SimHash-style projection of a template into a ±1 vector of TIER1_DIM.
pub fn tier1_projection(template: &str) -> Vec<f32> {
    let tokens = tokens_of(template);
    let mut acc = vec![0.0f32; TIER1_DIM];

    if tokens.is_empty() {
        token_feature("lp_t1_v1", "", TIER1_DIM, &mut acc);
    }
    for n in 1..=2usize {
        for window in tokens.windows(n) {
            token_feature("lp_t1_v1", &window.join(" "), TIER1_DIM, &mut acc);
        }
    }

    acc.into_iter()
        .map(|x| if x >= 0.0 { 1.0 } else { -1.0 })
        .collect()
}

// ── Tier-2: dense random-feature-hash embedding ───────────────────────────────

/// Normalized TIER2_DIM embedding of a text.
pub fn dense_embed(text: &str) -> Vec<f32> {
    let tokens = tokens_of(text);
    let mut vec = vec![0.0f32; TIER2_DIM];

    if tokens.is_empty() {
        token_feature("lp_t2_v1", "", TIER2_DIM, &mut vec);
    }
    for n in 1..=3usize {
        for window in tokens.windows(n) {
            token_feature("lp_t2_v1", &window.join(" "), TIER2_DIM, &mut vec);
        }
    }

    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-8 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
    vec
}

/// Sign pattern of the dense embedding, used as the semantic fingerprint
/// segment input. A coarse projection: equal up to sign flips of every
/// component means equal semantic bucket.
pub fn sign_pattern(text: &str) -> String {
    dense_embed(text)
        .iter()
        .map(|v| if *v >= 0.0 { '1' } else { '0' })
        .collect()
}

// ── Sparse BM25-style vector ──────────────────────────────────────────────────

fn sparse_index(token: &str) -> u32 {
    let digest = token_digest("lp_bm25_v1", token);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Term-frequency sparse vector. IDF weighting is applied by the store
/// (sparse field configured with the IDF modifier), matching the split
/// between client-side TF and server-side IDF.
pub fn sparse_embed(text: &str) -> SparseVector {
    let mut tf: HashMap<u32, f32> = HashMap::new();
    for token in tokens_of(text) {
        *tf.entry(sparse_index(&token)).or_insert(0.0) += 1.0;
    }

    let mut pairs: Vec<(u32, f32)> = tf
        .into_iter()
        .map(|(idx, count)| (idx, count * (BM25_K1 + 1.0) / (count + BM25_K1)))
        .collect();
    pairs.sort_by_key(|(idx, _)| *idx);

    SparseVector {
        indices: pairs.iter().map(|(i, _)| *i).collect(),
        values:  pairs.iter().map(|(_, v)| *v).collect(),
    }
}

// ── Async offload ─────────────────────────────────────────────────────────────

/// Embedding entry points for the async call graph. Every method hops to the
/// blocking pool so the I/O scheduler never runs inference inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Embedder;

impl Embedder {
    pub async fn tier1_batch(&self, templates: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(tokio::task::spawn_blocking(move || {
            templates.iter().map(|t| tier1_projection(t)).collect()
        })
        .await?)
    }

    pub async fn dense(&self, text: String) -> Result<Vec<f32>, EmbedError> {
        Ok(tokio::task::spawn_blocking(move || dense_embed(&text)).await?)
    }

    pub async fn sparse(&self, text: String) -> Result<SparseVector, EmbedError> {
        Ok(tokio::task::spawn_blocking(move || sparse_embed(&text)).await?)
    }
}
