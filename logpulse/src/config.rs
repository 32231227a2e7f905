// logpulse/src/config.rs
//
// Service configuration. Defaults first, environment second, CLI last.
// Environment variables are prefixed LOGPULSE_.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP bind address.
    pub bind_addr: String,

    // Vector store endpoint (used by remote backends; the in-process
    // backend ignores it).
    pub vector_host: String,
    pub vector_port: u16,

    pub replication_factor: u32,
    pub shard_number:       u32,

    pub tier1_collection_prefix: String,
    pub tier2_collection_prefix: String,

    /// Durable control-registry database path.
    pub registry_db_path: PathBuf,

    /// Directory for captured regression cases.
    pub evals_dir: PathBuf,

    /// JSONL file served by the live-tail endpoint.
    pub live_log_path: PathBuf,

    /// Worker cadence and analysis window, in seconds.
    pub analysis_interval_sec: u64,

    /// Append the semantic segment to fingerprints. Changing this changes
    /// fingerprint equivalence; fix it per deployment.
    pub semantic_hash: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr:               "0.0.0.0:8000".to_string(),
            vector_host:             "localhost".to_string(),
            vector_port:             6333,
            replication_factor:      2,
            shard_number:            2,
            tier1_collection_prefix: "pulse_rhythm_monitor".to_string(),
            tier2_collection_prefix: "pulse_forensic_index".to_string(),
            registry_db_path:        PathBuf::from("registry.db"),
            evals_dir:               PathBuf::from("evals"),
            live_log_path:           PathBuf::from("logs/live_stream.jsonl"),
            analysis_interval_sec:   60,
            semantic_hash:           false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("LOGPULSE_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Ok(v) = std::env::var("LOGPULSE_VECTOR_HOST") {
            cfg.vector_host = v;
        }
        if let Ok(v) = std::env::var("LOGPULSE_VECTOR_PORT") {
            if let Ok(port) = v.parse() {
                cfg.vector_port = port;
            }
        }
        if let Ok(v) = std::env::var("LOGPULSE_REPLICATION_FACTOR") {
            if let Ok(n) = v.parse() {
                cfg.replication_factor = n;
            }
        }
        if let Ok(v) = std::env::var("LOGPULSE_SHARD_NUMBER") {
            if let Ok(n) = v.parse() {
                cfg.shard_number = n;
            }
        }
        if let Ok(v) = std::env::var("LOGPULSE_TIER1_PREFIX") {
            cfg.tier1_collection_prefix = v;
        }
        if let Ok(v) = std::env::var("LOGPULSE_TIER2_PREFIX") {
            cfg.tier2_collection_prefix = v;
        }
        if let Ok(v) = std::env::var("LOGPULSE_REGISTRY_DB_PATH") {
            cfg.registry_db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LOGPULSE_EVALS_DIR") {
            cfg.evals_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LOGPULSE_LIVE_LOG_PATH") {
            cfg.live_log_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LOGPULSE_ANALYSIS_INTERVAL_SEC") {
            if let Ok(n) = v.parse() {
                cfg.analysis_interval_sec = n;
            }
        }
        if let Ok(v) = std::env::var("LOGPULSE_SEMANTIC_HASH") {
            cfg.semantic_hash = matches!(v.as_str(), "1" | "true" | "yes");
        }

        cfg
    }
}
