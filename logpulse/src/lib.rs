// logpulse/src/lib.rs
//
// Real-time log anomaly detection and triage.
//
// Pipeline: log batches are fingerprinted (template + rhythm hash) and
// indexed into a hot Tier-1 collection. A periodic analyzer reads the
// recent window against a normalized historical baseline and flags novel
// or frequency-spiking fingerprints; survivors of the operator control gate
// are promoted into daily-partitioned Tier-2 event clusters. The forensic
// layer federates cluster listing, recommendation triage, and hybrid
// retrieval across those partitions.

pub mod analyzer;
pub mod api;
pub mod config;
pub mod control;
pub mod embed;
pub mod evals;
pub mod events;
pub mod fingerprint;
pub mod forensic;
pub mod gateway;
pub mod ingest;
pub mod promote;
pub mod worker;
