// logpulse/src/evals.rs
//
// Regression-case capture. When an operator patches a fingerprint as a
// false positive, the triggering logs are persisted as a YAML case under
// evals/, pinned to the expected outcome "not an anomaly". The files feed
// offline detector evaluation; capture failures are logged, never surfaced
// to the patch caller.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use crate::events::{EvalCase, EvalExpectedOutcome};

#[derive(Debug, Clone)]
pub struct EvalCapture {
    dir: PathBuf,
}

impl EvalCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist one case as `evals/eval_<fingerprint-prefix>_<unix_ts>.yml`.
    pub async fn capture(&self, rhythm_hash: &str, context_logs: &[String]) {
        let now = Utc::now();
        let case = EvalCase {
            description: format!(
                "Pattern {} patched as a false positive; it must not be reported again.",
                rhythm_hash
            ),
            rhythm_hash:  rhythm_hash.to_string(),
            context_logs: context_logs.to_vec(),
            expected_outcome: EvalExpectedOutcome {
                is_anomaly: false,
                reason:     "patched as false positive".to_string(),
            },
            captured_at: now,
        };

        let prefix = rhythm_hash.split(':').next().unwrap_or(rhythm_hash).to_string();
        let path = self
            .dir
            .join(format!("eval_{}_{}.yml", prefix, now.timestamp()));

        let dir = self.dir.clone();
        let write = tokio::task::spawn_blocking(move || -> anyhow::Result<PathBuf> {
            std::fs::create_dir_all(&dir)?;
            let body = serde_yaml::to_string(&case)?;
            std::fs::write(&path, body)?;
            Ok(path)
        })
        .await;

        match write {
            Ok(Ok(path)) => info!(path = %path.display(), "eval case captured"),
            Ok(Err(e))   => warn!(error = %e, rhythm_hash, "eval capture failed"),
            Err(e)       => warn!(error = %e, rhythm_hash, "eval capture task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_writes_yaml_case() {
        let dir = tempfile::tempdir().unwrap();
        let capture = EvalCapture::new(dir.path().join("evals"));
        capture
            .capture("aabbccdd:11223344", &["log line one".to_string()])
            .await;

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("evals"))
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().into_string().unwrap();
        assert!(name.starts_with("eval_aabbccdd_"));
        assert!(name.ends_with(".yml"));

        let body = std::fs::read_to_string(entries[0].path()).unwrap();
        let case: EvalCase = serde_yaml::from_str(&body).unwrap();
        assert!(!case.expected_outcome.is_anomaly);
        assert_eq!(case.expected_outcome.reason, "patched as false positive");
        assert_eq!(case.context_logs, vec!["log line one".to_string()]);
    }

    #[tokio::test]
    async fn capture_failure_does_not_panic() {
        // A file where the directory should be makes create_dir_all fail.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("evals");
        std::fs::write(&blocker, b"not a directory").unwrap();

        EvalCapture::new(&blocker)
            .capture("deadbeef:cafef00d", &[])
            .await;
    }
}
