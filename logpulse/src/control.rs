// logpulse/src/control.rs
//
// Control registry — the single source of truth for "is this fingerprint
// silenced?". Two rule kinds:
//
//   patches       — permanent ALLOW_LIST rows in the durable registry,
//                   mirrored into an in-memory set for O(1) hot-path reads.
//   suppressions  — process-local TTL entries; not persisted across restarts.
//
// Discipline: durable writes commit first, the mirror mutates after. A
// failed commit leaves the in-memory state untouched. The hot path
// (is_silenced) takes no locks beyond a sharded map read and a shared-read
// of the patch mirror.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use dashmap::DashMap;
use libsql::params;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use crate::evals::EvalCapture;
use crate::events::{PatchRule, RuleSet, SuppressionEntry};

pub const RULE_ALLOW_LIST: &str = "ALLOW_LIST";

const CREATE_SCHEMAS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schemas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL UNIQUE,
    schema_json TEXT NOT NULL
)
"#;

const CREATE_PATCH_REGISTRY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS patch_registry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rhythm_hash TEXT NOT NULL UNIQUE,
    rule TEXT NOT NULL,
    reason TEXT,
    created_ts INTEGER,
    is_active BOOLEAN DEFAULT 1
)
"#;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("registry storage error: {0}")]
    Storage(#[from] libsql::Error),
}

pub struct ControlRegistry {
    db:             libsql::Database,
    suppressions:   DashMap<String, i64>,
    active_patches: RwLock<HashSet<String>>,
    evals:          EvalCapture,
}

impl ControlRegistry {
    /// Open (or create) the durable registry and rebuild the in-memory
    /// patch mirror from it.
    pub async fn open(path: &Path, evals: EvalCapture) -> Result<Self, ControlError> {
        let db = libsql::Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        conn.execute(CREATE_SCHEMAS_TABLE, ()).await?;
        conn.execute(CREATE_PATCH_REGISTRY_TABLE, ()).await?;

        let mut active = HashSet::new();
        let mut rows = conn
            .query(
                "SELECT rhythm_hash FROM patch_registry WHERE rule = ? AND is_active = 1",
                params![RULE_ALLOW_LIST],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let hash: String = row.get(0)?;
            active.insert(hash);
        }
        info!(patches = active.len(), "patch registry loaded");

        Ok(Self {
            db,
            suppressions:   DashMap::new(),
            active_patches: RwLock::new(active),
            evals,
        })
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    // ── Hot path ──────────────────────────────────────────────────────────────

    /// True when the fingerprint carries an active patch or a live
    /// suppression. Expired suppressions are removed as they are met.
    pub fn is_silenced(&self, rhythm_hash: &str) -> bool {
        if self.active_patches.read().contains(rhythm_hash) {
            return true;
        }
        if let Some(expiry) = self.suppressions.get(rhythm_hash).map(|e| *e.value()) {
            if Self::now() < expiry {
                return true;
            }
            self.suppressions.remove(rhythm_hash);
        }
        false
    }

    // ── Suppressions ──────────────────────────────────────────────────────────

    /// Set or overwrite a TTL suppression; returns the expiry timestamp.
    pub fn suppress(&self, rhythm_hash: &str, duration_sec: i64) -> i64 {
        let expiry = Self::now() + duration_sec;
        self.suppressions.insert(rhythm_hash.to_string(), expiry);
        info!(rhythm_hash, duration_sec, "fingerprint suppressed");
        expiry
    }

    pub fn delete_suppression(&self, rhythm_hash: &str) -> bool {
        let removed = self.suppressions.remove(rhythm_hash).is_some();
        if removed {
            info!(rhythm_hash, "suppression removed");
        }
        removed
    }

    // ── Patches ───────────────────────────────────────────────────────────────

    /// Persist an ALLOW_LIST patch (reactivating an existing row on
    /// conflict), mirror it, and capture a regression case from the
    /// provided context logs.
    pub async fn patch(
        &self,
        rhythm_hash: &str,
        reason: &str,
        context_logs: &[String],
    ) -> Result<(), ControlError> {
        let conn = self.db.connect()?;
        conn.execute(
            r#"
            INSERT INTO patch_registry (rhythm_hash, rule, reason, created_ts, is_active)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT(rhythm_hash) DO UPDATE SET is_active = 1
            "#,
            params![
                rhythm_hash.to_string(),
                RULE_ALLOW_LIST,
                reason.to_string(),
                Self::now()
            ],
        )
        .await?;

        self.active_patches.write().insert(rhythm_hash.to_string());
        info!(rhythm_hash, "fingerprint patched as permanently allowed");

        self.evals.capture(rhythm_hash, context_logs).await;
        Ok(())
    }

    /// Deactivate a patch; returns whether a row changed.
    pub async fn delete_patch(&self, rhythm_hash: &str) -> Result<bool, ControlError> {
        let conn = self.db.connect()?;
        let changed = conn
            .execute(
                "UPDATE patch_registry SET is_active = 0 WHERE rhythm_hash = ?",
                params![rhythm_hash.to_string()],
            )
            .await?;

        self.active_patches.write().remove(rhythm_hash);
        if changed > 0 {
            info!(rhythm_hash, "patch deactivated");
        }
        Ok(changed > 0)
    }

    // ── Listing ───────────────────────────────────────────────────────────────

    /// Active patches from the durable store plus live suppressions.
    pub async fn rules(&self) -> Result<RuleSet, ControlError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT rhythm_hash, rule, reason, created_ts FROM patch_registry \
                 WHERE is_active = 1 ORDER BY created_ts",
                (),
            )
            .await?;

        let mut patches = Vec::new();
        while let Some(row) = rows.next().await? {
            patches.push(PatchRule {
                rhythm_hash: row.get(0)?,
                rule:        row.get(1)?,
                reason:      row.get::<String>(2).unwrap_or_default(),
                created_ts:  row.get::<i64>(3).unwrap_or_default(),
                is_active:   true,
            });
        }

        let now = Self::now();
        self.suppressions.retain(|_, expiry| *expiry > now);
        let mut suppressions: Vec<SuppressionEntry> = self
            .suppressions
            .iter()
            .map(|e| SuppressionEntry {
                rhythm_hash: e.key().clone(),
                expires_at:  *e.value(),
            })
            .collect();
        suppressions.sort_by(|a, b| a.rhythm_hash.cmp(&b.rhythm_hash));

        Ok(RuleSet { patches, suppressions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry(dir: &tempfile::TempDir) -> ControlRegistry {
        ControlRegistry::open(
            &dir.path().join("registry.db"),
            EvalCapture::new(dir.path().join("evals")),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn suppression_silences_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir).await;

        assert!(!reg.is_silenced("h1"));
        reg.suppress("h1", 3600);
        assert!(reg.is_silenced("h1"));

        // An already-expired entry is removed lazily on the next check.
        reg.suppress("h2", -1);
        assert!(!reg.is_silenced("h2"));
        assert!(!reg.delete_suppression("h2"));
    }

    #[tokio::test]
    async fn suppress_twice_keeps_one_entry_with_latest_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir).await;

        let first  = reg.suppress("h", 10);
        let second = reg.suppress("h", 7200);
        assert!(second >= first);

        let rules = reg.rules().await.unwrap();
        assert_eq!(rules.suppressions.len(), 1);
        assert_eq!(rules.suppressions[0].expires_at, second);
    }

    #[tokio::test]
    async fn patch_survives_reopen_and_delete_deactivates() {
        let dir = tempfile::tempdir().unwrap();
        {
            let reg = registry(&dir).await;
            reg.patch("hx", "operator verified benign", &["ctx".to_string()])
                .await
                .unwrap();
            assert!(reg.is_silenced("hx"));
        }

        let reg = registry(&dir).await;
        assert!(reg.is_silenced("hx"));
        let rules = reg.rules().await.unwrap();
        assert_eq!(rules.patches.len(), 1);
        assert_eq!(rules.patches[0].rule, RULE_ALLOW_LIST);

        assert!(reg.delete_patch("hx").await.unwrap());
        assert!(!reg.is_silenced("hx"));
        assert!(reg.rules().await.unwrap().patches.is_empty());
    }

    #[tokio::test]
    async fn patch_reactivates_deactivated_row() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir).await;

        reg.patch("hr", "first", &[]).await.unwrap();
        reg.delete_patch("hr").await.unwrap();
        reg.patch("hr", "again", &[]).await.unwrap();

        assert!(reg.is_silenced("hr"));
        assert_eq!(reg.rules().await.unwrap().patches.len(), 1);
    }

    #[tokio::test]
    async fn patch_writes_eval_case() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir).await;
        reg.patch("abcd1234:ef567890", "fp", &["line".to_string()])
            .await
            .unwrap();

        let evals: Vec<_> = std::fs::read_dir(dir.path().join("evals"))
            .unwrap()
            .collect();
        assert_eq!(evals.len(), 1);
    }
}
