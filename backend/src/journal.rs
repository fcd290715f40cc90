//! Append-only journal for the mint-then-fulfill saga.
//!
//! Minting a cNFT and recording it with `fulfill_oracle` are two separate
//! transactions. Each completed step is appended here as one JSON line
//! keyed by `(user, request_id)`, so a restart can tell which requests were
//! minted but never fulfilled (see [`crate::fulfiller::Fulfiller::reconcile`]).
//! Only unfinished requests are kept in memory; a `Fulfilled` step drops
//! its key, and the file holds the full history.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SagaStep {
    /// cNFT minted; `result_uri` is kept so fulfillment can be replayed.
    Minted {
        asset_id: String,
        signature: String,
        result_uri: String,
    },
    Fulfilled { asset_id: String, signature: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub user: String,
    pub request_id: u64,
    #[serde(flatten)]
    pub step: SagaStep,
}

type Key = (String, u64);

struct Inner {
    file: Option<File>,
    latest: HashMap<Key, SagaStep>,
}

impl Inner {
    fn apply(&mut self, key: Key, step: SagaStep) {
        match step {
            SagaStep::Fulfilled { .. } => {
                self.latest.remove(&key);
            }
            step => {
                self.latest.insert(key, step);
            }
        }
    }
}

pub struct Journal {
    inner: Mutex<Inner>,
}

impl Journal {
    /// Journal that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                file: None,
                latest: HashMap::new(),
            }),
        }
    }

    /// Open (or create) the journal at `path` and replay its entries.
    /// Unparseable lines (e.g. a torn final write) are skipped.
    pub fn open(path: &Path) -> Result<Self> {
        let mut replayed = Inner {
            file: None,
            latest: HashMap::new(),
        };
        let mut needs_newline = false;
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read journal {}", path.display()))?;
            needs_newline = !contents.is_empty() && !contents.ends_with('\n');
            for (line_no, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(entry) => replayed.apply((entry.user, entry.request_id), entry.step),
                    Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed journal line"),
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open journal {} for append", path.display()))?;
        if needs_newline {
            // Terminate a torn final line so the next entry starts clean.
            file.write_all(b"\n").context("failed to repair journal")?;
        }

        replayed.file = Some(file);
        Ok(Self {
            inner: Mutex::new(replayed),
        })
    }

    /// Durably record `step` for `(user, request_id)`.
    pub fn record(&self, user: &str, request_id: u64, step: SagaStep) -> Result<()> {
        let entry = JournalEntry {
            user: user.to_string(),
            request_id,
            step,
        };
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = inner.file.as_mut() {
            let mut line = serde_json::to_string(&entry).context("failed to encode journal entry")?;
            line.push('\n');
            file.write_all(line.as_bytes())
                .and_then(|_| file.sync_data())
                .context("failed to append to journal")?;
        }
        inner.apply((entry.user, entry.request_id), entry.step);
        Ok(())
    }

    /// Latest recorded step for `(user, request_id)`, `None` once fulfilled.
    pub fn latest(&self, user: &str, request_id: u64) -> Option<SagaStep> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.latest.get(&(user.to_string(), request_id)).cloned()
    }

    /// Requests whose latest step is `Minted`, sorted for stable processing.
    pub fn pending_fulfillment(&self) -> Vec<JournalEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<JournalEntry> = inner
            .latest
            .iter()
            .filter(|(_, step)| matches!(step, SagaStep::Minted { .. }))
            .map(|((user, request_id), step)| JournalEntry {
                user: user.clone(),
                request_id: *request_id,
                step: step.clone(),
            })
            .collect();
        pending.sort_by(|a, b| (&a.user, a.request_id).cmp(&(&b.user, b.request_id)));
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cyberoracle-{name}-{}.jsonl", uuid::Uuid::new_v4()))
    }

    fn minted(asset: &str) -> SagaStep {
        SagaStep::Minted {
            asset_id: asset.into(),
            signature: "sig".into(),
            result_uri: "https://m/1".into(),
        }
    }

    #[test]
    fn fulfilled_requests_are_dropped() {
        let journal = Journal::in_memory();
        journal.record("u", 0, minted("a")).unwrap();
        journal
            .record(
                "u",
                0,
                SagaStep::Fulfilled {
                    asset_id: "a".into(),
                    signature: "f".into(),
                },
            )
            .unwrap();
        assert_eq!(journal.latest("u", 0), None);
        assert!(journal.pending_fulfillment().is_empty());
    }

    #[test]
    fn replays_from_disk() {
        let path = temp_path("replay");
        {
            let journal = Journal::open(&path).unwrap();
            journal.record("u1", 3, minted("a3")).unwrap();
            journal.record("u2", 1, minted("b1")).unwrap();
            journal.record("u3", 0, minted("c0")).unwrap();
            journal
                .record(
                    "u3",
                    0,
                    SagaStep::Fulfilled {
                        asset_id: "c0".into(),
                        signature: "sig".into(),
                    },
                )
                .unwrap();
        }
        let reopened = Journal::open(&path).unwrap();
        assert_eq!(reopened.latest("u1", 3), Some(minted("a3")));
        assert_eq!(reopened.latest("u3", 0), None);
        let pending = reopened.pending_fulfillment();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].user, "u1");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn torn_line_is_skipped() {
        let path = temp_path("torn");
        std::fs::write(
            &path,
            "{\"user\":\"u\",\"request_id\":1,\"step\":\"minted\",\"asset_id\":\"a\",\"signature\":\"s\",\"result_uri\":\"r\"}\n{\"user\":\"u\",\"req",
        )
        .unwrap();
        let journal = Journal::open(&path).unwrap();
        assert_eq!(journal.latest("u", 1), Some(minted_with_sig("a", "s")));
        journal.record("u", 2, minted("b")).unwrap();
        drop(journal);

        let reopened = Journal::open(&path).unwrap();
        assert_eq!(reopened.latest("u", 2), Some(minted("b")));
        std::fs::remove_file(path).ok();
    }

    fn minted_with_sig(asset: &str, sig: &str) -> SagaStep {
        SagaStep::Minted {
            asset_id: asset.into(),
            signature: sig.into(),
            result_uri: "r".into(),
        }
    }
}
