//! Resume probing: find where a previous export stopped.

use crate::datastore::DataStore;
use crate::error::DataStoreError;
use crate::network::NetworkManager;
use crate::schema::BatchSchema;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a resume probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Start exporting at this (start-boundary-aligned) ledger.
    Resume(u32),
    /// Every object of the bounded range already exists; nothing to do.
    Complete,
    /// Resume does not apply (start outside the network window, or the
    /// probe itself failed); the caller proceeds with its requested range.
    NotApplicable,
}

/// Capability for locating the first absent object of a range.
///
/// A capability rather than a concrete type so the exporter app can be
/// driven by a test double.
#[async_trait]
pub trait ResumableManager: Send + Sync {
    /// Locate the first absent file key in `[from, to]`; `to == 0` means
    /// unbounded.
    async fn find_start(&self, from: u32, to: u32) -> ResumeOutcome;
}

/// [`ResumableManager`] probing the destination store directly.
///
/// Assumes the append-only layout the uploader produces: objects form a
/// contiguous prefix, so object presence is monotonically decreasing over
/// the range and a binary search finds the frontier in `O(log n)` probes. A
/// per-key memo keeps repeated probes of the same file free.
pub struct StoreResumableManager {
    store: Arc<dyn DataStore>,
    schema: BatchSchema,
    network: Arc<dyn NetworkManager>,
}

impl StoreResumableManager {
    pub fn new(
        store: Arc<dyn DataStore>,
        schema: BatchSchema,
        network: Arc<dyn NetworkManager>,
    ) -> Self {
        Self {
            store,
            schema,
            network,
        }
    }

    async fn probe(
        &self,
        memo: &mut HashMap<String, bool>,
        sequence: u32,
    ) -> Result<bool, DataStoreError> {
        let key = self.schema.object_key(sequence);
        if let Some(&exists) = memo.get(&key) {
            return Ok(exists);
        }
        let exists = self.store.exists(&key).await?;
        debug!(key, exists, "resume probe");
        memo.insert(key, exists);
        Ok(exists)
    }
}

#[async_trait]
impl ResumableManager for StoreResumableManager {
    async fn find_start(&self, from: u32, to: u32) -> ResumeOutcome {
        if from < 1 {
            return ResumeOutcome::NotApplicable;
        }

        let latest = match self.network.latest_ledger_sequence().await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(error = %e, "cannot determine network latest ledger, skipping resume");
                return ResumeOutcome::NotApplicable;
            }
        };
        if from > latest {
            return ResumeOutcome::NotApplicable;
        }

        // Pad unbounded searches past the archive frontier so the search can
        // reach the most recent objects.
        let effective_to = if to == 0 {
            latest.saturating_add(2 * self.network.checkpoint_frequency())
        } else {
            to
        };
        if effective_to < from {
            return ResumeOutcome::NotApplicable;
        }

        let mut memo = HashMap::new();
        let mut lo = from;
        let mut hi = effective_to;
        let mut first_absent = None;

        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let exists = match self.probe(&mut memo, mid).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!(error = %e, "resume probe failed, skipping resume");
                    return ResumeOutcome::NotApplicable;
                }
            };
            if exists {
                match mid.checked_add(1) {
                    Some(next) => lo = next,
                    None => break,
                }
            } else {
                first_absent = Some(mid);
                if mid == from {
                    break;
                }
                hi = mid - 1;
            }
        }

        match first_absent {
            Some(sequence) => ResumeOutcome::Resume(self.schema.start_boundary(sequence)),
            None if to != 0 => ResumeOutcome::Complete,
            None => {
                // Every probed object exists; the frontier is the next file.
                match self.schema.file_end(effective_to).checked_add(1) {
                    Some(next) => ResumeOutcome::Resume(self.schema.start_boundary(next)),
                    None => ResumeOutcome::NotApplicable,
                }
            }
        }
    }
}
