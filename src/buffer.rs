//! Bounded ordered prefetch buffer over the object store.
//!
//! The buffer dispatches batch fetches in strictly ascending file order and
//! reserves each batch's delivery slot at dispatch time (the slot map is
//! keyed by file start), so workers may complete in any order while the
//! consumer always observes batches in ascending start order. At most
//! `buffer_size` batches are in flight (dispatched and not yet consumed) and
//! at most `num_workers` fetches run concurrently.

use crate::batch::{BatchCodec, LedgerBatch};
use crate::datastore::DataStore;
use crate::error::BackendError;
use crate::retry::RetryConfig;
use crate::schema::BatchSchema;
use crate::types::LedgerRange;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

pub(crate) struct LedgerBuffer {
    shared: Arc<Shared>,
    tracker: TaskTracker,
    buffer_size: usize,
}

struct Shared {
    schema: BatchSchema,
    store: Arc<dyn DataStore>,
    codec: Arc<dyn BatchCodec>,
    range: LedgerRange,
    retry: RetryConfig,
    workers: Semaphore,
    state: Mutex<State>,
    ready_notify: Notify,
    cancel: CancellationToken,
}

struct State {
    /// File start of the next batch to dispatch; `None` once the bounded
    /// range (or the sequence space) is exhausted.
    next_dispatch: Option<u32>,
    /// File start of the next batch the consumer expects.
    head: u32,
    /// Batches dispatched and not yet consumed, ready ones included.
    in_flight: usize,
    /// Reserved delivery slots, filled by workers as fetches complete.
    ready: BTreeMap<u32, Result<LedgerBatch, BackendError>>,
    /// Terminal fetch failure; once set, every read reproduces it.
    failed: Option<FetchFailure>,
}

/// Cloneable record of a terminal fetch failure, so repeated reads after a
/// failure keep failing with the same answer instead of sliding to the next
/// slot.
#[derive(Clone, Debug)]
enum FetchFailure {
    Missing { sequence: u32, key: String },
    Exhausted { key: String, attempts: u32, message: String },
    Corrupt { message: String },
}

impl FetchFailure {
    fn of(error: &BackendError) -> Option<Self> {
        match error {
            BackendError::MissingBatch { sequence, key } => Some(FetchFailure::Missing {
                sequence: *sequence,
                key: key.clone(),
            }),
            BackendError::MaxRetriesExceeded {
                key,
                attempts,
                source,
            } => Some(FetchFailure::Exhausted {
                key: key.clone(),
                attempts: *attempts,
                message: source.to_string(),
            }),
            BackendError::Codec(e) => Some(FetchFailure::Corrupt {
                message: e.to_string(),
            }),
            // Cancellation is not a failure and is never latched.
            _ => None,
        }
    }

    fn to_error(&self) -> BackendError {
        match self {
            FetchFailure::Missing { sequence, key } => BackendError::MissingBatch {
                sequence: *sequence,
                key: key.clone(),
            },
            FetchFailure::Exhausted {
                key,
                attempts,
                message,
            } => BackendError::MaxRetriesExceeded {
                key: key.clone(),
                attempts: *attempts,
                source: crate::error::DataStoreError::Io {
                    key: key.clone(),
                    source: std::io::Error::other(message.clone()),
                },
            },
            FetchFailure::Corrupt { message } => {
                BackendError::Codec(crate::error::CodecError::Inconsistent(message.clone()))
            }
        }
    }
}

impl LedgerBuffer {
    /// Create the buffer and start prefetching `range` immediately.
    pub(crate) fn new(
        schema: BatchSchema,
        store: Arc<dyn DataStore>,
        codec: Arc<dyn BatchCodec>,
        retry: RetryConfig,
        range: LedgerRange,
        buffer_size: usize,
        num_workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        let first = schema.file_start(range.from());
        let shared = Arc::new(Shared {
            schema,
            store,
            codec,
            range,
            retry,
            workers: Semaphore::new(num_workers),
            state: Mutex::new(State {
                next_dispatch: Some(first),
                head: first,
                in_flight: 0,
                ready: BTreeMap::new(),
                failed: None,
            }),
            ready_notify: Notify::new(),
            cancel,
        });

        let buffer = Self {
            shared,
            tracker: TaskTracker::new(),
            buffer_size,
        };
        buffer.dispatch();
        buffer
    }

    /// Top up in-flight fetches to the buffer capacity.
    fn dispatch(&self) {
        let mut state = self.shared.state.lock();
        while state.in_flight < self.buffer_size {
            let Some(start) = state.next_dispatch else {
                break;
            };
            if let Some(to) = self.shared.range.to() {
                if start > to {
                    state.next_dispatch = None;
                    break;
                }
            }

            state.in_flight += 1;
            state.next_dispatch = start.checked_add(self.shared.schema.ledgers_per_file());

            let shared = Arc::clone(&self.shared);
            self.tracker.spawn(async move {
                let result = match shared.workers.acquire().await {
                    Ok(_permit) => fetch_with_retry(&shared, start).await,
                    Err(_) => Err(BackendError::Cancelled),
                };
                shared.state.lock().ready.insert(start, result);
                shared.ready_notify.notify_one();
            });
        }
    }

    /// Take the next batch in file order, waiting for its worker if needed.
    ///
    /// Consuming a slot frees buffer capacity, so the next batch of the
    /// range is dispatched before this returns. After [`close`](Self::close)
    /// (or root cancellation) every call returns
    /// [`BackendError::Cancelled`].
    pub(crate) async fn next_batch(&self) -> Result<LedgerBatch, BackendError> {
        loop {
            if self.shared.cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            let notified = self.shared.ready_notify.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(failure) = &state.failed {
                    return Err(failure.to_error());
                }
                let head = state.head;
                if let Some(result) = state.ready.remove(&head) {
                    state.in_flight -= 1;
                    if let Some(next) = head.checked_add(self.shared.schema.ledgers_per_file()) {
                        state.head = next;
                    }
                    if let Err(error) = &result {
                        state.failed = FetchFailure::of(error);
                    }
                    drop(state);
                    self.dispatch();
                    return result;
                }
                if state.in_flight == 0 && state.next_dispatch.is_none() {
                    // Nothing left to deliver; the backend's range checks
                    // normally prevent ever getting here.
                    debug!(head, "delivery queue drained");
                    return Err(BackendError::Cancelled);
                }
            }

            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return Err(BackendError::Cancelled),
                _ = notified => {}
            }
        }
    }

    /// Last sequence visible from the head of the delivery queue: the end of
    /// the contiguous run of ready batches starting at the head slot.
    pub(crate) fn visible_latest(&self) -> Option<u32> {
        let state = self.shared.state.lock();
        let mut cursor = state.head;
        let mut latest = None;
        while let Some(Ok(batch)) = state.ready.get(&cursor) {
            latest = Some(batch.end_sequence());
            cursor = match cursor.checked_add(self.shared.schema.ledgers_per_file()) {
                Some(next) => next,
                None => break,
            };
        }
        latest
    }

    /// Batches currently dispatched and not yet consumed.
    pub(crate) fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    /// Cancel all workers and wait for them to drain. Idempotent.
    pub(crate) async fn close(&self) {
        self.shared.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// One worker fetch: get the object, decode it, and classify failures.
///
/// - Cancellation wins over everything and is published as such.
/// - A missing object is terminal for a bounded range and an indefinite
///   wait-and-retry for an unbounded one (the object is expected to appear
///   as the chain advances).
/// - Other store failures are retried up to the configured limit.
/// - A batch that fetched but does not decode is corrupt, never retried.
async fn fetch_with_retry(shared: &Shared, start: u32) -> Result<LedgerBatch, BackendError> {
    let key = shared.schema.object_key(start);
    let bounded = shared.range.is_bounded();
    let mut attempts: u32 = 0;

    loop {
        let fetched = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Err(BackendError::Cancelled),
            result = shared.store.get_file(&key) => result,
        };

        let error = match fetched {
            Ok(bytes) => return Ok(shared.codec.decode(&bytes)?),
            Err(e) => e,
        };

        if error.is_not_found() {
            if bounded {
                return Err(BackendError::MissingBatch {
                    sequence: start,
                    key,
                });
            }
            debug!(key, "object not yet in the data store, waiting");
        } else if shared.retry.should_retry(attempts) {
            attempts += 1;
            warn!(key, attempts, error = %error, "transient fetch failure, retrying");
        } else {
            return Err(BackendError::MaxRetriesExceeded {
                key,
                attempts: attempts + 1,
                source: error,
            });
        }

        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Err(BackendError::Cancelled),
            _ = tokio::time::sleep(shared.retry.delay()) => {}
        }
    }
}
