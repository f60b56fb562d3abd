//! Replay source adapter: ledgers out of the network's replay subprocess.
//!
//! The subprocess reproduces ledger close meta from the cryptographic
//! history archives and emits it as RFC 5531 record-marked XDR frames on the
//! stream handed to `--metadata-output-stream`. This adapter only manages
//! the process edge: spawn, frame decoding, in-order hand-off and teardown.
//! Everything inside the process (quorum configuration, catchup
//! orchestration) is its own concern.

use crate::backend::LedgerBackend;
use crate::batch::ledger_sequence;
use crate::config::StellarCoreConfig;
use crate::error::BackendError;
use crate::types::LedgerRange;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use stellar_xdr::curr::{LedgerCloseMeta, Limits, ReadXdr};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const CORE_BINARY_NAME: &str = "stellar-core";

/// [`LedgerBackend`] over the replay subprocess.
pub struct CoreReplayBackend {
    config: StellarCoreConfig,
    closed: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    prepared: Option<LedgerRange>,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    /// One-frame lookahead, filled while skipping to a requested sequence.
    pending: Option<LedgerCloseMeta>,
    last_seen: u32,
}

impl CoreReplayBackend {
    pub fn new(config: StellarCoreConfig) -> Self {
        Self {
            config,
            closed: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                prepared: None,
                child: None,
                stdout: None,
                pending: None,
                last_seen: 0,
            }),
        }
    }

    fn check_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    /// The configured binary, or the first `stellar-core` on `PATH`.
    fn resolve_binary(&self) -> Result<PathBuf, BackendError> {
        if !self.config.stellar_core_binary_path.is_empty() {
            return Ok(PathBuf::from(&self.config.stellar_core_binary_path));
        }
        let path = std::env::var_os("PATH").unwrap_or_default();
        std::env::split_paths(&path)
            .map(|dir| dir.join(CORE_BINARY_NAME))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                BackendError::Replay(format!(
                    "{CORE_BINARY_NAME} not found in PATH and stellar_core_binary_path is unset"
                ))
            })
    }

    fn spawn(&self, range: LedgerRange) -> Result<Child, BackendError> {
        if self.config.captive_core_toml_path.is_empty() {
            return Err(BackendError::Replay(
                "captive_core_toml_path is required to run the replay source".into(),
            ));
        }
        let binary = self.resolve_binary()?;

        let mut command = Command::new(&binary);
        match range.to() {
            Some(to) => {
                let count = to - range.from() + 1;
                command.arg("catchup").arg(format!("{to}/{count}"));
            }
            None => {
                command.arg("run");
            }
        }
        command
            .arg("--metadata-output-stream")
            .arg("fd:1")
            .arg("--conf")
            .arg(&self.config.captive_core_toml_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(binary = %binary.display(), range = %range, "spawning replay source");
        command
            .spawn()
            .map_err(|e| BackendError::Replay(format!("cannot spawn {}: {e}", binary.display())))
    }
}

#[async_trait]
impl LedgerBackend for CoreReplayBackend {
    async fn prepare_range(&self, range: LedgerRange) -> Result<(), BackendError> {
        self.check_open()?;
        let mut inner = self.inner.lock().await;

        if let Some(prepared) = &inner.prepared {
            if prepared == &range {
                return Ok(());
            }
            return Err(BackendError::Replay(format!(
                "already prepared for {prepared}, cannot re-prepare for {range}"
            )));
        }

        let mut child = self.spawn(range)?;
        let stdout = child.stdout.take().ok_or_else(|| {
            BackendError::Replay("replay source has no stdout pipe".into())
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        inner.child = Some(child);
        inner.stdout = Some(BufReader::new(stdout));
        inner.prepared = Some(range);
        inner.pending = None;
        inner.last_seen = 0;
        Ok(())
    }

    async fn is_prepared(&self, range: LedgerRange) -> Result<bool, BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(false);
        }
        let inner = self.inner.lock().await;
        Ok(inner
            .prepared
            .as_ref()
            .map(|prepared| {
                prepared.from() <= range.from()
                    && match (prepared.to(), range.to()) {
                        (None, _) => true,
                        (Some(_), None) => false,
                        (Some(p), Some(r)) => p >= r,
                    }
            })
            .unwrap_or(false))
    }

    async fn get_ledger(&self, sequence: u32) -> Result<LedgerCloseMeta, BackendError> {
        self.check_open()?;
        let mut inner = self.inner.lock().await;
        let range = inner.prepared.ok_or(BackendError::NotPrepared)?;
        if sequence < range.from() {
            return Err(BackendError::PrecedesRange {
                sequence,
                from: range.from(),
            });
        }
        if let Some(to) = range.to() {
            if sequence > to {
                return Err(BackendError::BeyondRange { sequence, to });
            }
        }

        loop {
            if let Some(pending) = inner.pending.take() {
                let seen = ledger_sequence(&pending);
                if seen == sequence {
                    return Ok(pending);
                }
                if seen > sequence {
                    inner.pending = Some(pending);
                    return Err(BackendError::Replay(format!(
                        "replay stream is already at ledger {seen}, cannot rewind to {sequence}"
                    )));
                }
                // Replay starts at the checkpoint before the range; frames
                // below the requested sequence are skipped.
                debug!(seen, wanted = sequence, "skipping replayed ledger");
            }

            let stdout = inner
                .stdout
                .as_mut()
                .ok_or_else(|| BackendError::Replay("replay stream is gone".into()))?;
            let frame = read_frame(stdout).await?;
            let meta = LedgerCloseMeta::from_xdr(frame, Limits::none()).map_err(|e| {
                BackendError::Replay(format!("replay stream produced invalid xdr: {e}"))
            })?;
            inner.last_seen = ledger_sequence(&meta);
            inner.pending = Some(meta);
        }
    }

    async fn latest_ledger_sequence(&self) -> Result<u32, BackendError> {
        self.check_open()?;
        let inner = self.inner.lock().await;
        if inner.prepared.is_none() {
            return Err(BackendError::NotPrepared);
        }
        Ok(inner.last_seen)
    }

    async fn close(&self) -> Result<(), BackendError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner.stdout = None;
        inner.pending = None;
        if let Some(mut child) = inner.child.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "killing the replay source failed");
            }
        }
        info!("replay source closed");
        Ok(())
    }
}

/// Read one record-marked frame: 4-byte big-endian headers whose top bit
/// flags the final fragment, lower 31 bits the fragment length.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, BackendError> {
    let mut payload = Vec::new();
    loop {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await.map_err(|e| {
            BackendError::Replay(format!("replay stream ended while reading a frame: {e}"))
        })?;
        let word = u32::from_be_bytes(header);
        let len = (word & 0x7FFF_FFFF) as usize;

        let start = payload.len();
        payload.resize(start + len, 0);
        reader.read_exact(&mut payload[start..]).await.map_err(|e| {
            BackendError::Replay(format!("replay stream truncated a {len}-byte fragment: {e}"))
        })?;

        if word & 0x8000_0000 != 0 {
            return Ok(payload);
        }
    }
}

async fn forward_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "ledgerlake::replay_source", "{line}");
    }
}
