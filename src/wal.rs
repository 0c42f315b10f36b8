//! Append-only request log for RespVault
//!
//! Every accepted mutating request is written here, in wire format, before it
//! is applied. A background task syncs the file once a second. At startup the
//! log is replayed through the engine to rebuild the key spaces.

use crate::config::SyncPolicy;
use crate::error::{RespVaultError, Result};
use crate::protocol::{DecodeLimits, RespReader, Value};
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Period of the background durability sync
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// `None` once the log has been closed.
type SharedFile = Arc<Mutex<Option<File>>>;

/// Write-ahead log of wire-encoded requests
pub struct WriteAheadLog {
    file: SharedFile,
    path: PathBuf,
    sync_policy: SyncPolicy,
    limits: DecodeLimits,
    shutdown_tx: broadcast::Sender<()>,
}

impl WriteAheadLog {
    /// Open (or create) the log at `path` and start the flush task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open<P: AsRef<Path>>(path: P, sync_policy: SyncPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        let file: SharedFile = Arc::new(Mutex::new(Some(file)));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(run_periodic_sync(Arc::clone(&file), shutdown_rx));

        debug!(path = %path.display(), ?sync_policy, "opened append-only file");
        Ok(Self {
            file,
            path,
            sync_policy,
            limits: DecodeLimits::default(),
            shutdown_tx,
        })
    }

    /// Limits applied when decoding records during replay
    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one request to the end of the log.
    ///
    /// Returns once the bytes are handed to the OS (and synced, under
    /// `SyncPolicy::Always`). Fails after `close`. A failed append leaves no
    /// partial record behind: the file is cut back to its previous length, or
    /// closed if that is not possible.
    pub async fn append(&self, request: &Value) -> Result<()> {
        let bytes = request.encode();
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or_else(closed)?;
        let len = file.metadata().await?.len();

        if let Err(e) = write_record(file, &bytes, self.sync_policy).await {
            warn!(error = %e, path = %self.path.display(), "append failed, removing partial record");
            discard_torn_tail(&mut guard, len).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Force everything written so far to stable storage.
    pub async fn sync(&self) -> Result<()> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or_else(closed)?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Feed every recorded value, oldest first, to `apply`.
    ///
    /// The log lock is held for the whole replay, so `apply` must not append.
    /// Stops cleanly at end of file; a record that fails to decode, or that
    /// `apply` rejects, aborts the replay with `RespVaultError::Replay`.
    /// Returns the number of records applied.
    pub async fn replay<F, Fut>(&self, mut apply: F) -> Result<u64>
    where
        F: FnMut(Value) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or_else(closed)?;
        file.seek(SeekFrom::Start(0)).await?;

        let mut reader = RespReader::with_limits(&mut *file, self.limits);
        let mut applied = 0u64;
        loop {
            let record = applied + 1;
            let offset = reader.position();
            let replay_error = move |reason: String| RespVaultError::Replay {
                record,
                offset,
                reason,
            };

            let value = match reader.read_value().await {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(e) => return Err(replay_error(e.to_string())),
            };
            match apply(value).await {
                Ok(()) => applied += 1,
                Err(e @ RespVaultError::Replay { .. }) => return Err(e),
                Err(e) => return Err(replay_error(e.to_string())),
            }
        }
        drop(reader);

        file.seek(SeekFrom::End(0)).await?;
        info!(path = %self.path.display(), records = applied, "replayed append-only file");
        Ok(applied)
    }

    /// Stop the flush task, sync, and release the file. Later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await?;
            file.sync_all().await?;
            info!(path = %self.path.display(), "closed append-only file");
        }
        Ok(())
    }
}

async fn write_record(file: &mut File, bytes: &[u8], sync_policy: SyncPolicy) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    if sync_policy == SyncPolicy::Always {
        file.sync_data().await?;
    }
    Ok(())
}

/// Truncate the file back to `len`. If that fails the file is closed, so no
/// later record can land behind the torn bytes.
async fn discard_torn_tail(slot: &mut Option<File>, len: u64) {
    let Some(file) = slot.as_mut() else {
        return;
    };
    let restored = async {
        file.set_len(len).await?;
        file.seek(SeekFrom::End(0)).await?;
        Ok::<_, io::Error>(())
    }
    .await;

    if let Err(e) = restored {
        error!(error = %e, "could not remove partial record, closing append-only file");
        *slot = None;
    }
}

fn closed() -> RespVaultError {
    RespVaultError::Wal("append-only file is closed".to_string())
}

/// Sync the file every `FLUSH_INTERVAL` until shutdown is signalled, the
/// owning log is dropped, or the file is closed.
async fn run_periodic_sync(file: SharedFile, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut guard = file.lock().await;
                let Some(file) = guard.as_mut() else {
                    break;
                };
                if let Err(e) = file.sync_data().await {
                    warn!(error = %e, "periodic sync of append-only file failed");
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    debug!("append-only file sync task stopped");
}
