//! Persisting rotated refresh tokens
//!
//! [`RotationWriter`] subscribes to a [`CredentialManager`]'s rotations and
//! writes each new refresh token to a file. Writes go through a temp file in
//! the target directory and are renamed into place, so a crash mid-write
//! never leaves a truncated token behind. [`RotationWriter::finish`] drains
//! pending rotations before returning.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{CredentialManager, RefreshTokenRotation};

/// Atomically replace `path` with `token`.
pub fn persist_refresh_token(path: &Path, token: &str) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(token.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Background task saving rotated refresh tokens.
#[derive(Debug)]
pub struct RotationWriter {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RotationWriter {
    /// Start writing rotations of `credentials` to `file`. Without a file,
    /// rotations are only logged.
    pub fn spawn(credentials: &CredentialManager, file: Option<PathBuf>) -> Self {
        let mut rotations = credentials.subscribe_rotations();
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = rotations.recv() => match received {
                        Ok(rotation) => save(file.as_deref(), rotation).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Missed refresh token rotations")
                        }
                        Err(RecvError::Closed) => return,
                    },
                    _ = &mut stopped => break,
                }
            }
            loop {
                match rotations.try_recv() {
                    Ok(rotation) => save(file.as_deref(), rotation).await,
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed refresh token rotations")
                    }
                    Err(_) => break,
                }
            }
        });
        Self { stop, handle }
    }

    /// Save any rotation still queued, then stop.
    pub async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            error!(error = %e, "Refresh token writer task failed");
        }
    }
}

async fn save(file: Option<&Path>, rotation: RefreshTokenRotation) {
    let Some(path) = file else {
        warn!(
            fingerprint = %rotation.fingerprint,
            "Refresh token rotated; pass --refresh-token-file to persist it"
        );
        return;
    };

    let target = path.to_path_buf();
    let token = rotation.refresh_token;
    let result =
        tokio::task::spawn_blocking(move || persist_refresh_token(&target, &token)).await;
    match result {
        Ok(Ok(())) => info!(
            fingerprint = %rotation.fingerprint,
            path = %path.display(),
            "Rotated refresh token saved"
        ),
        Ok(Err(e)) => error!(
            fingerprint = %rotation.fingerprint,
            path = %path.display(),
            error = %e,
            "Failed to save rotated refresh token"
        ),
        Err(e) => error!(
            fingerprint = %rotation.fingerprint,
            error = %e,
            "Refresh token save task failed"
        ),
    }
}
