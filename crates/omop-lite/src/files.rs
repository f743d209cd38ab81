//! Data file location and availability waiting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ProvisionError, Result};
use crate::settings::Settings;

/// Resolve the directory the table CSVs live in.
///
/// Synthetic mode selects one of the bundled fixture sets by size variant;
/// otherwise the user-supplied directory is used. Either way a missing
/// directory is fatal.
pub fn resolve_data_dir(settings: &Settings) -> Result<PathBuf> {
    let dir = if settings.synthetic {
        settings
            .synthetic_dir
            .join(settings.synthetic_size.dir_name())
    } else {
        settings.data_dir.clone()
    };

    if !dir.is_dir() {
        return Err(ProvisionError::DirectoryNotFound(dir));
    }
    Ok(dir)
}

/// Wait for a data file to appear.
///
/// In synthetic mode the fixture either shipped or it didn't, so this
/// checks once. Otherwise the file may still be produced by a concurrent
/// upstream export, so existence is polled at `poll` intervals until
/// `timeout` elapses. Cancellation aborts the wait and reports the file as
/// absent.
pub async fn wait_for_file(
    path: &Path,
    synthetic: bool,
    poll: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> bool {
    if synthetic {
        return path.exists();
    }

    let deadline = Instant::now() + timeout;
    loop {
        if path.exists() {
            return true;
        }
        if Instant::now() >= deadline {
            warn!(
                "Timeout waiting for {} after {}s",
                path.display(),
                timeout.as_secs()
            );
            return false;
        }
        info!("Waiting for {} to exist...", path.display());
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(poll) => {}
        }
    }
}
