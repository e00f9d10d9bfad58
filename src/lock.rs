/// Advisory lock on the serial device path
///
/// Two invocations talking to the same bus at once would interleave frames,
/// so every session holds an exclusive `flock` on the device path for as long
/// as the port is open. The lock is advisory: it only keeps out other
/// processes that ask for it too.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use fs2::FileExt;
use log::{debug, warn};

use crate::config::LockPolicy;
use crate::error::{ModbusError, ModbusResult};

/// Exclusive ownership of a device path
///
/// Released when dropped, whichever way the session ends.
#[derive(Debug)]
pub struct DeviceLock {
    file: File,
    path: PathBuf,
}

impl DeviceLock {
    /// Try once to take the lock without waiting
    ///
    /// # Errors
    ///
    /// - `ModbusError::LockAcquisition` - another holder owns the lock
    /// - `ModbusError::Connection` - the device path cannot be opened
    /// - `ModbusError::Io` - `flock` failed for any other reason
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| ModbusError::connection(format!("Cannot open {}: {}", path.display(), e)))?;

        file.try_lock_exclusive().map_err(|e| {
            if is_contended(&e) {
                ModbusError::lock_acquisition(path.display().to_string(), e.to_string())
            } else {
                ModbusError::io(format!("flock on {} failed: {}", path.display(), e))
            }
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Poll for the lock until it is free or the policy's wait runs out
    ///
    /// Only contention is retried. A path that cannot be opened fails at
    /// once.
    ///
    /// # Errors
    ///
    /// `ModbusError::LockTimeout` once `policy.max_wait` has elapsed, or the
    /// first non-contention error from [`DeviceLock::try_acquire`].
    pub async fn acquire<P: AsRef<Path>>(path: P, policy: &LockPolicy) -> ModbusResult<Self> {
        let path = path.as_ref();
        let started = Instant::now();
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            match Self::try_acquire(path) {
                Ok(lock) => {
                    debug!("Locked {} after {} attempt(s)", path.display(), attempts);
                    return Ok(lock);
                }
                Err(e @ ModbusError::LockAcquisition { .. }) => {
                    if attempts == 1 {
                        warn!("Waiting for device lock: {}", e);
                    } else {
                        debug!("{}", e);
                    }
                }
                Err(e) => return Err(e),
            }

            let waited = started.elapsed();
            if let Some(max_wait) = policy.max_wait {
                if waited >= max_wait {
                    return Err(ModbusError::lock_timeout(
                        path.display().to_string(),
                        waited.as_millis() as u64,
                    ));
                }
            }

            tokio::time::sleep(policy.poll_interval).await;
        }
    }

    /// Locked path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release lock on {}: {}", self.path.display(), e);
        } else {
            debug!("Released lock on {}", self.path.display());
        }
    }
}
