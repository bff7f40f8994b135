use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::BackoffConfig;
use crate::error::{RepoError, Result};

/// RAII guard around an advisory-locked file handle. Unlocking happens in
/// `Drop` so the lock is released on every exit path — success, early
/// return, or panic unwinding through the closure — matching the "release
/// on every exit path, including failure" requirement for locked
/// read-modify-write sequences.
struct LockGuard(File);

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

fn would_block(e: &std::io::Error) -> bool {
    if e.kind() == std::io::ErrorKind::WouldBlock {
        return true;
    }
    matches!(e.raw_os_error(), Some(11) | Some(35)) // EAGAIN (Linux), EAGAIN (macOS)
}

fn try_open_and_lock(path: &Path) -> std::io::Result<Option<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(e) if would_block(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Poll for an exclusive lock on `path` with exponential backoff and
/// randomized jitter, up to `backoff.max_attempts` tries. Each attempt is a
/// non-blocking `try_lock_exclusive` hosted on a blocking-pool thread, so the
/// async runtime stays free to make progress on unrelated stubs while this
/// task waits out a contended lock.
async fn acquire_lock(path: &Path, backoff: &BackoffConfig) -> Result<LockGuard> {
    let mut delay = backoff.base_delay;

    for attempt in 1..=backoff.max_attempts {
        let path_owned = path.to_path_buf();
        let opened = tokio::task::spawn_blocking(move || try_open_and_lock(&path_owned))
            .await
            .map_err(|e| RepoError::io(path.to_path_buf(), std::io::Error::other(e)))?
            .map_err(|e| RepoError::io(path.to_path_buf(), e))?;

        if let Some(file) = opened {
            return Ok(LockGuard(file));
        }

        if attempt == backoff.max_attempts {
            tracing::warn!(
                path = %path.display(),
                attempts = attempt,
                "lock contention exhausted retry budget"
            );
            return Err(RepoError::LockContention {
                path: path.to_path_buf(),
                attempts: attempt,
            });
        }

        tracing::debug!(
            path = %path.display(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "lock contended, retrying"
        );

        let jitter = rand::rng().random_range(0.5..=1.0_f64);
        let wait = delay.mul_f64(jitter).min(backoff.max_delay);
        tokio::time::sleep(wait).await;

        let next_secs = (delay.as_secs_f64() * backoff.multiplier).min(backoff.max_delay.as_secs_f64());
        delay = Duration::from_secs_f64(next_secs);
    }

    unreachable!("loop always returns by the final attempt")
}

fn read_current<T: DeserializeOwned>(file: &mut File, path: &Path) -> Result<Option<T>> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| RepoError::io(path, e))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| RepoError::io(path, e))?;

    if contents.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| RepoError::parse(path, e))
}

fn write_current<T: Serialize>(file: &mut File, path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| RepoError::parse(path, e))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| RepoError::io(path, e))?;
    file.set_len(0).map_err(|e| RepoError::io(path, e))?;
    file.write_all(&bytes).map_err(|e| RepoError::io(path, e))?;
    file.flush().map_err(|e| RepoError::io(path, e))
}

/// Acquire an advisory lock on `path`, read its current JSON contents (or
/// `None` if absent/empty), hand that to `transform`, write back the value it
/// returns, and release the lock. `transform` also returns an arbitrary `R`
/// threaded back to the caller — e.g. the response index `nextResponse`
/// picked while it had the cursor under lock.
///
/// The entire read-transform-write sequence runs against one open file
/// handle (seek-to-start, truncate, rewrite) so the lock continuously covers
/// the content it protects; there is no rename that would let a second
/// process see or lock a different inode than the one actually guarded.
pub async fn locked_read_modify_write<T, R, F>(
    path: &Path,
    backoff: &BackoffConfig,
    transform: F,
) -> Result<R>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    R: Send + 'static,
    F: FnOnce(Option<T>) -> Result<(T, R)> + Send + 'static,
{
    let guard = acquire_lock(path, backoff).await?;
    let path_owned: PathBuf = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut guard = guard;
        let current = read_current::<T>(&mut guard.0, &path_owned)?;
        let (to_write, ret) = transform(current)?;
        write_current(&mut guard.0, &path_owned, &to_write)?;
        Ok(ret)
    })
    .await
    .map_err(|e| RepoError::io(path.to_path_buf(), std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn transforms_absent_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        let backoff = BackoffConfig::default();

        let result = locked_read_modify_write::<serde_json::Value, _, _>(&path, &backoff, |cur| {
            assert!(cur.is_none());
            Ok((json!({"nextIndex": 0}), "created"))
        })
        .await
        .unwrap();

        assert_eq!(result, "created");
        let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(on_disk.contains("nextIndex"));
    }

    #[tokio::test]
    async fn round_trips_and_mutates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        let backoff = BackoffConfig::default();

        locked_read_modify_write::<serde_json::Value, _, _>(&path, &backoff, |_| {
            Ok((json!({"count": 1}), ()))
        })
        .await
        .unwrap();

        let got = locked_read_modify_write::<serde_json::Value, _, _>(&path, &backoff, |cur| {
            let mut v = cur.unwrap();
            let count = v["count"].as_i64().unwrap() + 1;
            v["count"] = json!(count);
            Ok((v.clone(), count))
        })
        .await
        .unwrap();

        assert_eq!(got, 2);
    }

    #[tokio::test]
    async fn concurrent_increments_on_same_file_sum_correctly() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(dir.path().join("counter.json"));
        let backoff = Arc::new(BackoffConfig::default());

        locked_read_modify_write::<serde_json::Value, _, _>(&path, &backoff, |_| {
            Ok((json!({"n": 0}), ()))
        })
        .await
        .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let path = Arc::clone(&path);
            let backoff = Arc::clone(&backoff);
            tasks.push(tokio::spawn(async move {
                locked_read_modify_write::<serde_json::Value, _, _>(&path, &backoff, |cur| {
                    let mut v = cur.unwrap();
                    let n = v["n"].as_i64().unwrap() + 1;
                    v["n"] = json!(n);
                    Ok((v, ()))
                })
                .await
                .unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let got: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&*path).await.unwrap()).unwrap();
        assert_eq!(got["n"], json!(20));
    }
}
