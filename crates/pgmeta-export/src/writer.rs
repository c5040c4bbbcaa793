//! Concurrent file writer with race-free directory creation.
//!
//! A bounded pool of workers consumes a task channel; each task writes one
//! file. Directory creation is serialized through a per-path mutex map: the
//! lock is taken, the directory is re-checked under the lock, and only then
//! created. Without this, two workers racing to create the same ancestor can
//! observe spurious EEXIST/ENOENT.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use pgmeta_core::{Error, OnError, Result};

use crate::layout::FileTask;

/// File-write budget applied when the caller passes zero.
pub const DEFAULT_WRITE_CONCURRENCY: usize = 50;

#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Keyed mutex map serializing directory creation per path.
#[derive(Default)]
struct DirLocks {
    locks: StdMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl DirLocks {
    fn lock_for(&self, dir: &Path) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(dir.to_path_buf()).or_default())
    }
}

/// Result of a write pass: files written, plus the objects whose writes
/// failed in `warn` mode.
#[derive(Debug, Default)]
pub struct WriteSummary {
    pub written: usize,
    pub failed: Vec<String>,
}

/// Writes planned file tasks concurrently under an error-escalation policy.
pub struct Writer {
    concurrency: usize,
    dir_locks: Arc<DirLocks>,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_CONCURRENCY)
    }
}

impl Writer {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = if concurrency == 0 {
            DEFAULT_WRITE_CONCURRENCY
        } else {
            concurrency
        };
        Self {
            concurrency,
            dir_locks: Arc::new(DirLocks::default()),
        }
    }

    /// Write every task. In `fail` mode the first error wins and is returned
    /// after the pool drains; in `warn` mode failures are logged, recorded
    /// in the summary's ledger, and the call succeeds.
    pub async fn write_all(
        &self,
        tasks: Vec<FileTask>,
        on_error: OnError,
        cancel: &CancellationToken,
    ) -> Result<WriteSummary> {
        if tasks.is_empty() {
            return Ok(WriteSummary::default());
        }

        let (tx, rx) = async_channel::bounded::<FileTask>(self.concurrency.max(2) * 2);
        let first_error: Arc<StdMutex<Option<Error>>> = Arc::new(StdMutex::new(None));
        let failed: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let written = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..self.concurrency)
            .map(|_| {
                let rx = rx.clone();
                let dir_locks = Arc::clone(&self.dir_locks);
                let first_error = Arc::clone(&first_error);
                let failed = Arc::clone(&failed);
                let written = Arc::clone(&written);
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    while let Ok(task) = rx.recv().await {
                        if cancel.is_cancelled() {
                            continue;
                        }
                        if on_error == OnError::Fail && has_error(&first_error) {
                            // An error is already pending; drain the queue
                            // without touching the filesystem further.
                            continue;
                        }

                        match write_task(&dir_locks, &task).await {
                            Ok(()) => {
                                written.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(err) => {
                                tracing::error!(
                                    object_type = %task.object_type,
                                    object = %task.object,
                                    error = %err,
                                    "failed to write definition"
                                );
                                match on_error {
                                    OnError::Warn => {
                                        failed
                                            .lock()
                                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                                            .push(task.object.clone());
                                    }
                                    OnError::Fail => {
                                        store_first_error(&first_error, err);
                                    }
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        for task in tasks {
            if tx.send(task).await.is_err() {
                break;
            }
        }
        tx.close();

        for worker in workers {
            let _ = worker.await;
        }

        if let Some(err) = take_error(&first_error) {
            return Err(err);
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let failed = Arc::try_unwrap(failed)
            .map(|mutex| mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .unwrap_or_default();
        if !failed.is_empty() {
            tracing::warn!(
                errors = failed.len(),
                "encountered errors while exporting, continuing as requested"
            );
        }

        Ok(WriteSummary {
            written: written.load(Ordering::SeqCst),
            failed,
        })
    }
}

async fn write_task(dir_locks: &DirLocks, task: &FileTask) -> Result<()> {
    tracing::debug!(path = %task.path.display(), "writing definition");

    if let Some(parent) = task.path.parent() {
        ensure_dir(dir_locks, parent).await?;
    }

    tokio::fs::write(&task.path, task.content.as_bytes())
        .await
        .map_err(|err| Error::write(&task.path, err))?;
    set_file_mode(&task.path).await?;
    Ok(())
}

/// Create `dir` (and any missing ancestors) exactly once across workers.
async fn ensure_dir(dir_locks: &DirLocks, dir: &Path) -> Result<()> {
    let lock = dir_locks.lock_for(dir);
    let _guard = lock.lock().await;

    match tokio::fs::metadata(dir).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|err| Error::write(dir, err))?;
            set_dir_mode(dir).await
        }
        Err(err) => Err(Error::write(dir, err)),
    }
}

#[cfg(unix)]
async fn set_dir_mode(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(DIR_MODE))
        .await
        .map_err(|err| Error::write(dir, err))
}

#[cfg(not(unix))]
async fn set_dir_mode(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn set_file_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE))
        .await
        .map_err(|err| Error::write(path, err))
}

#[cfg(not(unix))]
async fn set_file_mode(_path: &Path) -> Result<()> {
    Ok(())
}

fn has_error(slot: &StdMutex<Option<Error>>) -> bool {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .is_some()
}

fn store_first_error(slot: &StdMutex<Option<Error>>, err: Error) {
    let mut guard = slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.is_none() {
        *guard = Some(err);
    }
}

fn take_error(slot: &StdMutex<Option<Error>>) -> Option<Error> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

#[cfg(test)]
mod tests {
    use pgmeta_core::ObjectType;

    use super::*;

    fn task(root: &Path, rel: &str, content: &str) -> FileTask {
        FileTask {
            path: root.join(rel),
            object_type: ObjectType::Table,
            object: rel.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn writes_files_and_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Writer::new(4);
        let cancel = CancellationToken::new();

        let tasks = vec![
            task(dir.path(), "public/tables/users/table.sql", "CREATE TABLE users ();"),
            task(dir.path(), "public/views/v.sql", "CREATE VIEW v AS SELECT 1;"),
        ];

        let summary = writer.write_all(tasks, OnError::Fail, &cancel).await.unwrap();
        assert_eq!(summary.written, 2);
        assert!(summary.failed.is_empty());

        let content =
            std::fs::read_to_string(dir.path().join("public/tables/users/table.sql")).unwrap();
        assert_eq!(content, "CREATE TABLE users ();");
    }

    #[tokio::test]
    async fn concurrent_writes_into_one_directory_do_not_race() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Writer::new(16);
        let cancel = CancellationToken::new();

        let tasks: Vec<_> = (0..64)
            .map(|i| task(dir.path(), &format!("public/tables/t/indexes/idx_{i}.sql"), "x"))
            .collect();

        let summary = writer.write_all(tasks, OnError::Fail, &cancel).await.unwrap();
        assert_eq!(summary.written, 64);
        let entries = std::fs::read_dir(dir.path().join("public/tables/t/indexes"))
            .unwrap()
            .count();
        assert_eq!(entries, 64);
    }

    #[tokio::test]
    async fn fail_mode_surfaces_the_error() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where a directory is needed makes mkdir fail.
        std::fs::write(dir.path().join("blocker"), b"not a directory").unwrap();

        let writer = Writer::new(2);
        let cancel = CancellationToken::new();
        let tasks = vec![task(dir.path(), "blocker/child/file.sql", "x")];

        let err = writer
            .write_all(tasks, OnError::Fail, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
    }

    #[tokio::test]
    async fn warn_mode_keeps_going_past_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blocker"), b"not a directory").unwrap();

        let writer = Writer::new(2);
        let cancel = CancellationToken::new();
        let tasks = vec![
            task(dir.path(), "blocker/child/file.sql", "x"),
            task(dir.path(), "public/views/ok.sql", "CREATE VIEW ok AS SELECT 1;"),
        ];

        let summary = writer.write_all(tasks, OnError::Warn, &cancel).await.unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(summary.failed, vec!["blocker/child/file.sql".to_string()]);
        assert!(dir.path().join("public/views/ok.sql").exists());
    }

    #[tokio::test]
    async fn cancelled_token_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Writer::new(2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let tasks = vec![task(dir.path(), "public/views/v.sql", "x")];
        let err = writer
            .write_all(tasks, OnError::Warn, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!dir.path().join("public/views/v.sql").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn files_and_directories_carry_the_documented_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let writer = Writer::new(1);
        let cancel = CancellationToken::new();

        let tasks = vec![task(dir.path(), "public/views/v.sql", "x")];
        writer.write_all(tasks, OnError::Fail, &cancel).await.unwrap();

        let dir_mode = std::fs::metadata(dir.path().join("public/views"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o755);

        let file_mode = std::fs::metadata(dir.path().join("public/views/v.sql"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o644);
    }
}
