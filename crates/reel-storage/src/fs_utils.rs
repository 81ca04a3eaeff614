//! Filesystem helpers: durable writes and cross-device moves.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{StorageError, StorageResult};

/// Temporary sibling used while writing `path`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `data` to `path` so readers see either the old or the new file.
///
/// The bytes go to a temporary sibling which is flushed with `sync_all`
/// and then renamed over the destination.
pub async fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> StorageResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let mut file = fs::File::create(&tmp).await?;
    let written = async {
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    sync_parent(path).await;
    Ok(())
}

/// Flush the directory entry after a rename. Best effort: not every
/// platform allows opening a directory for sync.
async fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
}

/// Copy a file into place atomically.
pub async fn copy_atomic(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> StorageResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(dst);
    fs::copy(src, &tmp).await?;
    let file = fs::OpenOptions::new().write(true).open(&tmp).await?;
    file.sync_all().await?;
    drop(file);
    if let Err(e) = fs::rename(&tmp, dst).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Move a directory from `src` to `dst`, handling cross-device moves.
///
/// A plain rename is tried first. On EXDEV the tree is copied and the
/// source removed afterwards.
pub async fn move_dir(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> StorageResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }
    if fs::try_exists(dst).await? {
        return Err(StorageError::AlreadyExists(dst.to_path_buf()));
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_dir(src, dst).await?;
            if let Err(e) = fs::remove_dir_all(src).await {
                tracing::warn!(
                    "Failed to remove source directory after cross-device move: {}: {}",
                    src.display(),
                    e
                );
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

/// Recursively copy a directory tree.
async fn copy_dir(src: &Path, dst: &Path) -> StorageResult<()> {
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                stack.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}
