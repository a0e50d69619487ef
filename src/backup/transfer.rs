//! Byte copy for a single unit.

use super::coordinator::GlobalCoordinator;
use crate::error::Cancelled;
use filetime::FileTime;
use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
pub enum CopyError {
    Io(io::Error),
    Cancelled,
}

impl From<io::Error> for CopyError {
    fn from(e: io::Error) -> Self {
        CopyError::Io(e)
    }
}

impl From<Cancelled> for CopyError {
    fn from(_: Cancelled) -> Self {
        CopyError::Cancelled
    }
}

/// Copy `source` to `target`, creating parent directories and carrying the
/// source modification time over. The business-pause gate is observed
/// before every chunk, so a detected business process suspends the copy
/// mid-file. Returns the number of bytes written.
pub async fn copy_file(
    source: &Path,
    target: &Path,
    coordinator: &GlobalCoordinator,
    cancel: &CancellationToken,
) -> Result<u64, CopyError> {
    coordinator.wait_business_clear(cancel).await?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut reader = fs::File::open(source).await?;
    let source_meta = reader.metadata().await?;
    let mut writer = fs::File::create(target).await?;

    let mut buffer = vec![0u8; CHUNK_SIZE.min(source_meta.len().max(1) as usize)];
    let mut copied = 0u64;

    loop {
        coordinator.wait_business_clear(cancel).await?;

        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read]).await?;
        copied += read as u64;
    }

    writer.flush().await?;
    drop(writer);

    set_mtime(target, FileTime::from_last_modification_time(&source_meta)).await?;

    Ok(copied)
}

/// Give `target` the modification time of `source`. Run again after
/// anything rewrites the target in place.
pub async fn copy_mtime(source: &Path, target: &Path) -> io::Result<()> {
    let source_meta = fs::metadata(source).await?;
    set_mtime(target, FileTime::from_last_modification_time(&source_meta)).await
}

async fn set_mtime(target: &Path, mtime: FileTime) -> io::Result<()> {
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || filetime::set_file_mtime(&target, mtime))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn copies_bytes_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.bin");
        let target = dir.path().join("out/nested/a.bin");
        std::fs::write(&source, vec![7u8; 3 * CHUNK_SIZE + 17]).unwrap();
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, old).unwrap();

        let coordinator = GlobalCoordinator::new(0);
        let copied = copy_file(&source, &target, &coordinator, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(copied, (3 * CHUNK_SIZE + 17) as u64);
        assert_eq!(std::fs::read(&target).unwrap(), std::fs::read(&source).unwrap());
        let meta = std::fs::metadata(&target).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
    }

    #[tokio::test]
    async fn restamps_rewritten_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        let target = dir.path().join("b.txt");
        std::fs::write(&source, b"plain").unwrap();
        std::fs::write(&target, b"rewritten by a tool").unwrap();
        let old = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&source, old).unwrap();

        copy_mtime(&source, &target).await.unwrap();

        let meta = std::fs::metadata(&target).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
        assert_eq!(meta.len(), 19);
    }

    #[tokio::test]
    async fn copies_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("empty");
        let target = dir.path().join("copy");
        std::fs::write(&source, b"").unwrap();

        let copied = copy_file(&source, &target, &GlobalCoordinator::new(0), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(copied, 0);
        assert!(target.exists());
    }

    #[tokio::test]
    async fn missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = copy_file(
            &dir.path().join("nope"),
            &dir.path().join("copy"),
            &GlobalCoordinator::new(0),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CopyError::Io(_))));
    }

    #[tokio::test]
    async fn pauses_while_business_process_runs() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        let target = dir.path().join("b.txt");
        std::fs::write(&source, b"hello").unwrap();

        let coordinator = Arc::new(GlobalCoordinator::new(0));
        coordinator.set_business_paused(true);

        let task = {
            let coordinator = coordinator.clone();
            let (source, target) = (source.clone(), target.clone());
            tokio::spawn(async move {
                copy_file(&source, &target, &coordinator, &CancellationToken::new()).await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!task.is_finished());
        assert!(!target.exists());

        coordinator.set_business_paused(false);
        assert_eq!(task.await.unwrap().unwrap(), 5);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
    }
}
