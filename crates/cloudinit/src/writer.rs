//! File writer for write_files entries

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::CloudInitError;

/// Mode for directories created on the way to a file
pub const PARENT_DIR_MODE: u32 = 0o755;

/// What a write actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Appended,
    Unchanged,
}

/// Writes files on the host, optionally re-rooted under a directory
#[derive(Debug, Clone, Default)]
pub struct FileWriter {
    root: Option<PathBuf>,
}

impl FileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer that maps absolute paths below `root` (used by tests and dry runs).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }

    /// Write `data` to `path`.
    ///
    /// Rewriting identical content is a no-op. Appends always append.
    pub async fn write(
        &self,
        path: &str,
        data: &[u8],
        mode: Option<u32>,
        append: bool,
    ) -> Result<WriteOutcome, CloudInitError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            ensure_dir(parent).await?;
        }

        let existing = match fs::read(&target).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(CloudInitError::io("read", &target, e)),
        };

        let outcome = match (&existing, append) {
            (Some(current), false) if current.as_slice() == data => WriteOutcome::Unchanged,
            (Some(_), true) => {
                let mut file = fs::OpenOptions::new()
                    .append(true)
                    .open(&target)
                    .await
                    .map_err(|e| CloudInitError::io("open", &target, e))?;
                file.write_all(data)
                    .await
                    .map_err(|e| CloudInitError::io("append to", &target, e))?;
                file.flush()
                    .await
                    .map_err(|e| CloudInitError::io("flush", &target, e))?;
                WriteOutcome::Appended
            }
            _ => {
                fs::write(&target, data)
                    .await
                    .map_err(|e| CloudInitError::io("write", &target, e))?;
                WriteOutcome::Written
            }
        };

        if let Some(mode) = mode {
            set_mode(&target, mode).await?;
        }
        debug!(path = %target.display(), ?outcome, "write_files entry applied");
        Ok(outcome)
    }
}

async fn ensure_dir(dir: &Path) -> Result<(), CloudInitError> {
    if fs::metadata(dir).await.is_ok() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(PARENT_DIR_MODE)
        .create(dir)
        .await
        .map_err(|e| CloudInitError::io("create directory", dir, e))
}

async fn set_mode(path: &Path, mode: u32) -> Result<(), CloudInitError> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| CloudInitError::io("stat", path, e))?;
    if metadata.permissions().mode() & 0o7777 == mode {
        return Ok(());
    }
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| CloudInitError::io("chmod", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parents_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriter::with_root(dir.path());

        let outcome = writer
            .write("/etc/kubernetes/a.conf", b"ok", Some(0o600), false)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);

        let target = dir.path().join("etc/kubernetes/a.conf");
        assert_eq!(std::fs::read(&target).unwrap(), b"ok");
        let mode = std::fs::metadata(&target).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o600);
        let parent_mode = std::fs::metadata(target.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(parent_mode & 0o700, 0o700);

        let again = writer
            .write("/etc/kubernetes/a.conf", b"ok", Some(0o600), false)
            .await
            .unwrap();
        assert_eq!(again, WriteOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_append_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriter::with_root(dir.path());
        writer.write("/f", b"line1\n", None, false).await.unwrap();

        let outcome = writer.write("/f", b"line2\n", None, true).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Appended);

        assert_eq!(
            std::fs::read_to_string(dir.path().join("f")).unwrap(),
            "line1\nline2\n"
        );
    }

    #[tokio::test]
    async fn test_append_of_content_already_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriter::with_root(dir.path());
        writer.write("/f", b"x\n", None, false).await.unwrap();
        let outcome = writer.write("/f", b"x\n", None, true).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Appended);
        assert_eq!(std::fs::read_to_string(dir.path().join("f")).unwrap(), "x\nx\n");
    }

    #[tokio::test]
    async fn test_parent_directories_are_traversable() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriter::with_root(dir.path());
        writer.write("/a/b/c.txt", b"x", None, false).await.unwrap();
        let mode = std::fs::metadata(dir.path().join("a/b"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode & 0o700, 0o700);
        assert_eq!(mode & !PARENT_DIR_MODE, 0);
    }

    #[tokio::test]
    async fn test_append_to_missing_file_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriter::with_root(dir.path());
        let outcome = writer.write("/new", b"x", None, true).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriter::with_root(dir.path());
        writer.write("/f", b"old", None, false).await.unwrap();
        writer.write("/f", b"new", None, false).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"new");
    }
}
