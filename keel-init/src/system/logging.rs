//! Per-service log files.
//!
//! Each service appends to `<log_path>/<id>.log`. Writes from
//! concurrent copiers are serialized by an internal lock so long lines
//! do not interleave. With `debug` set, every write is teed to the
//! supervisor's stderr.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::RunnerError;

/// Append-only log file for one service.
pub struct LogSink {
    path: PathBuf,
    debug: bool,
    file: Mutex<File>,
}

impl LogSink {
    /// Opens (creating if needed) the log file for `id` under
    /// `log_path`, mode 0600, append-only.
    pub async fn open(log_path: &Path, id: &str, debug: bool) -> Result<Self, RunnerError> {
        let path = log_path.join(format!("{id}.log"));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RunnerError::Log {
                    path: path.clone(),
                    source,
                })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&path)
            .await
            .map_err(|source| RunnerError::Log {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            debug,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one chunk, holding the sink lock across the whole write.
    pub async fn write_all(&self, buf: &[u8]) -> Result<(), RunnerError> {
        let mut file = self.file.lock().await;
        file.write_all(buf).await.map_err(|source| RunnerError::Log {
            path: self.path.clone(),
            source,
        })?;
        file.flush().await.map_err(|source| RunnerError::Log {
            path: self.path.clone(),
            source,
        })?;

        if self.debug {
            let _ = std::io::stderr().write_all(buf);
        }

        Ok(())
    }

    /// Drains `reader` into the sink until EOF. Used for process
    /// stdout/stderr pipes.
    pub async fn copy_from<R>(&self, mut reader: R) -> Result<(), RunnerError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf).await.map_err(|source| RunnerError::Log {
                path: self.path.clone(),
                source,
            })?;
            if n == 0 {
                return Ok(());
            }
            self.write_all(&buf[..n]).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_are_appended_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(dir.path(), "svc", false).await.unwrap();

        sink.write_all(b"Test 1\n").await.unwrap();
        sink.write_all(b"Test 2\n").await.unwrap();

        let contents = tokio::fs::read(dir.path().join("svc.log")).await.unwrap();
        assert_eq!(contents, b"Test 1\nTest 2\n");
    }

    #[tokio::test]
    async fn reopening_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = LogSink::open(dir.path(), "svc", false).await.unwrap();
            sink.write_all(b"first\n").await.unwrap();
        }
        {
            let sink = LogSink::open(dir.path(), "svc", false).await.unwrap();
            sink.write_all(b"second\n").await.unwrap();
        }

        let contents = tokio::fs::read(dir.path().join("svc.log")).await.unwrap();
        assert_eq!(contents, b"first\nsecond\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn log_file_is_owner_read_write() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(dir.path(), "svc", false).await.unwrap();
        sink.write_all(b"x").await.unwrap();

        let mode = tokio::fs::metadata(dir.path().join("svc.log"))
            .await
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
