//! Append-only line sinks.
use crate::error::{IngestError, IngestResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Destination for formatted readings.
///
/// Written by exactly one consumer. Implementations need not tolerate concurrent writers.
#[async_trait]
pub trait Sink: Send {
    /// Append one line; the implementation adds the terminator.
    async fn write_line(&mut self, line: &str) -> IngestResult<()>;

    /// Push buffered lines to durable storage.
    async fn flush(&mut self) -> IngestResult<()>;

    /// Flush and release the underlying resource. Calling it again is a no-op.
    async fn close(&mut self) -> IngestResult<()>;
}

/// A text file opened in append mode with buffered writes.
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Opens (creating if needed) `path` for appending. Missing parent directories are created.
    pub async fn open(path: impl AsRef<Path>) -> IngestResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(IngestError::Configuration(
                "output path cannot be empty".to_string(),
            ));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        tracing::info!(path = %path.display(), "File sink opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> IngestResult<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            IngestError::SinkWrite(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "sink is closed",
            ))
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write_line(&mut self, line: &str) -> IngestResult<()> {
        let writer = self.writer()?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(IngestError::SinkWrite)?;
        writer.write_all(b"\n").await.map_err(IngestError::SinkWrite)
    }

    async fn flush(&mut self) -> IngestResult<()> {
        self.writer()?.flush().await.map_err(IngestError::SinkWrite)
    }

    async fn close(&mut self) -> IngestResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await.map_err(IngestError::SinkWrite)?;
            writer
                .into_inner()
                .sync_all()
                .await
                .map_err(IngestError::SinkWrite)?;
            tracing::info!(path = %self.path.display(), "File sink closed");
        }
        Ok(())
    }
}
