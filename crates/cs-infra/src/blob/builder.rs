//! Incremental blob construction.
//! 增量构建本地 blob。

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use cs_core::{Blob, BlobOwnership, ContentDigest, Digester, StoreError, StoreResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::incoming::IncomingArea;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct BlobBuilderOptions {
    /// Gzip the bytes on disk. The recorded size stays the raw size.
    pub compress: bool,
    /// Skip digest computation when `false`; the blob then carries no digest.
    pub digest: bool,
}

impl Default for BlobBuilderOptions {
    fn default() -> Self {
        Self {
            compress: false,
            digest: true,
        }
    }
}

struct FileSink {
    path: PathBuf,
    file: File,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl FileSink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => {
                encoder.write_all(chunk)?;
                let out = std::mem::take(encoder.get_mut());
                if !out.is_empty() {
                    self.file.write_all(&out).await?;
                }
                Ok(())
            }
            None => self.file.write_all(chunk).await,
        }
    }

    async fn close(mut self) -> io::Result<(PathBuf, bool)> {
        let compressed = match self.encoder.take() {
            Some(encoder) => {
                let tail = encoder.finish()?;
                self.file.write_all(&tail).await?;
                true
            }
            None => false,
        };
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok((self.path, compressed))
    }
}

/// Accumulates bytes into a [`Blob`], digesting and counting them as they
/// arrive.
///
/// A builder made with [`BlobBuilder::tracking`] keeps no file at all and
/// only tracks digest and size; upload sessions use it to follow bytes that
/// already live remotely.
pub struct BlobBuilder {
    sink: Option<FileSink>,
    digester: Option<Digester>,
    raw_size: u64,
}

impl BlobBuilder {
    /// Start a new blob file inside the incoming area.
    pub async fn create(area: &IncomingArea, options: BlobBuilderOptions) -> StoreResult<Self> {
        let path = area.allocate_path();
        let file = File::create(&path).await?;
        let encoder = options
            .compress
            .then(|| GzEncoder::new(Vec::new(), Compression::default()));
        Ok(Self {
            sink: Some(FileSink {
                path,
                file,
                encoder,
            }),
            digester: options.digest.then(Digester::new),
            raw_size: 0,
        })
    }

    pub fn tracking() -> Self {
        Self {
            sink: None,
            digester: Some(Digester::new()),
            raw_size: 0,
        }
    }

    pub fn raw_size(&self) -> u64 {
        self.raw_size
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|sink| sink.path.as_path())
    }

    pub async fn append(&mut self, chunk: &[u8]) -> StoreResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.write(chunk).await?;
        }
        if let Some(digester) = self.digester.as_mut() {
            digester.update(chunk);
        }
        self.raw_size += chunk.len() as u64;
        Ok(())
    }

    /// Drain `reader` into the builder, returning the number of bytes copied.
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> StoreResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.append(&buf[..n]).await?;
            copied += n as u64;
        }
        Ok(copied)
    }

    /// Close the file and hand it over as an owned [`Blob`].
    pub async fn finish(self) -> StoreResult<Blob> {
        let Some(sink) = self.sink else {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tracking builder has no local file",
            )));
        };
        let (path, compressed) = sink.close().await?;
        Ok(Blob::new(
            path,
            self.raw_size,
            self.digester.map(Digester::finalize),
            compressed,
            BlobOwnership::Owned,
        ))
    }

    pub fn finish_tracking(self) -> (Option<ContentDigest>, u64) {
        (self.digester.map(Digester::finalize), self.raw_size)
    }

    /// Abandon the blob and remove any partial file.
    pub async fn discard(self) {
        let Some(sink) = self.sink else {
            return;
        };
        let path = sink.path;
        drop(sink.file);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Failed to remove discarded blob file"
            );
        }
    }
}
