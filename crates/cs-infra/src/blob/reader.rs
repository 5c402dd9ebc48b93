use std::io::{self, BufReader, Read};
use std::path::Path;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use cs_core::{Blob, ContentStream, StoreResult};
use flate2::read::GzDecoder;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

const INFLATE_CHUNK: usize = 64 * 1024;
/// Inflated chunks buffered ahead of the reader.
const INFLATE_QUEUE: usize = 4;

/// Open a local blob as a stream of its raw (uncompressed) bytes.
///
/// Compressed blobs are inflated on a blocking thread a chunk at a time, so
/// memory stays bounded by the queue no matter how large the blob is.
/// Corruption surfaces as a read error on the stream.
pub async fn open_blob(blob: &Blob) -> StoreResult<ContentStream> {
    let file = File::open(blob.path()).await?;
    if !blob.is_compressed() {
        return Ok(Box::new(file));
    }

    let file = file.into_std().await;
    let (tx, rx) = mpsc::channel(INFLATE_QUEUE);
    tokio::task::spawn_blocking(move || inflate_into(file, tx));
    Ok(Box::new(InflatedStream {
        rx,
        chunk: Vec::new(),
        pos: 0,
    }))
}

fn inflate_into(file: std::fs::File, tx: mpsc::Sender<io::Result<Vec<u8>>>) {
    let mut decoder = GzDecoder::new(BufReader::new(file));
    loop {
        let mut chunk = vec![0u8; INFLATE_CHUNK];
        match decoder.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => {
                chunk.truncate(n);
                // A send error means the reader went away.
                if tx.blocking_send(Ok(chunk)).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        }
    }
}

struct InflatedStream {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl AsyncRead for InflatedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        while this.pos == this.chunk.len() {
            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.chunk = chunk;
                    this.pos = 0;
                }
                Some(Err(err)) => return Poll::Ready(Err(err)),
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = (this.chunk.len() - this.pos).min(buf.remaining());
        buf.put_slice(&this.chunk[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Delete a local file. A missing file is reported as `false`, not an error.
pub async fn remove_local_file(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobBuilder, BlobBuilderOptions};
    use crate::incoming::IncomingArea;
    use cs_core::ContentDigest;
    use tokio::io::AsyncReadExt;

    const EIGHT_MIB: usize = 8 * 1024 * 1024;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 31) % 251) as u8).collect()
    }

    async fn compressed_blob(area: &IncomingArea, content: &[u8]) -> anyhow::Result<Blob> {
        let mut builder = BlobBuilder::create(
            area,
            BlobBuilderOptions {
                compress: true,
                digest: true,
            },
        )
        .await?;
        builder.copy_from(&mut &content[..]).await?;
        Ok(builder.finish().await?)
    }

    #[tokio::test]
    async fn test_large_compressed_blob_streams_in_chunks() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let area = IncomingArea::new(temp_dir.path())?;
        let content = payload(EIGHT_MIB);
        let blob = compressed_blob(&area, &content).await?;

        let mut stream = open_blob(&blob).await?;
        let mut first = vec![0u8; INFLATE_CHUNK * 2];
        let n = stream.read(&mut first).await?;
        assert!(n > 0 && n <= INFLATE_CHUNK);

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await?;
        assert_eq!(n + rest.len(), EIGHT_MIB);

        let mut raw = first[..n].to_vec();
        raw.extend_from_slice(&rest);
        assert_eq!(ContentDigest::of(&raw), ContentDigest::of(&content));
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_blob_opens_and_fails_on_read() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let area = IncomingArea::new(temp_dir.path())?;
        let blob = compressed_blob(&area, &payload(EIGHT_MIB)).await?;

        // Drop the gzip trailer.
        let len = tokio::fs::metadata(blob.path()).await?.len();
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(blob.path())
            .await?;
        file.set_len(len - 8).await?;
        drop(file);

        let mut stream = open_blob(&blob).await?;
        let mut first = vec![0u8; 1024];
        assert!(stream.read(&mut first).await? > 0);

        let mut rest = Vec::new();
        assert!(stream.read_to_end(&mut rest).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_dropping_stream_early_is_harmless() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let area = IncomingArea::new(temp_dir.path())?;
        let blob = compressed_blob(&area, &payload(EIGHT_MIB)).await?;

        let mut stream = open_blob(&blob).await?;
        let mut head = vec![0u8; 16];
        stream.read_exact(&mut head).await?;
        assert_eq!(head, payload(16));
        drop(stream);

        // The blob is still readable from the start.
        let mut raw = Vec::new();
        open_blob(&blob).await?.read_to_end(&mut raw).await?;
        assert_eq!(raw.len(), EIGHT_MIB);
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_false() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("gone");
        assert!(!remove_local_file(&path).await?);

        tokio::fs::write(&path, b"x").await?;
        assert!(remove_local_file(&path).await?);
        Ok(())
    }
}
