//! Stream wrapper that digests bytes as they flow through.
//! 在字节流经时同步计算摘要的包装器。

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use cs_core::{ContentDigest, Digester};
use tokio::io::{AsyncRead, ReadBuf};

/// Computes the digest and byte count of everything read through it, so a
/// stream can be uploaded and digested in one pass without a local copy.
/// 对读取的全部内容计算摘要与字节数，单次遍历即可完成上传与摘要。
pub struct DigestingReader<R> {
    inner: R,
    digester: Digester,
    bytes_read: u64,
}

impl<R> DigestingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            digester: Digester::new(),
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn finish(self) -> (ContentDigest, u64) {
        (self.digester.finalize(), self.bytes_read)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DigestingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                this.digester.update(fresh);
                this.bytes_read += fresh.len() as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
