//! Buffered reader over a remote range stream

use bytes::{Buf, Bytes};
use futures::StreamExt;
use std::sync::Mutex;

use crate::backend::ReadStream;
use crate::error::{VfsError, VfsResult};

/// Serves `read(buf)` calls from a chunked range stream
///
/// A chunk larger than the caller's buffer is held back and handed out over
/// several reads. `Ok(0)` is returned only once the stream is exhausted and
/// no buffered bytes remain.
pub(crate) struct RangeReader {
    // Only ever accessed through `get_mut`; makes the reader `Sync`
    stream: Mutex<ReadStream>,
    pending: Bytes,
    done: bool,
}

impl RangeReader {
    pub(crate) fn new(stream: ReadStream) -> Self {
        Self {
            stream: Mutex::new(stream),
            pending: Bytes::new(),
            done: false,
        }
    }

    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let stream = self.stream.get_mut().unwrap_or_else(|e| e.into_inner());
        while self.pending.is_empty() {
            if self.done {
                return Ok(0);
            }
            match stream.next().await {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => return Err(VfsError::Io(e)),
                None => self.done = true,
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

impl std::fmt::Debug for RangeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeReader")
            .field("pending", &self.pending.len())
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(chunks: Vec<&'static [u8]>) -> ReadStream {
        let items: Vec<std::io::Result<Bytes>> =
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))).collect();
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn test_small_buffer_drains_chunks() {
        let mut reader = RangeReader::new(stream_of(vec![b"hello ", b"world!"]));
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"hello world!");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_chunks_are_skipped() {
        let mut reader = RangeReader::new(stream_of(vec![b"", b"ab", b""]));
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stream_error_surfaces() {
        let items: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ok")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut reader = RangeReader::new(Box::pin(futures::stream::iter(items)));
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert!(reader.read(&mut buf).await.unwrap_err().is_retryable());
    }
}
