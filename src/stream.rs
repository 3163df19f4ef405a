//! Stream capabilities for pipeline stages.
//!
//! A stage reads from a [`Source`] and writes to a [`Sink`]. Anything that
//! is `AsyncRead` or `AsyncWrite` participates directly through the blanket
//! impls, so byte slices, files, duplex halves, and child-process pipes all
//! work as-is; command handles implement the traits themselves when they
//! need to carry a real descriptor.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Chunk size for the transfer loop.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

pub(crate) type BoxSource = Box<dyn Source>;
pub(crate) type BoxSink = Box<dyn Sink>;

/// Readable side of a pipeline stage.
///
/// `read` returning `Ok(0)` signals end-of-data. The descriptor names the
/// stream in pipeline reports; types without a natural identity fall back
/// to a tag built from the type name.
#[async_trait]
pub trait Source: Send {
    /// Read the next chunk into `buf`; `Ok(0)` means exhausted.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Identity used in pipeline reports.
    fn descriptor(&self) -> String {
        type_tag::<Self>()
    }
}

/// Writable side of a pipeline stage.
///
/// Closing signals end-of-input to whatever consumes the stream's output;
/// for pipe-like sinks this is what lets the far side observe EOF.
#[async_trait]
pub trait Sink: Send {
    /// Write all of `buf`.
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Close for writing.
    async fn close(&mut self) -> Result<()>;
}

/// Fallback descriptor for streams without a textual identity.
pub(crate) fn type_tag<T: ?Sized>() -> String {
    format!("<{}>", std::any::type_name::<T>())
}

#[async_trait]
impl<R> Source for R
where
    R: AsyncRead + Send + Unpin,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(AsyncReadExt::read(self, buf).await?)
    }
}

#[async_trait]
impl<W> Sink for W
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Ok(AsyncWriteExt::write_all(self, buf).await?)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(AsyncWriteExt::shutdown(self).await?)
    }
}

/// Attaches a report descriptor to any source.
pub struct Labeled<S> {
    inner: S,
    label: String,
}

impl<S: Source> Labeled<S> {
    pub fn new(inner: S, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }
}

#[async_trait]
impl<S: Source> Source for Labeled<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf).await
    }

    fn descriptor(&self) -> String {
        self.label.clone()
    }
}

/// A source that fails on first read with a stored error.
///
/// Backends hand one of these to the engine when a command could not be
/// started, so the failure surfaces as that stage's outcome instead of
/// aborting pipeline assembly.
pub struct Fail {
    err: Option<Error>,
}

impl Fail {
    pub fn new(err: impl Into<Error>) -> Self {
        Self {
            err: Some(err.into()),
        }
    }
}

#[async_trait]
impl Source for Fail {
    async fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        match self.err.take() {
            Some(err) => Err(err),
            None => Err(Error::Io(io::Error::other("stream already failed"))),
        }
    }
}

/// Shareable in-memory byte sink.
///
/// Clones share one buffer, so a caller can keep a handle to the bytes a
/// pipeline wrote after the engine has consumed the sink value itself.
#[derive(Clone, Default)]
pub struct MemSink {
    buf: Arc<Mutex<BytesMut>>,
}

impl MemSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> Bytes {
        self.lock().clone().freeze()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BytesMut> {
        self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Sink for MemSink {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.lock().extend_from_slice(buf);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Chunked copy from `src` into `dst`. Returns the bytes moved and the
/// first error, which ends the transfer. Bytes of a failed write are not
/// counted.
pub(crate) async fn transfer(src: &mut dyn Source, dst: &mut dyn Sink) -> (u64, Option<Error>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut moved = 0u64;
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => return (moved, None),
            Ok(n) => n,
            Err(err) => return (moved, Some(err)),
        };
        if let Err(err) = dst.write_all(&buf[..n]).await {
            return (moved, Some(err));
        }
        moved += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_wraps_the_type_name() {
        assert_eq!(type_tag::<u8>(), "<u8>");
        assert_eq!(type_tag::<&[u8]>(), "<&[u8]>");
    }

    #[tokio::test]
    async fn test_byte_slices_are_sources() {
        let mut src: &[u8] = b"data";
        let mut buf = [0u8; 16];
        let n = Source::read(&mut src, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"data");
        assert_eq!(Source::read(&mut src, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blanket_source_descriptor_is_a_type_tag() {
        let src: &[u8] = b"data";
        assert_eq!(Source::descriptor(&src), "<&[u8]>");
    }

    #[tokio::test]
    async fn test_labeled_overrides_the_descriptor_only() {
        let mut src = Labeled::new(&b"data"[..], "curl example.com");
        assert_eq!(src.descriptor(), "curl example.com");
        let mut buf = [0u8; 16];
        let n = src.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"data");
    }

    #[tokio::test]
    async fn test_fail_yields_its_error_once() {
        let mut src = Fail::new(io::Error::other("spawn refused"));
        let mut buf = [0u8; 4];
        let err = src.read(&mut buf).await.unwrap_err();
        assert_eq!(err.to_string(), "spawn refused");
        assert!(src.read(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_mem_sink_clones_share_the_buffer() {
        let sink = MemSink::new();
        let mut writer = sink.clone();
        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(&sink.contents()[..], b"hello world");
        assert_eq!(sink.len(), 11);
        assert!(!sink.is_empty());
    }

    #[tokio::test]
    async fn test_transfer_moves_everything_and_counts() {
        let mut src: &[u8] = b"some bytes";
        let mut sink = MemSink::new();
        let (moved, err) = transfer(&mut src, &mut sink).await;
        assert!(err.is_none());
        assert_eq!(moved, 10);
        assert_eq!(&sink.contents()[..], b"some bytes");
    }

    #[tokio::test]
    async fn test_transfer_reports_the_read_error_with_partial_count() {
        let mut src = Fail::new(io::Error::other("boom"));
        let mut sink = MemSink::new();
        let (moved, err) = transfer(&mut src, &mut sink).await;
        assert_eq!(moved, 0);
        assert_eq!(err.unwrap().to_string(), "boom");
    }

    #[tokio::test]
    async fn test_vectors_are_sinks_with_noop_close() {
        let mut dst: Vec<u8> = Vec::new();
        Sink::write_all(&mut dst, b"abc").await.unwrap();
        Sink::close(&mut dst).await.unwrap();
        assert_eq!(dst, b"abc");
    }
}
