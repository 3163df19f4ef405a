//! Adapter from a backend command handle to a pipeline stage.
//!
//! A backend hands over the command's readable output and, when it wired
//! one up, the command's writable input; [`Filter`] turns that pair into
//! one bidirectional stage the copy engine can place anywhere in a
//! pipeline. Reads come from the output, writes go to the input, and
//! closing the filter closes the input so the command observes EOF.

use crate::error::{Error, Result, StageError};
use crate::stream::{transfer, BoxSink, BoxSource, Fail, Sink, Source};
use async_trait::async_trait;
use std::io;

/// One pipeline stage wrapping a command in flight.
pub struct Filter {
    output: BoxSource,
    input: FilterInput,
    descriptor: String,
}

impl Filter {
    /// Wrap a command's output as a read-only stage. The stage descriptor
    /// is taken from the output stream.
    pub fn new(output: impl Source + 'static) -> Self {
        let descriptor = output.descriptor();
        Self {
            output: Box::new(output),
            input: FilterInput {
                sink: None,
                closed: false,
            },
            descriptor,
        }
    }

    /// Stage for a command that could not be started: the failure becomes
    /// the stage's outcome when the pipeline runs.
    pub fn fail(err: impl Into<Error>) -> Self {
        Self::new(Fail::new(err))
    }

    /// Attach the command's writable input, making the stage bidirectional.
    pub fn with_input(mut self, input: impl Sink + 'static) -> Self {
        self.input.sink = Some(Box::new(input));
        self
    }

    /// Replace the reported descriptor, typically with the command line
    /// the backend ran.
    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = descriptor.into();
        self
    }

    /// Whether the wrapped command currently accepts input.
    pub fn is_writable(&self) -> bool {
        self.input.sink.is_some()
    }

    /// Drain `src` into the wrapped input, then close the input no matter
    /// how the copy went, so downstream consumers observe EOF. The copy
    /// error takes precedence; a close failure after a clean copy surfaces
    /// as the error, and both are kept when both occur. Fails with
    /// [`Error::ReadOnly`] when the command has no input.
    pub async fn send_all(&mut self, src: &mut dyn Source) -> Result<u64, StageError> {
        let (moved, transfer_err, close_err) = self.input.drain(src).await;
        match StageError::combine(transfer_err, close_err) {
            None => Ok(moved),
            Some(err) => Err(err),
        }
    }

    pub(crate) fn into_parts(self) -> (BoxSource, FilterInput, String) {
        (self.output, self.input, self.descriptor)
    }
}

#[async_trait]
impl Source for Filter {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.output.read(buf).await
    }

    fn descriptor(&self) -> String {
        self.descriptor.clone()
    }
}

#[async_trait]
impl Sink for Filter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.input.write_all(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        self.input.close().await
    }
}

/// Write side of a stage: the wrapped command's input, if any.
pub(crate) struct FilterInput {
    sink: Option<BoxSink>,
    closed: bool,
}

impl FilterInput {
    /// Copy everything from `src`, then close. Returns the bytes moved,
    /// the transfer error, and the close error.
    pub(crate) async fn drain(
        &mut self,
        src: &mut dyn Source,
    ) -> (u64, Option<Error>, Option<Error>) {
        if self.sink.is_none() {
            return (0, Some(self.unwritable()), None);
        }
        let (moved, transfer_err) = transfer(src, self).await;
        let close_err = self.close().await.err();
        (moved, transfer_err, close_err)
    }

    fn unwritable(&self) -> Error {
        if self.closed {
            Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "input already closed"))
        } else {
            Error::ReadOnly
        }
    }
}

#[async_trait]
impl Sink for FilterInput {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.write_all(buf).await,
            None => Err(self.unwritable()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.take() {
            Some(mut sink) => {
                self.closed = true;
                // sink drops on return; pipe-backed inputs signal EOF on release
                sink.close().await
            }
            None => Ok(()),
        }
    }
}
