//! Pipe byte streams through chains of external commands.
//!
//! `cmdpipe` is the execution core shared by command backends: anything
//! that can hand over a command's output stream (and optionally its input
//! stream) becomes a pipeline stage, and the engine wires any number of
//! stages between a source and a destination the way a shell wires pipes:
//!
//!  - One concurrent transfer task per stage; no stage waits on completion
//!    of the whole chain to make progress.
//!  - Per-stage outcomes: a failure anywhere produces one aggregated error
//!    naming every stage and what became of it.
//!  - Deterministic close discipline, so downstream commands always see
//!    EOF and nothing hangs on a half-open pipe.
//!
//! Any `tokio::io::AsyncRead` can be a [`Source`] and any `AsyncWrite` a
//! [`Sink`], so files, in-memory buffers, duplex pipes and child-process
//! handles all plug in directly.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), cmdpipe::PipelineError> {
//! use cmdpipe::{copy, Filter, MemSink};
//!
//! // A pass-through stage standing in for a spawned command.
//! let (output, input) = tokio::io::duplex(64);
//! let stage = Filter::new(output).with_input(input).with_descriptor("cat");
//!
//! let sink = MemSink::new();
//! let written = copy(sink.clone(), &b"data"[..], vec![stage]).await?;
//! assert_eq!(written, 4);
//! assert_eq!(&sink.contents()[..], b"data");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod filter;
pub mod pipeline;
pub mod stream;

pub use crate::error::{Error, PipelineError, Result, StageError, StageOutcome};
pub use crate::filter::Filter;
pub use crate::pipeline::{copy, read_all};
pub use crate::stream::{Fail, Labeled, MemSink, Sink, Source};
