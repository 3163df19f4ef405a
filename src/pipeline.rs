//! Concurrent copy engine for command pipelines.
//!
//! [`copy`] wires a source, any number of [`Filter`] stages and a
//! destination into a chain of concurrent transfer tasks, one per stage,
//! and waits for all of them. Every stage runs to its own completion;
//! a failed stage never cancels its neighbours. Instead, dropping the
//! failed stage's stream halves hands EOF or a broken pipe to the
//! adjacent stages, which then finish on their own.

use crate::error::{Error, PipelineError, Result, StageError, StageOutcome};
use crate::filter::{Filter, FilterInput};
use crate::stream::{transfer, BoxSink, BoxSource, MemSink, Sink, Source};
use futures::future;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Copy `src` through `filters` into `dst` and return the number of bytes
/// the destination received.
///
/// Stage `i` reads from the source (`i = 0`) or filter `i-1`'s output and
/// writes to filter `i`'s input or, for the last stage, the destination.
/// Each writer is closed exactly once, whether or not its transfer
/// succeeded, so downstream commands always observe EOF. When any stage
/// fails the error carries one [`StageOutcome`] per stage in pipeline
/// order together with the bytes the destination got before things went
/// wrong ([`PipelineError::written`]).
///
/// There is no timeout and no cross-stage cancellation; callers that need
/// deadlines supply streams that enforce them.
pub async fn copy<W, R>(dst: W, src: R, filters: Vec<Filter>) -> Result<u64, PipelineError>
where
    W: Sink + 'static,
    R: Source + 'static,
{
    let stages = filters.len() + 1;
    tracing::debug!(stages, "copying through pipeline");

    // Split every filter into its stream halves up front. Stage reader,
    // writer and descriptor are all fixed before any task launches.
    let mut readers: Vec<BoxSource> = Vec::with_capacity(stages);
    let mut writers: Vec<StageWriter> = Vec::with_capacity(stages);
    let mut descriptors: Vec<String> = Vec::with_capacity(stages);

    descriptors.push(src.descriptor());
    readers.push(Box::new(src));
    for filter in filters {
        let (output, input, descriptor) = filter.into_parts();
        writers.push(StageWriter::Filter(input));
        descriptors.push(descriptor);
        readers.push(output);
    }
    writers.push(StageWriter::Dest(Box::new(dst)));

    let outcomes = Arc::new(Outcomes::new(stages));
    let (count_tx, count_rx) = mpsc::unbounded_channel();
    let total_task = tokio::spawn(sum_counts(count_rx));

    let mut tasks = Vec::with_capacity(stages);
    for (index, (reader, writer)) in readers.into_iter().zip(writers).enumerate() {
        tasks.push(tokio::spawn(run_stage(
            index,
            reader,
            writer,
            descriptors[index].clone(),
            Arc::clone(&outcomes),
            count_tx.clone(),
        )));
    }
    // Only stage tasks hold senders now; the channel closes once they are done.
    drop(count_tx);

    future::join_all(tasks).await;
    let total = total_task.await.unwrap_or_default();

    let outcomes = outcomes.take_all(descriptors);
    if outcomes.iter().any(|outcome| outcome.error.is_some()) {
        Err(PipelineError::new(outcomes, total))
    } else {
        Ok(total)
    }
}

/// Write side of one stage: the next filter's input, or the overall
/// destination for the last stage.
enum StageWriter {
    Filter(FilterInput),
    Dest(BoxSink),
}

async fn run_stage(
    index: usize,
    mut reader: BoxSource,
    writer: StageWriter,
    descriptor: String,
    outcomes: Arc<Outcomes>,
    counts: mpsc::UnboundedSender<u64>,
) {
    let (moved, transfer_err, close_err) = match writer {
        StageWriter::Filter(mut input) => input.drain(reader.as_mut()).await,
        StageWriter::Dest(mut sink) => {
            let (moved, transfer_err) = transfer(reader.as_mut(), sink.as_mut()).await;
            if transfer_err.is_none() {
                // The destination accepted these bytes; they stay counted
                // even if the close below fails.
                let _ = counts.send(moved);
            }
            let close_err = sink.close().await.err();
            (moved, transfer_err, close_err)
        }
    };

    match StageError::combine(transfer_err, close_err) {
        Some(err) => {
            tracing::debug!(stage = index, error = %err, "pipeline stage failed");
            outcomes.record(
                index,
                StageOutcome {
                    descriptor,
                    error: Some(err),
                },
            );
        }
        None => {
            tracing::trace!(stage = index, bytes = moved, "pipeline stage finished");
            outcomes.record(
                index,
                StageOutcome {
                    descriptor,
                    error: None,
                },
            );
        }
    }
}

async fn sum_counts(mut counts: mpsc::UnboundedReceiver<u64>) -> u64 {
    let mut total = 0;
    while let Some(moved) = counts.recv().await {
        total += moved;
    }
    total
}

/// Outcome slots shared by the stage tasks. Each task writes its own
/// index once; the engine reads only after the join barrier.
struct Outcomes {
    slots: Mutex<Vec<Option<StageOutcome>>>,
}

impl Outcomes {
    fn new(stages: usize) -> Self {
        Self {
            slots: Mutex::new(std::iter::repeat_with(|| None).take(stages).collect()),
        }
    }

    fn record(&self, index: usize, outcome: StageOutcome) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots[index] = Some(outcome);
    }

    /// Collect every slot, synthesizing a failure for any stage whose task
    /// never recorded one (it panicked before reaching its outcome write).
    fn take_all(&self, descriptors: Vec<String>) -> Vec<StageOutcome> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .drain(..)
            .zip(descriptors)
            .map(|(slot, descriptor)| {
                slot.unwrap_or_else(|| StageOutcome {
                    descriptor,
                    error: StageError::combine(
                        Some(Error::Io(io::Error::other("stage task aborted"))),
                        None,
                    ),
                })
            })
            .collect()
    }
}

/// Run `src` through `filters`, capture everything the pipeline produces
/// and return it as text with the trailing newline run removed.
///
/// Command output almost always ends in a newline nobody wants; only
/// trailing `\r` and `\n` are stripped, other whitespace stays. Invalid
/// UTF-8 is replaced rather than rejected.
pub async fn read_all<R>(src: R, filters: Vec<Filter>) -> Result<String, PipelineError>
where
    R: Source + 'static,
{
    let sink = MemSink::new();
    let contents = sink.clone();
    copy(sink, src, filters).await?;

    let bytes = contents.contents();
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    let trimmed = text.trim_end_matches(|c| c == '\r' || c == '\n').len();
    text.truncate(trimmed);
    Ok(text)
}
