//! Error taxonomy for pipeline execution.
//!
//! Failures keep their original causes intact. A [`StageError`] joins one
//! stage's transfer and close failures without discarding either, and a
//! [`PipelineError`] holds one outcome per stage, rendering them as a single
//! report while staying traversable for programmatic matching.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error from a single stream operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Write attempted on a stream that has no writable input.
    #[error("stream is read-only")]
    ReadOnly,

    /// Underlying I/O failure from a source or sink.
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for the read-only stream error.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Error::ReadOnly)
    }
}

/// One stage's combined failure: its transfer error, its close error, or
/// both. The transfer error takes precedence as the primary cause; a close
/// failure is kept alongside it rather than discarded.
#[derive(Debug)]
pub struct StageError {
    transfer: Option<Error>,
    close: Option<Error>,
}

impl StageError {
    /// Builds the combined error, or `None` when the stage succeeded.
    pub(crate) fn combine(transfer: Option<Error>, close: Option<Error>) -> Option<StageError> {
        if transfer.is_none() && close.is_none() {
            None
        } else {
            Some(StageError { transfer, close })
        }
    }

    /// Error from the byte transfer, if it failed.
    pub fn transfer(&self) -> Option<&Error> {
        self.transfer.as_ref()
    }

    /// Error from closing the stage's output, if that failed.
    pub fn close(&self) -> Option<&Error> {
        self.close.as_ref()
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.transfer, &self.close) {
            (Some(transfer), Some(close)) => write!(f, "{transfer}\n{close}"),
            (Some(transfer), None) => write!(f, "{transfer}"),
            (None, Some(close)) => write!(f, "{close}"),
            (None, None) => Ok(()),
        }
    }
}

impl StdError for StageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match (&self.transfer, &self.close) {
            (Some(transfer), _) => Some(transfer),
            (None, Some(close)) => Some(close),
            (None, None) => None,
        }
    }
}

/// Result of one pipeline stage, recorded at the stage's pipeline position.
#[derive(Debug)]
pub struct StageOutcome {
    /// Descriptor of the stream the stage read from.
    pub descriptor: String,
    /// The stage's combined failure, if any.
    pub error: Option<StageError>,
}

/// Aggregated result of a failed pipeline run.
///
/// Holds one [`StageOutcome`] per stage in pipeline order, successes
/// included, so the report always shows the full pipeline shape. The
/// rendered message lists each stage's descriptor with its error message
/// indented below it, or a `<success>` marker.
#[derive(Debug)]
pub struct PipelineError {
    outcomes: Vec<StageOutcome>,
    written: u64,
}

impl PipelineError {
    pub(crate) fn new(outcomes: Vec<StageOutcome>, written: u64) -> Self {
        Self { outcomes, written }
    }

    /// All stage outcomes, ordered source to destination.
    pub fn outcomes(&self) -> &[StageOutcome] {
        &self.outcomes
    }

    /// The failed stages' errors, in pipeline order.
    pub fn errors(&self) -> impl Iterator<Item = &StageError> {
        self.outcomes.iter().filter_map(|outcome| outcome.error.as_ref())
    }

    /// Bytes the destination received despite the failure.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// True when any stage's error chain contains an `E`.
    pub fn caused_by<E: StdError + 'static>(&self) -> bool {
        self.errors()
            .flat_map(|stage| [stage.transfer(), stage.close()])
            .flatten()
            .any(|err| chain_contains::<E>(err))
    }
}

fn chain_contains<E: StdError + 'static>(err: &(dyn StdError + 'static)) -> bool {
    if err.is::<E>() {
        return true;
    }
    // io::Error keeps its custom payload out of source(); look inside by hand.
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        if let Some(inner) = io_err.get_ref() {
            let inner: &(dyn StdError + 'static) = inner;
            if chain_contains::<E>(inner) {
                return true;
            }
        }
    }
    match err.source() {
        Some(source) => chain_contains::<E>(source),
        None => false,
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for outcome in &self.outcomes {
            if !first {
                f.write_str("\n\n")?;
            }
            first = false;
            f.write_str(&outcome.descriptor)?;
            match &outcome.error {
                Some(err) => {
                    f.write_str("\n\t")?;
                    f.write_str(&err.to_string().replace('\n', "\n\t"))?;
                }
                None => f.write_str("\n\t<success>")?,
            }
        }
        Ok(())
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.errors()
            .next()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err(msg: &str) -> Error {
        Error::Io(io::Error::other(msg.to_string()))
    }

    #[test]
    fn test_stage_error_keeps_both_failures() {
        let err = StageError::combine(Some(io_err("copy broke")), Some(io_err("close broke")))
            .expect("combined error");
        assert_eq!(err.to_string(), "copy broke\nclose broke");
        assert_eq!(err.transfer().unwrap().to_string(), "copy broke");
        assert_eq!(err.close().unwrap().to_string(), "close broke");
    }

    #[test]
    fn test_stage_error_close_only() {
        let err = StageError::combine(None, Some(io_err("close broke"))).expect("combined error");
        assert_eq!(err.to_string(), "close broke");
        assert!(err.transfer().is_none());
    }

    #[test]
    fn test_combine_of_nothing_is_none() {
        assert!(StageError::combine(None, None).is_none());
    }

    #[test]
    fn test_report_lists_every_stage_with_success_markers() {
        let outcomes = vec![
            StageOutcome {
                descriptor: "source reader".to_string(),
                error: StageError::combine(Some(io_err("read failed")), None),
            },
            StageOutcome {
                descriptor: "transform 1".to_string(),
                error: None,
            },
            StageOutcome {
                descriptor: "<anonymous>".to_string(),
                error: StageError::combine(Some(io_err("processing failed")), None),
            },
        ];
        let err = PipelineError::new(outcomes, 0);
        assert_eq!(
            err.to_string(),
            "source reader\n\tread failed\n\n\
             transform 1\n\t<success>\n\n\
             <anonymous>\n\tprocessing failed"
        );
    }

    #[test]
    fn test_report_reindents_embedded_newlines() {
        let outcomes = vec![StageOutcome {
            descriptor: "noisy".to_string(),
            error: StageError::combine(Some(io_err("line one\nline two")), None),
        }];
        let err = PipelineError::new(outcomes, 0);
        assert_eq!(err.to_string(), "noisy\n\tline one\n\tline two");
    }

    #[test]
    fn test_errors_come_back_in_pipeline_order() {
        let outcomes = vec![
            StageOutcome {
                descriptor: "a".to_string(),
                error: StageError::combine(Some(io_err("first")), None),
            },
            StageOutcome {
                descriptor: "b".to_string(),
                error: None,
            },
            StageOutcome {
                descriptor: "c".to_string(),
                error: StageError::combine(Some(io_err("second")), None),
            },
        ];
        let err = PipelineError::new(outcomes, 0);
        let messages: Vec<String> = err.errors().map(|e| e.to_string()).collect();
        assert_eq!(messages, ["first", "second"]);
    }

    #[derive(Debug)]
    struct Marker;

    impl fmt::Display for Marker {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("marker")
        }
    }

    impl StdError for Marker {}

    #[test]
    fn test_caused_by_walks_every_stage_chain() {
        let outcomes = vec![
            StageOutcome {
                descriptor: "ok".to_string(),
                error: None,
            },
            StageOutcome {
                descriptor: "bad".to_string(),
                error: StageError::combine(None, Some(Error::Io(io::Error::other(Marker)))),
            },
        ];
        let err = PipelineError::new(outcomes, 0);
        assert!(err.caused_by::<Marker>());
        assert!(!err.caused_by::<fmt::Error>());
    }

    #[test]
    fn test_read_only_is_matchable() {
        let err = Error::ReadOnly;
        assert!(err.is_read_only());
        assert_eq!(err.to_string(), "stream is read-only");
        assert!(!io_err("x").is_read_only());
    }
}
