use thiserror::Error;

/// Error taxonomy for the pipeline core.
///
/// Parsing-level anomalies at record granularity (one motif report, one table
/// row) are reported per unit and skipped by batch callers; stage-level
/// variants abort the current stage or branch only.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The input text was empty or carried no record delimiter at all.
    #[error("input text is empty or contains no sequence records")]
    EmptyInput,

    /// A fixed-layout report deviates from the documented label layout.
    /// Distinct from "record has no motif", which is a valid absence.
    #[error("report layout mismatch at line {line}: expected `{expected}`, found `{found}`")]
    FormatMismatch {
        line: usize,
        expected: String,
        found: String,
    },

    /// Retrieval returned no usable sequences for the search expression.
    #[error("retrieval returned no usable sequences for `{query}`")]
    RetrievalEmpty { query: String },

    /// No record in the store carries the chosen motif.
    #[error("no records in the store carry the motif `{motif}`")]
    NoMatchingRecords { motif: String },

    /// No cross-taxon query sequence could be resolved.
    #[error("no sequence could be resolved for `{query}`")]
    NoSequenceResolved { query: String },

    /// E-value thresholds must be strictly positive.
    #[error("e-value threshold must be greater than zero, got {value}")]
    InvalidThreshold { value: String },

    /// A non-comment table row did not match the twelve-column schema.
    #[error("malformed table row at line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    /// An external collaborator exited non-zero, timed out, or produced
    /// no output where some was required.
    #[error("external tool `{tool}` failed: {detail}")]
    ExternalToolFailure { tool: String, detail: String },

    /// A stage was invoked before its predecessor completed.
    #[error("stage `{attempted}` requires `{required}` to be completed first")]
    StageOrder {
        required: String,
        attempted: String,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
