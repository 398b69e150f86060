//! Error taxonomy for the orchestration core and its collaborators.
use crate::stage::Stage;
use thiserror::Error;

/// Failure of an external generator call. Never retried by the core.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("provider configuration: {0}")]
    Config(String),

    #[error("LM invocation failed: {0}")]
    Invocation(String),

    #[error("malformed LM response: {0}")]
    MalformedResponse(String),
}

/// Errors surfaced by the workflow session boundary.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("stage {stage} generator failed: {source}")]
    GeneratorFailure {
        stage: Stage,
        #[source]
        source: GeneratorError,
    },

    #[error("already at the final stage ({0}); nothing to advance to")]
    SequenceExhausted(Stage),

    #[error("cannot start: {0}")]
    NotStartable(String),

    #[error("no suggested detection named {0:?}")]
    UnknownCandidate(String),

    #[error("detections can only be selected during {expected} (current stage is {current})")]
    SelectionClosed { expected: Stage, current: Stage },
}

/// Errors raised while turning a document or web page into text.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file type {content_type:?} for {name}")]
    UnsupportedContent { name: String, content_type: String },

    #[error("document {name} is not valid UTF-8")]
    InvalidText { name: String },

    #[error("page extraction failed for {name}: {reason}")]
    PageExtraction { name: String, reason: String },

    #[error("failed to retrieve {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("failed to retrieve {url}: {reason}")]
    Fetch { url: String, reason: String },
}
