//! Error types for pipeline construction contract violations.
//!
//! These are the failures that abort a pipeline before any document is
//! streamed. Per-document and cache failures never surface here: they are
//! logged and skipped where they happen.

/// A contract violation detected while building or running a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unsupported input kind: {0}")]
    UnsupportedInputKind(String),

    #[error("unknown component '{component_id}' referenced by step '{step_id}'")]
    UnknownComponent {
        component_id: String,
        step_id: String,
    },

    #[error("component '{0}' is already registered")]
    DuplicateComponent(String),

    #[error("step id '{0}' is used more than once in the pipeline")]
    DuplicateStepId(String),

    #[error("column '{column}' not found in {file}")]
    MissingColumn { file: String, column: String },

    #[error("step '{step_id}' is invalid: {message}")]
    InvalidStep { step_id: String, message: String },
}
