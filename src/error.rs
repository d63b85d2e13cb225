//! Typed errors for the processing pipeline.
//!
//! Only [`PipelineError::ImageDecode`] and [`PipelineError::NotFound`] surface
//! to HTTP callers; recognition and model-call failures are recovered at their
//! call sites with degraded-but-valid results.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The uploaded file could not be decoded as an image.
    #[error("could not decode image at {path}")]
    ImageDecode { path: String },

    /// Text recognition failed for a crop or a full page.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// A language-model request failed or returned an unusable reply.
    #[error("model call failed: {0}")]
    ModelCall(String),

    /// A referenced paper or question does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },
}

impl PipelineError {
    pub fn paper_not_found(id: i64) -> Self {
        Self::NotFound { kind: "paper", id }
    }

    pub fn question_not_found(id: i64) -> Self {
        Self::NotFound { kind: "question", id }
    }
}
