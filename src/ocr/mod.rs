//! Text-recognition backend abstraction.
//!
//! Defines the [`TextRecognizer`] trait so the recognition backend is a
//! constructed dependency shared through application state, built once at
//! startup and reused across calls.

pub mod vl_model;

use crate::error::PipelineError;
use image::DynamicImage;

/// Async trait implemented by each recognition backend.
#[async_trait::async_trait]
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize text in an image, one string per recognized region.
    async fn recognize(&self, image: &DynamicImage) -> Result<Vec<String>, PipelineError>;
}
