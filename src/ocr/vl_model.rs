//! Vision-language model recognition backend.
//!
//! Sends the image as a base64 data URL to an OpenAI-compatible
//! chat-completions endpoint with a fixed transcription prompt and splits the
//! reply into lines.

use super::TextRecognizer;
use crate::config::EndpointSettings;
use crate::error::PipelineError;
use crate::llm::{LlmClient, Message};
use image::DynamicImage;
use std::io::Cursor;
use tracing::{debug, info};

const OCR_PROMPT: &str = "输出图片中的文字。";

pub struct VisionModelRecognizer {
    llm: LlmClient,
}

impl VisionModelRecognizer {
    pub fn new(settings: &EndpointSettings) -> Self {
        info!("recognition backend: {} via {}", settings.model, settings.api_base);
        Self {
            llm: LlmClient::new(settings),
        }
    }

    fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, PipelineError> {
        // JPEG has no alpha channel, so flatten first.
        let rgb = image.to_rgb8();
        let mut buf = Cursor::new(Vec::new());
        rgb.write_to(&mut buf, image::ImageFormat::Jpeg)
            .map_err(|e| PipelineError::Recognition(format!("jpeg encode failed: {}", e)))?;
        Ok(buf.into_inner())
    }
}

#[async_trait::async_trait]
impl TextRecognizer for VisionModelRecognizer {
    fn name(&self) -> &str {
        "vision_model"
    }

    async fn recognize(&self, image: &DynamicImage) -> Result<Vec<String>, PipelineError> {
        let jpeg = Self::encode_jpeg(image)?;
        debug!(
            "recognizing {} byte image with model {}",
            jpeg.len(),
            self.llm.model()
        );

        let messages = vec![Message::user_with_image(OCR_PROMPT, "image/jpeg", &jpeg)];
        let reply = self
            .llm
            .chat(messages)
            .await
            .map_err(|e| PipelineError::Recognition(format!("{:#}", e)))?;

        Ok(reply
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}
