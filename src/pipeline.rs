//! Question discovery over an uploaded page image.
//!
//! Two strategies exist: visual segmentation with per-crop recognition (the
//! canonical mode) and full-page recognition whose text is split downstream
//! by the language model.

use crate::error::PipelineError;
use crate::ocr::TextRecognizer;
use crate::vision;
use image::DynamicImage;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// One discovered question region with its persisted crop and raw text.
#[derive(Debug)]
pub struct QuestionBlock {
    pub bbox: [u32; 4],
    pub image_path: String,
    pub ocr_text: String,
}

/// Segment the page and recognize each block.
///
/// Every block is cropped, persisted as a JPEG artifact under `upload_dir`
/// and recognized; a recognition failure for one crop yields empty text and
/// the batch continues. Only an undecodable source image is fatal.
pub async fn segment_and_extract(
    recognizer: &dyn TextRecognizer,
    image_path: &Path,
    upload_dir: &Path,
) -> Result<Vec<QuestionBlock>, PipelineError> {
    let img = vision::load_image(image_path)?;
    let segmentation = vision::segment_page(&img);

    if let Err(e) = std::fs::create_dir_all(upload_dir) {
        warn!("could not create upload dir {}: {}", upload_dir.display(), e);
    }

    let prefix = if segmentation.full_page_fallback {
        "full"
    } else {
        "crop"
    };

    let mut blocks = Vec::with_capacity(segmentation.boxes.len());
    for block in &segmentation.boxes {
        let crop = vision::crop_block(&img, block);
        let filename = format!("{}_{}.jpg", prefix, Uuid::new_v4());
        let artifact_path = upload_dir.join(&filename);
        persist_jpeg(&crop, &artifact_path);

        let ocr_text = match recognizer.recognize(&crop).await {
            Ok(lines) => lines.join(" ").trim().to_string(),
            Err(e) => {
                warn!("recognition failed for {}: {}", filename, e);
                String::new()
            }
        };

        blocks.push(QuestionBlock {
            bbox: block.as_array(),
            image_path: artifact_path.display().to_string(),
            ocr_text,
        });
    }

    info!(
        "segmented {} into {} question blocks (fallback: {})",
        image_path.display(),
        blocks.len(),
        segmentation.full_page_fallback
    );

    Ok(blocks)
}

/// Recognize the entire undivided page, newline-joined.
///
/// Degrades to an empty string on any failure; never fatal.
pub async fn full_page_text(recognizer: &dyn TextRecognizer, image_path: &Path) -> String {
    if !image_path.exists() {
        warn!("full-page recognition: {} does not exist", image_path.display());
        return String::new();
    }

    let img = match vision::load_image(image_path) {
        Ok(img) => img,
        Err(e) => {
            warn!("full-page recognition: {}", e);
            return String::new();
        }
    };

    match recognizer.recognize(&img).await {
        Ok(lines) => lines.join("\n"),
        Err(e) => {
            warn!("full-page recognition failed: {}", e);
            String::new()
        }
    }
}

fn persist_jpeg(crop: &DynamicImage, path: &Path) {
    // JPEG cannot carry alpha, so flatten before saving.
    let rgb = DynamicImage::ImageRgb8(crop.to_rgb8());
    if let Err(e) = rgb.save(path) {
        warn!("could not persist crop {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use std::path::PathBuf;

    struct StubRecognizer {
        lines: Vec<String>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl TextRecognizer for StubRecognizer {
        fn name(&self) -> &str {
            "stub"
        }

        async fn recognize(&self, _image: &DynamicImage) -> Result<Vec<String>, PipelineError> {
            if self.fail {
                Err(PipelineError::Recognition("stub failure".to_string()))
            } else {
                Ok(self.lines.clone())
            }
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("exam-solver-test-{}-{}", tag, Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn two_block_page(dir: &Path) -> PathBuf {
        let mut page = GrayImage::from_pixel(800, 600, Luma([255u8]));
        draw_filled_rect_mut(&mut page, Rect::at(100, 60).of_size(400, 120), Luma([0u8]));
        draw_filled_rect_mut(&mut page, Rect::at(150, 320).of_size(350, 100), Luma([0u8]));
        let path = dir.join("page.png");
        page.save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn segmentation_persists_crops_and_joins_text_with_spaces() {
        let dir = scratch_dir("segment");
        let page = two_block_page(&dir);
        let recognizer = StubRecognizer {
            lines: vec!["1.".to_string(), "What is x?".to_string()],
            fail: false,
        };

        let blocks = segment_and_extract(&recognizer, &page, &dir).await.unwrap();
        assert_eq!(blocks.len(), 2);
        // Top-to-bottom order.
        assert!(blocks[0].bbox[1] <= blocks[1].bbox[1]);
        for block in &blocks {
            assert_eq!(block.ocr_text, "1. What is x?");
            assert!(Path::new(&block.image_path).exists());
            assert!(block.image_path.contains("crop_"));
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn recognition_failure_yields_empty_text_not_an_error() {
        let dir = scratch_dir("ocr-fail");
        let page = two_block_page(&dir);
        let recognizer = StubRecognizer {
            lines: Vec::new(),
            fail: true,
        };

        let blocks = segment_and_extract(&recognizer, &page, &dir).await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.ocr_text.is_empty()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn undecodable_image_is_fatal_for_segmentation() {
        let dir = scratch_dir("bad-image");
        let path = dir.join("not-an-image.png");
        std::fs::write(&path, b"plainly not image data").unwrap();
        let recognizer = StubRecognizer {
            lines: Vec::new(),
            fail: false,
        };

        let err = segment_and_extract(&recognizer, &path, &dir)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageDecode { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn full_page_text_degrades_to_empty() {
        let recognizer = StubRecognizer {
            lines: Vec::new(),
            fail: false,
        };
        let text = full_page_text(&recognizer, Path::new("missing/page.png")).await;
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn full_page_text_joins_lines_with_newlines() {
        let dir = scratch_dir("full-page");
        let page = two_block_page(&dir);
        let recognizer = StubRecognizer {
            lines: vec!["line one".to_string(), "line two".to_string()],
            fail: false,
        };
        let text = full_page_text(&recognizer, &page).await;
        assert_eq!(text, "line one\nline two");
        std::fs::remove_dir_all(&dir).ok();
    }
}
