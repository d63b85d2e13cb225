//! Page segmentation: locate question blocks in a scanned exam image.
//!
//! Grayscale → Otsu binary-inverse threshold → morphological dilation with a
//! wide, short structuring element (fuses glyphs and adjacent lines into
//! contiguous blocks) → external contours → bounding rectangles, filtered and
//! sorted top-to-bottom.

use crate::error::PipelineError;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::morphology::{grayscale_dilate, Mask};
use std::path::Path;
use tracing::{debug, warn};

/// Noise filter: blocks narrower or shorter than this are discarded.
pub const MIN_BLOCK_WIDTH: u32 = 100;
pub const MIN_BLOCK_HEIGHT: u32 = 50;

/// Structuring element used to merge text lines into blocks. Wider than tall
/// so same-line glyphs fuse before unrelated lines do.
const DILATE_KERNEL: (u32, u32) = (40, 10);

/// Axis-aligned block location in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BlockBox {
    pub fn as_array(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Segmentation result. `full_page_fallback` is set when no block survived
/// the size filter and the single returned box covers the whole image.
#[derive(Debug)]
pub struct Segmentation {
    pub boxes: Vec<BlockBox>,
    pub full_page_fallback: bool,
}

/// Decode an image file into memory.
///
/// The file is read as bytes and decoded from memory first, which sidesteps
/// path-encoding issues in the decoder; a direct open is the fallback.
pub fn load_image(path: &Path) -> Result<DynamicImage, PipelineError> {
    let decode_err = |e: &dyn std::fmt::Display| {
        warn!("image decode failed for {}: {}", path.display(), e);
        PipelineError::ImageDecode {
            path: path.display().to_string(),
        }
    };

    match std::fs::read(path) {
        Ok(bytes) => image::load_from_memory(&bytes)
            .or_else(|_| image::open(path))
            .map_err(|e| decode_err(&e)),
        Err(e) => Err(decode_err(&e)),
    }
}

/// Segment a page into question blocks, sorted top-to-bottom.
pub fn segment_page(img: &DynamicImage) -> Segmentation {
    let gray = img.to_luma8();
    let (width, height) = gray.dimensions();

    let level = otsu_level(&gray);
    let binary = threshold(&gray, level, ThresholdType::BinaryInverted);

    let kernel = GrayImage::from_pixel(DILATE_KERNEL.0, DILATE_KERNEL.1, Luma([255u8]));
    let mask = Mask::from_image(
        &kernel,
        (DILATE_KERNEL.0 / 2) as u8,
        (DILATE_KERNEL.1 / 2) as u8,
    );
    let dilated = grayscale_dilate(&binary, &mask);

    let contours = find_contours::<u32>(&dilated);
    let mut boxes: Vec<BlockBox> = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter_map(bounding_box)
        .filter(|b| b.width >= MIN_BLOCK_WIDTH && b.height >= MIN_BLOCK_HEIGHT)
        .collect();

    boxes.sort_by_key(|b| b.y);

    debug!(
        "segmentation: otsu level {}, {} contours, {} blocks kept",
        level,
        contours.len(),
        boxes.len()
    );

    if boxes.is_empty() {
        // Blank page or a threshold gone wrong: return the whole image as a
        // single block so downstream steps always see at least one question.
        warn!("no question blocks survived the size filter, using full page");
        return Segmentation {
            boxes: vec![BlockBox {
                x: 0,
                y: 0,
                width,
                height,
            }],
            full_page_fallback: true,
        };
    }

    Segmentation {
        boxes,
        full_page_fallback: false,
    }
}

/// Crop a block out of the source raster.
pub fn crop_block(img: &DynamicImage, block: &BlockBox) -> DynamicImage {
    img.crop_imm(block.x, block.y, block.width, block.height)
}

fn bounding_box(contour: &Contour<u32>) -> Option<BlockBox> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BlockBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn white_page(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([255u8]))
    }

    fn blacken(img: &mut GrayImage, x: i32, y: i32, w: u32, h: u32) {
        draw_filled_rect_mut(img, Rect::at(x, y).of_size(w, h), Luma([0u8]));
    }

    #[test]
    fn two_separated_blocks_yield_two_sorted_boxes() {
        let mut page = white_page(800, 600);
        blacken(&mut page, 100, 60, 400, 120);
        blacken(&mut page, 150, 320, 350, 100);

        let seg = segment_page(&DynamicImage::ImageLuma8(page));
        assert!(!seg.full_page_fallback);
        assert_eq!(seg.boxes.len(), 2);

        for b in &seg.boxes {
            assert!(b.width >= MIN_BLOCK_WIDTH);
            assert!(b.height >= MIN_BLOCK_HEIGHT);
        }
        // Sorted top-to-bottom.
        assert!(seg.boxes[0].y <= seg.boxes[1].y);
        // The upper box corresponds to the upper rectangle.
        assert!(seg.boxes[0].y < 320);
        assert!(seg.boxes[1].y > 120);
    }

    #[test]
    fn adjacent_lines_fuse_into_one_block() {
        // Two thin "text lines" 6px apart: the 40x10 kernel must merge them.
        let mut page = white_page(800, 400);
        blacken(&mut page, 100, 100, 400, 20);
        blacken(&mut page, 100, 126, 400, 20);

        let seg = segment_page(&DynamicImage::ImageLuma8(page));
        assert!(!seg.full_page_fallback);
        assert_eq!(seg.boxes.len(), 1);
        assert!(seg.boxes[0].height >= MIN_BLOCK_HEIGHT);
    }

    #[test]
    fn noise_only_page_falls_back_to_full_image() {
        // A single speck is below the 100x50 filter even after dilation.
        let mut page = white_page(900, 700);
        blacken(&mut page, 440, 340, 20, 20);

        let seg = segment_page(&DynamicImage::ImageLuma8(page));
        assert!(seg.full_page_fallback);
        assert_eq!(seg.boxes.len(), 1);
        assert_eq!(
            seg.boxes[0],
            BlockBox {
                x: 0,
                y: 0,
                width: 900,
                height: 700
            }
        );
    }

    #[test]
    fn load_image_names_the_failing_path() {
        let err = load_image(Path::new("no/such/image.png")).unwrap_err();
        assert!(err.to_string().contains("no/such/image.png"));
    }

    #[test]
    fn crop_matches_block_dimensions() {
        let mut page = white_page(300, 300);
        blacken(&mut page, 10, 10, 100, 100);
        let img = DynamicImage::ImageLuma8(page);
        let block = BlockBox {
            x: 5,
            y: 5,
            width: 120,
            height: 110,
        };
        let crop = crop_block(&img, &block);
        assert_eq!(crop.to_luma8().dimensions(), (120, 110));
    }
}
