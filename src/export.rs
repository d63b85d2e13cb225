//! Word document export.
//!
//! Assembles per-question text, crop image, answer and explanation into a
//! paginated `.docx` artifact.

use crate::store::{Paper, Question};
use anyhow::{Context, Result};
use docx_rs::{BreakType, Docx, Paragraph, Pic, Run, Style, StyleType};
use std::fs::File;
use std::path::Path;
use tracing::warn;

const EMU_PER_INCH: u32 = 914_400;
/// Images are scaled to this width, aspect preserved.
const IMAGE_WIDTH_INCHES: u32 = 4;

/// Build `solutions_<paper_id>.docx` at `output_path`.
pub fn write_solutions_doc(
    paper: &Paper,
    questions: &[Question],
    output_path: &Path,
) -> Result<()> {
    let mut docx = Docx::new()
        .add_style(
            Style::new("Heading1", StyleType::Paragraph)
                .name("Heading 1")
                .size(32)
                .bold(),
        )
        .add_style(
            Style::new("Heading2", StyleType::Paragraph)
                .name("Heading 2")
                .size(26)
                .bold(),
        )
        .add_paragraph(heading(
            "Heading1",
            &format!("Solutions: {}", paper.filename),
        ));

    for (idx, q) in questions.iter().enumerate() {
        docx = docx.add_paragraph(heading("Heading1", &format!("Question {}", idx + 1)));

        if !q.ocr_text.is_empty() {
            docx = docx
                .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Question Text:").bold()))
                .add_paragraph(Paragraph::new().add_run(Run::new().add_text(q.ocr_text.as_str())));
        }

        docx = match question_image(&q.image_path) {
            Some(pic) => docx.add_paragraph(Paragraph::new().add_run(Run::new().add_image(pic))),
            None => docx.add_paragraph(
                Paragraph::new().add_run(Run::new().add_text("[Image could not be added]")),
            ),
        };

        docx = docx.add_paragraph(heading("Heading2", "Solution"));

        if !q.answer.is_empty() {
            docx = docx.add_paragraph(
                Paragraph::new().add_run(Run::new().add_text(format!("Answer: {}", q.answer)).bold()),
            );
        }

        let analysis = if q.analysis.is_empty() {
            "[No solution generated]"
        } else {
            q.analysis.as_str()
        };
        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(analysis)));

        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_break(BreakType::Page)));
    }

    let file = File::create(output_path)
        .with_context(|| format!("could not create {}", output_path.display()))?;
    docx.build()
        .pack(file)
        .with_context(|| format!("could not write {}", output_path.display()))?;
    Ok(())
}

fn heading(style: &str, text: &str) -> Paragraph {
    Paragraph::new()
        .style(style)
        .add_run(Run::new().add_text(text))
}

/// Load a question's image artifact, scaled to a fixed width. A missing or
/// unreadable image degrades to `None` and the document carries a
/// placeholder paragraph instead.
fn question_image(path: &str) -> Option<Pic> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("export: could not read image {}: {}", path, e);
            return None;
        }
    };
    let (width, height) = match image::image_dimensions(path) {
        Ok(dims) => dims,
        Err(e) => {
            warn!("export: could not measure image {}: {}", path, e);
            return None;
        }
    };

    let target_width = IMAGE_WIDTH_INCHES * EMU_PER_INCH;
    let target_height =
        (target_width as u64 * height as u64 / width.max(1) as u64) as u32;
    Some(Pic::new(&bytes).size(target_width, target_height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewQuestion, PaperStore};
    use uuid::Uuid;

    #[test]
    fn document_is_written_even_with_missing_images() {
        let store = PaperStore::new();
        let paper = store.insert_paper("exam.png", "static/uploads/exam.png");
        let mut q = store.insert_question(NewQuestion {
            paper_id: paper.id,
            image_path: "static/uploads/crop_missing.jpg".to_string(),
            bbox: Some([0, 0, 200, 100]),
            ocr_text: "1. What is 2 + 2?".to_string(),
            order_index: 1,
        });
        q.answer = "4".to_string();
        q.analysis = "Add the two numbers.".to_string();

        let dir = std::env::temp_dir().join(format!("exam-solver-export-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let output = dir.join(format!("solutions_{}.docx", paper.id));

        write_solutions_doc(&paper, &[q], &output).unwrap();

        let bytes = std::fs::read(&output).unwrap();
        // A .docx is a zip container.
        assert!(bytes.starts_with(b"PK"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unreadable_image_degrades_to_placeholder() {
        assert!(question_image("no/such/crop.jpg").is_none());
    }
}
