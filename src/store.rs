//! In-memory store for papers and their questions.
//!
//! The relational model of the pipeline (papers own questions, cascade on
//! delete, questions ordered by `order_index`) lives behind a cloneable
//! `RwLock`-backed handle so request handlers and the background worker each
//! hold their own reference.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// One uploaded exam paper.
#[derive(Debug, Clone, Serialize)]
pub struct Paper {
    pub id: i64,
    pub filename: String,
    pub file_path: String,
    pub created_at: String, // ISO8601 timestamp
    pub is_processed: bool,
}

/// One question derived from a paper.
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub id: i64,
    pub paper_id: i64,
    /// Crop artifact path, or the parent paper's image in full-page mode.
    pub image_path: String,
    /// `[x, y, w, h]` in source-image pixels; absent in full-page mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[u32; 4]>,
    /// Raw recognized text; overwritten in place by the formatter.
    pub ocr_text: String,
    pub is_incomplete: bool,
    pub answer: String,
    pub analysis: String,
    /// 1-based presentation order within the paper.
    pub order_index: u32,
}

/// Fields supplied when creating a question during processing.
pub struct NewQuestion {
    pub paper_id: i64,
    pub image_path: String,
    pub bbox: Option<[u32; 4]>,
    pub ocr_text: String,
    pub order_index: u32,
}

#[derive(Default)]
struct Inner {
    papers: BTreeMap<i64, Paper>,
    questions: BTreeMap<i64, Question>,
    next_paper_id: i64,
    next_question_id: i64,
}

/// Cloneable handle to the shared store.
#[derive(Clone, Default)]
pub struct PaperStore {
    inner: Arc<RwLock<Inner>>,
}

impl PaperStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_paper(&self, filename: &str, file_path: &str) -> Paper {
        let mut inner = self.inner.write().unwrap();
        inner.next_paper_id += 1;
        let paper = Paper {
            id: inner.next_paper_id,
            filename: filename.to_string(),
            file_path: file_path.to_string(),
            created_at: now_iso8601(),
            is_processed: false,
        };
        inner.papers.insert(paper.id, paper.clone());
        paper
    }

    /// All papers, newest first.
    pub fn list_papers(&self) -> Vec<Paper> {
        let inner = self.inner.read().unwrap();
        let mut papers: Vec<Paper> = inner.papers.values().cloned().collect();
        papers.sort_by(|a, b| b.id.cmp(&a.id));
        papers
    }

    pub fn get_paper(&self, id: i64) -> Option<Paper> {
        self.inner.read().unwrap().papers.get(&id).cloned()
    }

    pub fn mark_processed(&self, id: i64) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.papers.get_mut(&id) {
            Some(paper) => {
                paper.is_processed = true;
                true
            }
            None => false,
        }
    }

    pub fn insert_question(&self, new: NewQuestion) -> Question {
        let mut inner = self.inner.write().unwrap();
        inner.next_question_id += 1;
        let question = Question {
            id: inner.next_question_id,
            paper_id: new.paper_id,
            image_path: new.image_path,
            bbox: new.bbox,
            ocr_text: new.ocr_text,
            is_incomplete: false,
            answer: String::new(),
            analysis: String::new(),
            order_index: new.order_index,
        };
        inner.questions.insert(question.id, question.clone());
        question
    }

    pub fn get_question(&self, id: i64) -> Option<Question> {
        self.inner.read().unwrap().questions.get(&id).cloned()
    }

    /// Questions for a paper, sorted by `order_index`.
    pub fn questions_for_paper(&self, paper_id: i64) -> Vec<Question> {
        let inner = self.inner.read().unwrap();
        let mut questions: Vec<Question> = inner
            .questions
            .values()
            .filter(|q| q.paper_id == paper_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.order_index);
        questions
    }

    pub fn question_count(&self, paper_id: i64) -> usize {
        self.inner
            .read()
            .unwrap()
            .questions
            .values()
            .filter(|q| q.paper_id == paper_id)
            .count()
    }

    /// Commit the formatter's output for one question.
    pub fn apply_format(&self, id: i64, formatted_text: &str, is_incomplete: bool) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.questions.get_mut(&id) {
            Some(q) => {
                q.ocr_text = formatted_text.to_string();
                q.is_incomplete = is_incomplete;
                true
            }
            None => false,
        }
    }

    /// Commit the solver's output for one question.
    pub fn apply_solution(&self, id: i64, answer: &str, analysis: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.questions.get_mut(&id) {
            Some(q) => {
                q.answer = answer.to_string();
                q.analysis = analysis.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove a paper and all of its questions. Returns the removed records
    /// so the caller can clean up file artifacts.
    pub fn delete_paper(&self, id: i64) -> Option<(Paper, Vec<Question>)> {
        let mut inner = self.inner.write().unwrap();
        let paper = inner.papers.remove(&id)?;
        let question_ids: Vec<i64> = inner
            .questions
            .values()
            .filter(|q| q.paper_id == id)
            .map(|q| q.id)
            .collect();
        let mut questions = Vec::with_capacity(question_ids.len());
        for qid in question_ids {
            if let Some(q) = inner.questions.remove(&qid) {
                questions.push(q);
            }
        }
        questions.sort_by_key(|q| q.order_index);
        Some((paper, questions))
    }
}

/// Generate ISO8601 timestamp for current time.
pub fn now_iso8601() -> String {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let days_since_epoch = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let mut year = 1970i32;
    let mut remaining_days = days_since_epoch as i32;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let days_in_months: [i32; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1;
    for days in days_in_months {
        if remaining_days < days {
            break;
        }
        remaining_days -= days;
        month += 1;
    }
    let day = remaining_days + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year, month, day, hours, minutes, seconds
    )
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(store: &PaperStore, paper_id: i64, order: u32) -> Question {
        store.insert_question(NewQuestion {
            paper_id,
            image_path: format!("static/uploads/crop_{}.jpg", order),
            bbox: Some([0, order * 100, 200, 80]),
            ocr_text: format!("question {}", order),
            order_index: order,
        })
    }

    #[test]
    fn papers_are_listed_newest_first() {
        let store = PaperStore::new();
        let first = store.insert_paper("a.png", "static/uploads/a.png");
        let second = store.insert_paper("b.png", "static/uploads/b.png");

        let listed = store.list_papers();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[test]
    fn questions_come_back_in_presentation_order() {
        let store = PaperStore::new();
        let paper = store.insert_paper("p.png", "static/uploads/p.png");
        question(&store, paper.id, 2);
        question(&store, paper.id, 1);
        question(&store, paper.id, 3);

        let questions = store.questions_for_paper(paper.id);
        let orders: Vec<u32> = questions.iter().map(|q| q.order_index).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn deleting_a_paper_cascades_to_its_questions() {
        let store = PaperStore::new();
        let paper = store.insert_paper("p.png", "static/uploads/p.png");
        let other = store.insert_paper("q.png", "static/uploads/q.png");
        let q1 = question(&store, paper.id, 1);
        let q2 = question(&store, paper.id, 2);
        let kept = question(&store, other.id, 1);

        let (removed_paper, removed_questions) = store.delete_paper(paper.id).unwrap();
        assert_eq!(removed_paper.id, paper.id);
        assert_eq!(removed_questions.len(), 2);

        assert!(store.get_paper(paper.id).is_none());
        assert!(store.get_question(q1.id).is_none());
        assert!(store.get_question(q2.id).is_none());
        // Questions of other papers are untouched.
        assert!(store.get_question(kept.id).is_some());
    }

    #[test]
    fn format_and_solution_commit_independently() {
        let store = PaperStore::new();
        let paper = store.insert_paper("p.png", "static/uploads/p.png");
        let q = question(&store, paper.id, 1);

        assert!(store.apply_format(q.id, "1. Cleaned question?", false));
        let formatted = store.get_question(q.id).unwrap();
        assert_eq!(formatted.ocr_text, "1. Cleaned question?");
        assert!(formatted.answer.is_empty());

        assert!(store.apply_solution(q.id, "C", "Step by step."));
        let solved = store.get_question(q.id).unwrap();
        assert_eq!(solved.answer, "C");
        assert_eq!(solved.analysis, "Step by step.");
        // Formatted text survives the solution commit.
        assert_eq!(solved.ocr_text, "1. Cleaned question?");
    }

    #[test]
    fn delete_of_unknown_paper_is_none() {
        let store = PaperStore::new();
        assert!(store.delete_paper(99).is_none());
    }
}
