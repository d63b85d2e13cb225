//! Background solve queue.
//!
//! An in-process work queue: the process handler enqueues a job after
//! responding, and a dedicated worker task drains jobs sequentially. The
//! worker owns its own store handle and client, never the resources of the
//! request that enqueued the job.

use crate::llm::{steps, LlmClient};
use crate::store::PaperStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Work item: format and solve all questions of one paper.
#[derive(Debug)]
pub struct SolveJob {
    pub paper_id: i64,
    /// Question ids in ascending `order_index`.
    pub question_ids: Vec<i64>,
}

/// Cloneable handle to the worker's queue.
#[derive(Clone)]
pub struct SolveQueue {
    tx: mpsc::UnboundedSender<SolveJob>,
}

impl SolveQueue {
    /// Spawn the worker task and return the handle used to enqueue jobs.
    pub fn start(store: PaperStore, llm: Arc<LlmClient>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SolveJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                run_job(&store, &llm, job).await;
            }
        });
        Self { tx }
    }

    pub fn enqueue(&self, job: SolveJob) {
        if self.tx.send(job).is_err() {
            error!("solve worker is gone, dropping job");
        }
    }
}

/// Process one paper's questions in order. Each formatting and solving
/// result is committed immediately so partial progress survives a later
/// failure in the same run.
async fn run_job(store: &PaperStore, llm: &LlmClient, job: SolveJob) {
    info!(
        "background run: {} questions for paper {}",
        job.question_ids.len(),
        job.paper_id
    );

    for qid in job.question_ids {
        let Some(question) = store.get_question(qid) else {
            warn!("question {} vanished before solving", qid);
            continue;
        };
        if question.ocr_text.is_empty() {
            warn!("question {} has no text, skipping", qid);
            continue;
        }

        // Format and check completeness; committed before any solve attempt.
        let outcome = steps::format_question(llm, &question.ocr_text).await;
        let is_incomplete = !outcome.is_complete;
        store.apply_format(qid, &outcome.formatted_text, is_incomplete);

        if is_incomplete {
            info!("question {} marked incomplete, not solving", qid);
            continue;
        }

        let solution = steps::solve_question(llm, &outcome.formatted_text).await;
        store.apply_solution(qid, &solution.answer, &solution.analysis);
        info!("question {} solved", qid);
    }

    info!("background run for paper {} finished", job.paper_id);
}
