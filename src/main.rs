//! Exam Solver - exam-paper segmentation, OCR and solving server.

mod config;
mod error;
mod export;
mod llm;
mod ocr;
mod pipeline;
mod store;
mod vision;
mod worker;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::Settings;
use error::PipelineError;
use llm::{steps, LlmClient};
use ocr::{vl_model::VisionModelRecognizer, TextRecognizer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use store::{NewQuestion, Paper, PaperStore, Question};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker::{SolveJob, SolveQueue};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    store: PaperStore,
    recognizer: Arc<dyn TextRecognizer>,
    llm: Arc<LlmClient>,
    queue: SolveQueue,
    upload_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exam_solver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    std::fs::create_dir_all(&settings.upload_dir)?;

    // The recognition backend is constructed once and shared; reuse across
    // calls keeps one connection pool to the model-serving endpoint.
    let recognizer: Arc<dyn TextRecognizer> =
        Arc::new(VisionModelRecognizer::new(&settings.ocr));
    let llm = Arc::new(LlmClient::new(&settings.llm));
    info!("language model: {} via {}", settings.llm.model, settings.llm.api_base);

    let store = PaperStore::new();
    let queue = SolveQueue::start(store.clone(), llm.clone());

    let state = AppState {
        store,
        recognizer,
        llm,
        queue,
        upload_dir: settings.upload_dir.clone(),
    };

    // Build router
    let app = Router::new()
        .route("/", get(health))
        .route("/upload", post(upload_paper))
        .route("/papers", get(list_papers))
        .route("/papers/:id", get(get_paper).delete(delete_paper))
        .route("/process/:id", post(process_paper))
        .route("/solve/:question_id", post(solve_single_question))
        .route("/export/:id", get(export_paper))
        .nest_service("/static", ServeDir::new("static"))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024)) // 100MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct UploadResponse {
    id: i64,
    filename: String,
}

#[derive(Serialize)]
struct PaperDetail {
    paper: Paper,
    questions: Vec<Question>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct ProcessResponse {
    status: &'static str,
    questions_found: usize,
}

#[derive(Serialize)]
struct SolveResponse {
    solution: String,
    answer: String,
}

#[derive(Serialize)]
struct ExportResponse {
    download_url: String,
}

#[derive(Deserialize)]
struct ProcessQuery {
    mode: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Liveness check.
async fn health() -> &'static str {
    "ok"
}

/// Accept a multipart upload and create the paper record.
async fn upload_paper(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("paper").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    let file_path = state.upload_dir.join(&filename);
    std::fs::write(&file_path, &file_data).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to store upload: {}", e),
        )
    })?;

    let paper = state
        .store
        .insert_paper(&filename, &file_path.display().to_string());
    info!("saved paper {} ({} bytes)", paper.id, file_data.len());

    Ok(Json(UploadResponse {
        id: paper.id,
        filename: paper.filename,
    }))
}

/// List all papers, newest first.
async fn list_papers(State(state): State<AppState>) -> Json<Vec<Paper>> {
    Json(state.store.list_papers())
}

/// Get one paper with its questions in presentation order.
async fn get_paper(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PaperDetail>, (StatusCode, String)> {
    let paper = state
        .store
        .get_paper(id)
        .ok_or_else(|| not_found(PipelineError::paper_not_found(id)))?;
    let questions = state.store.questions_for_paper(id);
    Ok(Json(PaperDetail { paper, questions }))
}

/// Delete a paper, its questions and their file artifacts.
async fn delete_paper(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let (paper, questions) = state
        .store
        .delete_paper(id)
        .ok_or_else(|| not_found(PipelineError::paper_not_found(id)))?;

    // Best-effort artifact cleanup: a missing file is logged, never fatal.
    for question in &questions {
        if question.image_path != paper.file_path {
            remove_artifact(&question.image_path);
        }
    }
    remove_artifact(&paper.file_path);

    info!("deleted paper {} with {} questions", id, questions.len());
    Ok(Json(MessageResponse {
        message: "Paper deleted successfully".to_string(),
    }))
}

/// Discover questions in a paper and queue background solving.
///
/// `?mode=segment` (default) segments the page visually and recognizes each
/// crop; `?mode=split` recognizes the full page and lets the language model
/// partition the text.
async fn process_paper(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ProcessQuery>,
) -> Result<Json<ProcessResponse>, (StatusCode, String)> {
    let paper = state
        .store
        .get_paper(id)
        .ok_or_else(|| not_found(PipelineError::paper_not_found(id)))?;

    if paper.is_processed {
        return Ok(Json(ProcessResponse {
            status: "completed",
            questions_found: state.store.question_count(id),
        }));
    }

    let mode = query.mode.as_deref().unwrap_or("segment");
    let file_path = std::path::Path::new(&paper.file_path);

    let question_ids: Vec<i64> = match mode {
        "segment" => {
            let blocks = pipeline::segment_and_extract(
                state.recognizer.as_ref(),
                file_path,
                &state.upload_dir,
            )
            .await
            .map_err(|e| {
                error!("processing paper {} failed: {}", id, e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            })?;

            blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| {
                    state
                        .store
                        .insert_question(NewQuestion {
                            paper_id: id,
                            image_path: block.image_path,
                            bbox: Some(block.bbox),
                            ocr_text: block.ocr_text,
                            order_index: idx as u32 + 1,
                        })
                        .id
                })
                .collect()
        }
        "split" => {
            let text = pipeline::full_page_text(state.recognizer.as_ref(), file_path).await;
            info!("full-page text: {} chars", text.len());
            let question_texts = steps::split_into_questions(&state.llm, &text).await;

            question_texts
                .into_iter()
                .enumerate()
                .map(|(idx, ocr_text)| {
                    state
                        .store
                        .insert_question(NewQuestion {
                            paper_id: id,
                            image_path: paper.file_path.clone(),
                            bbox: None,
                            ocr_text,
                            order_index: idx as u32 + 1,
                        })
                        .id
                })
                .collect()
        }
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("Unknown mode: {}. Available: segment, split", other),
            ))
        }
    };

    state.store.mark_processed(id);
    let questions_found = question_ids.len();
    info!("paper {} processed: {} questions", id, questions_found);

    state.queue.enqueue(SolveJob {
        paper_id: id,
        question_ids,
    });

    Ok(Json(ProcessResponse {
        status: "processing_started",
        questions_found,
    }))
}

/// Solve one question synchronously, bypassing the incompleteness gate.
async fn solve_single_question(
    State(state): State<AppState>,
    Path(question_id): Path<i64>,
) -> Result<Json<SolveResponse>, (StatusCode, String)> {
    let question = state
        .store
        .get_question(question_id)
        .ok_or_else(|| not_found(PipelineError::question_not_found(question_id)))?;

    let solution = steps::solve_question(&state.llm, &question.ocr_text).await;
    state
        .store
        .apply_solution(question_id, &solution.answer, &solution.analysis);

    Ok(Json(SolveResponse {
        solution: solution.analysis,
        answer: solution.answer,
    }))
}

/// Build the solutions document for a paper.
async fn export_paper(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ExportResponse>, (StatusCode, String)> {
    let paper = state
        .store
        .get_paper(id)
        .ok_or_else(|| not_found(PipelineError::paper_not_found(id)))?;
    let questions = state.store.questions_for_paper(id);

    let output_filename = format!("solutions_{}.docx", paper.id);
    let output_path = state.upload_dir.join(&output_filename);
    export::write_solutions_doc(&paper, &questions, &output_path).map_err(|e| {
        error!("export for paper {} failed: {:#}", id, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Export failed: {}", e),
        )
    })?;

    Ok(Json(ExportResponse {
        download_url: format!("/static/uploads/{}", output_filename),
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

fn not_found(err: PipelineError) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, err.to_string())
}

fn remove_artifact(path: &str) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("could not remove artifact {}: {}", path, e);
    }
}
