//! Environment-backed settings.
//!
//! The language-model endpoint is configured via `OPENAI_API_KEY`,
//! `OPENAI_API_BASE` and `LLM_MODEL`. The recognition endpoint can be
//! overridden independently via `OCR_API_KEY`, `OCR_API_BASE` and `OCR_MODEL`,
//! each falling back to the general value when unset.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "deepseek-ai/DeepSeek-V3";
const DEFAULT_OCR_MODEL: &str = "Pro/Qwen/Qwen2.5-VL-7B-Instruct";

/// Connection parameters for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Endpoint used by the splitter, formatter and solver.
    pub llm: EndpointSettings,
    /// Endpoint used by the text-recognition backend.
    pub ocr: EndpointSettings,
    /// Directory holding uploaded originals, crops and exported documents.
    pub upload_dir: PathBuf,
    pub bind_addr: String,
}

impl Settings {
    /// Read all settings from the environment. `.env` loading is the caller's
    /// responsibility (done once in `main`).
    pub fn from_env() -> Result<Self> {
        let api_key =
            env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable not set")?;
        let api_base = env::var("OPENAI_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into());
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.into());

        let llm = EndpointSettings {
            api_key,
            api_base,
            model,
        };

        let ocr = EndpointSettings {
            api_key: env::var("OCR_API_KEY").unwrap_or_else(|_| llm.api_key.clone()),
            api_base: env::var("OCR_API_BASE").unwrap_or_else(|_| llm.api_base.clone()),
            model: env::var("OCR_MODEL").unwrap_or_else(|_| DEFAULT_OCR_MODEL.into()),
        };

        Ok(Self {
            llm,
            ocr,
            upload_dir: PathBuf::from("static/uploads"),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
        })
    }
}
