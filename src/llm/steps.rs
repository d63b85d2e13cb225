//! Language-model pipeline steps: split, format, solve.
//!
//! Every step degrades instead of failing: a transport error or an
//! unparseable reply maps to the documented fallback value in [`fallback`],
//! so one flaky call never aborts a batch.

use super::prompts;
use super::{LlmClient, Message};
use crate::error::PipelineError;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::warn;

/// Formatter output: cleaned text plus a completeness verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOutcome {
    pub formatted_text: String,
    pub is_complete: bool,
}

/// Solver output: short final answer plus a step-by-step explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub answer: String,
    pub analysis: String,
}

/// Fallback values returned when an external call cannot produce a usable
/// result. Kept in one place so the degradation policy is auditable.
pub mod fallback {
    use super::{FormatOutcome, Solution};

    /// Splitter: blank-line paragraphs; the whole input if none exist.
    pub fn split(text: &str) -> Vec<String> {
        let paragraphs: Vec<String> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        if paragraphs.is_empty() {
            vec![text.to_string()]
        } else {
            paragraphs
        }
    }

    /// Formatter: keep the original text and assume it is complete, so the
    /// question still gets a solve attempt.
    pub fn format(original: &str) -> FormatOutcome {
        FormatOutcome {
            formatted_text: original.to_string(),
            is_complete: true,
        }
    }

    /// Solver, empty input: no model call is made.
    pub fn solve_empty_input() -> Solution {
        Solution {
            answer: String::new(),
            analysis: "No question text provided.".to_string(),
        }
    }

    /// Solver, transport or API failure.
    pub fn solve_call_failed(err: &str) -> Solution {
        Solution {
            answer: "Error".to_string(),
            analysis: format!("Error generating solution: {}", err),
        }
    }

    /// Solver, reply that could not be decoded: keep the model's prose as
    /// the explanation.
    pub fn solve_unparsed(raw: &str) -> Solution {
        Solution {
            answer: "Error".to_string(),
            analysis: raw.to_string(),
        }
    }
}

/// Partition full-page text into individual question strings.
///
/// Never errors; never returns an empty list for non-empty input.
pub async fn split_into_questions(llm: &LlmClient, text: &str) -> Vec<String> {
    let messages = vec![
        Message::system(prompts::SPLITTER_SYSTEM_PROMPT),
        Message::user(prompts::SPLITTER_USER_PROMPT.replace("{text}", text)),
    ];

    match chat_step(llm, messages).await {
        Ok(raw) => decode_split_reply(&raw).unwrap_or_else(|| {
            warn!("splitter reply was not usable JSON, splitting on paragraphs");
            fallback::split(text)
        }),
        Err(err) => {
            warn!("splitter: {}", err);
            fallback::split(text)
        }
    }
}

/// Clean one question's text and flag whether it looks complete.
pub async fn format_question(llm: &LlmClient, text: &str) -> FormatOutcome {
    let messages = vec![
        Message::system(prompts::FORMATTER_SYSTEM_PROMPT),
        Message::user(prompts::FORMATTER_USER_PROMPT.replace("{text}", text)),
    ];

    match chat_step(llm, messages).await {
        Ok(raw) => decode_format_reply(&raw, text),
        Err(err) => {
            warn!("formatter: {}", err);
            fallback::format(text)
        }
    }
}

/// Produce an answer and explanation for one question.
///
/// Empty input short-circuits to the empty-input fallback without a call.
pub async fn solve_question(llm: &LlmClient, text: &str) -> Solution {
    if text.trim().is_empty() {
        return fallback::solve_empty_input();
    }

    let messages = vec![
        Message::system(prompts::SOLVER_SYSTEM_PROMPT),
        Message::user(prompts::SOLVER_USER_PROMPT.replace("{question}", text)),
    ];

    match chat_step(llm, messages).await {
        Ok(raw) => decode_solve_reply(&raw).unwrap_or_else(|| {
            warn!("solver reply was not usable JSON, keeping raw text");
            fallback::solve_unparsed(&raw)
        }),
        Err(err) => {
            warn!("solver: {}", err);
            fallback::solve_call_failed(&err.to_string())
        }
    }
}

/// The external-call boundary: transport and API failures become typed
/// [`PipelineError::ModelCall`] values for the fallback policy above.
async fn chat_step(llm: &LlmClient, messages: Vec<Message>) -> Result<String, PipelineError> {
    llm.chat(messages)
        .await
        .map_err(|e| PipelineError::ModelCall(format!("{:#}", e)))
}

// ============================================================================
// Reply decoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct SplitReply {
    questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FormatReply {
    #[serde(default)]
    formatted_text: Option<String>,
    #[serde(default)]
    is_complete: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SolveReply {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    analysis: Option<String>,
}

fn decode_split_reply(raw: &str) -> Option<Vec<String>> {
    let reply: SplitReply = decode_json_reply(raw)?;
    if reply.questions.is_empty() {
        None
    } else {
        Some(reply.questions)
    }
}

fn decode_format_reply(raw: &str, original: &str) -> FormatOutcome {
    match decode_json_reply::<FormatReply>(raw) {
        Some(reply) => FormatOutcome {
            formatted_text: reply
                .formatted_text
                .unwrap_or_else(|| original.to_string()),
            is_complete: reply.is_complete.unwrap_or(true),
        },
        None => fallback::format(original),
    }
}

fn decode_solve_reply(raw: &str) -> Option<Solution> {
    let reply: SolveReply = decode_json_reply::<SolveReply>(raw)?;
    Some(Solution {
        answer: reply.answer.unwrap_or_default(),
        analysis: reply.analysis.unwrap_or_default(),
    })
}

/// Decode a model reply as JSON: strip markdown code fencing, try a direct
/// parse, then fall back to the first brace-delimited object in the text.
fn decode_json_reply<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    let stripped = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str(stripped) {
        return Some(value);
    }
    let object = extract_json_object(stripped)?;
    serde_json::from_str(object).ok()
}

fn strip_code_fences(raw: &str) -> &str {
    if raw.contains("```json") {
        raw.split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(raw)
            .trim()
    } else if raw.contains("```") {
        raw.split("```").nth(1).unwrap_or(raw).trim()
    } else {
        raw.trim()
    }
}

fn extract_json_object(raw: &str) -> Option<&str> {
    static JSON_OBJECT: OnceLock<Regex> = OnceLock::new();
    let re = JSON_OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));
    re.find(raw).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointSettings;

    fn offline_client() -> LlmClient {
        LlmClient::new(&EndpointSettings {
            api_key: "test-key".to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
            model: "test-model".to_string(),
        })
    }

    #[test]
    fn fenced_reply_decodes_like_plain_json() {
        let plain = r#"{"answer": "C", "analysis": "Because."}"#;
        let fenced = format!("```json\n{}\n```", plain);

        assert_eq!(decode_solve_reply(plain), decode_solve_reply(&fenced));
        assert_eq!(
            decode_solve_reply(&fenced).unwrap(),
            Solution {
                answer: "C".to_string(),
                analysis: "Because.".to_string(),
            }
        );
    }

    #[test]
    fn object_embedded_in_prose_is_extracted() {
        let raw = "Sure, here is the result:\n{\"formatted_text\": \"1. Q?\", \"is_complete\": false}\nHope this helps!";
        let outcome = decode_format_reply(raw, "original");
        assert_eq!(outcome.formatted_text, "1. Q?");
        assert!(!outcome.is_complete);
    }

    #[test]
    fn format_fallback_is_idempotent() {
        let malformed = "I could not produce JSON, sorry.";
        let first = decode_format_reply(malformed, "raw question");
        let second = decode_format_reply(malformed, "raw question");
        assert_eq!(first, second);
        assert_eq!(first, fallback::format("raw question"));
        assert!(first.is_complete);
    }

    #[test]
    fn solve_fallback_is_idempotent() {
        let malformed = "The answer is C because of reasons.";
        let first = decode_solve_reply(malformed);
        assert!(first.is_none());
        assert_eq!(
            fallback::solve_unparsed(malformed),
            fallback::solve_unparsed(malformed)
        );
    }

    #[test]
    fn split_reply_is_taken_verbatim() {
        let raw = r#"{"questions": ["1. First question?", "2. Second question?"]}"#;
        assert_eq!(
            decode_split_reply(raw).unwrap(),
            vec![
                "1. First question?".to_string(),
                "2. Second question?".to_string()
            ]
        );
    }

    #[test]
    fn empty_questions_list_is_rejected() {
        assert!(decode_split_reply(r#"{"questions": []}"#).is_none());
    }

    #[test]
    fn split_fallback_uses_blank_lines() {
        let text = "1. First question?\nA. x\n\n2. Second question?\nB. y";
        assert_eq!(
            fallback::split(text),
            vec![
                "1. First question?\nA. x".to_string(),
                "2. Second question?\nB. y".to_string()
            ]
        );
    }

    #[test]
    fn split_fallback_never_returns_empty_for_nonempty_input() {
        let text = "single block with no blank lines";
        assert_eq!(fallback::split(text), vec![text.to_string()]);
    }

    #[tokio::test]
    async fn solving_empty_text_skips_the_model() {
        // The client points at a closed port; reaching the network would fail
        // loudly rather than return the empty-input fallback.
        let llm = offline_client();
        let solution = solve_question(&llm, "   ").await;
        assert_eq!(solution, fallback::solve_empty_input());
    }
}
