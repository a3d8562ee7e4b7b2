//! Grounded answer synthesis.
//!
//! `ask` runs: retrieve -> (no context: fixed answer, no model call) or
//! (context: prompt -> one generation call -> parse -> citation validation).
//! Malformed model output and citations outside the retrieved set degrade
//! the result instead of failing the query.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::prompt::grounded_messages;
use super::retrieval::{RetrievalParams, RetrievalPolicy, RetrievedFragment};
use crate::core::config::{LlmConfig, RetrievalConfig};
use crate::core::errors::RagError;
use crate::llm::{ChatRequest, LlmProvider};

pub const NO_CONTEXT_ANSWER: &str =
    "Sorry, nothing in the indexed documents is relevant to this question. \
     Try rephrasing it or adding more detail.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub fragment_id: String,
    pub score: f32,
    /// Fragment text truncated to the configured preview length.
    pub text: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    /// Validated citations; always a subset of the retrieved identifiers.
    pub citations: Vec<String>,
    pub sources: Vec<SourceRef>,
    /// True whenever retrieval produced at least one fragment.
    pub has_context: bool,
    /// Citations reported by the model that were not retrieved for this query.
    #[serde(default)]
    pub dropped_citations: Vec<String>,
    /// The model output could not be decoded; `answer` is the raw text.
    #[serde(default)]
    pub malformed_output: bool,
}

impl AnswerResult {
    pub fn no_context() -> Self {
        Self {
            answer: NO_CONTEXT_ANSWER.to_string(),
            citations: Vec::new(),
            sources: Vec::new(),
            has_context: false,
            dropped_citations: Vec::new(),
            malformed_output: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AskStage {
    Retrieving,
    NoContext,
    Generating,
    Parsing,
    Validating,
    Done,
}

fn enter(stage: AskStage) {
    tracing::debug!(?stage, "ask");
}

/// A decoded `{answer, citations}` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAnswer {
    pub answer: String,
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedOutputKind {
    NotJson,
    SchemaMismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MalformedOutput {
    pub kind: MalformedOutputKind,
    pub detail: String,
}

impl MalformedOutput {
    fn schema(detail: impl Into<String>) -> Self {
        Self {
            kind: MalformedOutputKind::SchemaMismatch,
            detail: detail.into(),
        }
    }
}

/// Removes a surrounding markdown code fence (```json ... ``` or ``` ... ```).
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

fn citation_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"\[([^\[\]\s]+)\]").expect("citation marker regex must compile")
    })
}

/// Inline `[id]` markers in order of first appearance.
pub fn inline_citations(answer: &str) -> Vec<String> {
    dedup_in_order(
        citation_marker()
            .captures_iter(answer)
            .map(|caps| caps[1].to_string()),
    )
}

fn dedup_in_order(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Decodes the model reply into `{answer, citations}`.
///
/// A missing `citations` field falls back to the inline markers of the answer.
pub fn parse_model_output(raw: &str) -> Result<ModelAnswer, MalformedOutput> {
    let value: Value = serde_json::from_str(strip_code_fence(raw)).map_err(|e| MalformedOutput {
        kind: MalformedOutputKind::NotJson,
        detail: e.to_string(),
    })?;
    let object = value
        .as_object()
        .ok_or_else(|| MalformedOutput::schema("top-level value is not an object"))?;

    let answer = object
        .get("answer")
        .and_then(Value::as_str)
        .ok_or_else(|| MalformedOutput::schema("\"answer\" is missing or not a string"))?
        .to_string();

    let citations = match object.get("citations") {
        None | Some(Value::Null) => inline_citations(&answer),
        Some(Value::Array(items)) => {
            let ids = items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or_else(|| MalformedOutput::schema("\"citations\" must contain only strings"))?;
            dedup_in_order(ids)
        }
        Some(_) => return Err(MalformedOutput::schema("\"citations\" is not an array")),
    };

    Ok(ModelAnswer { answer, citations })
}

/// Splits reported citations into (kept, dropped) against the retrieved set.
pub fn validate_citations(
    reported: &[String],
    retrieved: &[RetrievedFragment],
) -> (Vec<String>, Vec<String>) {
    let allowed: HashSet<&str> = retrieved.iter().map(|r| r.fragment_id.as_str()).collect();
    reported
        .iter()
        .cloned()
        .partition(|id| allowed.contains(id.as_str()))
}

/// Truncates to `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Detailed projection of the cited fragments, in retrieval order.
pub fn build_sources(
    citations: &[String],
    retrieved: &[RetrievedFragment],
    preview_chars: usize,
) -> Vec<SourceRef> {
    let cited: HashSet<&str> = citations.iter().map(String::as_str).collect();
    retrieved
        .iter()
        .filter(|r| cited.contains(r.fragment_id.as_str()))
        .map(|r| SourceRef {
            fragment_id: r.fragment_id.clone(),
            score: r.score,
            text: preview(r.text.as_deref().unwrap_or_default(), preview_chars),
            metadata: r.metadata.clone().unwrap_or_default(),
        })
        .collect()
}

pub struct AnswerSynthesizer {
    retrieval: RetrievalPolicy,
    llm: Arc<dyn LlmProvider>,
    llm_config: LlmConfig,
    retrieval_config: RetrievalConfig,
}

impl AnswerSynthesizer {
    pub fn new(
        retrieval: RetrievalPolicy,
        llm: Arc<dyn LlmProvider>,
        llm_config: LlmConfig,
        retrieval_config: RetrievalConfig,
    ) -> Self {
        Self {
            retrieval,
            llm,
            llm_config,
            retrieval_config,
        }
    }

    pub async fn ask(&self, question: &str) -> Result<AnswerResult, RagError> {
        let params = RetrievalParams::from(&self.retrieval_config);
        self.ask_with(question, &params).await
    }

    pub async fn ask_with(
        &self,
        question: &str,
        params: &RetrievalParams,
    ) -> Result<AnswerResult, RagError> {
        enter(AskStage::Retrieving);
        let retrieved = if self.retrieval.has_content().await {
            self.retrieval.retrieve(question, params).await?
        } else {
            Vec::new()
        };

        if retrieved.is_empty() {
            enter(AskStage::NoContext);
            tracing::info!(
                "No fragment cleared threshold {}; returning the no-context answer",
                params.score_threshold
            );
            enter(AskStage::Done);
            return Ok(AnswerResult::no_context());
        }

        tracing::info!(
            "Retrieved {} fragments: {}",
            retrieved.len(),
            retrieved
                .iter()
                .map(|r| format!("{} ({:.4})", r.fragment_id, r.score))
                .collect::<Vec<_>>()
                .join(", ")
        );

        enter(AskStage::Generating);
        let request = ChatRequest::new(grounded_messages(&retrieved, question))
            .with_config(&self.llm_config);
        let raw = self.llm.chat(request, &self.llm_config.model_name).await?;

        enter(AskStage::Parsing);
        let (answer, reported, malformed_output) = match parse_model_output(&raw) {
            Ok(parsed) => (parsed.answer, parsed.citations, false),
            Err(malformed) => {
                tracing::warn!(
                    "Model output is not the expected JSON ({:?}: {}); using raw text",
                    malformed.kind,
                    malformed.detail
                );
                (raw, Vec::new(), true)
            }
        };

        enter(AskStage::Validating);
        let (citations, dropped_citations) = validate_citations(&reported, &retrieved);
        if !dropped_citations.is_empty() {
            tracing::warn!(
                "Dropped citations not in the retrieved set: {}",
                dropped_citations.join(", ")
            );
        }
        let sources = build_sources(&citations, &retrieved, self.retrieval_config.preview_chars);

        enter(AskStage::Done);
        Ok(AnswerResult {
            answer,
            citations,
            sources,
            has_context: true,
            dropped_citations,
            malformed_output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn retrieved(id: &str, text: &str) -> RetrievedFragment {
        RetrievedFragment {
            fragment_id: id.to_string(),
            score: 0.5,
            text: Some(text.to_string()),
            metadata: Some(Map::new()),
        }
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parses_fenced_structured_reply() {
        let raw = "```json\n\
                   {\"answer\": \"主管审批 [c1]\", \"citations\": [\"c1\", \"c1\", \"c9\"]}\n\
                   ```";
        let parsed = parse_model_output(raw).unwrap();
        assert_eq!(parsed.answer, "主管审批 [c1]");
        assert_eq!(parsed.citations, vec!["c1", "c9"]);
    }

    #[test]
    fn plain_text_is_not_json() {
        let err = parse_model_output("The manager approves it.").unwrap_err();
        assert_eq!(err.kind, MalformedOutputKind::NotJson);
    }

    #[test]
    fn wrong_shapes_are_schema_mismatches() {
        for raw in [
            "[1, 2]",
            "{\"citations\": []}",
            "{\"answer\": 3}",
            "{\"answer\": \"x\", \"citations\": \"c1\"}",
            "{\"answer\": \"x\", \"citations\": [1]}",
        ] {
            let err = parse_model_output(raw).unwrap_err();
            assert_eq!(err.kind, MalformedOutputKind::SchemaMismatch, "{raw}");
        }
    }

    #[test]
    fn missing_citations_fall_back_to_inline_markers() {
        let reply = json!({ "answer": "A [doc_chunk_0001], B [c-2] and [doc_chunk_0001]." });
        let parsed = parse_model_output(&reply.to_string()).unwrap();
        assert_eq!(parsed.citations, vec!["doc_chunk_0001", "c-2"]);
    }

    #[test]
    fn inline_markers_accept_any_non_space_id() {
        let ids = inline_citations("见 [制度_第3条] 与 [_intro]，以及 [a b] 和 [[nested]]");
        assert_eq!(ids, vec!["制度_第3条", "_intro", "nested"]);
    }

    #[test]
    fn validation_keeps_only_retrieved_ids_in_reported_order() {
        let pool = vec![retrieved("a", "x"), retrieved("b", "y")];
        let reported = vec!["b".to_string(), "ghost".to_string(), "a".to_string()];
        let (kept, dropped) = validate_citations(&reported, &pool);
        assert_eq!(kept, vec!["b", "a"]);
        assert_eq!(dropped, vec!["ghost"]);
    }

    #[test]
    fn preview_counts_characters_not_bytes() {
        assert_eq!(preview("请假超过7天需HR审批", 4), "请假超过...");
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("abc", 3), "abc");
    }

    #[test]
    fn sources_follow_retrieval_order_and_only_cited_ids() {
        let pool = vec![retrieved("a", "alpha"), retrieved("b", "beta"), retrieved("c", "gamma")];
        let sources = build_sources(&["c".to_string(), "a".to_string()], &pool, 200);
        let ids: Vec<&str> = sources.iter().map(|s| s.fragment_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(sources[1].text, "gamma");
    }

    #[test]
    fn no_context_result_is_fixed() {
        let result = AnswerResult::no_context();
        assert_eq!(result.answer, NO_CONTEXT_ANSWER);
        assert!(result.citations.is_empty());
        assert!(!result.has_context);
    }
}
