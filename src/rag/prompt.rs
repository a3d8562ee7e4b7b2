//! Prompt templates for grounded answering.

use super::retrieval::RetrievedFragment;
use crate::llm::ChatMessage;

pub const SYSTEM_PROMPT: &str = "\
You are a careful question-answering assistant. Answer strictly from the reference material you are given.

Rules:
1. Every statement of fact must cite at least one reference id in square brackets, e.g. [doc_chunk_0001].
2. Do not state anything the references do not support. No generalizations such as \"usually\" or \"in most cases\".
3. If the references are not sufficient, say that the available material does not settle the question.
4. Be precise and point directly at what the references say.

Output format:
- Respond with a single JSON object with the fields \"answer\" (string) and \"citations\" (array of reference ids).
- \"citations\" lists only ids you actually cited in the answer.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Renders retrieved fragments as one context block, each tagged with its
/// identifier, score and (when present) title.
pub fn build_context(fragments: &[RetrievedFragment]) -> String {
    fragments
        .iter()
        .map(|fragment| {
            let mut header =
                format!("[{}] (relevance: {:.4})", fragment.fragment_id, fragment.score);
            if let Some(title) = fragment.title() {
                header.push(' ');
                header.push_str(title);
            }
            format!("{}\n{}", header, fragment.text.as_deref().unwrap_or_default())
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn user_prompt(context: &str, question: &str) -> String {
    format!(
        "Reference material:\n{context}\n\n\
         Question:\n{question}\n\n\
         Answer using only the reference material above. Mark every conclusion with its source as [id]. \
         Respond in JSON, for example:\n\
         {{\"answer\": \"The policy requires X [doc_chunk_0001]. Approval is given by Y [doc_chunk_0002].\", \
         \"citations\": [\"doc_chunk_0001\", \"doc_chunk_0002\"]}}"
    )
}

pub fn grounded_messages(fragments: &[RetrievedFragment], question: &str) -> Vec<ChatMessage> {
    let context = build_context(fragments);
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(user_prompt(&context, question)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn retrieved(id: &str, score: f32, text: &str, title: Option<&str>) -> RetrievedFragment {
        let mut metadata = Map::new();
        if let Some(title) = title {
            metadata.insert("title".to_string(), json!(title));
        }
        RetrievedFragment {
            fragment_id: id.to_string(),
            score,
            text: Some(text.to_string()),
            metadata: Some(metadata),
        }
    }

    #[test]
    fn context_tags_each_fragment() {
        let context = build_context(&[
            retrieved("c1", 0.8123, "请假3天由主管审批", Some("审批权限")),
            retrieved("c2", 0.5, "事假需提前3天申请", None),
        ]);
        assert!(context.starts_with("[c1] (relevance: 0.8123) 审批权限\n请假3天由主管审批"));
        assert!(context.contains("---\n\n[c2] (relevance: 0.5000)\n事假需提前3天申请"));
    }

    #[test]
    fn messages_carry_context_and_question() {
        let messages = grounded_messages(&[retrieved("c1", 0.9, "text", None)], "谁来审批?");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[1].content.contains("[c1]"));
        assert!(messages[1].content.contains("谁来审批?"));
        assert!(messages[1].content.contains("\"citations\""));
    }
}
