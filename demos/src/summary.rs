//! `summary`: a deterministic extractive summary over text inputs.
//!
//! The original transcript-summary agent calls out to an LLM provider;
//! that integration is explicitly out of scope. This keeps the same output
//! shape (summary, key points, word count) with a simple extractive
//! heuristic: first sentence as summary, longest sentences as key points.

use async_trait::async_trait;
use orbit_worker::{Agent, TaskInput, TaskOutput};

pub struct SummaryAgent;

fn sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[async_trait]
impl Agent for SummaryAgent {
    fn capability(&self) -> &str {
        "summary"
    }

    async fn process(
        &self,
        inputs: &[TaskInput],
        _parameters: &serde_json::Value,
    ) -> anyhow::Result<TaskOutput> {
        let text: String = inputs
            .iter()
            .filter(|i| i.input_type == "text")
            .filter_map(|i| i.data.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let sentences = sentences(&text);
        let executive_summary = sentences.first().unwrap_or(&"").to_string();

        let mut key_points: Vec<&str> = sentences.clone();
        key_points.sort_by_key(|s| std::cmp::Reverse(s.len()));
        let key_points: Vec<String> = key_points.into_iter().take(3).map(str::to_string).collect();

        let data = serde_json::json!({
            "executive_summary": executive_summary,
            "key_points": key_points,
            "word_count": text.split_whitespace().count(),
        });

        Ok(TaskOutput {
            output_type: "summary".to_string(),
            data,
            metadata: serde_json::json!({}),
            processing_time_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn summarizes_first_sentence() {
        let agent = SummaryAgent;
        let inputs = vec![TaskInput {
            input_id: "i1".to_string(),
            input_type: "text".to_string(),
            data: serde_json::json!("First sentence here. Second one follows."),
            metadata: serde_json::json!({}),
        }];
        let out = agent.process(&inputs, &serde_json::json!({})).await.unwrap();
        assert_eq!(out.data["executive_summary"], "First sentence here");
    }

    #[tokio::test]
    async fn empty_input_yields_empty_summary() {
        let agent = SummaryAgent;
        let out = agent.process(&[], &serde_json::json!({})).await.unwrap();
        assert_eq!(out.data["executive_summary"], "");
        assert_eq!(out.data["word_count"], 0);
    }
}
