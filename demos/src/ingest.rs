//! `ingest`: normalizes heterogeneous input records into a flat list,
//! mirroring the mock-data branches of the original data-ingest agent
//! (text, json, image, video handled distinctly; everything else passed
//! through as-is).

use async_trait::async_trait;
use orbit_worker::{Agent, TaskInput, TaskOutput};

pub struct IngestAgent;

fn process_record(input: &TaskInput) -> serde_json::Value {
    match input.input_type.as_str() {
        "text" => {
            let text = input.data.as_str().unwrap_or_default();
            serde_json::json!({
                "type": "text",
                "content": text,
                "length": text.len(),
                "word_count": text.split_whitespace().count(),
            })
        }
        "json" => serde_json::json!({
            "type": "json",
            "data": input.data,
            "keys": input.data.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>()).unwrap_or_default(),
        }),
        "image" => serde_json::json!({
            "type": "image",
            "format": input.metadata.get("format").cloned().unwrap_or(serde_json::json!("unknown")),
        }),
        "video" => serde_json::json!({
            "type": "video",
            "duration_sec": input.metadata.get("duration").cloned().unwrap_or(serde_json::json!(0)),
            "fps": input.metadata.get("fps").cloned().unwrap_or(serde_json::json!(30)),
        }),
        other => serde_json::json!({ "type": other, "data": input.data }),
    }
}

#[async_trait]
impl Agent for IngestAgent {
    fn capability(&self) -> &str {
        "ingest"
    }

    async fn process(
        &self,
        inputs: &[TaskInput],
        _parameters: &serde_json::Value,
    ) -> anyhow::Result<TaskOutput> {
        let records: Vec<serde_json::Value> = inputs.iter().map(process_record).collect();
        let types: Vec<String> = inputs.iter().map(|i| i.input_type.clone()).collect();

        Ok(TaskOutput {
            output_type: "ingested_data".to_string(),
            data: serde_json::json!({
                "records": records,
                "count": inputs.len(),
                "types": types,
            }),
            metadata: serde_json::json!({}),
            processing_time_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ingests_text_with_word_count() {
        let agent = IngestAgent;
        let inputs = vec![TaskInput {
            input_id: "i1".to_string(),
            input_type: "text".to_string(),
            data: serde_json::json!("hello world"),
            metadata: serde_json::json!({}),
        }];
        let out = agent.process(&inputs, &serde_json::json!({})).await.unwrap();
        assert_eq!(out.data["count"], 1);
        assert_eq!(out.data["records"][0]["word_count"], 2);
    }
}
