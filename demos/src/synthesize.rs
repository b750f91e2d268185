//! `synthesize`: assembles an analysis result into a structured report,
//! grounded on the original synthesis agent's report-generation shape.

use async_trait::async_trait;
use orbit_worker::{Agent, TaskInput, TaskOutput};

pub struct SynthesizeAgent;

#[async_trait]
impl Agent for SynthesizeAgent {
    fn capability(&self) -> &str {
        "synthesize"
    }

    async fn process(
        &self,
        inputs: &[TaskInput],
        parameters: &serde_json::Value,
    ) -> anyhow::Result<TaskOutput> {
        let analysis = inputs
            .iter()
            .find(|i| i.input_type == "analysis_result")
            .map(|i| i.data.clone())
            .unwrap_or(serde_json::json!({}));

        let report = serde_json::json!({
            "report_version": "1.0",
            "analysis": analysis,
            "parameters": parameters,
        });

        Ok(TaskOutput {
            output_type: "json_report".to_string(),
            data: report,
            metadata: serde_json::json!({ "report_version": "1.0" }),
            processing_time_ms: 0,
        })
    }
}
