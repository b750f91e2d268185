//! `video_detection`: deterministic mock object detection over video
//! inputs, grounded on the original video-detection agent (fixed threshold,
//! one synthetic detection per video input).

use async_trait::async_trait;
use orbit_worker::{Agent, TaskInput, TaskOutput};

pub struct VideoDetectionAgent;

const DETECTION_THRESHOLD: f64 = 0.7;

#[async_trait]
impl Agent for VideoDetectionAgent {
    fn capability(&self) -> &str {
        "video_detection"
    }

    async fn process(
        &self,
        inputs: &[TaskInput],
        _parameters: &serde_json::Value,
    ) -> anyhow::Result<TaskOutput> {
        let detections: Vec<serde_json::Value> = inputs
            .iter()
            .filter(|i| i.input_type == "video")
            .map(|i| {
                serde_json::json!({
                    "input_id": i.input_id,
                    "objects": [{"label": "person", "confidence": 0.91}],
                    "threshold": DETECTION_THRESHOLD,
                })
            })
            .collect();

        let data = serde_json::json!({
            "detections": detections,
            "detection_count": detections.len(),
            "timestamp": chrono::Utc::now().timestamp(),
        });

        Ok(TaskOutput {
            output_type: "detections".to_string(),
            data,
            metadata: serde_json::json!({ "detection_threshold": DETECTION_THRESHOLD }),
            processing_time_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_one_event_per_video_input() {
        let agent = VideoDetectionAgent;
        let inputs = vec![TaskInput {
            input_id: "v1".to_string(),
            input_type: "video".to_string(),
            data: serde_json::json!("stream-url"),
            metadata: serde_json::json!({}),
        }];
        let out = agent.process(&inputs, &serde_json::json!({})).await.unwrap();
        assert_eq!(out.data["detection_count"], 1);
    }

    #[tokio::test]
    async fn ignores_non_video_inputs() {
        let agent = VideoDetectionAgent;
        let inputs = vec![TaskInput {
            input_id: "t1".to_string(),
            input_type: "text".to_string(),
            data: serde_json::json!("hi"),
            metadata: serde_json::json!({}),
        }];
        let out = agent.process(&inputs, &serde_json::json!({})).await.unwrap();
        assert_eq!(out.data["detection_count"], 0);
    }
}
