//! Demonstration worker agents for the six capabilities spec.md documents
//! end-to-end: deterministic mock-data implementations, not production
//! OCR/LLM/RSS integrations. Used by `orbit worker <capability>` to give
//! the orchestrator something real to dispatch to.

mod alerting;
mod analyze;
mod ingest;
mod summary;
mod synthesize;
mod video_detection;

use orbit_worker::Agent;

pub use alerting::AlertingAgent;
pub use analyze::AnalyzeAgent;
pub use ingest::IngestAgent;
pub use summary::SummaryAgent;
pub use synthesize::SynthesizeAgent;
pub use video_detection::VideoDetectionAgent;

/// Build the demonstration agent for a capability name. Returns `None` for
/// any capability not among the six demonstrated end-to-end.
pub fn build_agent(capability: &str) -> Option<Box<dyn Agent>> {
    match capability {
        "ingest" => Some(Box::new(IngestAgent)),
        "analyze" => Some(Box::new(AnalyzeAgent)),
        "synthesize" => Some(Box::new(SynthesizeAgent)),
        "video_detection" => Some(Box::new(VideoDetectionAgent)),
        "alerting" => Some(Box::new(AlertingAgent)),
        "summary" => Some(Box::new(SummaryAgent)),
        _ => None,
    }
}
