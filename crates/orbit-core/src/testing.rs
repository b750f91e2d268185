//! In-memory fakes shared by this crate's unit and integration tests.
//!
//! Not gated behind `#[cfg(test)]` because integration tests in `tests/`
//! compile against this crate as an external dependency and cannot see
//! `cfg(test)` items. The cost is a small always-compiled test helper.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::dispatch::{AgentDispatchClient, WorkerRequest, WorkerResponse};

/// A dispatch client driven entirely by a pre-loaded queue of responses, one
/// per call, consumed in order.
pub struct FakeDispatchClient {
    pub responses: Mutex<Vec<WorkerResponse>>,
}

impl FakeDispatchClient {
    pub fn new(responses: Vec<WorkerResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl AgentDispatchClient for FakeDispatchClient {
    async fn dispatch(
        &self,
        _endpoint: &str,
        _request: WorkerRequest,
        _timeout: Duration,
    ) -> Result<WorkerResponse> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            anyhow::bail!("no more fake responses queued");
        }
        Ok(responses.remove(0))
    }
}
