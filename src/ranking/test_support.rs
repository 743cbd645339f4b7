use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use super::client::CompletionService;
use crate::error::CompletionError;

/// Completion double that replays canned results in order and records each
/// call. Once the script runs out every call fails.
pub struct ScriptedService {
    script: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: Mutex<Vec<(String, Instant)>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub fn new(script: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> CompletionError {
        CompletionError::Api {
            code: 503,
            message: "model overloaded".to_string(),
        }
    }

    pub fn models_called(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn generate_content(&self, model: &str, prompt: &str) -> Result<String, CompletionError> {
        self.calls.lock().unwrap().push((model.to_string(), Instant::now()));
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Self::unavailable()))
    }
}
