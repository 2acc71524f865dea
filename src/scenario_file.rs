use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::executor::Connector;

/// JSON description of a whole scenario.
///
/// ```json
/// {
///   "users": 200,
///   "base_address": "http://localhost:8080",
///   "test_duration_secs": 60,
///   "pause_ms": 3000,
///   "timeout_ms": 3000,
///   "steps": [
///     { "method": "get", "endpoint": "/health" },
///     { "method": "post", "endpoint": "/items",
///       "headers": { "Content-Type": "application/json" },
///       "body": "eyJuYW1lIjoid2lkZ2V0In0=" }
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct ScenarioFile {
    pub users: u32,
    pub base_address: String,
    pub test_duration_secs: u64,
    #[serde(default)]
    pub pause_ms: u64,
    #[serde(default)]
    pub timeout_ms: u64,
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Deserialize)]
pub struct StepSpec {
    pub method: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Base64-encoded payload.
    #[serde(default)]
    pub body: String,
}

impl ScenarioFile {
    pub fn load_from_file(path: &Path) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| EngineError::ScenarioFileRead {
                path: path.to_path_buf(),
                source,
            })?;

        let file: ScenarioFile =
            sonic_rs::from_str(&content).map_err(|source| EngineError::ScenarioFileParse {
                path: path.to_path_buf(),
                source,
            })?;

        info!(
            "Loaded scenario with {} steps from {:?}",
            file.steps.len(),
            path
        );
        Ok(file)
    }

    /// Creates the engine's scenario and appends every step in order.
    pub fn install<C: Connector>(&self, engine: &mut Engine<C>) -> Result<(), EngineError> {
        let scenario = engine.create_scenario(
            self.users,
            &self.base_address,
            Duration::from_secs(self.test_duration_secs),
            Duration::from_millis(self.pause_ms),
            Duration::from_millis(self.timeout_ms),
        )?;
        for step in &self.steps {
            scenario.add_step(step.headers.as_ref(), &step.method, &step.endpoint, &step.body)?;
        }
        Ok(())
    }
}
