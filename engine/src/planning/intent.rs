//! Intent Recovery
//!
//! Runs only after a reply could not be parsed. A helper request classifies
//! the original task text (never the malformed reply) and the result decides
//! whether a discovery call or a no-target error is the right next step.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use sdk::{codes, Step, Tool};

use crate::config::LLMConfig;
use crate::interpreter::parser::extract_first_object;
use crate::llm::{ChatRequest, ModelBackend, Result, SamplingOptions};
use crate::session::SessionState;

const INTENT_PROMPT: &str = "Classify the user's task for a coding and operations agent.\n\
Reply with one JSON object and nothing else:\n\
{\"targets\": [names of machines, hosts or agents mentioned], \
\"operation\": \"read\" | \"write\" | \"execute\" | \"query\" | \"other\", \
\"needs_remote\": true if the task must run on a remote machine}";

/// What the task text asks for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIntent {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub needs_remote: bool,
}

impl TaskIntent {
    /// Decode a helper reply, tolerating prose around the object.
    pub fn from_reply(reply: &str) -> Option<Self> {
        let (object, _) = extract_first_object(reply)?;
        serde_json::from_str(object).ok()
    }

    /// Recovery step for this intent given the session so far.
    pub fn recovery_step(&self, state: &SessionState) -> Option<Step> {
        if !self.needs_remote {
            return None;
        }
        if !state.agents_verified {
            let note = if self.targets.is_empty() {
                "task needs remote access; discovering agents".to_string()
            } else {
                format!(
                    "task mentions {}; discovering agents",
                    self.targets.join(", ")
                )
            };
            return Some(Step::for_tool(Tool::DiscoverAgents, Map::new()).with_note(note));
        }
        if state.discovery_empty() {
            return Some(
                Step::complete_error(codes::format(
                    codes::NO_AGENTS_AVAILABLE,
                    "the task needs a remote agent but discovery found none",
                ))
                .with_note("intent recovery"),
            );
        }
        None
    }
}

/// Recovers a next step from the task text after a parse failure
pub struct IntentRecovery {
    backend: Arc<dyn ModelBackend>,
    options: SamplingOptions,
    keep_alive: String,
}

impl IntentRecovery {
    pub fn new(backend: Arc<dyn ModelBackend>, config: &LLMConfig) -> Self {
        Self {
            backend,
            options: SamplingOptions::helper(config),
            keep_alive: config.keep_alive.clone(),
        }
    }

    /// Classify `task` with one helper request.
    pub async fn classify(&self, task: &str) -> Result<Option<TaskIntent>> {
        let request = ChatRequest::new(INTENT_PROMPT, task, self.options.clone())
            .with_format(Value::String("json".to_string()))
            .with_keep_alive(self.keep_alive.clone());
        let reply = self.backend.complete(&request).await?;
        let intent = TaskIntent::from_reply(&reply);
        debug!("Recovered intent: {:?}", intent);
        Ok(intent)
    }

    /// Step to take instead of the unparsable reply, if the task implies one.
    pub async fn recover(&self, task: &str, state: &SessionState) -> Result<Option<Step>> {
        let step = self
            .classify(task)
            .await?
            .and_then(|intent| intent.recovery_step(state));
        if let Some(step) = &step {
            info!("Intent recovery produced {}", step.tool);
        }
        Ok(step)
    }
}
