//! Agent Core
//!
//! Ties the control core together, one turn at a time:
//!
//! 1. Look up the session and hold its lock for the whole turn
//! 2. On a new task, record it and generate a plan
//! 3. Render the session into the prompt and call the model backend
//! 4. Parse the reply into one step, trying intent recovery on failure
//! 5. Run the step through the guardrail chain and return it
//!
//! The caller executes the step and reports the outcome through
//! [`AgentCore::report_result`], the only path by which observations enter
//! the session.
//!
//! Every turn ends in a step. Backend failures become a terminal
//! `MODEL_ERROR` step, parse failures a terminal `PARSE_ERROR` or
//! `HALLUCINATED_OUTPUT` step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use sdk::Step;

use super::context::{render_context, system_prompt};
use super::status::run_status_loop;
use crate::config::{AgentConfig, Config, LLMConfig};
use crate::guardrails::GuardrailEngine;
use crate::interpreter::{ResponseParser, TagInterpreter};
use crate::llm::{self, ChatRequest, LLMError, ModelBackend, SamplingOptions};
use crate::planning::{IntentRecovery, PlanGenerator};
use crate::session::{SessionRegistry, SessionState, DEFAULT_SESSION};

/// Events emitted during a streaming turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Reasoning text, as soon as it is available
    Reasoning(String),
    /// Progress while waiting for the first token
    Status(String),
    /// The final step of the turn
    Step(Step),
}

/// Turn orchestration over one model backend and a session registry
pub struct AgentCore {
    backend: Arc<dyn ModelBackend>,
    sessions: SessionRegistry,
    guardrails: GuardrailEngine,
    parser: ResponseParser,
    planner: PlanGenerator,
    intent: IntentRecovery,
    llm: LLMConfig,
    agent: AgentConfig,
}

impl AgentCore {
    pub fn new(config: &Config, backend: Arc<dyn ModelBackend>, sessions: SessionRegistry) -> Self {
        Self {
            planner: PlanGenerator::new(Arc::clone(&backend), &config.llm),
            intent: IntentRecovery::new(Arc::clone(&backend), &config.llm),
            backend,
            sessions,
            guardrails: GuardrailEngine::new(config.guardrails.clone()),
            parser: ResponseParser::new(
                config.agent.reasoning_start.clone(),
                config.agent.reasoning_end.clone(),
            ),
            llm: config.llm.clone(),
            agent: config.agent.clone(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Load the model ahead of the first turn.
    pub async fn warm_up(&self) -> llm::Result<()> {
        self.backend.warm_up().await
    }

    /// Produce the next step for `task` without streaming.
    pub async fn next_step(&self, session_id: Option<&str>, task: &str) -> Step {
        self.turn(session_id, task, None).await
    }

    /// Produce the next step for `task`, streaming reasoning and status
    /// messages to `events`. The final step is also sent as
    /// [`TurnEvent::Step`].
    pub async fn stream_step(
        &self,
        session_id: Option<&str>,
        task: &str,
        events: mpsc::UnboundedSender<TurnEvent>,
    ) -> Step {
        let step = self.turn(session_id, task, Some(&events)).await;
        let _ = events.send(TurnEvent::Step(step.clone()));
        step
    }

    /// Record the outcome of an executed step.
    ///
    /// Repeated failures trigger a replan while the replan budget lasts.
    pub async fn report_result(
        &self,
        session_id: Option<&str>,
        tool: &str,
        params: &Map<String, Value>,
        raw_output: &str,
        success: bool,
    ) {
        let session = self.sessions.get_or_create(session_id).await;
        let mut state = session.lock().await;
        state.update_from_step(tool, params, raw_output, success);

        if success || !self.agent.plan_enabled || state.task_plan.is_none() {
            return;
        }
        let config = self.guardrails.config();
        if state.trailing_failures() < config.replace_failure_threshold {
            return;
        }
        let Some(goal) = state.command_flow.original_goal.clone() else {
            return;
        };
        let failure = state
            .last_step()
            .and_then(|s| s.error_message.clone())
            .unwrap_or_default();
        let prompt = format!(
            "{}\n\nThe previous approach failed {} times in a row. Last error: {}",
            goal,
            state.trailing_failures(),
            failure
        );
        match self.planner.generate(&prompt).await {
            Ok(plan) => {
                if state.replan(plan, config.max_replans) {
                    info!("Replanned after repeated failures ({} of {})", state.replan_count, config.max_replans);
                }
            }
            Err(e) => warn!("Replan request failed: {}", e),
        }
    }

    async fn turn(
        &self,
        session_id: Option<&str>,
        task: &str,
        events: Option<&mpsc::UnboundedSender<TurnEvent>>,
    ) -> Step {
        let session_name = session_id.unwrap_or(DEFAULT_SESSION);
        let session = self.sessions.get_or_create(session_id).await;
        let mut state = session.lock().await;
        let start = Instant::now();

        self.ensure_started(&mut state, task).await;

        let request = ChatRequest::new(
            system_prompt(&self.agent.reasoning_start, &self.agent.reasoning_end),
            render_context(&state, task),
            SamplingOptions::from_config(&self.llm),
        )
        .with_keep_alive(self.llm.keep_alive.clone());

        let reply = match events {
            Some(tx) => self.stream_reply(&request, tx).await,
            None => self.backend.complete(&request).await,
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                error!("Model call failed for session {}: {}", session_name, e);
                return e.to_step();
            }
        };

        let step = self.interpret(&reply, task, &state).await;
        let step = self.guardrails.apply(step, &state, session_name);
        info!(
            "Session {} turn produced {} in {:.1}s",
            session_name,
            step.tool,
            start.elapsed().as_secs_f64()
        );
        step
    }

    /// Record a new task and plan it.
    async fn ensure_started(&self, state: &mut SessionState, task: &str) {
        let task = task.trim();
        if state.ledger.user_requests.back().map(String::as_str) == Some(task) {
            return;
        }
        state.begin_task(task);
        if !self.agent.plan_enabled {
            return;
        }
        match self.planner.generate(task).await {
            Ok(plan) => state.set_plan(plan),
            Err(e) => warn!("Plan request failed, continuing without a plan: {}", e),
        }
    }

    /// Parse a reply, falling back to intent recovery and then to a
    /// diagnostic terminal step.
    async fn interpret(&self, reply: &str, task: &str, state: &SessionState) -> Step {
        let err = match self.parser.parse(reply) {
            Ok(step) => return step,
            Err(err) => err,
        };
        let reasoning = self.parser.reasoning_of(reply);
        warn!("Reply could not be parsed: {}", err);

        if !err.is_recoverable() {
            return err.to_step(reasoning);
        }
        match self.intent.recover(task, state).await {
            Ok(Some(step)) => step.with_reasoning(reasoning.to_string()),
            Ok(None) => err.to_step(reasoning),
            Err(e) => {
                warn!("Intent recovery failed: {}", e);
                err.to_step(reasoning)
            }
        }
    }

    /// Stream a reply while the status activity reports progress.
    ///
    /// Both activities run in this task; the status loop has finished by
    /// the time this returns, on every exit path.
    async fn stream_reply(
        &self,
        request: &ChatRequest,
        events: &mpsc::UnboundedSender<TurnEvent>,
    ) -> llm::Result<String> {
        let (done_tx, done_rx) = watch::channel(false);
        let interval = Duration::from_millis(self.agent.status_poll_interval_ms);
        let status = run_status_loop(Arc::clone(&self.backend), interval, done_rx, events.clone());

        let tokens = async {
            let result = self.consume_tokens(request, events, &done_tx).await;
            done_tx.send_replace(true);
            result
        };

        let ((), reply) = tokio::join!(status, tokens);
        reply
    }

    async fn consume_tokens(
        &self,
        request: &ChatRequest,
        events: &mpsc::UnboundedSender<TurnEvent>,
        done: &watch::Sender<bool>,
    ) -> Result<String, LLMError> {
        let mut stream = self.backend.stream(request).await?;
        let mut tags = TagInterpreter::new(
            self.agent.reasoning_start.clone(),
            self.agent.reasoning_end.clone(),
        );
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if reply.is_empty() {
                done.send_replace(true);
                debug!("First token received");
            }
            reply.push_str(&chunk);
            let reasoning = tags.feed(&chunk);
            if !reasoning.is_empty() {
                let _ = events.send(TurnEvent::Reasoning(reasoning));
            }
        }
        let rest = tags.flush();
        if !rest.is_empty() {
            let _ = events.send(TurnEvent::Reasoning(rest));
        }
        debug!("Streamed reply of {} bytes", reply.len());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelResidency, TokenStream};
    use async_trait::async_trait;
    use sdk::{codes, Tool};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays canned replies in order
    struct ScriptedBackend {
        replies: Mutex<VecDeque<llm::Result<String>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<llm::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
            })
        }

        fn next(&self) -> llm::Result<String> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LLMError::ProviderUnavailable("script exhausted".into())))
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn complete(&self, _request: &ChatRequest) -> llm::Result<String> {
            self.next()
        }

        async fn stream(&self, _request: &ChatRequest) -> llm::Result<TokenStream> {
            let reply = self.next()?;
            let chunks: Vec<llm::Result<String>> = reply
                .as_bytes()
                .chunks(3)
                .map(|c| Ok(String::from_utf8_lossy(c).into_owned()))
                .collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        async fn residency(&self) -> llm::Result<ModelResidency> {
            Ok(ModelResidency {
                resident: true,
                size: 10,
                size_vram: 10,
            })
        }

        async fn warm_up(&self) -> llm::Result<()> {
            Ok(())
        }
    }

    fn config(plan_enabled: bool) -> Config {
        let mut config = Config::default();
        config.agent.plan_enabled = plan_enabled;
        config
    }

    #[tokio::test]
    async fn test_turn_returns_parsed_step() {
        let backend = ScriptedBackend::new(vec![Ok(
            r#"<think>look around</think>{"tool": "scan_workspace", "params": {}}"#.to_string(),
        )]);
        let core = AgentCore::new(&config(false), backend, SessionRegistry::new());
        let step = core.next_step(None, "what is in this repo?").await;
        assert!(step.is_tool(Tool::ScanWorkspace));
        assert_eq!(step.reasoning, "look around");
    }

    #[tokio::test]
    async fn test_backend_failure_is_terminal_step() {
        let backend = ScriptedBackend::new(vec![Err(LLMError::Timeout)]);
        let core = AgentCore::new(&config(false), backend, SessionRegistry::new());
        let step = core.next_step(Some("s1"), "anything").await;
        assert!(step.is_terminal());
        assert!(step.error().unwrap().starts_with(codes::MODEL_ERROR));
    }

    #[tokio::test]
    async fn test_plan_generated_once_per_task() {
        let backend = ScriptedBackend::new(vec![
            Ok("1. Scan the workspace\n2. Summarize".to_string()),
            Ok(r#"{"tool": "scan_workspace", "params": {}}"#.to_string()),
            Ok(r#"{"tool": "noop", "params": {}}"#.to_string()),
        ]);
        let core = AgentCore::new(&config(true), backend, SessionRegistry::new());
        core.next_step(None, "describe the repo").await;
        let step = core.next_step(None, "describe the repo").await;
        assert!(step.is_tool(Tool::Noop));

        let session = core.sessions().get_or_create(None).await;
        let state = session.lock().await;
        assert_eq!(state.task_plan.as_ref().unwrap().items.len(), 2);
        assert_eq!(state.ledger.user_requests.len(), 1);
    }

    #[tokio::test]
    async fn test_unparsable_reply_uses_intent_recovery() {
        let backend = ScriptedBackend::new(vec![
            Ok("I am not sure what to do.".to_string()),
            Ok(r#"{"targets": ["web-01"], "operation": "query", "needs_remote": true}"#.to_string()),
        ]);
        let core = AgentCore::new(&config(false), backend, SessionRegistry::new());
        let step = core.next_step(None, "check disk on web-01").await;
        assert!(step.is_tool(Tool::DiscoverAgents));
    }

    #[tokio::test]
    async fn test_unrecoverable_parse_failure_is_terminal() {
        let backend = ScriptedBackend::new(vec![
            Ok("I am not sure what to do.".to_string()),
            Ok(r#"{"targets": [], "operation": "other", "needs_remote": false}"#.to_string()),
        ]);
        let core = AgentCore::new(&config(false), backend, SessionRegistry::new());
        let step = core.next_step(None, "tidy up").await;
        assert!(step.error().unwrap().starts_with(codes::PARSE_ERROR));
    }

    #[tokio::test]
    async fn test_stream_emits_reasoning_then_step() {
        let backend = ScriptedBackend::new(vec![Ok(
            r#"<think>first scan</think>{"tool": "scan_workspace", "params": {}}"#.to_string(),
        )]);
        let core = AgentCore::new(&config(false), backend, SessionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let step = core.stream_step(None, "look", tx).await;
        assert!(step.is_tool(Tool::ScanWorkspace));

        let mut reasoning = String::new();
        let mut last = None;
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Reasoning(text) => reasoning.push_str(&text),
                other => last = Some(other),
            }
        }
        assert_eq!(reasoning, "first scan");
        assert_eq!(last, Some(TurnEvent::Step(step)));
    }

    #[tokio::test]
    async fn test_repeated_failures_trigger_replan() {
        let backend = ScriptedBackend::new(vec![
            Ok("1. Build\n2. Test".to_string()),
            Ok(r#"{"tool": "run_shell", "params": {"command": "make"}}"#.to_string()),
            Ok("1. Install make\n2. Build\n3. Test".to_string()),
        ]);
        let core = AgentCore::new(&config(true), backend, SessionRegistry::new());
        core.next_step(None, "build it").await;

        let params = sdk::step::single("command", "make");
        core.report_result(None, "run_shell", &params, "make: command not found", false).await;
        core.report_result(None, "run_shell", &params, "make: command not found", false).await;

        let session = core.sessions().get_or_create(None).await;
        let state = session.lock().await;
        assert_eq!(state.replan_count, 1);
        assert_eq!(state.task_plan.as_ref().unwrap().items.len(), 3);
    }
}
