//! Guardrail Engine
//!
//! Every decoded step passes through an ordered chain of checks before it is
//! returned to the caller. A check either passes the step through (`None`)
//! or returns a replacement: a rewritten action, or a terminal `complete`
//! carrying a machine-matchable error (see [`sdk::codes`]).
//!
//! Checks are grouped into categories that run in order:
//!
//! | category   | checks                                                        |
//! |------------|---------------------------------------------------------------|
//! | routing    | workspace misroute, remote authorization, script pre-flight, forced redirect |
//! | completion | anti-laziness, empty-discovery anti-hallucination             |
//! | repetition | duplicate remote call, loop breaker, single-use tools          |
//! | edits      | failure auto-correction, re-access suppression, path reconciliation |
//! | ceiling    | global step ceiling                                           |
//!
//! Within a category the first substitution wins and the rest of that
//! category is skipped. Later categories still run on the replaced step.
//! Checks are pure, so the same step and state always give the same result.

pub mod ceiling;
pub mod commands;
pub mod completion;
pub mod edits;
pub mod repetition;
pub mod routing;
pub mod script;

use sdk::Step;
use tracing::{debug, warn};

use crate::config::GuardrailConfig;
use crate::session::SessionState;

pub use script::{Language, ScriptValidator, ValidationReport};

/// A single policy check
pub trait Guardrail: Send + Sync {
    /// Stable name used in logs
    fn name(&self) -> &'static str;

    /// Return a replacement step, or `None` to pass `step` through.
    fn check(&self, step: &Step, state: &SessionState, config: &GuardrailConfig) -> Option<Step>;
}

/// A named group of checks where the first substitution wins
pub struct Category {
    pub name: &'static str,
    pub checks: Vec<Box<dyn Guardrail>>,
}

impl Category {
    pub fn new(name: &'static str, checks: Vec<Box<dyn Guardrail>>) -> Self {
        Self { name, checks }
    }
}

/// Ordered guardrail chain
pub struct GuardrailEngine {
    config: GuardrailConfig,
    categories: Vec<Category>,
}

impl GuardrailEngine {
    /// Engine with the standard checks in their standard order.
    pub fn new(config: GuardrailConfig) -> Self {
        let categories = vec![
            Category::new(
                "routing",
                vec![
                    Box::new(routing::WorkspaceMisroute),
                    Box::new(routing::RemoteAuthorization),
                    Box::new(routing::ScriptPreflight::default()),
                    Box::new(routing::ForcedRedirect),
                ],
            ),
            Category::new(
                "completion",
                vec![
                    Box::new(completion::AntiLaziness),
                    Box::new(completion::EmptyDiscovery),
                ],
            ),
            Category::new(
                "repetition",
                vec![
                    Box::new(repetition::DuplicateRemoteCall),
                    Box::new(repetition::LoopBreaker),
                    Box::new(repetition::SingleUse),
                ],
            ),
            Category::new(
                "edits",
                vec![
                    Box::new(edits::FailureCorrection),
                    Box::new(edits::ReaccessSuppression),
                    Box::new(edits::PathReconciliation),
                ],
            ),
            Category::new("ceiling", vec![Box::new(ceiling::StepCeiling)]),
        ];
        Self::with_categories(config, categories)
    }

    /// Engine with a custom chain.
    pub fn with_categories(config: GuardrailConfig, categories: Vec<Category>) -> Self {
        Self { config, categories }
    }

    pub fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// Check names in evaluation order
    pub fn names(&self) -> Vec<&'static str> {
        self.categories
            .iter()
            .flat_map(|c| c.checks.iter().map(|g| g.name()))
            .collect()
    }

    /// Run the chain over `step`.
    pub fn apply(&self, step: Step, state: &SessionState, session: &str) -> Step {
        let mut current = step;
        for category in &self.categories {
            for guardrail in &category.checks {
                let Some(replacement) = guardrail.check(&current, state, &self.config) else {
                    continue;
                };
                warn!(
                    guardrail = guardrail.name(),
                    category = category.name,
                    session = session,
                    tool = %current.tool,
                    replacement = %replacement.tool,
                    "Guardrail substituted step: {}",
                    replacement.note
                );
                current = replacement;
                break;
            }
        }
        debug!("Guardrails passed {} for session {}", current.tool, session);
        current
    }
}
