//! Rules: a condition paired with the action to take when it matches.

use crate::condition::ConditionRef;

/// What a matched rule does to the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Reply with this text verbatim; the LLM is not called.
    Ask(String),
    /// Add this instruction as a transient system message before the LLM call.
    AskAi(String),
    /// Ask the LLM to collect the named fields that are still missing.
    Collect(Vec<String>),
}

impl RuleAction {
    /// Whether this action still goes through the LLM.
    pub fn calls_model(&self) -> bool {
        !matches!(self, RuleAction::Ask(_))
    }
}

/// A frozen `(condition, action, fallback)` triple.
#[derive(Debug, Clone)]
pub struct Rule {
    name: Option<String>,
    condition: ConditionRef,
    action: RuleAction,
    fallback: Option<String>,
}

impl Rule {
    pub fn new(condition: ConditionRef, action: RuleAction) -> Self {
        Self {
            name: None,
            condition,
            action,
            fallback: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reply used when the LLM call fails. Ignored for [`RuleAction::Ask`].
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Explicit name, or the condition name.
    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.condition.name())
    }

    pub fn condition(&self) -> &ConditionRef {
        &self.condition
    }

    pub fn action(&self) -> &RuleAction {
        &self.action
    }

    pub fn fallback(&self) -> Option<&str> {
        if self.action.calls_model() {
            self.fallback.as_deref()
        } else {
            None
        }
    }
}
