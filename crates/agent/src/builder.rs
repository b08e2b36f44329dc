//! Staged rule builder.
//!
//! `when(cond)` opens a [`RuleStage`]; choosing an action narrows what can
//! follow. Only LLM-backed actions accept a fallback:
//!
//! ```text
//! when(c).ask(text).build()
//! when(c).ask_ai(instruction).or_else(fallback).build()
//! when(c).collect(fields).or_else(fallback).build()
//! ```
//!
//! `build()` freezes the rule and hands back the [`AgentBuilder`].

use crate::agent::AgentBuilder;
use colloquy_core::condition::ConditionRef;
use colloquy_core::rule::{Rule, RuleAction};

/// A rule with its condition chosen but no action yet.
pub struct RuleStage {
    agent: AgentBuilder,
    condition: ConditionRef,
    name: Option<String>,
}

impl RuleStage {
    pub(crate) fn new(agent: AgentBuilder, condition: ConditionRef) -> Self {
        Self {
            agent,
            condition,
            name: None,
        }
    }

    /// Diagnostic name. Defaults to the condition's name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reply with `text` verbatim, skipping the LLM.
    pub fn ask(self, text: impl Into<String>) -> DirectRule {
        let rule = self.rule(RuleAction::Ask(text.into()));
        DirectRule {
            agent: self.agent,
            rule,
        }
    }

    /// Add `instruction` as a transient system message before the LLM call.
    pub fn ask_ai(self, instruction: impl Into<String>) -> AugmentedRule {
        let rule = self.rule(RuleAction::AskAi(instruction.into()));
        AugmentedRule {
            agent: self.agent,
            rule,
        }
    }

    /// Ask the LLM to gather whichever of `fields` are still missing.
    pub fn collect<I, S>(self, fields: I) -> AugmentedRule
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rule = self.rule(RuleAction::Collect(
            fields.into_iter().map(Into::into).collect(),
        ));
        AugmentedRule {
            agent: self.agent,
            rule,
        }
    }

    fn rule(&self, action: RuleAction) -> Rule {
        let rule = Rule::new(self.condition.clone(), action);
        match &self.name {
            Some(name) => rule.with_name(name.clone()),
            None => rule,
        }
    }
}

/// A verbatim-reply rule, ready to build.
pub struct DirectRule {
    agent: AgentBuilder,
    rule: Rule,
}

impl DirectRule {
    pub fn build(self) -> AgentBuilder {
        self.agent.with_rule(self.rule)
    }
}

/// An LLM-backed rule; may carry a fallback reply.
pub struct AugmentedRule {
    agent: AgentBuilder,
    rule: Rule,
}

impl AugmentedRule {
    /// Reply with `fallback` if the LLM call fails.
    pub fn or_else(mut self, fallback: impl Into<String>) -> Self {
        self.rule = self.rule.with_fallback(fallback);
        self
    }

    pub fn build(self) -> AgentBuilder {
        self.agent.with_rule(self.rule)
    }
}
