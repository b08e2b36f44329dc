//! Condition algebra: composable predicates over a session and per-turn data.
//!
//! Conditions are evaluated synchronously before any LLM call. They must be
//! side-effect free and deterministic for identical inputs. Composites
//! short-circuit left to right, and an inner failure propagates out of the
//! composite unchanged.

use crate::error::ConditionError;
use crate::field;
use crate::session::Session;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Key under which the orchestrator stores the current utterance.
pub const USER_INPUT_KEY: &str = "userInput";

/// Per-turn data handed to every condition.
pub type TurnData = Map<String, Value>;

/// Shared handle to a condition.
pub type ConditionRef = Arc<dyn Condition>;

/// A predicate over `(session, per-turn data)`.
pub trait Condition: Send + Sync {
    /// Stable, compact name (e.g. `contains("help")`).
    fn name(&self) -> String;

    /// Human-readable description for diagnostics.
    fn description(&self) -> String;

    fn evaluate(&self, session: &Session, data: &TurnData) -> Result<bool, ConditionError>;
}

impl std::fmt::Debug for dyn Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

// ── Leaves ────────────────────────────────────────────────────────────────

/// Case-insensitive substring match over the current utterance.
pub struct Contains {
    needle: String,
}

impl Condition for Contains {
    fn name(&self) -> String {
        format!("contains({:?})", self.needle)
    }

    fn description(&self) -> String {
        format!("User input contains {:?}", self.needle)
    }

    fn evaluate(&self, _session: &Session, data: &TurnData) -> Result<bool, ConditionError> {
        let input = data
            .get(USER_INPUT_KEY)
            .ok_or_else(|| ConditionError::MissingData {
                condition: self.name(),
                key: USER_INPUT_KEY.into(),
            })?
            .as_str()
            .ok_or_else(|| ConditionError::NotAString {
                condition: self.name(),
                key: USER_INPUT_KEY.into(),
            })?;
        Ok(input.to_lowercase().contains(&self.needle.to_lowercase()))
    }
}

/// True once the session holds at least `n` messages.
pub struct Count {
    at_least: usize,
}

impl Condition for Count {
    fn name(&self) -> String {
        format!("count({})", self.at_least)
    }

    fn description(&self) -> String {
        format!("Conversation has at least {} messages", self.at_least)
    }

    fn evaluate(&self, session: &Session, _data: &TurnData) -> Result<bool, ConditionError> {
        Ok(session.message_count() >= self.at_least)
    }
}

/// True if any listed field name has never appeared in the conversation.
pub struct Missing {
    fields: Vec<String>,
}

impl Condition for Missing {
    fn name(&self) -> String {
        format!("missing({})", self.fields.join(", "))
    }

    fn description(&self) -> String {
        format!("Any of [{}] not yet mentioned", self.fields.join(", "))
    }

    fn evaluate(&self, session: &Session, _data: &TurnData) -> Result<bool, ConditionError> {
        let messages = session.messages();
        Ok(self
            .fields
            .iter()
            .any(|name| !field::is_mentioned(name, &messages)))
    }
}

/// Equality on a data key. Per-turn data is consulted first, then the
/// session scratch map.
pub struct DataEquals {
    key: String,
    value: Value,
}

impl Condition for DataEquals {
    fn name(&self) -> String {
        format!("data_equals({}, {})", self.key, self.value)
    }

    fn description(&self) -> String {
        format!("Data '{}' equals {}", self.key, self.value)
    }

    fn evaluate(&self, session: &Session, data: &TurnData) -> Result<bool, ConditionError> {
        let actual = match data.get(&self.key) {
            Some(v) => Some(v.clone()),
            None => session.get_data(&self.key),
        };
        Ok(actual.as_ref() == Some(&self.value))
    }
}

type PredicateFn = dyn Fn(&Session, &TurnData) -> Result<bool, ConditionError> + Send + Sync;

/// A user-supplied predicate.
pub struct Func {
    name: String,
    f: Box<PredicateFn>,
}

impl Condition for Func {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Custom condition '{}'", self.name)
    }

    fn evaluate(&self, session: &Session, data: &TurnData) -> Result<bool, ConditionError> {
        (self.f)(session, data)
    }
}

/// A constant predicate.
pub struct Constant(bool);

impl Condition for Constant {
    fn name(&self) -> String {
        if self.0 { "always".into() } else { "never".into() }
    }

    fn description(&self) -> String {
        if self.0 { "Always matches".into() } else { "Never matches".into() }
    }

    fn evaluate(&self, _session: &Session, _data: &TurnData) -> Result<bool, ConditionError> {
        Ok(self.0)
    }
}

// ── Composites ────────────────────────────────────────────────────────────

pub struct And {
    parts: Vec<ConditionRef>,
}

impl Condition for And {
    fn name(&self) -> String {
        format!("and({})", join_names(&self.parts))
    }

    fn description(&self) -> String {
        format!("All of: [{}]", join_descriptions(&self.parts))
    }

    fn evaluate(&self, session: &Session, data: &TurnData) -> Result<bool, ConditionError> {
        for part in &self.parts {
            if !part.evaluate(session, data)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub struct Or {
    parts: Vec<ConditionRef>,
}

impl Condition for Or {
    fn name(&self) -> String {
        format!("or({})", join_names(&self.parts))
    }

    fn description(&self) -> String {
        format!("Any of: [{}]", join_descriptions(&self.parts))
    }

    fn evaluate(&self, session: &Session, data: &TurnData) -> Result<bool, ConditionError> {
        for part in &self.parts {
            if part.evaluate(session, data)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub struct Not {
    inner: ConditionRef,
}

impl Condition for Not {
    fn name(&self) -> String {
        format!("not({})", self.inner.name())
    }

    fn description(&self) -> String {
        format!("Not: {}", self.inner.description())
    }

    fn evaluate(&self, session: &Session, data: &TurnData) -> Result<bool, ConditionError> {
        self.inner.evaluate(session, data).map(|b| !b)
    }
}

fn join_names(parts: &[ConditionRef]) -> String {
    parts.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
}

fn join_descriptions(parts: &[ConditionRef]) -> String {
    parts
        .iter()
        .map(|c| c.description())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Constructors ──────────────────────────────────────────────────────────

pub fn contains(text: impl Into<String>) -> ConditionRef {
    Arc::new(Contains {
        needle: text.into(),
    })
}

pub fn count(at_least: usize) -> ConditionRef {
    Arc::new(Count { at_least })
}

pub fn missing<I, S>(fields: I) -> ConditionRef
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Arc::new(Missing {
        fields: fields.into_iter().map(Into::into).collect(),
    })
}

pub fn data_equals(key: impl Into<String>, value: impl Into<Value>) -> ConditionRef {
    Arc::new(DataEquals {
        key: key.into(),
        value: value.into(),
    })
}

/// A fallible user predicate.
pub fn func<F>(name: impl Into<String>, f: F) -> ConditionRef
where
    F: Fn(&Session, &TurnData) -> Result<bool, ConditionError> + Send + Sync + 'static,
{
    Arc::new(Func {
        name: name.into(),
        f: Box::new(f),
    })
}

/// An infallible user predicate.
pub fn predicate<F>(name: impl Into<String>, f: F) -> ConditionRef
where
    F: Fn(&Session, &TurnData) -> bool + Send + Sync + 'static,
{
    func(name, move |s, d| Ok(f(s, d)))
}

pub fn always() -> ConditionRef {
    Arc::new(Constant(true))
}

pub fn never() -> ConditionRef {
    Arc::new(Constant(false))
}

pub fn and(a: ConditionRef, b: ConditionRef) -> ConditionRef {
    all([a, b])
}

pub fn or(a: ConditionRef, b: ConditionRef) -> ConditionRef {
    any([a, b])
}

pub fn not(inner: ConditionRef) -> ConditionRef {
    Arc::new(Not { inner })
}

/// Conjunction of any number of conditions. Empty is true.
pub fn all(parts: impl IntoIterator<Item = ConditionRef>) -> ConditionRef {
    Arc::new(And {
        parts: parts.into_iter().collect(),
    })
}

/// Disjunction of any number of conditions. Empty is false.
pub fn any(parts: impl IntoIterator<Item = ConditionRef>) -> ConditionRef {
    Arc::new(Or {
        parts: parts.into_iter().collect(),
    })
}
