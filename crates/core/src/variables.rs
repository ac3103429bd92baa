//! Hierarchical variable scopes and the single lookup contract used by query builders.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CoreError, CoreResult};

/// Regex used when an include-all variable is set to "all" without a custom all-value.
pub const DEFAULT_ALL_VALUE: &str = ".*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableValue {
    Text(String),
    Multi(Vec<String>),
    /// "Match all" wildcard of a list-valued variable.
    All,
}

impl From<&str> for VariableValue {
    fn from(v: &str) -> Self { VariableValue::Text(v.to_string()) }
}

impl From<String> for VariableValue {
    fn from(v: String) -> Self { VariableValue::Text(v) }
}

impl From<Vec<String>> for VariableValue {
    fn from(v: Vec<String>) -> Self { VariableValue::Multi(v) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub value: VariableValue,
    /// Rendered in place of [`VariableValue::All`].
    pub all_value: String,
}

impl Variable {
    pub fn new(value: impl Into<VariableValue>) -> Self {
        Self { value: value.into(), all_value: DEFAULT_ALL_VALUE.to_string() }
    }

    pub fn with_all_value(mut self, all_value: impl Into<String>) -> Self {
        self.all_value = all_value.into();
        self
    }

    /// Rendering for regex matchers: multi values become an alternation.
    pub fn regex(&self) -> String {
        match &self.value {
            VariableValue::Text(s) => s.clone(),
            VariableValue::Multi(v) if v.is_empty() => self.all_value.clone(),
            VariableValue::Multi(v) => v.join("|"),
            VariableValue::All => self.all_value.clone(),
        }
    }

    /// Rendering for equality matchers and plain text.
    pub fn text(&self) -> String {
        match &self.value {
            VariableValue::Text(s) => s.clone(),
            VariableValue::Multi(v) => v.join(","),
            VariableValue::All => self.all_value.clone(),
        }
    }
}

/// Key → variable store with an optional parent scope.
///
/// Parents are shared read-only through `Arc`; every table owns its local scope.
#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    vars: FxHashMap<String, Variable>,
    parent: Option<Arc<VariableScope>>,
}

impl VariableScope {
    pub fn new() -> Self { Self::default() }

    pub fn with_parent(parent: Arc<VariableScope>) -> Self {
        Self { vars: FxHashMap::default(), parent: Some(parent) }
    }

    pub fn parent(&self) -> Option<&Arc<VariableScope>> { self.parent.as_ref() }

    pub fn define(&mut self, name: impl Into<String>, variable: Variable) {
        self.vars.insert(name.into(), variable);
    }

    /// Set a value locally, keeping the all-value of an existing local definition.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<VariableValue>) {
        let name = name.into();
        let value = value.into();
        match self.vars.get_mut(&name) {
            Some(var) => var.value = value,
            None => { self.vars.insert(name, Variable::new(value)); }
        }
    }

    pub fn with(mut self, name: impl Into<String>, variable: Variable) -> Self {
        self.define(name, variable);
        self
    }

    pub fn get_local(&self, name: &str) -> Option<&Variable> { self.vars.get(name) }

    /// Walk this scope and then each enclosing scope.
    pub fn lookup(&self, name: &str) -> Option<&Variable> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(v) = s.vars.get(name) { return Some(v); }
            scope = s.parent.as_deref();
        }
        None
    }
}

/// Resolve `name` locally, then through the parent chain. Resolved fresh per call.
pub fn resolve_variable<'a>(scope: &'a VariableScope, name: &str) -> CoreResult<&'a Variable> {
    if let Some(v) = scope.get_local(name) { return Ok(v); }
    if let Some(v) = scope.parent().and_then(|p| p.lookup(name)) {
        debug!(variable = %name, "variable resolved from enclosing scope");
        return Ok(v);
    }
    Err(CoreError::VariableNotFound { name: name.to_string() })
}
