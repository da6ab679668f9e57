//! Intent specification: the declarative automation unit.
//!
//! An [`IntentSpec`] is immutable once loaded; `{{PARAM}}` tokens are
//! substituted immediately before each step executes, never at load time.

use crate::protocol::{Locator, Primitive};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

static PARAM_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("static pattern"));

/// One of the two execution modalities for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    /// Reasoning-engine-driven execution on live page state.
    Semantic,
    /// Pre-recorded snippet of browser primitives.
    Deterministic,
}

impl ExecutionPath {
    /// The alternate modality.
    pub fn other(self) -> ExecutionPath {
        match self {
            ExecutionPath::Semantic => ExecutionPath::Deterministic,
            ExecutionPath::Deterministic => ExecutionPath::Semantic,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionPath::Semantic => "semantic",
            ExecutionPath::Deterministic => "deterministic",
        }
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPath {
    Semantic,
    Deterministic,
    #[default]
    None,
}

impl FallbackPath {
    pub fn as_path(self) -> Option<ExecutionPath> {
        match self {
            FallbackPath::Semantic => Some(ExecutionPath::Semantic),
            FallbackPath::Deterministic => Some(ExecutionPath::Deterministic),
            FallbackPath::None => None,
        }
    }
}

/// Declared parameter of an intent spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

/// A single ordered step. Linear only: later steps depend on page state left
/// by earlier ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    /// Semantic instruction for the reasoning engine.
    #[serde(default)]
    pub instruction: String,
    /// Deterministic snippet of browser primitives.
    #[serde(default)]
    pub snippet: Vec<Primitive>,
    /// Preferred path; falls back to the spec-level default when omitted.
    #[serde(default)]
    pub preferred: Option<ExecutionPath>,
    #[serde(default)]
    pub fallback: FallbackPath,
    #[serde(default)]
    pub locator: Option<Locator>,
    /// Value template, may reference `{{PARAM}}` tokens.
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Path used by steps that do not state a preference.
    #[serde(default = "default_path")]
    pub default_path: ExecutionPath,
    pub steps: Vec<StepSpec>,
}

fn default_path() -> ExecutionPath {
    ExecutionPath::Deterministic
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Spec name cannot be empty")]
    EmptySpecName,
    #[error("Spec must have at least one step")]
    NoSteps,
    #[error("Duplicate step name: {0}")]
    DuplicateStepName(String),
    #[error("Step '{step}' references undeclared parameter '{param}'")]
    UndeclaredParameter { param: String, step: String },
    #[error("Step '{0}' declares a fallback equal to its preferred path")]
    FallbackMatchesPreferred(String),
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    UnusedParameter(String),
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::UnusedParameter(name) => {
                write!(f, "Parameter '{}' is declared but never used", name)
            }
        }
    }
}

impl IntentSpec {
    /// Effective preferred path for a step.
    pub fn preferred_for(&self, step: &StepSpec) -> ExecutionPath {
        step.preferred.unwrap_or(self.default_path)
    }

    /// Structural validation. Undeclared `{{PARAM}}` references are fatal;
    /// declared-but-unused parameters only warn.
    pub fn validate(&self) -> Result<Vec<ValidationWarning>, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptySpecName);
        }
        if self.steps.is_empty() {
            return Err(ValidationError::NoSteps);
        }

        let declared: HashSet<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        let mut referenced: HashSet<String> = HashSet::new();
        let mut step_names: HashSet<&str> = HashSet::new();

        for step in &self.steps {
            if !step_names.insert(step.name.as_str()) {
                return Err(ValidationError::DuplicateStepName(step.name.clone()));
            }
            if step.fallback.as_path() == Some(self.preferred_for(step)) {
                return Err(ValidationError::FallbackMatchesPreferred(step.name.clone()));
            }
            for token in step_tokens(step) {
                if !declared.contains(token.as_str()) {
                    return Err(ValidationError::UndeclaredParameter {
                        param: token,
                        step: step.name.clone(),
                    });
                }
                referenced.insert(token);
            }
        }

        let warnings = self
            .params
            .iter()
            .filter(|p| !referenced.contains(&p.name))
            .map(|p| ValidationWarning::UnusedParameter(p.name.clone()))
            .collect();
        Ok(warnings)
    }

    /// Merge provided variables with declared defaults. Missing required
    /// parameters fail fast, before any step executes.
    pub fn resolve_variables(
        &self,
        provided: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, ValidationError> {
        let mut resolved = HashMap::new();
        for param in &self.params {
            match provided.get(&param.name).cloned().or_else(|| param.default.clone()) {
                Some(value) => {
                    resolved.insert(param.name.clone(), value);
                }
                None if param.required => {
                    return Err(ValidationError::MissingParameter(param.name.clone()));
                }
                None => {}
            }
        }
        Ok(resolved)
    }
}

/// All `{{PARAM}}` tokens referenced by a step, across instruction, value
/// template and snippet.
fn step_tokens(step: &StepSpec) -> HashSet<String> {
    let mut tokens = HashSet::new();
    collect_tokens(&step.instruction, &mut tokens);
    if let Some(value) = &step.value {
        collect_tokens(value, &mut tokens);
    }
    // The snippet is scanned through its serialized form so every string
    // field is covered without enumerating primitive variants here.
    if let Ok(raw) = serde_json::to_string(&step.snippet) {
        collect_tokens(&raw, &mut tokens);
    }
    tokens
}

fn collect_tokens(text: &str, out: &mut HashSet<String>) {
    for capture in PARAM_TOKEN.captures_iter(text) {
        out.insert(capture[1].to_string());
    }
}

/// Replace every `{{PARAM}}` token with its value. Tokens without a binding
/// are left intact; validation guarantees they cannot occur at run time.
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    PARAM_TOKEN
        .replace_all(text, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn substitute_locator(locator: &Locator, vars: &HashMap<String, String>) -> Locator {
    match locator {
        Locator::Css(v) => Locator::Css(substitute(v, vars)),
        Locator::Text(v) => Locator::Text(substitute(v, vars)),
        Locator::Role(v) => Locator::Role(substitute(v, vars)),
        Locator::Path(v) => Locator::Path(substitute(v, vars)),
    }
}

fn substitute_primitive(primitive: &Primitive, vars: &HashMap<String, String>) -> Primitive {
    match primitive {
        Primitive::Goto { url } => Primitive::Goto {
            url: substitute(url, vars),
        },
        Primitive::Click { locator } => Primitive::Click {
            locator: substitute_locator(locator, vars),
        },
        Primitive::Fill { locator, value } => Primitive::Fill {
            locator: substitute_locator(locator, vars),
            value: substitute(value, vars),
        },
        Primitive::Select { locator, value } => Primitive::Select {
            locator: substitute_locator(locator, vars),
            value: substitute(value, vars),
        },
        Primitive::WaitFor {
            locator,
            timeout_ms,
        } => Primitive::WaitFor {
            locator: substitute_locator(locator, vars),
            timeout_ms: *timeout_ms,
        },
        Primitive::Press { key } => Primitive::Press {
            key: substitute(key, vars),
        },
        Primitive::Screenshot => Primitive::Screenshot,
    }
}

/// A copy of the step with every token bound. Called by the orchestrator
/// immediately before execution.
pub fn substitute_step(step: &StepSpec, vars: &HashMap<String, String>) -> StepSpec {
    StepSpec {
        name: step.name.clone(),
        instruction: substitute(&step.instruction, vars),
        snippet: step
            .snippet
            .iter()
            .map(|p| substitute_primitive(p, vars))
            .collect(),
        preferred: step.preferred,
        fallback: step.fallback,
        locator: step.locator.as_ref().map(|l| substitute_locator(l, vars)),
        value: step.value.as_ref().map(|v| substitute(v, vars)),
    }
}
