//! Execution results handed to the shell/UI and the reporter.

use crate::spec::ExecutionPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How a step's failure was (or was not) handled. The report must always be
/// able to tell "failed, no recovery attempted" apart from "failed, recovered
/// via fallback" and "failed, recovery exhausted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// No failure, or failure with no fallback configured.
    NotAttempted,
    /// Recovery succeeded on the original preferred path; no path switch.
    RecoveredInPath,
    /// Recovery was exhausted and the alternate path succeeded.
    RecoveredViaFallback,
    /// Recovery and the fallback path were both exhausted.
    Exhausted,
    /// Step never ran (cancellation or halt-on-failure).
    Skipped,
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryStatus::NotAttempted => "not_attempted",
            RecoveryStatus::RecoveredInPath => "recovered_in_path",
            RecoveryStatus::RecoveredViaFallback => "recovered_via_fallback",
            RecoveryStatus::Exhausted => "exhausted",
            RecoveryStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Outcome of one step attempt. Created once, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub step_name: String,
    pub path_used: ExecutionPath,
    pub fallback_occurred: bool,
    pub success: bool,
    pub error: Option<String>,
    pub recovery: RecoveryStatus,
    pub duration_ms: u64,
    pub screenshot: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StepExecutionResult {
    pub fn skipped(step_name: &str) -> Self {
        Self {
            step_name: step_name.to_string(),
            path_used: ExecutionPath::Deterministic,
            fallback_occurred: false,
            success: false,
            error: None,
            recovery: RecoveryStatus::Skipped,
            duration_ms: 0,
            screenshot: None,
            timestamp: Utc::now(),
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.recovery == RecoveryStatus::Skipped
    }
}

/// Aggregated result of one intent execution. Built incrementally through
/// [`ReportBuilder`]; never mutated after `finish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub spec_name: String,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepExecutionResult>,
    pub ai_usage_count: usize,
    pub snippet_usage_count: usize,
    pub fallback_count: usize,
    pub overall_success: bool,
    pub total_duration_ms: u64,
    pub suggestions: Vec<String>,
}

impl ExecutionReport {
    /// Steps that actually ran (skipped steps excluded).
    pub fn executed_steps(&self) -> impl Iterator<Item = &StepExecutionResult> {
        self.steps.iter().filter(|s| !s.was_skipped())
    }

    pub fn success_count(&self) -> usize {
        self.executed_steps().filter(|s| s.success).count()
    }
}

/// Accumulates step results during a run.
pub struct ReportBuilder {
    execution_id: Uuid,
    spec_name: String,
    started_at: DateTime<Utc>,
    steps: Vec<StepExecutionResult>,
    ai_usage_count: usize,
    snippet_usage_count: usize,
    fallback_count: usize,
}

impl ReportBuilder {
    pub fn new(spec_name: &str) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            spec_name: spec_name.to_string(),
            started_at: Utc::now(),
            steps: Vec::new(),
            ai_usage_count: 0,
            snippet_usage_count: 0,
            fallback_count: 0,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn record(&mut self, result: StepExecutionResult) {
        if !result.was_skipped() {
            match result.path_used {
                ExecutionPath::Semantic => self.ai_usage_count += 1,
                ExecutionPath::Deterministic => self.snippet_usage_count += 1,
            }
            // Only actual path switches count as fallbacks; an in-path
            // recovery is a normal success.
            if result.fallback_occurred {
                self.fallback_count += 1;
            }
        }
        self.steps.push(result);
    }

    pub fn has_failure(&self) -> bool {
        self.steps.iter().any(|s| !s.success && !s.was_skipped())
    }

    /// Results recorded so far, for analysis that must happen before
    /// `finish` seals the report.
    pub fn steps(&self) -> &[StepExecutionResult] {
        &self.steps
    }

    /// Finalize the report. The builder is consumed; the report is immutable
    /// from here on.
    pub fn finish(self, total_duration_ms: u64, suggestions: Vec<String>) -> ExecutionReport {
        let overall_success = !self.steps.is_empty() && self.steps.iter().all(|s| s.success);
        ExecutionReport {
            execution_id: self.execution_id,
            spec_name: self.spec_name,
            started_at: self.started_at,
            steps: self.steps,
            ai_usage_count: self.ai_usage_count,
            snippet_usage_count: self.snippet_usage_count,
            fallback_count: self.fallback_count,
            overall_success,
            total_duration_ms,
            suggestions,
        }
    }
}
