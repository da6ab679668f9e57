//! Dual-path step execution.
//!
//! Each step runs on its preferred path first. A failure on a step with a
//! configured fallback triggers in-path recovery, and only when recovery is
//! exhausted does execution switch to the alternate modality. A step never
//! raises; every outcome is a [`StepExecutionResult`].

use crate::browser::{execute_primitive, Browser};
use crate::config::ExecutionConfig;
use crate::events::{EventSink, ExecutionEvent};
use crate::reasoner::{parse_reply, ReasonedAction, Reasoner, ReasonerError};
use crate::recovery::{HybridRecovery, RecoveryContext, RecoveryOutcome};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_common::protocol::{BrowserError, Locator, PageContext, Primitive};
use tandem_common::report::{RecoveryStatus, StepExecutionResult};
use tandem_common::spec::{ExecutionPath, StepSpec};
use tracing::{debug, warn};

/// Why a path attempt failed, with enough detail for recovery to act on.
struct PathFailure {
    message: String,
    typed: Option<BrowserError>,
    failed_primitive: Option<Primitive>,
}

impl PathFailure {
    fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            typed: None,
            failed_primitive: None,
        }
    }
}

pub struct StepExecutor {
    config: ExecutionConfig,
    reasoner: Arc<dyn Reasoner>,
    recovery: Arc<HybridRecovery>,
}

impl StepExecutor {
    pub fn new(
        config: ExecutionConfig,
        reasoner: Arc<dyn Reasoner>,
        recovery: Arc<HybridRecovery>,
    ) -> Self {
        Self {
            config,
            reasoner,
            recovery,
        }
    }

    /// Run one substituted step to completion within the step budget.
    pub async fn execute(
        &self,
        session: &str,
        index: usize,
        step: &StepSpec,
        preferred: ExecutionPath,
        url: &str,
        browser: &mut dyn Browser,
        sink: &dyn EventSink,
    ) -> StepExecutionResult {
        let started = Instant::now();
        let budget = Duration::from_millis(self.config.step_timeout_ms);

        let run = self.run(session, index, step, preferred, url, browser, sink);
        let mut result = match tokio::time::timeout(budget, run).await {
            Ok(result) => result,
            Err(_) => self.outcome(
                step,
                preferred,
                false,
                false,
                RecoveryStatus::NotAttempted,
                Some(format!(
                    "step timed out after {}ms",
                    self.config.step_timeout_ms
                )),
            ),
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        if !result.success && self.config.screenshot_on_failure {
            result.screenshot = self.capture_failure_screenshot(session, step, browser).await;
        }
        result
    }

    async fn run(
        &self,
        session: &str,
        index: usize,
        step: &StepSpec,
        preferred: ExecutionPath,
        url: &str,
        browser: &mut dyn Browser,
        sink: &dyn EventSink,
    ) -> StepExecutionResult {
        let failure = match self.attempt_path(preferred, step, browser).await {
            Ok(()) => {
                return self.outcome(
                    step,
                    preferred,
                    false,
                    true,
                    RecoveryStatus::NotAttempted,
                    None,
                )
            }
            Err(failure) => failure,
        };
        debug!(step = %step.name, path = %preferred, error = %failure.message, "preferred path failed");

        // Without a fallback the failure is terminal for this step; recovery
        // has nothing to hand the result to.
        let Some(fallback) = step.fallback.as_path() else {
            return self.outcome(
                step,
                preferred,
                false,
                false,
                RecoveryStatus::NotAttempted,
                Some(failure.message),
            );
        };

        let ctx = self.recovery_context(session, step, url, &failure, browser).await;
        match self
            .recovery
            .recover(&failure.message, failure.typed.as_ref(), &ctx, browser)
            .await
        {
            RecoveryOutcome::Recovered { .. } => {
                // The recovery action completed the interaction itself; the
                // step stays on its original path and is not a fallback.
                self.outcome(
                    step,
                    preferred,
                    false,
                    true,
                    RecoveryStatus::RecoveredInPath,
                    None,
                )
            }
            RecoveryOutcome::Exhausted { .. } => {
                sink.emit(&ExecutionEvent::FallbackStarted {
                    index,
                    name: step.name.clone(),
                    to: fallback,
                });
                let fallback_result = self.attempt_path(fallback, step, browser).await;
                sink.emit(&ExecutionEvent::FallbackCompleted {
                    index,
                    name: step.name.clone(),
                    success: fallback_result.is_ok(),
                });
                match fallback_result {
                    Ok(()) => self.outcome(
                        step,
                        fallback,
                        true,
                        true,
                        RecoveryStatus::RecoveredViaFallback,
                        None,
                    ),
                    Err(second) => self.outcome(
                        step,
                        fallback,
                        true,
                        false,
                        RecoveryStatus::Exhausted,
                        Some(format!(
                            "{} (fallback {}: {})",
                            failure.message, fallback, second.message
                        )),
                    ),
                }
            }
        }
    }

    async fn attempt_path(
        &self,
        path: ExecutionPath,
        step: &StepSpec,
        browser: &mut dyn Browser,
    ) -> Result<(), PathFailure> {
        match path {
            ExecutionPath::Deterministic => self.attempt_deterministic(step, browser).await,
            ExecutionPath::Semantic => self.attempt_semantic(step, browser).await,
        }
    }

    async fn attempt_deterministic(
        &self,
        step: &StepSpec,
        browser: &mut dyn Browser,
    ) -> Result<(), PathFailure> {
        if step.snippet.is_empty() {
            return Err(PathFailure::text("step has no recorded snippet"));
        }
        for primitive in &step.snippet {
            if let Err(e) = execute_primitive(browser, primitive, self.config.action_timeout_ms).await
            {
                return Err(PathFailure {
                    message: e.to_string(),
                    typed: Some(e),
                    failed_primitive: Some(primitive.clone()),
                });
            }
        }
        Ok(())
    }

    async fn attempt_semantic(
        &self,
        step: &StepSpec,
        browser: &mut dyn Browser,
    ) -> Result<(), PathFailure> {
        if step.instruction.trim().is_empty() {
            return Err(PathFailure::text("step has no semantic instruction"));
        }
        let page = browser
            .page_context()
            .await
            .map_err(|e| PathFailure::text(format!("could not read page context: {}", e)))?;

        let budget = Duration::from_millis(self.config.reasoner_timeout_ms);
        let raw = match tokio::time::timeout(budget, self.reasoner.reason(&step.instruction, &page))
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(PathFailure::text(format!("reasoner failed: {}", e))),
            Err(_) => {
                return Err(PathFailure::text(ReasonerError::Timeout.to_string()));
            }
        };

        match parse_reply(&raw).map_err(|e| PathFailure::text(e.to_string()))? {
            ReasonedAction::Performed => Ok(()),
            ReasonedAction::Plan(plan) => {
                for primitive in &plan {
                    if let Err(e) =
                        execute_primitive(browser, primitive, self.config.action_timeout_ms).await
                    {
                        return Err(PathFailure {
                            message: e.to_string(),
                            typed: Some(e),
                            failed_primitive: Some(primitive.clone()),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    async fn recovery_context(
        &self,
        session: &str,
        step: &StepSpec,
        url: &str,
        failure: &PathFailure,
        browser: &mut dyn Browser,
    ) -> RecoveryContext {
        let page = browser.page_context().await.unwrap_or_else(|e| {
            debug!(error = %e, "page context unavailable for recovery");
            PageContext::default()
        });
        let target_hint = match &step.locator {
            Some(Locator::Text(value)) => Some(value.clone()),
            _ => None,
        };
        RecoveryContext {
            session: session.to_string(),
            step_name: step.name.clone(),
            instruction: step.instruction.clone(),
            url: url.to_string(),
            page,
            failed_primitive: failure.failed_primitive.clone(),
            target_hint,
            retry_count: 0,
        }
    }

    async fn capture_failure_screenshot(
        &self,
        session: &str,
        step: &StepSpec,
        browser: &mut dyn Browser,
    ) -> Option<String> {
        let bytes = match browser.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(step = %step.name, error = %e, "failure screenshot unavailable");
                return None;
            }
        };
        let dir = &self.config.screenshot_dir;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, "could not create screenshot directory");
            return None;
        }
        let path = dir.join(format!("{}_{}.png", session, step.name));
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!(error = %e, "could not write failure screenshot");
                None
            }
        }
    }

    fn outcome(
        &self,
        step: &StepSpec,
        path_used: ExecutionPath,
        fallback_occurred: bool,
        success: bool,
        recovery: RecoveryStatus,
        error: Option<String>,
    ) -> StepExecutionResult {
        StepExecutionResult {
            step_name: step.name.clone(),
            path_used,
            fallback_occurred,
            success,
            error,
            recovery,
            duration_ms: 0,
            screenshot: None,
            timestamp: Utc::now(),
        }
    }
}
