//! Run-level orchestration: validation, navigation, sequential step
//! execution, cancellation and the final report.

use crate::browser::{execute_primitive, Browser};
use crate::config::TandemConfig;
use crate::events::{EventSink, ExecutionEvent, TracingSink};
use crate::library::{FileSolutionStore, SolutionLibrary};
use crate::reasoner::Reasoner;
use crate::recovery::HybridRecovery;
use crate::reporter;
use crate::sandbox::{AuditLog, Sandbox};
use crate::step_executor::StepExecutor;
use crate::strategies::BuiltinStrategies;
use crate::synthesize::Synthesizer;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tandem_common::protocol::{BrowserError, Primitive};
use tandem_common::report::{ExecutionReport, RecoveryStatus, ReportBuilder, StepExecutionResult};
use tandem_common::spec::{substitute_step, IntentSpec, ValidationError};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid spec: {0}")]
    Validation(#[from] ValidationError),
    #[error("Could not open '{url}': {source}")]
    Navigation {
        url: String,
        #[source]
        source: BrowserError,
    },
}

pub struct Orchestrator {
    config: TandemConfig,
    executor: StepExecutor,
    recovery: Arc<HybridRecovery>,
    audit: Arc<AuditLog>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Wire the full decision layer from configuration. Loads the persistent
    /// solution library best-effort; a missing or corrupt file starts empty.
    pub async fn new(config: TandemConfig, reasoner: Arc<dyn Reasoner>) -> Self {
        let store = Arc::new(FileSolutionStore::new(config.library.path.clone()));
        let library = Arc::new(SolutionLibrary::with_store(&config.library, store));
        match library.load().await {
            Ok(count) if count > 0 => info!(count, "loaded solution library"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "solution library unavailable, starting empty"),
        }

        let audit = Arc::new(AuditLog::new());
        let sandbox = Sandbox::new(
            config.synthesis.allowed_primitives.iter().copied(),
            Arc::clone(&audit),
            config.execution.action_timeout_ms,
        );
        let builtins = BuiltinStrategies::new(
            config.recovery.max_builtin_attempts,
            config.execution.action_timeout_ms,
        );
        let synthesizer = Synthesizer::new(Arc::clone(&reasoner), config.synthesis.clone());
        let recovery = Arc::new(HybridRecovery::new(
            library,
            builtins,
            Some(synthesizer),
            sandbox,
            config.recovery.clone(),
        ));
        let executor = StepExecutor::new(
            config.execution.clone(),
            reasoner,
            Arc::clone(&recovery),
        );

        Self {
            config,
            executor,
            recovery,
            audit,
            sink: Arc::new(TracingSink),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Token for cooperative cancellation. Cancelling interrupts the
    /// in-flight step at its next suspension point and marks it, and every
    /// remaining step, skipped.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn audit_log(&self) -> Arc<AuditLog> {
        Arc::clone(&self.audit)
    }

    /// Execute an intent spec end to end. Only pre-flight problems (invalid
    /// spec, missing parameters, unreachable target URL) surface as errors;
    /// everything after navigation lands in the report.
    pub async fn execute(
        &self,
        spec: &IntentSpec,
        vars: &HashMap<String, String>,
        browser: &mut dyn Browser,
    ) -> Result<ExecutionReport, OrchestratorError> {
        let warnings = spec.validate()?;
        for warning in &warnings {
            warn!(spec = %spec.name, "{}", warning);
        }
        let resolved = spec.resolve_variables(vars)?;

        let mut builder = ReportBuilder::new(&spec.name);
        let session = builder.execution_id().to_string();
        let started = Instant::now();
        self.sink.emit(&ExecutionEvent::ExecutionStarted {
            execution_id: builder.execution_id(),
            spec_name: spec.name.clone(),
            total_steps: spec.steps.len(),
        });

        let goto = Primitive::Goto {
            url: spec.url.clone(),
        };
        execute_primitive(browser, &goto, self.config.execution.action_timeout_ms)
            .await
            .map_err(|source| OrchestratorError::Navigation {
                url: spec.url.clone(),
                source,
            })?;

        let deadline = started + Duration::from_millis(self.config.execution.run_timeout_ms);
        let halt_on_failure = self.config.execution.halt_on_failure;

        for (index, step) in spec.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(step = %step.name, "cancelled, skipping remaining steps");
                builder.record(StepExecutionResult::skipped(&step.name));
                continue;
            }
            if halt_on_failure && builder.has_failure() {
                builder.record(StepExecutionResult::skipped(&step.name));
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                builder.record(StepExecutionResult::skipped(&step.name));
                continue;
            }

            let bound = substitute_step(step, &resolved);
            let preferred = spec.preferred_for(step);
            self.sink.emit(&ExecutionEvent::StepStarted {
                index,
                name: bound.name.clone(),
                path: preferred,
            });

            let run = self.executor.execute(
                &session,
                index,
                &bound,
                preferred,
                &spec.url,
                browser,
                self.sink.as_ref(),
            );
            // The run budget overrides the step budget when less remains;
            // cancellation interrupts the step at its next suspension point.
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(step = %bound.name, "cancelled mid-step");
                    StepExecutionResult::skipped(&bound.name)
                }
                outcome = tokio::time::timeout(remaining, run) => match outcome {
                    Ok(result) => result,
                    Err(_) => StepExecutionResult {
                        step_name: bound.name.clone(),
                        path_used: preferred,
                        fallback_occurred: false,
                        success: false,
                        error: Some(format!(
                            "run timed out after {}ms",
                            self.config.execution.run_timeout_ms
                        )),
                        recovery: RecoveryStatus::NotAttempted,
                        duration_ms: remaining.as_millis() as u64,
                        screenshot: None,
                        timestamp: Utc::now(),
                    },
                },
            };

            self.sink.emit(&ExecutionEvent::StepCompleted {
                index,
                result: result.clone(),
            });
            builder.record(result);
        }

        let total_duration_ms = started.elapsed().as_millis() as u64;
        let mut suggestions = self.recovery.recommendations();
        for derived in reporter::recommend_steps(builder.steps(), total_duration_ms) {
            if !suggestions.contains(&derived) {
                suggestions.push(derived);
            }
        }
        let report = builder.finish(total_duration_ms, suggestions);

        self.sink.emit(&ExecutionEvent::ExecutionCompleted {
            execution_id: report.execution_id,
            overall_success: report.overall_success,
            total_duration_ms,
        });
        Ok(report)
    }
}
