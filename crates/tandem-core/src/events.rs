//! Execution lifecycle events.
//!
//! The orchestrator emits these as the run progresses so shells can stream
//! progress without waiting for the final report.

use tandem_common::report::StepExecutionResult;
use tandem_common::spec::ExecutionPath;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: Uuid,
        spec_name: String,
        total_steps: usize,
    },
    StepStarted {
        index: usize,
        name: String,
        path: ExecutionPath,
    },
    FallbackStarted {
        index: usize,
        name: String,
        to: ExecutionPath,
    },
    FallbackCompleted {
        index: usize,
        name: String,
        success: bool,
    },
    StepCompleted {
        index: usize,
        result: StepExecutionResult,
    },
    ExecutionCompleted {
        execution_id: Uuid,
        overall_success: bool,
        total_duration_ms: u64,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ExecutionEvent);
}

/// Discards everything. Useful for tests and embedding.
#[derive(Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &ExecutionEvent) {}
}

/// Forwards events to the tracing subscriber.
#[derive(Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::ExecutionStarted {
                execution_id,
                spec_name,
                total_steps,
            } => info!(%execution_id, spec = %spec_name, steps = total_steps, "execution started"),
            ExecutionEvent::StepStarted { index, name, path } => {
                info!(index, step = %name, path = %path, "step started")
            }
            ExecutionEvent::FallbackStarted { index, name, to } => {
                info!(index, step = %name, to = %to, "falling back to alternate path")
            }
            ExecutionEvent::FallbackCompleted {
                index,
                name,
                success,
            } => {
                info!(index, step = %name, success, "fallback path finished")
            }
            ExecutionEvent::StepCompleted { index, result } => info!(
                index,
                step = %result.step_name,
                success = result.success,
                path = %result.path_used,
                fallback = result.fallback_occurred,
                recovery = %result.recovery,
                duration_ms = result.duration_ms,
                "step completed"
            ),
            ExecutionEvent::ExecutionCompleted {
                execution_id,
                overall_success,
                total_duration_ms,
            } => info!(
                %execution_id,
                success = overall_success,
                duration_ms = total_duration_ms,
                "execution completed"
            ),
        }
    }
}
