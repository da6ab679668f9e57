//! Built-in recovery strategies: deterministic, mechanical recipes tried
//! before any reasoning-engine escalation.

use crate::browser::{execute_primitive, Browser};
use crate::categorize::Categorized;
use crate::recovery::RecoveryContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tandem_common::category::ErrorCategory;
use tandem_common::protocol::{Locator, Primitive, PrimitiveKind};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ExtendWait,
    AlternateLocator,
    OverlayClearance,
    RetryNavigation,
    BackoffRetry,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::ExtendWait => "extend_wait",
            StrategyKind::AlternateLocator => "alternate_locator",
            StrategyKind::OverlayClearance => "overlay_clearance",
            StrategyKind::RetryNavigation => "retry_navigation",
            StrategyKind::BackoffRetry => "backoff_retry",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered recipes per category. Categories without mechanical remedies map
/// to nothing and go straight to escalation.
pub fn strategies_for(category: ErrorCategory) -> Vec<StrategyKind> {
    match category {
        ErrorCategory::Timeout => vec![StrategyKind::ExtendWait],
        ErrorCategory::ElementNotFound => vec![StrategyKind::AlternateLocator],
        ErrorCategory::InteractionBlocked => vec![StrategyKind::OverlayClearance],
        ErrorCategory::NavigationFailed => vec![StrategyKind::RetryNavigation],
        ErrorCategory::NetworkError => vec![StrategyKind::BackoffRetry],
        ErrorCategory::JavascriptError
        | ErrorCategory::ValidationError
        | ErrorCategory::Unknown => vec![],
    }
}

#[derive(Debug)]
pub enum BuiltinOutcome {
    Recovered { strategy: StrategyKind },
    NotApplicable,
    Exhausted { attempted: Vec<String> },
}

pub struct BuiltinStrategies {
    max_attempts: usize,
    action_timeout_ms: u64,
}

const OVERLAY_WAIT_MS: u64 = 500;
const BACKOFF_MS: u64 = 1000;
const PROBE_TIMEOUT_MS: u64 = 1000;

impl BuiltinStrategies {
    pub fn new(max_attempts: usize, action_timeout_ms: u64) -> Self {
        Self {
            max_attempts,
            action_timeout_ms,
        }
    }

    /// Run the category's strategies in order, up to the configured ceiling.
    /// First success short-circuits; exhaustion signals escalation.
    pub async fn attempt<B: Browser + ?Sized>(
        &self,
        categorized: &Categorized,
        ctx: &RecoveryContext,
        browser: &mut B,
    ) -> BuiltinOutcome {
        let mut attempted = Vec::new();

        for strategy in categorized.strategies.iter().take(self.max_attempts) {
            debug!(
                strategy = strategy.name(),
                category = %categorized.category,
                step = %ctx.step_name,
                "trying built-in recovery strategy"
            );
            match self.run(*strategy, ctx, browser).await {
                Ok(()) => return BuiltinOutcome::Recovered {
                    strategy: *strategy,
                },
                Err(reason) => {
                    debug!(strategy = strategy.name(), %reason, "strategy failed");
                    attempted.push(strategy.name().to_string());
                }
            }
        }

        if attempted.is_empty() {
            BuiltinOutcome::NotApplicable
        } else {
            BuiltinOutcome::Exhausted { attempted }
        }
    }

    async fn run<B: Browser + ?Sized>(
        &self,
        strategy: StrategyKind,
        ctx: &RecoveryContext,
        browser: &mut B,
    ) -> Result<(), String> {
        match strategy {
            StrategyKind::ExtendWait => self.extend_wait(ctx, browser).await,
            StrategyKind::AlternateLocator => self.alternate_locator(ctx, browser).await,
            StrategyKind::OverlayClearance => self.overlay_clearance(ctx, browser).await,
            StrategyKind::RetryNavigation => self.retry_navigation(ctx, browser).await,
            StrategyKind::BackoffRetry => self.backoff_retry(ctx, browser).await,
        }
    }

    /// Re-run the failed primitive once with a doubled time budget.
    async fn extend_wait<B: Browser + ?Sized>(
        &self,
        ctx: &RecoveryContext,
        browser: &mut B,
    ) -> Result<(), String> {
        let primitive = require_primitive(ctx)?;
        let extended = match primitive {
            Primitive::WaitFor {
                locator,
                timeout_ms,
            } => Primitive::WaitFor {
                locator: locator.clone(),
                timeout_ms: timeout_ms.saturating_mul(2),
            },
            other => other.clone(),
        };
        execute_primitive(browser, &extended, self.action_timeout_ms.saturating_mul(2))
            .await
            .map_err(|e| e.to_string())
    }

    /// Try alternate locator families in fixed priority: visible text, role,
    /// structural path. The first family that resolves is used to re-run the
    /// failed primitive.
    async fn alternate_locator<B: Browser + ?Sized>(
        &self,
        ctx: &RecoveryContext,
        browser: &mut B,
    ) -> Result<(), String> {
        let primitive = require_primitive(ctx)?;
        let original = primitive
            .locator()
            .ok_or_else(|| "failed primitive has no locator".to_string())?;

        let mut last_error = String::from("no alternate locator candidates");
        for candidate in alternate_candidates(original, primitive, ctx) {
            if browser
                .wait_for(&candidate, PROBE_TIMEOUT_MS)
                .await
                .is_err()
            {
                last_error = format!("candidate did not resolve: {}", candidate);
                continue;
            }
            match execute_primitive(
                browser,
                &primitive.with_locator(candidate.clone()),
                self.action_timeout_ms,
            )
            .await
            {
                Ok(()) => {
                    debug!(locator = %candidate, "alternate locator succeeded");
                    return Ok(());
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        Err(last_error)
    }

    /// Wait for whatever is covering the target to clear, then retry once.
    async fn overlay_clearance<B: Browser + ?Sized>(
        &self,
        ctx: &RecoveryContext,
        browser: &mut B,
    ) -> Result<(), String> {
        let primitive = require_primitive(ctx)?;
        tokio::time::sleep(Duration::from_millis(OVERLAY_WAIT_MS)).await;
        execute_primitive(browser, primitive, self.action_timeout_ms)
            .await
            .map_err(|e| e.to_string())
    }

    /// Navigate back to the intent's target URL, then replay the failed
    /// primitive when there is one.
    async fn retry_navigation<B: Browser + ?Sized>(
        &self,
        ctx: &RecoveryContext,
        browser: &mut B,
    ) -> Result<(), String> {
        browser.goto(&ctx.url).await.map_err(|e| e.to_string())?;
        if let Some(primitive) = &ctx.failed_primitive {
            execute_primitive(browser, primitive, self.action_timeout_ms)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Single delayed retry for transient network failures.
    async fn backoff_retry<B: Browser + ?Sized>(
        &self,
        ctx: &RecoveryContext,
        browser: &mut B,
    ) -> Result<(), String> {
        let primitive = require_primitive(ctx)?;
        tokio::time::sleep(Duration::from_millis(BACKOFF_MS)).await;
        execute_primitive(browser, primitive, self.action_timeout_ms)
            .await
            .map_err(|e| e.to_string())
    }
}

fn require_primitive(ctx: &RecoveryContext) -> Result<&Primitive, String> {
    ctx.failed_primitive
        .as_ref()
        .ok_or_else(|| "no failed primitive to retry".to_string())
}

/// Candidate locators in fixed family priority, skipping the family that
/// already failed.
fn alternate_candidates(
    original: &Locator,
    primitive: &Primitive,
    ctx: &RecoveryContext,
) -> Vec<Locator> {
    let hint = ctx
        .target_hint
        .clone()
        .unwrap_or_else(|| humanize(&ctx.step_name));

    let role = match primitive.kind() {
        PrimitiveKind::Click => "button",
        PrimitiveKind::Fill => "textbox",
        PrimitiveKind::Select => "combobox",
        _ => "generic",
    };

    [
        Locator::Text(hint),
        Locator::Role(role.to_string()),
        Locator::Path(original.value().to_string()),
    ]
    .into_iter()
    .filter(|candidate| candidate.family() != original.family())
    .collect()
}

/// "click_login_button" -> "click login button"
fn humanize(name: &str) -> String {
    name.replace(['_', '-'], " ")
}
