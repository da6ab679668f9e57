//! Hybrid error recovery: the state machine run for every step failure.
//!
//! Categorize -> library lookup -> built-in strategies -> escalation decision
//! -> AI synthesis -> sandboxed execution -> outcome recording. Terminal
//! states are `Recovered` (with its source) or `Exhausted`.

use crate::browser::Browser;
use crate::categorize::{categorize, categorize_error, is_known_issue, Categorized};
use crate::config::RecoveryConfig;
use crate::library::{Fingerprint, SolutionLibrary};
use crate::sandbox::Sandbox;
use crate::strategies::{BuiltinOutcome, BuiltinStrategies, StrategyKind};
use crate::synthesize::{should_escalate, Synthesizer};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tandem_common::category::ErrorCategory;
use tandem_common::protocol::{BrowserError, PageContext, Primitive};
use tracing::{info, warn};

/// Everything a recovery attempt may need to know about the failure site.
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub session: String,
    pub step_name: String,
    pub instruction: String,
    /// The intent's target URL, used for re-navigation and fingerprints.
    pub url: String,
    pub page: PageContext,
    /// The primitive that failed, when the failure came from the
    /// deterministic path. Semantic failures have none.
    pub failed_primitive: Option<Primitive>,
    /// Visible-text guess for alternate-locator recovery.
    pub target_hint: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoverySource {
    Library,
    Builtin(StrategyKind),
    Synthesized,
}

impl fmt::Display for RecoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoverySource::Library => f.write_str("library"),
            RecoverySource::Builtin(s) => write!(f, "builtin:{}", s),
            RecoverySource::Synthesized => f.write_str("synthesized"),
        }
    }
}

#[derive(Debug)]
pub enum RecoveryOutcome {
    Recovered { source: RecoverySource },
    Exhausted { attempted: Vec<String> },
}

#[derive(Default)]
pub struct SessionStats {
    attempts: AtomicU32,
    library_recoveries: AtomicU32,
    builtin_recoveries: AtomicU32,
    ai_recoveries: AtomicU32,
    exhausted: AtomicU32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatsSnapshot {
    pub attempts: u32,
    pub library_recoveries: u32,
    pub builtin_recoveries: u32,
    pub ai_recoveries: u32,
    pub exhausted: u32,
}

impl SessionStats {
    fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            library_recoveries: self.library_recoveries.load(Ordering::Relaxed),
            builtin_recoveries: self.builtin_recoveries.load(Ordering::Relaxed),
            ai_recoveries: self.ai_recoveries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// How many top-ranked library hits to try before moving on.
const LIBRARY_TRIES: usize = 2;

pub struct HybridRecovery {
    library: Arc<SolutionLibrary>,
    builtins: BuiltinStrategies,
    synthesizer: Option<Synthesizer>,
    sandbox: Sandbox,
    config: RecoveryConfig,
    stats: SessionStats,
    // (category, step) -> failures seen this session, feeds escalation.
    repeats: Mutex<HashMap<(ErrorCategory, String), u32>>,
}

impl HybridRecovery {
    pub fn new(
        library: Arc<SolutionLibrary>,
        builtins: BuiltinStrategies,
        synthesizer: Option<Synthesizer>,
        sandbox: Sandbox,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            library,
            builtins,
            synthesizer,
            sandbox,
            config,
            stats: SessionStats::default(),
            repeats: Mutex::new(HashMap::new()),
        }
    }

    pub fn statistics(&self) -> SessionStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn recommendations(&self) -> Vec<String> {
        let stats = self.stats.snapshot();
        let mut out = Vec::new();
        let recovered =
            stats.library_recoveries + stats.builtin_recoveries + stats.ai_recoveries;
        if stats.exhausted > 0 && stats.exhausted >= recovered {
            out.push(
                "Most recovery attempts exhausted; re-record the failing snippets against the current page"
                    .to_string(),
            );
        }
        if stats.ai_recoveries > 0 {
            out.push(format!(
                "{} fixes came from AI synthesis; review the solution library and promote stable ones into snippets",
                stats.ai_recoveries
            ));
        }
        out
    }

    /// Run the full recovery state machine for one failure. Always terminates
    /// in `Recovered` or `Exhausted`; never raises.
    pub async fn recover<B: Browser + ?Sized>(
        &self,
        error_text: &str,
        typed: Option<&BrowserError>,
        ctx: &RecoveryContext,
        browser: &mut B,
    ) -> RecoveryOutcome {
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        // Categorize
        let categorized = match typed {
            Some(err) => categorize_error(err),
            None => categorize(error_text),
        };
        let repeats = self.bump_repeats(categorized.category, &ctx.step_name);
        info!(
            step = %ctx.step_name,
            category = %categorized.category,
            confidence = categorized.confidence,
            repeats,
            "recovery: categorized failure"
        );

        let mut attempted = Vec::new();

        // Site-level obstructions (captchas, rate limits, consent walls)
        // have no mechanical remedy; skip straight to the escalation gate.
        let known_issue = is_known_issue(error_text);
        if known_issue {
            info!(step = %ctx.step_name, "recovery: known site-level issue");
        }

        if !known_issue {
            // Library lookup
            if let Some(source) = self
                .try_library(&categorized, ctx, browser, &mut attempted)
                .await
            {
                self.stats.library_recoveries.fetch_add(1, Ordering::Relaxed);
                info!(step = %ctx.step_name, source = %source, elapsed_ms = started.elapsed().as_millis() as u64, "recovery: recovered");
                return RecoveryOutcome::Recovered { source };
            }

            // Built-in strategies
            match self.builtins.attempt(&categorized, ctx, browser).await {
                BuiltinOutcome::Recovered { strategy } => {
                    self.stats.builtin_recoveries.fetch_add(1, Ordering::Relaxed);
                    info!(step = %ctx.step_name, strategy = %strategy, elapsed_ms = started.elapsed().as_millis() as u64, "recovery: recovered");
                    return RecoveryOutcome::Recovered {
                        source: RecoverySource::Builtin(strategy),
                    };
                }
                BuiltinOutcome::NotApplicable => {}
                BuiltinOutcome::Exhausted {
                    attempted: builtin_attempts,
                } => attempted.extend(builtin_attempts),
            }
        }

        // Escalation decision
        let decision = should_escalate(&categorized, ctx.retry_count, repeats, &self.config);
        info!(
            step = %ctx.step_name,
            escalate = decision.escalate,
            reasoning = %decision.reasoning,
            "recovery: escalation decision"
        );
        if decision.escalate {
            if let Some(source) = self
                .try_synthesis(error_text, &categorized, ctx, browser, &mut attempted)
                .await
            {
                self.stats.ai_recoveries.fetch_add(1, Ordering::Relaxed);
                info!(step = %ctx.step_name, source = %source, elapsed_ms = started.elapsed().as_millis() as u64, "recovery: recovered");
                return RecoveryOutcome::Recovered { source };
            }
        }

        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        info!(
            step = %ctx.step_name,
            attempted = attempted.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recovery: exhausted"
        );
        RecoveryOutcome::Exhausted { attempted }
    }

    fn bump_repeats(&self, category: ErrorCategory, step: &str) -> u32 {
        let mut repeats = self.repeats.lock();
        let count = repeats
            .entry((category, step.to_string()))
            .and_modify(|c| *c += 1)
            .or_insert(1);
        *count - 1
    }

    fn fingerprint(&self, categorized: &Categorized, ctx: &RecoveryContext) -> Fingerprint {
        let selector = ctx
            .failed_primitive
            .as_ref()
            .and_then(|p| p.locator())
            .map(|l| l.value().to_string());
        Fingerprint::new(categorized.category, selector.as_deref(), &ctx.url)
    }

    async fn try_library<B: Browser + ?Sized>(
        &self,
        categorized: &Categorized,
        ctx: &RecoveryContext,
        browser: &mut B,
        attempted: &mut Vec<String>,
    ) -> Option<RecoverySource> {
        let fingerprint = self.fingerprint(categorized, ctx);
        let hits = self.library.find(&fingerprint);
        for hit in hits.into_iter().take(LIBRARY_TRIES) {
            let strategy = format!("library:{}", hit.solution.strategy);
            let result = self
                .sandbox
                .execute(&ctx.session, &strategy, &hit.solution.code, browser)
                .await;
            let success = result.is_ok();
            self.library.record_outcome(hit.solution.id, success).await;
            if success {
                return Some(RecoverySource::Library);
            }
            attempted.push(strategy);
        }
        None
    }

    async fn try_synthesis<B: Browser + ?Sized>(
        &self,
        error_text: &str,
        categorized: &Categorized,
        ctx: &RecoveryContext,
        browser: &mut B,
        attempted: &mut Vec<String>,
    ) -> Option<RecoverySource> {
        let synthesizer = self.synthesizer.as_ref()?;
        let solution = match synthesizer.synthesize(error_text, categorized, ctx).await {
            Ok(solution) => solution,
            Err(e) => {
                warn!(step = %ctx.step_name, error = %e, "recovery: synthesis failed");
                attempted.push(format!("synthesis:{}", e));
                return None;
            }
        };

        if let Err(e) = self.sandbox.vet(&solution.code) {
            warn!(step = %ctx.step_name, error = %e, "recovery: synthesized solution rejected by sandbox");
            attempted.push(format!("sandbox:{}", e));
            return None;
        }

        let strategy = format!("synthesized:{}", solution.strategy);
        let id = solution.id;
        // Store before execution so the outcome, either way, is remembered.
        if let Err(e) = self.library.store(solution.clone()).await {
            warn!(error = %e, "recovery: failed to persist synthesized solution");
        }

        let result = self
            .sandbox
            .execute(&ctx.session, &strategy, &solution.code, browser)
            .await;
        let success = result.is_ok();
        self.library.record_outcome(id, success).await;

        if success {
            Some(RecoverySource::Synthesized)
        } else {
            attempted.push(strategy);
            None
        }
    }
}
