//! AI-assisted solution synthesis.
//!
//! Invoked only once built-in strategies are exhausted and the escalation
//! score clears the threshold. The reasoning collaborator's reply is strictly
//! validated into a [`Solution`] or rejected outright; ill-formed output is
//! never partially trusted.

use crate::categorize::Categorized;
use crate::config::{RecoveryConfig, SynthesisConfig};
use crate::library::{Fingerprint, RiskLevel, Solution};
use crate::reasoner::{extract_json, Reasoner, ReasonerError};
use crate::recovery::RecoveryContext;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_common::category::ErrorCategory;
use tandem_common::protocol::Primitive;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub reasoning: String,
    pub confidence: f64,
}

/// How much a category, on its own, argues for escalation.
fn severity(category: ErrorCategory) -> f64 {
    match category {
        ErrorCategory::Unknown => 0.7,
        ErrorCategory::JavascriptError => 0.6,
        ErrorCategory::ElementNotFound | ErrorCategory::InteractionBlocked => 0.5,
        ErrorCategory::NavigationFailed => 0.45,
        ErrorCategory::NetworkError => 0.4,
        ErrorCategory::Timeout => 0.3,
        ErrorCategory::ValidationError => 0.2,
    }
}

/// Small scoring function over category severity, retry count and
/// repeat-failure-in-session. Escalates above the threshold or at the retry
/// ceiling.
pub fn should_escalate(
    categorized: &Categorized,
    retry_count: u32,
    repeats_in_session: u32,
    config: &RecoveryConfig,
) -> EscalationDecision {
    let score = severity(categorized.category) * 0.5
        + (retry_count.min(5) as f64) * 0.1
        + (repeats_in_session.min(5) as f64) * 0.08;

    if retry_count >= config.retry_ceiling {
        return EscalationDecision {
            escalate: true,
            reasoning: format!("retry ceiling {} reached", config.retry_ceiling),
            confidence: 0.9,
        };
    }

    EscalationDecision {
        escalate: score >= config.escalation_threshold,
        reasoning: format!(
            "category {} (severity {:.2}), {} retries, {} repeats this session -> score {:.2}",
            categorized.category,
            severity(categorized.category),
            retry_count,
            repeats_in_session,
            score
        ),
        confidence: score.min(1.0),
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("AI synthesis is disabled")]
    Disabled,
    #[error("Synthesis rate limit exceeded for this session")]
    RateLimited,
    #[error("Reasoner error: {0}")]
    Reasoner(#[from] ReasonerError),
    #[error("Malformed solution response: {0}")]
    MalformedResponse(String),
}

/// Sliding one-minute window, independent of the timeout machinery. Bounds
/// reasoning-engine cost per session.
pub struct RateLimiter {
    max_per_minute: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut window = self.window.lock();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.max_per_minute {
            return false;
        }
        window.push_back(now);
        true
    }
}

/// The exact shape the reasoning engine is asked to reply with.
#[derive(Deserialize)]
struct RawSolutionReply {
    strategy: String,
    code: Vec<Primitive>,
    confidence: f64,
    risk: String,
    explanation: String,
    estimated_success_rate: Option<f64>,
}

pub struct Synthesizer {
    reasoner: Arc<dyn Reasoner>,
    limiter: RateLimiter,
    config: SynthesisConfig,
}

impl Synthesizer {
    pub fn new(reasoner: Arc<dyn Reasoner>, config: SynthesisConfig) -> Self {
        Self {
            reasoner,
            limiter: RateLimiter::new(config.requests_per_minute),
            config,
        }
    }

    /// Ask the reasoning collaborator for a candidate fix and validate it
    /// strictly. The returned solution is unvalidated in the behavioral
    /// sense: the sandbox still vets and supervises its execution.
    pub async fn synthesize(
        &self,
        error: &str,
        categorized: &Categorized,
        ctx: &RecoveryContext,
    ) -> Result<Solution, SynthesisError> {
        if !self.config.enabled {
            return Err(SynthesisError::Disabled);
        }
        if !self.limiter.try_acquire() {
            return Err(SynthesisError::RateLimited);
        }

        let prompt = self.build_prompt(error, categorized, ctx);
        let raw = self.reasoner.reason(&prompt, &ctx.page).await?;
        self.validate(&raw, categorized, ctx)
    }

    fn build_prompt(&self, error: &str, categorized: &Categorized, ctx: &RecoveryContext) -> String {
        let allowed: Vec<&str> = self
            .config
            .allowed_primitives
            .iter()
            .map(|k| k.name())
            .collect();
        format!(
            "A browser automation step failed and mechanical recovery is exhausted.\n\
             Step: {step}\n\
             Instruction: {instruction}\n\
             Error ({category}): {error}\n\
             Page: {title} ({url})\n\n\
             Propose a fix as JSON with exactly these fields:\n\
             {{\"strategy\": string, \"code\": [primitive...], \"confidence\": 0..1, \
             \"risk\": \"low\"|\"medium\"|\"high\", \"explanation\": string, \
             \"estimated_success_rate\": 0..1}}\n\
             Each primitive is {{\"action\": one of [{allowed}], ...}} with locators as \
             {{\"by\": \"css\"|\"text\"|\"role\"|\"path\", \"value\": string}}.\n\
             Reply with JSON only.",
            step = ctx.step_name,
            instruction = ctx.instruction,
            category = categorized.category,
            error = error,
            title = ctx.page.page_title,
            url = ctx.page.url,
            allowed = allowed.join(", "),
        )
    }

    /// Required fields present, confidence in range, recognized risk level,
    /// non-empty code. Anything else is a typed parse error.
    fn validate(
        &self,
        raw: &str,
        categorized: &Categorized,
        ctx: &RecoveryContext,
    ) -> Result<Solution, SynthesisError> {
        let reply: RawSolutionReply = serde_json::from_str(extract_json(raw))
            .map_err(|e| SynthesisError::MalformedResponse(e.to_string()))?;

        if !(0.0..=1.0).contains(&reply.confidence) {
            return Err(SynthesisError::MalformedResponse(format!(
                "confidence {} outside [0, 1]",
                reply.confidence
            )));
        }
        let risk = RiskLevel::parse(&reply.risk).ok_or_else(|| {
            SynthesisError::MalformedResponse(format!("unrecognized risk level '{}'", reply.risk))
        })?;
        if reply.code.is_empty() {
            return Err(SynthesisError::MalformedResponse(
                "solution code is empty".to_string(),
            ));
        }
        let estimated = reply.estimated_success_rate.unwrap_or(reply.confidence);
        if !(0.0..=1.0).contains(&estimated) {
            return Err(SynthesisError::MalformedResponse(format!(
                "estimated_success_rate {} outside [0, 1]",
                estimated
            )));
        }

        let selector = ctx
            .failed_primitive
            .as_ref()
            .and_then(|p| p.locator())
            .map(|l| l.value().to_string());

        Ok(Solution {
            id: Uuid::new_v4(),
            fingerprint: Fingerprint::new(categorized.category, selector.as_deref(), &ctx.url),
            strategy: reply.strategy,
            code: reply.code,
            confidence: reply.confidence,
            estimated_success_rate: estimated,
            risk,
            explanation: reply.explanation,
            created_at: Utc::now(),
        })
    }
}
