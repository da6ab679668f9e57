//! Error categorization: raw failure text to taxonomy category.
//!
//! Deterministic and table-driven. The pattern table is ordered; the first
//! matching rule wins. Nothing here consults the learned solution library.

use crate::strategies::{strategies_for, StrategyKind};
use once_cell::sync::Lazy;
use regex::Regex;
use tandem_common::category::ErrorCategory;
use tandem_common::protocol::BrowserError;

#[derive(Debug, Clone)]
pub struct Categorized {
    pub category: ErrorCategory,
    pub confidence: f64,
    pub strategies: Vec<StrategyKind>,
}

impl Categorized {
    fn new(category: ErrorCategory, confidence: f64) -> Self {
        Self {
            category,
            confidence,
            strategies: strategies_for(category),
        }
    }
}

struct Rule {
    pattern: Regex,
    category: ErrorCategory,
    confidence: f64,
}

macro_rules! rule {
    ($pattern:expr, $category:expr, $confidence:expr) => {
        Rule {
            pattern: Regex::new($pattern).expect("static pattern"),
            category: $category,
            confidence: $confidence,
        }
    };
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule!(
            r"(?i)timeout|timed out|deadline exceeded",
            ErrorCategory::Timeout,
            0.9
        ),
        rule!(
            r"(?i)element not found|no such element|could not (find|locate)|stale element",
            ErrorCategory::ElementNotFound,
            0.9
        ),
        rule!(
            r"(?i)net::|dns|connection (refused|reset|closed)|network error|fetch failed",
            ErrorCategory::NetworkError,
            0.85
        ),
        rule!(
            r"(?i)interaction blocked|not interactable|not clickable|intercepted|obscured|overlay",
            ErrorCategory::InteractionBlocked,
            0.85
        ),
        rule!(
            r"(?i)navigation failed|page load|err_aborted|about:blank",
            ErrorCategory::NavigationFailed,
            0.85
        ),
        rule!(
            r"(?i)javascript|script error|referenceerror|typeerror|syntaxerror",
            ErrorCategory::JavascriptError,
            0.8
        ),
        rule!(
            r"(?i)validation|invalid (parameter|argument)|malformed",
            ErrorCategory::ValidationError,
            0.75
        ),
    ]
});

/// Messages recognized as environmental, not bugs in the intent or the engine.
/// Static allow-list, independent of the learned solution library.
static KNOWN_ISSUES: &[&str] = &[
    "captcha",
    "rate limit",
    "too many requests",
    "cookie consent",
    "cloudflare",
    "session expired",
    "maintenance",
];

/// Categorize a raw failure message. No match falls through to `Unknown`
/// at confidence 0.3.
pub fn categorize(message: &str) -> Categorized {
    for rule in RULES.iter() {
        if rule.pattern.is_match(message) {
            return Categorized::new(rule.category, rule.confidence);
        }
    }
    Categorized::new(ErrorCategory::Unknown, 0.3)
}

/// Categorize a typed browser failure. Typed variants map directly; loosely
/// typed messages fall through to the pattern table.
pub fn categorize_error(error: &BrowserError) -> Categorized {
    let direct = match error {
        BrowserError::Timeout { .. } => Some(ErrorCategory::Timeout),
        BrowserError::ElementNotFound { .. } => Some(ErrorCategory::ElementNotFound),
        BrowserError::NavigationFailed(_) => Some(ErrorCategory::NavigationFailed),
        BrowserError::InteractionBlocked { .. } => Some(ErrorCategory::InteractionBlocked),
        BrowserError::Network(_) => Some(ErrorCategory::NetworkError),
        BrowserError::Script(_) => Some(ErrorCategory::JavascriptError),
        BrowserError::NotSupported(_) | BrowserError::Other(_) => None,
    };
    match direct {
        Some(category) => Categorized::new(category, 0.95),
        None => categorize(&error.to_string()),
    }
}

pub fn is_known_issue(message: &str) -> bool {
    let lower = message.to_lowercase();
    KNOWN_ISSUES.iter().any(|issue| lower.contains(issue))
}
