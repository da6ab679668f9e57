use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy shared by the categorizer, the solution library and the
/// built-in recovery strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    ElementNotFound,
    NetworkError,
    InteractionBlocked,
    NavigationFailed,
    JavascriptError,
    ValidationError,
    Unknown,
}

impl ErrorCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ElementNotFound => "element_not_found",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::InteractionBlocked => "interaction_blocked",
            ErrorCategory::NavigationFailed => "navigation_failed",
            ErrorCategory::JavascriptError => "javascript_error",
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
