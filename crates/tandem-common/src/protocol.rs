//! Wire-level contract with the browser automation collaborator.
//!
//! Everything the decision layer is allowed to ask of a browser is expressed
//! as a [`Primitive`]. Snippets recorded by the recording tool, plans returned
//! by the reasoning engine, and AI-synthesized solutions all share this shape,
//! which is what makes sandbox allow-listing possible.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Locator families, in the priority order recovery tries them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "by", content = "value")]
pub enum Locator {
    /// CSS selector.
    Css(String),
    /// Visible text match.
    Text(String),
    /// ARIA role.
    Role(String),
    /// Structural path (e.g. "form>div:nth-child(2)>input").
    Path(String),
}

impl Locator {
    pub fn value(&self) -> &str {
        match self {
            Locator::Css(v) | Locator::Text(v) | Locator::Role(v) | Locator::Path(v) => v,
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            Locator::Css(_) => "css",
            Locator::Text(_) => "text",
            Locator::Role(_) => "role",
            Locator::Path(_) => "path",
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.family(), self.value())
    }
}

/// The allow-listable browser action set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum Primitive {
    Goto { url: String },
    Click { locator: Locator },
    Fill { locator: Locator, value: String },
    Select { locator: Locator, value: String },
    WaitFor { locator: Locator, timeout_ms: u64 },
    Press { key: String },
    Screenshot,
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Goto { .. } => PrimitiveKind::Goto,
            Primitive::Click { .. } => PrimitiveKind::Click,
            Primitive::Fill { .. } => PrimitiveKind::Fill,
            Primitive::Select { .. } => PrimitiveKind::Select,
            Primitive::WaitFor { .. } => PrimitiveKind::WaitFor,
            Primitive::Press { .. } => PrimitiveKind::Press,
            Primitive::Screenshot => PrimitiveKind::Screenshot,
        }
    }

    pub fn locator(&self) -> Option<&Locator> {
        match self {
            Primitive::Click { locator }
            | Primitive::Fill { locator, .. }
            | Primitive::Select { locator, .. }
            | Primitive::WaitFor { locator, .. } => Some(locator),
            _ => None,
        }
    }

    /// Rebuild this primitive against a different locator. Primitives without
    /// a target are returned unchanged.
    pub fn with_locator(&self, locator: Locator) -> Primitive {
        match self {
            Primitive::Click { .. } => Primitive::Click { locator },
            Primitive::Fill { value, .. } => Primitive::Fill {
                locator,
                value: value.clone(),
            },
            Primitive::Select { value, .. } => Primitive::Select {
                locator,
                value: value.clone(),
            },
            Primitive::WaitFor { timeout_ms, .. } => Primitive::WaitFor {
                locator,
                timeout_ms: *timeout_ms,
            },
            other => other.clone(),
        }
    }
}

/// Discriminant used for sandbox allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Goto,
    Click,
    Fill,
    Select,
    WaitFor,
    Press,
    Screenshot,
}

impl PrimitiveKind {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::Goto => "goto",
            PrimitiveKind::Click => "click",
            PrimitiveKind::Fill => "fill",
            PrimitiveKind::Select => "select",
            PrimitiveKind::WaitFor => "wait_for",
            PrimitiveKind::Press => "press",
            PrimitiveKind::Screenshot => "screenshot",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed failures raised by the browser collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrowserError {
    #[error("Timeout during {operation}")]
    Timeout { operation: String },

    #[error("Element not found: {locator}")]
    ElementNotFound { locator: String },

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Interaction blocked: {reason}")]
    InteractionBlocked { reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("{0}")]
    Other(String),
}

impl BrowserError {
    /// Stable error code for logging and categorization.
    pub fn code(&self) -> &'static str {
        match self {
            BrowserError::Timeout { .. } => "TIMEOUT",
            BrowserError::ElementNotFound { .. } => "ELEMENT_NOT_FOUND",
            BrowserError::NavigationFailed(_) => "NAVIGATION_FAILED",
            BrowserError::InteractionBlocked { .. } => "INTERACTION_BLOCKED",
            BrowserError::Network(_) => "NETWORK_ERROR",
            BrowserError::Script(_) => "SCRIPT_ERROR",
            BrowserError::NotSupported(_) => "NOT_SUPPORTED",
            BrowserError::Other(_) => "OTHER",
        }
    }
}

/// Live page state handed to the reasoning engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContext {
    pub page_title: String,
    pub url: String,
    pub dom_summary: String,
}
