//! Contract with the semantic reasoning collaborator.

use async_trait::async_trait;
use serde::Deserialize;
use tandem_common::protocol::{PageContext, Primitive};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReasonerError {
    #[error("Reasoner did not respond within the timeout")]
    Timeout,
    #[error("Reasoner transport error: {0}")]
    Transport(String),
    #[error("Reasoner returned an empty response")]
    Empty,
}

/// Given an instruction and live page context, either perform the action or
/// describe it. Replies are raw text; callers parse them with the strictness
/// their use case demands.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, instruction: &str, context: &PageContext)
        -> Result<String, ReasonerError>;
}

/// What a semantic-path reply resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasonedAction {
    /// The collaborator carried out the action itself.
    Performed,
    /// The collaborator described a plan of primitives for us to run.
    Plan(Vec<Primitive>),
}

#[derive(Debug, Error)]
pub enum ReplyParseError {
    #[error("Reasoner reply is not valid JSON: {0}")]
    Json(String),
    #[error("Reasoner reply has neither 'performed' nor a 'plan'")]
    Unrecognized,
    #[error("Reasoner plan is empty")]
    EmptyPlan,
}

#[derive(Deserialize)]
struct RawReply {
    #[serde(default)]
    performed: bool,
    #[serde(default)]
    plan: Option<Vec<Primitive>>,
}

/// Strip optional markdown code fences around a JSON payload. Reasoning
/// engines routinely wrap structured replies this way.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Parse a semantic-path reply. Anything that is not a well-formed
/// performed/plan object is a typed parse error, never partially trusted.
pub fn parse_reply(raw: &str) -> Result<ReasonedAction, ReplyParseError> {
    let reply: RawReply = serde_json::from_str(extract_json(raw))
        .map_err(|e| ReplyParseError::Json(e.to_string()))?;
    if let Some(plan) = reply.plan {
        if plan.is_empty() {
            return Err(ReplyParseError::EmptyPlan);
        }
        return Ok(ReasonedAction::Plan(plan));
    }
    if reply.performed {
        return Ok(ReasonedAction::Performed);
    }
    Err(ReplyParseError::Unrecognized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_common::protocol::Locator;

    #[test]
    fn test_parse_performed() {
        let action = parse_reply(r#"{"performed": true}"#).unwrap();
        assert_eq!(action, ReasonedAction::Performed);
    }

    #[test]
    fn test_parse_plan() {
        let raw = r#"{"plan": [{"action": "click", "locator": {"by": "text", "value": "Login"}}]}"#;
        match parse_reply(raw).unwrap() {
            ReasonedAction::Plan(plan) => {
                assert_eq!(plan.len(), 1);
                assert_eq!(plan[0].locator(), Some(&Locator::Text("Login".into())));
            }
            other => panic!("Expected plan, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_fenced_reply() {
        let raw = "```json\n{\"performed\": true}\n```";
        assert_eq!(parse_reply(raw).unwrap(), ReasonedAction::Performed);
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(matches!(
            parse_reply("I clicked the button for you"),
            Err(ReplyParseError::Json(_))
        ));
    }

    #[test]
    fn test_parse_empty_plan_rejected() {
        assert!(matches!(
            parse_reply(r#"{"plan": []}"#),
            Err(ReplyParseError::EmptyPlan)
        ));
    }
}
