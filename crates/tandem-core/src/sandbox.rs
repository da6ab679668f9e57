//! Sandboxed execution of solution code.
//!
//! Synthesized and library solutions only ever execute as allow-listed
//! primitives, and every execution is audit-logged whether it succeeds or
//! not.

use crate::browser::{execute_primitive, Browser};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tandem_common::protocol::{BrowserError, Primitive, PrimitiveKind};
use thiserror::Error;
use tracing::info;

const AUDIT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub session: String,
    pub strategy: String,
    pub primitive_count: usize,
    pub outcome: String,
}

/// Bounded in-memory audit trail, shared across concurrent runs.
#[derive(Default)]
pub struct AuditLog {
    records: Mutex<VecDeque<AuditRecord>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: AuditRecord) {
        info!(
            session = %record.session,
            strategy = %record.strategy,
            primitives = record.primitive_count,
            outcome = %record.outcome,
            "sandbox execution"
        );
        let mut records = self.records.lock();
        records.push_back(record);
        while records.len() > AUDIT_CAPACITY {
            records.pop_front();
        }
    }

    pub fn recent(&self, n: usize) -> Vec<AuditRecord> {
        let records = self.records.lock();
        records.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Solution code is empty")]
    EmptyCode,
    #[error("Primitive '{0}' is not on the sandbox allow-list")]
    DisallowedPrimitive(PrimitiveKind),
    #[error("Sandboxed primitive failed: {0}")]
    Browser(#[from] BrowserError),
}

pub struct Sandbox {
    allowed: HashSet<PrimitiveKind>,
    audit: Arc<AuditLog>,
    action_timeout_ms: u64,
}

impl Sandbox {
    pub fn new(
        allowed: impl IntoIterator<Item = PrimitiveKind>,
        audit: Arc<AuditLog>,
        action_timeout_ms: u64,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            audit,
            action_timeout_ms,
        }
    }

    /// Static check before anything touches the browser. Enforced again at
    /// execution time because configuration can narrow the allow-list after
    /// a solution was stored.
    pub fn vet(&self, code: &[Primitive]) -> Result<(), SandboxError> {
        if code.is_empty() {
            return Err(SandboxError::EmptyCode);
        }
        for primitive in code {
            if !self.allowed.contains(&primitive.kind()) {
                return Err(SandboxError::DisallowedPrimitive(primitive.kind()));
            }
        }
        Ok(())
    }

    /// Vet and run solution code. The audit record is written
    /// unconditionally: who (session), when, what, and how it ended.
    pub async fn execute<B: Browser + ?Sized>(
        &self,
        session: &str,
        strategy: &str,
        code: &[Primitive],
        browser: &mut B,
    ) -> Result<(), SandboxError> {
        let result = self.run(code, browser).await;
        self.audit.record(AuditRecord {
            timestamp: Utc::now(),
            session: session.to_string(),
            strategy: strategy.to_string(),
            primitive_count: code.len(),
            outcome: match &result {
                Ok(()) => "success".to_string(),
                Err(e) => format!("failed: {}", e),
            },
        });
        result
    }

    async fn run<B: Browser + ?Sized>(
        &self,
        code: &[Primitive],
        browser: &mut B,
    ) -> Result<(), SandboxError> {
        self.vet(code)?;
        for primitive in code {
            execute_primitive(browser, primitive, self.action_timeout_ms).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tandem_common::protocol::{Locator, PageContext};

    struct YesBrowser;

    #[async_trait]
    impl Browser for YesBrowser {
        async fn goto(&mut self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn click(&mut self, _locator: &Locator) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn fill(&mut self, _locator: &Locator, _value: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn select(&mut self, _locator: &Locator, _value: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn wait_for(
            &mut self,
            _locator: &Locator,
            _timeout_ms: u64,
        ) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn press(&mut self, _key: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn page_context(&mut self) -> Result<PageContext, BrowserError> {
            Ok(PageContext::default())
        }
    }

    fn sandbox() -> (Sandbox, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::new());
        let sandbox = Sandbox::new(
            [PrimitiveKind::Click, PrimitiveKind::Press],
            Arc::clone(&audit),
            500,
        );
        (sandbox, audit)
    }

    #[test]
    fn test_vet_rejects_empty_and_disallowed() {
        let (sandbox, _) = sandbox();
        assert!(matches!(sandbox.vet(&[]), Err(SandboxError::EmptyCode)));
        let navigate = vec![Primitive::Goto {
            url: "https://example.com".into(),
        }];
        assert!(matches!(
            sandbox.vet(&navigate),
            Err(SandboxError::DisallowedPrimitive(PrimitiveKind::Goto))
        ));
    }

    #[tokio::test]
    async fn test_execution_is_audited_either_way() {
        let (sandbox, audit) = sandbox();
        let click = vec![Primitive::Click {
            locator: Locator::Text("OK".into()),
        }];
        sandbox
            .execute("s1", "library:click_by_text", &click, &mut YesBrowser)
            .await
            .unwrap();

        let navigate = vec![Primitive::Goto {
            url: "https://example.com".into(),
        }];
        let denied = sandbox
            .execute("s1", "synthesized:navigate", &navigate, &mut YesBrowser)
            .await;
        assert!(denied.is_err());

        let records = audit.recent(10);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].outcome, "success");
        assert!(records[0].outcome.starts_with("failed"));
    }
}
