//! Contract with the browser automation collaborator.

use async_trait::async_trait;
use tandem_common::protocol::{BrowserError, Locator, PageContext, Primitive};

/// The primitive surface every browser collaborator must implement. Tandem
/// never drives a browser directly; everything funnels through this trait.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;

    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError>;

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), BrowserError>;

    async fn select(&mut self, locator: &Locator, value: &str) -> Result<(), BrowserError>;

    async fn wait_for(&mut self, locator: &Locator, timeout_ms: u64) -> Result<(), BrowserError>;

    async fn press(&mut self, key: &str) -> Result<(), BrowserError>;

    /// Current page state for the reasoning engine.
    async fn page_context(&mut self) -> Result<PageContext, BrowserError>;

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        Err(BrowserError::NotSupported("screenshot".into()))
    }
}

/// Dispatch one primitive, bounding it with the short per-action timeout.
/// Exceeding the timeout yields a timeout-category failure instead of hanging.
pub async fn execute_primitive<B: Browser + ?Sized>(
    browser: &mut B,
    primitive: &Primitive,
    action_timeout_ms: u64,
) -> Result<(), BrowserError> {
    // A wait primitive carries its own deadline; give it that plus the
    // ordinary action budget before declaring a timeout.
    let budget_ms = match primitive {
        Primitive::WaitFor { timeout_ms, .. } => timeout_ms.saturating_add(action_timeout_ms),
        _ => action_timeout_ms,
    };

    let action = async {
        match primitive {
            Primitive::Goto { url } => browser.goto(url).await,
            Primitive::Click { locator } => browser.click(locator).await,
            Primitive::Fill { locator, value } => browser.fill(locator, value).await,
            Primitive::Select { locator, value } => browser.select(locator, value).await,
            Primitive::WaitFor {
                locator,
                timeout_ms,
            } => browser.wait_for(locator, *timeout_ms).await,
            Primitive::Press { key } => browser.press(key).await,
            Primitive::Screenshot => browser.screenshot().await.map(|_| ()),
        }
    };

    match tokio::time::timeout(std::time::Duration::from_millis(budget_ms), action).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Timeout {
            operation: primitive.kind().name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Every operation either returns immediately or stalls for an hour.
    struct TestBrowser {
        stall: bool,
    }

    impl TestBrowser {
        async fn respond(&self) -> Result<(), BrowserError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Browser for TestBrowser {
        async fn goto(&mut self, _url: &str) -> Result<(), BrowserError> {
            self.respond().await
        }
        async fn click(&mut self, _locator: &Locator) -> Result<(), BrowserError> {
            self.respond().await
        }
        async fn fill(&mut self, _locator: &Locator, _value: &str) -> Result<(), BrowserError> {
            self.respond().await
        }
        async fn select(&mut self, _locator: &Locator, _value: &str) -> Result<(), BrowserError> {
            self.respond().await
        }
        async fn wait_for(
            &mut self,
            _locator: &Locator,
            _timeout_ms: u64,
        ) -> Result<(), BrowserError> {
            self.respond().await
        }
        async fn press(&mut self, _key: &str) -> Result<(), BrowserError> {
            self.respond().await
        }
        async fn page_context(&mut self) -> Result<PageContext, BrowserError> {
            Ok(PageContext::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_action_yields_timeout_error() {
        let mut browser = TestBrowser { stall: true };
        let click = Primitive::Click {
            locator: Locator::Css("#go".into()),
        };
        let result = execute_primitive(&mut browser, &click, 100).await;
        assert!(matches!(result, Err(BrowserError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_wait_for_budget_with_huge_timeout_does_not_overflow() {
        let mut browser = TestBrowser { stall: false };
        let wait = Primitive::WaitFor {
            locator: Locator::Css("#go".into()),
            timeout_ms: u64::MAX,
        };
        assert!(execute_primitive(&mut browser, &wait, 2_000).await.is_ok());
    }
}
