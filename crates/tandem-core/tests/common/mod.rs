//! Scripted collaborators shared by the integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tandem_common::protocol::{BrowserError, Locator, PageContext};
use tandem_core::reasoner::{Reasoner, ReasonerError};
use tandem_core::Browser;

/// In-memory browser. Operations succeed unless a failure is scripted for
/// their key (the URL for goto, the locator value for element operations).
pub struct MockBrowser {
    pub calls: Vec<String>,
    failures: HashMap<String, (BrowserError, u32)>,
    page: PageContext,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            failures: HashMap::new(),
            page: PageContext {
                page_title: "Example".to_string(),
                url: "https://example.com".to_string(),
                dom_summary: "<body>...</body>".to_string(),
            },
        }
    }

    pub fn fail_on(mut self, key: &str, error: BrowserError, times: u32) -> Self {
        self.failures.insert(key.to_string(), (error, times));
        self
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn attempt(&mut self, op: &str, key: &str) -> Result<(), BrowserError> {
        self.calls.push(format!("{} {}", op, key));
        if let Some((error, remaining)) = self.failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.attempt("goto", url)
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError> {
        self.attempt("click", locator.value())
    }

    async fn fill(&mut self, locator: &Locator, _value: &str) -> Result<(), BrowserError> {
        self.attempt("fill", locator.value())
    }

    async fn select(&mut self, locator: &Locator, _value: &str) -> Result<(), BrowserError> {
        self.attempt("select", locator.value())
    }

    async fn wait_for(&mut self, locator: &Locator, _timeout_ms: u64) -> Result<(), BrowserError> {
        self.attempt("wait_for", locator.value())
    }

    async fn press(&mut self, key: &str) -> Result<(), BrowserError> {
        self.attempt("press", key)
    }

    async fn page_context(&mut self) -> Result<PageContext, BrowserError> {
        Ok(self.page.clone())
    }
}

/// Browser whose element operations stall for a fixed delay before
/// succeeding. Navigation and page context stay instant, so timeout and
/// cancellation behavior can be observed per step.
#[allow(dead_code)]
pub struct SlowBrowser {
    delay: Duration,
    pub completed: Vec<String>,
}

#[allow(dead_code)]
impl SlowBrowser {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            completed: Vec::new(),
        }
    }

    async fn stall(&mut self, op: &str, key: &str) -> Result<(), BrowserError> {
        tokio::time::sleep(self.delay).await;
        self.completed.push(format!("{} {}", op, key));
        Ok(())
    }
}

#[async_trait]
impl Browser for SlowBrowser {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.completed.push(format!("goto {}", url));
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError> {
        self.stall("click", locator.value()).await
    }

    async fn fill(&mut self, locator: &Locator, _value: &str) -> Result<(), BrowserError> {
        self.stall("fill", locator.value()).await
    }

    async fn select(&mut self, locator: &Locator, _value: &str) -> Result<(), BrowserError> {
        self.stall("select", locator.value()).await
    }

    async fn wait_for(&mut self, locator: &Locator, _timeout_ms: u64) -> Result<(), BrowserError> {
        self.stall("wait_for", locator.value()).await
    }

    async fn press(&mut self, key: &str) -> Result<(), BrowserError> {
        self.stall("press", key).await
    }

    async fn page_context(&mut self) -> Result<PageContext, BrowserError> {
        Ok(PageContext::default())
    }
}

/// Reasoner that replays scripted replies, or repeats a fixed one.
pub struct MockReasoner {
    replies: Mutex<VecDeque<String>>,
    fixed: Option<String>,
    pub requests: AtomicUsize,
}

impl MockReasoner {
    /// Always replies that the action was performed.
    pub fn performed() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fixed: Some(r#"{"performed": true}"#.to_string()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn with_replies(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            fixed: None,
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Reasoner for MockReasoner {
    async fn reason(
        &self,
        _instruction: &str,
        _context: &PageContext,
    ) -> Result<String, ReasonerError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some(reply) = self.replies.lock().pop_front() {
            return Ok(reply);
        }
        match &self.fixed {
            Some(reply) => Ok(reply.clone()),
            None => Err(ReasonerError::Transport("no scripted reply".to_string())),
        }
    }
}
