//! HTTP bridges to the browser and reasoning collaborators.
//!
//! Both collaborators run out of process and speak JSON over HTTP. The
//! browser bridge accepts one primitive per request; the reasoner bridge
//! takes an instruction plus page context and returns a raw reply.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_common::protocol::{BrowserError, Locator, PageContext, Primitive};
use tandem_core::reasoner::{Reasoner, ReasonerError};
use tandem_core::Browser;

pub struct HttpBrowser {
    client: reqwest::Client,
    base: String,
}

#[derive(Deserialize)]
struct ExecuteReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl HttpBrowser {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn execute(&self, primitive: &Primitive) -> Result<(), BrowserError> {
        let url = format!("{}/execute", self.base);
        let response = self
            .client
            .post(&url)
            .json(primitive)
            .send()
            .await
            .map_err(|e| BrowserError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BrowserError::Network(format!(
                "bridge answered {}",
                response.status()
            )));
        }
        let reply: ExecuteReply = response
            .json()
            .await
            .map_err(|e| BrowserError::Network(e.to_string()))?;
        if reply.ok {
            return Ok(());
        }
        Err(decode_error(
            reply.code.as_deref(),
            reply.error.unwrap_or_else(|| "bridge reported failure".to_string()),
            primitive,
        ))
    }
}

/// Map a bridge error code back onto the typed error the categorizer
/// understands. Unknown codes degrade to `Other`.
fn decode_error(code: Option<&str>, message: String, primitive: &Primitive) -> BrowserError {
    match code {
        Some("TIMEOUT") => BrowserError::Timeout {
            operation: primitive.kind().name().to_string(),
        },
        Some("ELEMENT_NOT_FOUND") => BrowserError::ElementNotFound {
            locator: primitive
                .locator()
                .map(|l| l.to_string())
                .unwrap_or_else(|| message.clone()),
        },
        Some("NAVIGATION_FAILED") => BrowserError::NavigationFailed(message),
        Some("INTERACTION_BLOCKED") => BrowserError::InteractionBlocked { reason: message },
        Some("NETWORK_ERROR") => BrowserError::Network(message),
        Some("SCRIPT_ERROR") => BrowserError::Script(message),
        Some("NOT_SUPPORTED") => BrowserError::NotSupported(message),
        _ => BrowserError::Other(message),
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.execute(&Primitive::Goto {
            url: url.to_string(),
        })
        .await
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError> {
        self.execute(&Primitive::Click {
            locator: locator.clone(),
        })
        .await
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), BrowserError> {
        self.execute(&Primitive::Fill {
            locator: locator.clone(),
            value: value.to_string(),
        })
        .await
    }

    async fn select(&mut self, locator: &Locator, value: &str) -> Result<(), BrowserError> {
        self.execute(&Primitive::Select {
            locator: locator.clone(),
            value: value.to_string(),
        })
        .await
    }

    async fn wait_for(&mut self, locator: &Locator, timeout_ms: u64) -> Result<(), BrowserError> {
        self.execute(&Primitive::WaitFor {
            locator: locator.clone(),
            timeout_ms,
        })
        .await
    }

    async fn press(&mut self, key: &str) -> Result<(), BrowserError> {
        self.execute(&Primitive::Press {
            key: key.to_string(),
        })
        .await
    }

    async fn page_context(&mut self) -> Result<PageContext, BrowserError> {
        let url = format!("{}/context", self.base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BrowserError::Network(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| BrowserError::Network(e.to_string()))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        let url = format!("{}/screenshot", self.base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BrowserError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BrowserError::NotSupported("screenshot".to_string()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BrowserError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

pub struct HttpReasoner {
    client: reqwest::Client,
    base: String,
}

#[derive(Serialize)]
struct ReasonRequest<'a> {
    instruction: &'a str,
    context: &'a PageContext,
}

impl HttpReasoner {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    async fn reason(
        &self,
        instruction: &str,
        context: &PageContext,
    ) -> Result<String, ReasonerError> {
        let url = format!("{}/reason", self.base);
        let response = self
            .client
            .post(&url)
            .json(&ReasonRequest {
                instruction,
                context,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasonerError::Timeout
                } else {
                    ReasonerError::Transport(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(ReasonerError::Transport(format!(
                "bridge answered {}",
                response.status()
            )));
        }
        // The bridge replies with the performed/plan JSON directly; parsing
        // happens at the call site with the strictness it needs.
        let reply = response
            .text()
            .await
            .map_err(|e| ReasonerError::Transport(e.to_string()))?;
        if reply.trim().is_empty() {
            return Err(ReasonerError::Empty);
        }
        Ok(reply)
    }
}

/// Reasoner used when no reasoner bridge is configured. Every semantic
/// request fails fast, which pushes steps onto their deterministic fallback.
pub struct OfflineReasoner;

#[async_trait]
impl Reasoner for OfflineReasoner {
    async fn reason(
        &self,
        _instruction: &str,
        _context: &PageContext,
    ) -> Result<String, ReasonerError> {
        Err(ReasonerError::Transport(
            "no reasoner bridge configured".to_string(),
        ))
    }
}

/// Smoke-check a bridge before starting a run.
pub async fn ping(base: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{}/health", base.trim_end_matches('/'));
    let response = client.get(&url).send().await?;
    anyhow::ensure!(
        response.status().is_success(),
        "bridge at {} answered {}",
        base,
        response.status()
    );
    Ok(())
}
