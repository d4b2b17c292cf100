//! HTTP sink for emissions records.
//!
//! Records are POSTed as JSON. The agent picks up `HTTP_PROXY` /
//! `HTTPS_PROXY` / `ALL_PROXY` from the environment.

use std::time::Duration;

use super::{EmissionsData, EmissionsSink};
use crate::{Error, Result};

/// User-Agent header sent with every request
const USER_AGENT: &str = concat!("codecarbon-rs/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs emissions records to a URL.
pub struct HttpSink {
    name: String,
    url: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl std::fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSink")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .try_proxy_from_env(true)
            .build();
        Self::with_agent(name, url, agent)
    }

    /// Use a preconfigured agent instead of the proxy-aware default.
    pub fn with_agent(name: impl Into<String>, url: impl Into<String>, agent: ureq::Agent) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            api_key: None,
            agent,
        }
    }

    /// Send `x-api-key` with every request when set.
    pub fn with_api_key(mut self, api_key: Option<&str>) -> Self {
        self.api_key = api_key.map(str::to_string);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EmissionsSink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &EmissionsData) -> Result<()> {
        let mut request = self
            .agent
            .post(&self.url)
            .set("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.set("x-api-key", key);
        }

        match request.send_json(data) {
            Ok(_) => {
                tracing::debug!(sink = %self.name, url = %self.url, "Sent emissions");
                Ok(())
            }
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(Error::Http(format!("HTTP {}: {}", code, body)))
            }
            Err(e) => Err(Error::Http(e.to_string())),
        }
    }

    fn live_updates(&self) -> bool {
        true
    }
}
