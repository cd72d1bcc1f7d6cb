// HTTP client for the Newsstand server API

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Failure returned by the server, kept apart so callers can retry on 503.
#[derive(Debug)]
pub struct ServerError {
    pub status: u16,
    pub message: String,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server returned {}: {}", self.status, self.message)
    }
}

impl std::error::Error for ServerError {}

impl ServerError {
    pub fn is_retryable(&self) -> bool {
        self.status == 503
    }
}

pub struct ApiClient {
    base_url: String,
    agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            base_url: format!("{}/api/v1", server_url.trim_end_matches('/')),
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        read(self.agent.get(&self.url(path)).call())
    }

    pub fn post(&self, path: &str, body: Value) -> Result<Value> {
        read(self.agent.post(&self.url(path)).send_json(body))
    }

    pub fn put(&self, path: &str, body: Value) -> Result<Value> {
        read(self.agent.put(&self.url(path)).send_json(body))
    }
}

fn read(result: Result<ureq::Response, ureq::Error>) -> Result<Value> {
    match result {
        Ok(response) => {
            let body = response.into_string()?;
            if body.is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body).map_err(|e| anyhow!("Invalid JSON from server: {}", e))
        }
        Err(ureq::Error::Status(status, response)) => {
            let message = response
                .into_string()
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            Err(ServerError { status, message }.into())
        }
        Err(ureq::Error::Transport(transport)) => {
            Err(anyhow!("Could not reach server: {}", transport))
        }
    }
}
