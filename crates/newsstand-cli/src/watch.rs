// Watch module - polls an invoice until it settles or the timeout passes

use anyhow::{bail, Result};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::client::{ApiClient, ServerError};

/// Poll interval used when the server does not suggest one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// The order reached a terminal status.
    Settled,
    /// Poll again after this delay.
    Wait(Duration),
    /// The next poll would land past the deadline.
    TimedOut,
}

/// Decides what to do after one poll response.
pub fn next_step(response: &Value, elapsed: Duration, timeout: Duration) -> Step {
    if response["settled"].as_bool() == Some(true) {
        return Step::Settled;
    }
    let delay = response["pollAfterSeconds"]
        .as_u64()
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL);
    if elapsed + delay > timeout {
        Step::TimedOut
    } else {
        Step::Wait(delay)
    }
}

/// Polls the check endpoint until the invoice settles.
///
/// A 503 from the server (gateway outage) is treated like a pending
/// response; any other error ends the watch.
pub fn watch(
    client: &ApiClient,
    check_path: &str,
    timeout: Duration,
    mut on_pending: impl FnMut(&Value),
) -> Result<Value> {
    let started = Instant::now();
    loop {
        let response = match client.get(check_path) {
            Ok(response) => response,
            Err(e) => match e.downcast_ref::<ServerError>() {
                Some(server) if server.is_retryable() => Value::Null,
                _ => return Err(e),
            },
        };

        match next_step(&response, started.elapsed(), timeout) {
            Step::Settled => return Ok(response),
            Step::Wait(delay) => {
                on_pending(&response);
                std::thread::sleep(delay);
            }
            Step::TimedOut => bail!(
                "Invoice still pending after {}s; run the watch again later",
                timeout.as_secs()
            ),
        }
    }
}
