//! Shared JSON-over-HTTP plumbing for the OpenAI and Ollama adapters.
//!
//! Failure classification:
//!
//! | Outcome | Kind |
//! |---------|------|
//! | network error, timeout | transient |
//! | HTTP 429, 5xx | transient |
//! | other non-2xx | permanent |
//! | unparseable body | permanent |

use std::time::Duration;

use anyhow::Result;
use ragline_core::error::{Capability, CapabilityError};
use reqwest::StatusCode;

/// Build a client with the configured request timeout.
pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send `request` and decode a JSON body, classifying failures for retry.
pub async fn send_json(
    request: reqwest::RequestBuilder,
    capability: Capability,
    provider: &str,
) -> std::result::Result<serde_json::Value, CapabilityError> {
    let response = request.send().await.map_err(|e| {
        CapabilityError::transient(capability, format!("{} request failed: {}", provider, e))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        let message = format!("{} API error {}: {}", provider, status, body_text);
        return Err(if is_retryable(status) {
            CapabilityError::transient(capability, message)
        } else {
            CapabilityError::permanent(capability, message)
        });
    }

    response.json().await.map_err(|e| {
        CapabilityError::permanent(capability, format!("Invalid {} response: {}", provider, e))
    })
}
