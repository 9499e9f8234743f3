//! Post-call data delivery
//!
//! When a session ends the bridge packages the collected contact fields
//! into a [`PostCallPayload`] and hands it to a reporter. Delivery is
//! fire-and-forget: a failed report is logged and never blocks teardown.

use crate::protocol::PostCallPayload;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Report endpoint returned status {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait CallReporter: Send + Sync {
    async fn deliver(&self, payload: &PostCallPayload) -> Result<(), ReportError>;
}

/// Default reporter: logs the payload and reports success.
///
/// Persistence currently happens through the transport vendor's server-side
/// webhooks, so nothing is transmitted from the widget itself.
pub struct LoggingReporter;

#[async_trait]
impl CallReporter for LoggingReporter {
    async fn deliver(&self, payload: &PostCallPayload) -> Result<(), ReportError> {
        tracing::info!(
            call_id = %payload.call_id,
            character = %payload.name,
            fields = payload.fields.len(),
            "post-call data collected (delivery deferred to vendor webhooks)"
        );
        Ok(())
    }
}

/// Reporter that posts the payload to a backend endpoint.
pub struct HttpReporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReporter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl CallReporter for HttpReporter {
    async fn deliver(&self, payload: &PostCallPayload) -> Result<(), ReportError> {
        let response = self.client.post(&self.endpoint).json(payload).send().await?;

        if !response.status().is_success() {
            return Err(ReportError::Status(response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_logging_reporter_always_succeeds() {
        let payload = PostCallPayload {
            call_id: "call_1".to_string(),
            name: "Ava".to_string(),
            fields: HashMap::new(),
        };
        assert!(LoggingReporter.deliver(&payload).await.is_ok());
    }
}
