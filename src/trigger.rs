//! The external run-trigger interface: "fire and forget with a returned handle".
//!
//! The engine never awaits scan completion through this seam — it takes the
//! `run_id` and lets the reconciler pick the outcome up from the store later.

use async_trait::async_trait;

use crate::error::TriggerError;
use crate::schedule::{RunConfig, RunId};

/// Starts a scan run on the external run service.
///
/// The call is not idempotency-aware; the engine's claiming transaction is
/// what keeps duplicate triggers rare, not this interface.
#[async_trait]
pub trait RunTrigger: Send + Sync {
  /// Start a run with the given config, returning its identifier.
  async fn trigger_run(&self, config: &RunConfig) -> Result<RunId, TriggerError>;
}

// --- HTTP implementation ---

#[cfg(feature = "http-trigger")]
pub use http::HttpRunTrigger;

#[cfg(feature = "http-trigger")]
mod http {
  use super::*;
  use serde::Deserialize;
  use tracing::debug;

  #[derive(Debug, Deserialize)]
  struct TriggerResponse {
    run_id: RunId,
  }

  /// Bearer-authenticated JSON POST client for the run-trigger endpoint.
  ///
  /// The endpoint receives the [`RunConfig`] as its body and answers
  /// `{"run_id": "<uuid>"}`. Non-2xx statuses become [`TriggerError`]s whose
  /// `code` is the HTTP status, so the execution record shows what the
  /// service said.
  #[derive(Debug, Clone)]
  pub struct HttpRunTrigger {
    client: reqwest::Client,
    endpoint: String,
    auth_token: String,
  }

  impl HttpRunTrigger {
    pub fn new(endpoint: impl Into<String>, auth_token: impl Into<String>) -> Self {
      Self {
        client: reqwest::Client::new(),
        endpoint: endpoint.into(),
        auth_token: auth_token.into(),
      }
    }

    /// Use a preconfigured client (timeouts, proxies, connection pools).
    pub fn with_client(
      client: reqwest::Client,
      endpoint: impl Into<String>,
      auth_token: impl Into<String>,
    ) -> Self {
      Self {
        client,
        endpoint: endpoint.into(),
        auth_token: auth_token.into(),
      }
    }
  }

  #[async_trait]
  impl RunTrigger for HttpRunTrigger {
    async fn trigger_run(&self, config: &RunConfig) -> Result<RunId, TriggerError> {
      let response = self
        .client
        .post(&self.endpoint)
        .bearer_auth(&self.auth_token)
        .json(config)
        .send()
        .await
        .map_err(|e| TriggerError::new(format!("trigger request failed: {e}")))?;

      let status = response.status();
      if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TriggerError::with_code(
          format!("trigger endpoint returned {status}: {body}"),
          status.as_u16().to_string(),
        ));
      }

      let parsed: TriggerResponse = response
        .json()
        .await
        .map_err(|e| TriggerError::new(format!("malformed trigger response: {e}")))?;
      debug!(run_id = %parsed.run_id, "Run trigger accepted.");
      Ok(parsed.run_id)
    }
  }
}
