//! Receipt-issuance collaborator client.
//!
//! Receipt generation and email dispatch live outside this engine; we only
//! notify the collaborator that a cash donation was received. Delivery is
//! fire-and-forget from the state machine's perspective: the outbox worker
//! retries failures, and a receipt failure never rolls a transition back.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::error::{CoreError, Result};

#[async_trait]
pub trait ReceiptService: Send + Sync {
    async fn send_receipt(&self, donation_id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpReceiptService {
    http: Client,
    endpoint: Url,
    token: String,
}

impl fmt::Debug for HttpReceiptService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpReceiptService")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpReceiptService {
    pub fn from_config(cfg: &crate::config::Config) -> Result<Self> {
        let endpoint = Url::parse(&cfg.receipts.endpoint).map_err(|e| {
            CoreError::GatewayUnavailable(format!("invalid receipts endpoint: {e}"))
        })?;
        Ok(Self {
            http: Client::builder()
                .user_agent("donation-ledger/0.1")
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            endpoint,
            token: cfg.receipts.token.clone(),
        })
    }
}

#[async_trait]
impl ReceiptService for HttpReceiptService {
    async fn send_receipt(&self, donation_id: i64) -> Result<()> {
        let res = self
            .http
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&json!({ "donationId": donation_id }))
            .send()
            .await
            .map_err(|e| CoreError::GatewayUnavailable(format!("receipts unreachable: {e}")))?;

        if !res.status().is_success() {
            let status = res.status();
            warn!(%status, donation_id, "receipt collaborator rejected notification");
            return Err(CoreError::GatewayUnavailable(format!(
                "receipts error {status}"
            )));
        }
        Ok(())
    }
}
