//! External payment gateway client.
//!
//! The engine only owns the reference/callback contract with the gateway:
//! it sends a checkout payload and receives a hosted checkout URL back. The
//! `PaymentGateway` trait is the seam tests substitute a recording fake for.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::reference::CheckoutPayload;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the gateway to open a checkout session for the payload. Returns
    /// the hosted checkout URL the donor is redirected to.
    async fn initialize_checkout(&self, payload: &CheckoutPayload) -> Result<String>;
}

#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: Url,
    secret_key: String,
}

impl fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    data: InitializeData,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    link: String,
}

impl HttpGateway {
    pub fn from_config(cfg: &crate::config::Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.gateway.base_url)
            .map_err(|e| CoreError::GatewayUnavailable(format!("invalid gateway base URL: {e}")))?;
        Ok(Self::with_base_url(
            cfg.gateway.secret_key.clone(),
            base_url,
            Duration::from_millis(cfg.gateway.request_timeout_ms),
        ))
    }

    pub fn with_base_url(secret_key: String, base_url: Url, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("donation-ledger/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            secret_key,
        }
    }

    /// Render the outbound checkout request. Amounts cross the wire in major
    /// units with two decimals, the gateway's convention.
    pub fn build_request(&self, payload: &CheckoutPayload) -> anyhow::Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("v3/payments")
            .context("invalid gateway base URL")?;
        let body = build_checkout_body(payload);
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.secret_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .build()
            .context("failed to build gateway request")
    }
}

pub fn build_checkout_body(payload: &CheckoutPayload) -> Value {
    json!({
        "tx_ref": payload.tx_ref,
        "amount": format!("{}.{:02}", payload.amount_minor / 100, payload.amount_minor % 100),
        "currency": payload.currency,
        "redirect_url": payload.return_url,
        "customer": {
            "name": format!("{} {}", payload.first_name, payload.last_name).trim().to_string(),
            "email": payload.email,
        },
        "meta": {
            "donation_id": payload.meta.donation_id,
            "donation_type": payload.meta.donation_type,
            "callback_url": payload.callback_url,
        },
    })
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn initialize_checkout(&self, payload: &CheckoutPayload) -> Result<String> {
        let request = self
            .build_request(payload)
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        info!(url = %request.url(), tx_ref = %payload.tx_ref, "initializing gateway checkout");

        let res = self
            .http
            .execute(request)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(format!("gateway unreachable: {e}")))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "gateway rejected checkout request: {}", body);
            return Err(CoreError::GatewayUnavailable(format!(
                "gateway error {status}: {body}"
            )));
        }

        let parsed: InitializeResponse = res
            .json()
            .await
            .map_err(|e| CoreError::GatewayUnavailable(format!("invalid gateway response: {e}")))?;
        Ok(parsed.data.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DonationType, DonorOrigin};
    use crate::reference::build_checkout_payload;

    fn payload() -> CheckoutPayload {
        let cfg: crate::config::Config = serde_yaml::from_str(crate::config::example()).unwrap();
        let origin = DonorOrigin::Anonymous {
            name: "Ada Lovelace".into(),
            email: "ada@example.org".into(),
        };
        build_checkout_payload(&cfg, 3, "anon-1700000000000-abc123def456", 250_050, &origin)
    }

    #[test]
    fn request_targets_payments_endpoint_with_auth() {
        let gateway = HttpGateway::with_base_url(
            "sk_test".into(),
            Url::parse("https://gateway.test/").unwrap(),
            Duration::from_secs(5),
        );
        let request = gateway.build_request(&payload()).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "https://gateway.test/v3/payments");
        let auth = request.headers().get("Authorization").unwrap();
        assert_eq!(auth.to_str().unwrap(), "Bearer sk_test");
    }

    #[test]
    fn body_round_trips_tx_ref_and_converts_amount() {
        let body = build_checkout_body(&payload());
        assert_eq!(body["tx_ref"], "anon-1700000000000-abc123def456");
        assert_eq!(body["amount"], "2500.50");
        assert_eq!(body["currency"], "NGN");
        assert_eq!(body["customer"]["name"], "Ada Lovelace");
        assert_eq!(body["meta"]["donation_id"], 3);
        assert_eq!(body["meta"]["donation_type"], "cash");
    }

    #[test]
    fn debug_hides_secret_key() {
        let gateway = HttpGateway::with_base_url(
            "sk_live_secret".into(),
            Url::parse("https://gateway.test/").unwrap(),
            Duration::from_secs(5),
        );
        let rendered = format!("{gateway:?}");
        assert!(!rendered.contains("sk_live_secret"));
    }
}
