//! Payment reference issuing and checkout payload construction.
//!
//! A checkout reference correlates one cash donation with one external
//! payment attempt. It must never collide across the lifetime of the system:
//! a collision would silently reconcile the wrong donation. References
//! combine a path prefix, the creation time in unix milliseconds and a
//! random alphanumeric tail, and the `donations.checkout_ref` unique index
//! is the final backstop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::model::{DonationType, DonorOrigin};

/// Length of the random tail: 12 hex chars from a v4 UUID, enough that a
/// collision within one millisecond is implausible.
const RANDOM_TAIL_LEN: usize = 12;

/// Mint a checkout reference: `{prefix}-{unix_millis}-{random tail}`.
pub fn mint_checkout_ref(origin: &DonorOrigin, now: DateTime<Utc>) -> String {
    let tail: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(RANDOM_TAIL_LEN)
        .collect();
    format!("{}-{}-{}", origin.ref_prefix(), now.timestamp_millis(), tail)
}

/// Outbound checkout request consumed by the external gateway. `tx_ref`
/// round-trips unchanged to the callback; `meta` echoes our donation id and
/// type so support staff can correlate gateway records with ours.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutPayload {
    pub tx_ref: String,
    pub amount_minor: i64,
    pub currency: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub callback_url: String,
    pub return_url: String,
    pub meta: CheckoutMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutMeta {
    pub donation_id: i64,
    pub donation_type: DonationType,
}

/// Split a display name into the first/last pair the gateway expects.
/// Single-word names leave the last name empty.
fn split_name(name: &str) -> (String, String) {
    match name.trim().split_once(' ') {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (name.trim().to_string(), String::new()),
    }
}

pub fn build_checkout_payload(
    cfg: &Config,
    donation_id: i64,
    checkout_ref: &str,
    amount_minor: i64,
    origin: &DonorOrigin,
) -> CheckoutPayload {
    let (first_name, last_name, email) = match origin {
        DonorOrigin::Registered { user_id } => {
            // The portal resolves registered display names; the gateway only
            // needs something human-readable on the checkout page.
            (format!("Donor #{user_id}"), String::new(), None)
        }
        DonorOrigin::Anonymous { name, email } | DonorOrigin::Guest { name, email } => {
            let (first, last) = split_name(name);
            (first, last, Some(email.clone()))
        }
    };

    CheckoutPayload {
        tx_ref: checkout_ref.to_string(),
        amount_minor,
        currency: cfg.donations.currency.clone(),
        first_name,
        last_name,
        email,
        callback_url: cfg.gateway.callback_url.clone(),
        return_url: cfg.gateway.return_url.clone(),
        meta: CheckoutMeta {
            donation_id,
            donation_type: DonationType::Cash,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ref_carries_path_prefix_and_time() {
        let now = Utc::now();
        let origin = DonorOrigin::Anonymous {
            name: "Ada".into(),
            email: "ada@example.org".into(),
        };
        let reference = mint_checkout_ref(&origin, now);
        let mut parts = reference.splitn(3, '-');
        assert_eq!(parts.next(), Some("anon"));
        assert_eq!(
            parts.next().unwrap().parse::<i64>().unwrap(),
            now.timestamp_millis()
        );
        let tail = parts.next().unwrap();
        assert_eq!(tail.len(), RANDOM_TAIL_LEN);
        assert!(tail.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn refs_are_pairwise_distinct() {
        let origin = DonorOrigin::Registered { user_id: 1 };
        let now = Utc::now();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(mint_checkout_ref(&origin, now)));
        }
    }

    #[test]
    fn name_splitting() {
        assert_eq!(split_name("Ada Lovelace"), ("Ada".into(), "Lovelace".into()));
        assert_eq!(split_name("Ada"), ("Ada".into(), String::new()));
        assert_eq!(
            split_name("  Grace Brewster Hopper "),
            ("Grace".into(), "Brewster Hopper".into())
        );
    }

    #[test]
    fn payload_echoes_ref_and_meta() {
        let cfg: Config = serde_yaml::from_str(crate::config::example()).unwrap();
        let origin = DonorOrigin::Guest {
            name: "Sam Doe".into(),
            email: "sam@example.org".into(),
        };
        let payload = build_checkout_payload(&cfg, 11, "gst-1-abc123def456", 50_000, &origin);
        assert_eq!(payload.tx_ref, "gst-1-abc123def456");
        assert_eq!(payload.amount_minor, 50_000);
        assert_eq!(payload.currency, "NGN");
        assert_eq!(payload.first_name, "Sam");
        assert_eq!(payload.last_name, "Doe");
        assert_eq!(payload.meta.donation_id, 11);
    }
}
