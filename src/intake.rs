//! Donation intake: validate a submission and persist a consistent donation
//! (plus line items for goods) in one atomic unit.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::{self, NewDonation};
use crate::error::{CoreError, Result};
use crate::gateway::PaymentGateway;
use crate::inventory;
use crate::model::{
    DonationRequest, DonationStatus, DonationType, DonorOrigin, NewItem, OutboxKind,
};
use crate::reference;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_ITEM_DESCRIPTION_LEN: usize = 500;
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Actor recorded on inventory rows when no authenticated user drove the
/// change (anonymous/guest goods donations).
pub const SYSTEM_ACTOR: i64 = 0;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

#[derive(Debug, Clone)]
pub struct DonationOutcome {
    pub donation_id: i64,
    /// Hosted checkout URL for cash donations. None for goods, and None when
    /// the gateway call failed — see `gateway_error`.
    pub checkout_url: Option<String>,
    /// Set when the donation row exists but the checkout step failed. The
    /// caller retries via `reissue_checkout` instead of re-submitting.
    pub gateway_error: Option<String>,
    /// Set when a goods donation persisted but stock application stopped
    /// partway. The ledger's `source_donation_id` shows which line items
    /// landed; the caller reconciles from there instead of re-submitting,
    /// which would double-stock the items that did land.
    pub inventory_error: Option<String>,
    pub item_count: usize,
}

fn validate_origin(origin: &DonorOrigin) -> Result<()> {
    match origin {
        DonorOrigin::Registered { .. } => Ok(()),
        DonorOrigin::Anonymous { name, email } | DonorOrigin::Guest { name, email } => {
            if name.trim().is_empty() || name.len() > MAX_NAME_LEN {
                return Err(CoreError::validation(
                    "name",
                    format!("must be between 1 and {MAX_NAME_LEN} characters"),
                ));
            }
            if email.len() > MAX_EMAIL_LEN || !EMAIL_RE.is_match(email) {
                return Err(CoreError::validation("email", "must be a valid address"));
            }
            Ok(())
        }
    }
}

fn validate_message(message: &Option<String>) -> Result<()> {
    if let Some(message) = message {
        if message.len() > MAX_MESSAGE_LEN {
            return Err(CoreError::validation(
                "message",
                format!("must be at most {MAX_MESSAGE_LEN} characters"),
            ));
        }
    }
    Ok(())
}

fn validate_items(items: &[NewItem]) -> Result<()> {
    if items.is_empty() {
        return Err(CoreError::validation(
            "items",
            "a goods donation must declare at least one item",
        ));
    }
    for item in items {
        if item.name.trim().is_empty() || item.name.len() > MAX_NAME_LEN {
            return Err(CoreError::validation(
                "items.name",
                format!("must be between 1 and {MAX_NAME_LEN} characters"),
            ));
        }
        if item.quantity < 1 {
            return Err(CoreError::validation("items.quantity", "must be at least 1"));
        }
        if let Some(desc) = &item.description {
            if desc.len() > MAX_ITEM_DESCRIPTION_LEN {
                return Err(CoreError::validation(
                    "items.description",
                    format!("must be at most {MAX_ITEM_DESCRIPTION_LEN} characters"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_amount(cfg: &Config, amount_minor: i64, origin: &DonorOrigin) -> Result<()> {
    if amount_minor <= 0 {
        return Err(CoreError::validation("amount", "must be positive"));
    }
    // Registered donors have no public floor (e.g. small recurring gifts to
    // a sponsored child); unauthenticated paths do.
    match origin {
        DonorOrigin::Registered { .. } => Ok(()),
        DonorOrigin::Anonymous { .. } | DonorOrigin::Guest { .. } => {
            let floor = cfg.donations.min_anonymous_amount_minor;
            if amount_minor < floor {
                return Err(CoreError::validation(
                    "amount",
                    format!("must be at least {floor} minor units"),
                ));
            }
            Ok(())
        }
    }
}

/// Validate and persist a donation. Cash donations mint a checkout reference
/// before any external call and come back with a hosted checkout URL; goods
/// donations are received immediately and feed inventory per line item.
#[instrument(skip_all)]
pub async fn create_donation(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
    cfg: &Config,
    req: &DonationRequest,
    now: DateTime<Utc>,
) -> Result<DonationOutcome> {
    validate_origin(req.origin())?;

    match req {
        DonationRequest::Cash {
            amount_minor,
            origin,
            child_id,
            campaign_id,
            message,
        } => {
            validate_message(message)?;
            validate_amount(cfg, *amount_minor, origin)?;

            let checkout_ref = reference::mint_checkout_ref(origin, now);
            let status = if cfg.gateway.assume_received_on_create {
                // Degraded deployment mode: the gateway cannot call back into
                // this origin, so the pending state would never resolve.
                DonationStatus::Received
            } else {
                DonationStatus::Pending
            };

            let mut tx = pool.begin().await?;
            let donation_id = db::insert_donation_tx(
                &mut tx,
                &NewDonation {
                    checkout_ref: Some(checkout_ref.clone()),
                    donation_type: DonationType::Cash,
                    amount_minor: Some(*amount_minor),
                    status,
                    message: message.clone(),
                    origin: origin.clone(),
                    child_id: *child_id,
                    campaign_id: *campaign_id,
                    created_at: now,
                    items: vec![],
                },
            )
            .await?;
            if status == DonationStatus::Received {
                // The receipt task shares the insert's transaction: a
                // received donation can never exist without its queued
                // receipt.
                db::enqueue_outbox_tx(&mut tx, OutboxKind::SendReceipt, donation_id, now)
                    .await?;
            }
            tx.commit().await?;

            let payload = reference::build_checkout_payload(
                cfg,
                donation_id,
                &checkout_ref,
                *amount_minor,
                origin,
            );
            match gateway.initialize_checkout(&payload).await {
                Ok(url) => {
                    info!(donation_id, "cash donation created; checkout issued");
                    Ok(DonationOutcome {
                        donation_id,
                        checkout_url: Some(url),
                        gateway_error: None,
                        inventory_error: None,
                        item_count: 0,
                    })
                }
                Err(CoreError::GatewayUnavailable(msg)) => {
                    // The pending row stays; the caller retries issuance
                    // against the same donation rather than duplicating it.
                    warn!(donation_id, %msg, "checkout issuance failed");
                    Ok(DonationOutcome {
                        donation_id,
                        checkout_url: None,
                        gateway_error: Some(msg),
                        inventory_error: None,
                        item_count: 0,
                    })
                }
                Err(other) => Err(other),
            }
        }
        DonationRequest::Goods {
            items,
            origin,
            child_id,
            campaign_id,
            message,
        } => {
            validate_message(message)?;
            validate_items(items)?;

            // Goods are considered delivered at submission; no payment step
            // gates them.
            let donation_id = db::insert_donation(
                pool,
                &NewDonation {
                    checkout_ref: None,
                    donation_type: DonationType::Goods,
                    amount_minor: None,
                    status: DonationStatus::Received,
                    message: message.clone(),
                    origin: origin.clone(),
                    child_id: *child_id,
                    campaign_id: *campaign_id,
                    created_at: now,
                    items: items.clone(),
                },
            )
            .await?;

            let actor_id = match origin {
                DonorOrigin::Registered { user_id } => *user_id,
                _ => SYSTEM_ACTOR,
            };
            // The donation is already committed; a stock failure partway
            // through the list is reported on the outcome, not bubbled, so
            // the caller does not re-submit and double-stock the items that
            // did land.
            let inventory_error = match inventory::apply_goods_donation(
                pool,
                donation_id,
                &cfg.donations.default_category,
                &cfg.donations.default_location,
                actor_id,
                now,
            )
            .await
            {
                Ok(_) => None,
                Err(err) => {
                    warn!(donation_id, %err, "stock application incomplete");
                    Some(err.to_string())
                }
            };

            info!(donation_id, items = items.len(), "goods donation received");
            Ok(DonationOutcome {
                donation_id,
                checkout_url: None,
                gateway_error: None,
                inventory_error,
                item_count: items.len(),
            })
        }
    }
}

/// Retry the external checkout step for an existing pending cash donation,
/// reusing its persisted reference. Never mints a new reference or row.
#[instrument(skip_all, fields(donation_id))]
pub async fn reissue_checkout(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
    cfg: &Config,
    donation_id: i64,
) -> Result<String> {
    let donation = db::get_donation(pool, donation_id).await?;
    if donation.donation_type != DonationType::Cash {
        return Err(CoreError::validation(
            "donation_id",
            "only cash donations have a checkout step",
        ));
    }
    if donation.status != DonationStatus::Pending {
        return Err(CoreError::validation(
            "donation_id",
            "donation is no longer awaiting payment",
        ));
    }
    let (checkout_ref, amount_minor) = match (&donation.checkout_ref, donation.amount_minor) {
        (Some(r), Some(a)) => (r.clone(), a),
        _ => {
            return Err(CoreError::validation(
                "donation_id",
                "donation has no checkout reference",
            ))
        }
    };

    let payload = reference::build_checkout_payload(
        cfg,
        donation_id,
        &checkout_ref,
        amount_minor,
        &donation.origin,
    );
    gateway.initialize_checkout(&payload).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_pattern() {
        assert!(EMAIL_RE.is_match("ada@example.org"));
        assert!(EMAIL_RE.is_match("a.b+c@sub.example.co"));
        assert!(!EMAIL_RE.is_match("not-an-email"));
        assert!(!EMAIL_RE.is_match("two@@example.org"));
        assert!(!EMAIL_RE.is_match("spaces in@example.org"));
    }

    #[test]
    fn items_validation() {
        assert!(validate_items(&[]).is_err());
        assert!(validate_items(&[NewItem {
            name: "Blanket".into(),
            quantity: 0,
            description: None,
            estimated_value_minor: None,
        }])
        .is_err());
        assert!(validate_items(&[NewItem {
            name: "".into(),
            quantity: 1,
            description: None,
            estimated_value_minor: None,
        }])
        .is_err());
        assert!(validate_items(&[NewItem {
            name: "Blanket".into(),
            quantity: 1,
            description: Some("x".repeat(MAX_ITEM_DESCRIPTION_LEN + 1)),
            estimated_value_minor: None,
        }])
        .is_err());
        assert!(validate_items(&[NewItem {
            name: "Blanket".into(),
            quantity: 3,
            description: Some("warm".into()),
            estimated_value_minor: Some(10_000),
        }])
        .is_ok());
    }

    #[test]
    fn amount_floor_applies_to_unauthenticated_paths() {
        let cfg: Config = serde_yaml::from_str(crate::config::example()).unwrap();
        let anon = DonorOrigin::Anonymous {
            name: "Ada".into(),
            email: "ada@example.org".into(),
        };
        let registered = DonorOrigin::Registered { user_id: 1 };

        assert!(validate_amount(&cfg, 9_999, &anon).is_err());
        assert!(validate_amount(&cfg, 10_000, &anon).is_ok());
        // Registered donors only need a positive amount.
        assert!(validate_amount(&cfg, 1, &registered).is_ok());
        assert!(validate_amount(&cfg, 0, &registered).is_err());
        assert!(validate_amount(&cfg, -5, &anon).is_err());
    }
}
