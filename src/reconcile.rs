//! Payment reconciliation: maps gateway callbacks and manual verification
//! onto the donation state machine.
//!
//! Transitions: pending -> received on gateway success, pending -> failed on
//! anything else. Both are compare-and-swap writes guarded on the pending
//! state, so at-least-once callback delivery is value-idempotent and never
//! duplicates side effects: the receipt task is enqueued only by the call
//! that actually flips the row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::db;
use crate::error::{CoreError, Result};
use crate::model::{Donation, DonationStatus, DonationType, OutboxKind};

/// Where to send the donor after a verify. Controllers turn this into a
/// concrete route; the engine only knows the shape of the destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RedirectTarget {
    Campaign(i64),
    General,
}

#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub donation_id: i64,
    pub status: DonationStatus,
    /// False when the donation was already terminal and nothing changed.
    pub transitioned: bool,
}

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub donation_id: i64,
    pub already_processed: bool,
    pub redirect_target: RedirectTarget,
}

/// Gateway-reported statuses that mean the charge went through. Anything
/// else fails the donation.
fn is_success_status(reported: &str) -> bool {
    matches!(
        reported.to_ascii_lowercase().as_str(),
        "successful" | "success" | "completed"
    )
}

fn redirect_for(donation: &Donation) -> RedirectTarget {
    match donation.campaign_id {
        Some(id) => RedirectTarget::Campaign(id),
        None => RedirectTarget::General,
    }
}

/// Apply pending -> `to` under the CAS guard; enqueue the receipt task in
/// the same transaction when a cash donation lands on received. Returns
/// whether this call performed the flip.
async fn apply_transition(
    pool: &SqlitePool,
    donation: &Donation,
    to: DonationStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let transitioned = db::transition_status_tx(&mut tx, donation.id, to, now).await?;
    if transitioned && to == DonationStatus::Received && donation.donation_type == DonationType::Cash
    {
        // Fire-and-forget toward the receipt collaborator; the outbox worker
        // owns delivery and its failures never touch this transition.
        db::enqueue_outbox_tx(&mut tx, OutboxKind::SendReceipt, donation.id, now).await?;
    }
    tx.commit().await?;
    Ok(transitioned)
}

/// Consume one gateway callback delivery. Unknown references are terminal
/// for the request (no local retry); repeat deliveries of a terminal event
/// succeed without re-mutating or re-sending a receipt.
#[instrument(skip_all, fields(reference))]
pub async fn handle_callback(
    pool: &SqlitePool,
    reference: &str,
    reported_status: &str,
    now: DateTime<Utc>,
) -> Result<CallbackOutcome> {
    if reference.trim().is_empty() {
        return Err(CoreError::validation("reference", "must be non-empty"));
    }
    if reported_status.trim().is_empty() {
        return Err(CoreError::validation("status", "must be non-empty"));
    }

    let donation = db::find_donation_by_ref(pool, reference, None)
        .await?
        .ok_or_else(|| {
            warn!(reference, "callback for unknown checkout reference");
            CoreError::not_found("donation")
        })?;

    if donation.status.is_terminal() {
        info!(
            donation_id = donation.id,
            status = donation.status.as_str(),
            "repeat callback delivery; no-op"
        );
        return Ok(CallbackOutcome {
            donation_id: donation.id,
            status: donation.status,
            transitioned: false,
        });
    }

    let to = if is_success_status(reported_status) {
        DonationStatus::Received
    } else {
        DonationStatus::Failed
    };
    let transitioned = apply_transition(pool, &donation, to, now).await?;

    // Losing the CAS race means a concurrent delivery already resolved the
    // row; report its terminal state rather than ours.
    let status = if transitioned {
        to
    } else {
        db::get_donation(pool, donation.id).await?.status
    };
    info!(
        donation_id = donation.id,
        status = status.as_str(),
        transitioned,
        "callback processed"
    );
    Ok(CallbackOutcome {
        donation_id: donation.id,
        status,
        transitioned,
    })
}

/// Manual reconciliation for a donor or admin who suspects a missed
/// callback. Only confirms (pending -> received), never fails a donation.
/// With `requesting_user_id` set, the lookup is scoped to that user's own
/// donations.
#[instrument(skip_all, fields(reference))]
pub async fn verify_transaction(
    pool: &SqlitePool,
    reference: &str,
    requesting_user_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<VerifyOutcome> {
    if reference.trim().is_empty() {
        return Err(CoreError::validation("reference", "must be non-empty"));
    }

    let donation = db::find_donation_by_ref(pool, reference, requesting_user_id)
        .await?
        .ok_or_else(|| CoreError::not_found("donation"))?;

    if donation.status.is_terminal() {
        return Ok(VerifyOutcome {
            donation_id: donation.id,
            already_processed: true,
            redirect_target: redirect_for(&donation),
        });
    }

    let transitioned =
        apply_transition(pool, &donation, DonationStatus::Received, now).await?;
    if !transitioned {
        // Raced with a callback; the row is terminal now either way.
        return Ok(VerifyOutcome {
            donation_id: donation.id,
            already_processed: true,
            redirect_target: redirect_for(&donation),
        });
    }

    info!(donation_id = donation.id, "donation verified as received");
    Ok(VerifyOutcome {
        donation_id: donation.id,
        already_processed: false,
        redirect_target: redirect_for(&donation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses() {
        assert!(is_success_status("successful"));
        assert!(is_success_status("SUCCESS"));
        assert!(is_success_status("Completed"));
        assert!(!is_success_status("cancelled"));
        assert!(!is_success_status("error"));
        assert!(!is_success_status(""));
    }
}
