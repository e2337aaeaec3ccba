//! Inventory reconciliation: every quantity change goes through `adjust`,
//! which writes the stock row and its ledger entry in one transaction.
//!
//! The non-negativity invariant is enforced by the conditional UPDATE in the
//! repository, re-checked against the live row inside the transaction, so
//! concurrent decreases cannot jointly drive a quantity below zero off a
//! stale read.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::db;
use crate::error::{CoreError, Result};
use crate::model::{AdjustmentType, DonationType, InventoryAdjustment, InventoryItem, ItemKey};

pub const MAX_REASON_LEN: usize = 500;
pub const MAX_NOTES_LEN: usize = 1000;

#[derive(Debug, Clone)]
pub struct AdjustOptions {
    pub reason: String,
    pub notes: Option<String>,
    pub actor_id: i64,
    pub source_donation_id: Option<i64>,
    /// When set, overrides the sign-derived adjustment type. Goods-donation
    /// increases always record `increase` even for a zero delta.
    pub adjustment_type: Option<AdjustmentType>,
}

#[derive(Debug, Clone, Copy)]
pub struct AdjustOutcome {
    pub inventory_item_id: i64,
    pub new_quantity: i64,
    pub adjustment_id: i64,
}

/// Apply a quantity change and append the matching ledger row atomically.
#[instrument(skip_all, fields(item = %key.name, change = quantity_change))]
pub async fn adjust(
    pool: &SqlitePool,
    key: &ItemKey,
    quantity_change: i64,
    opts: &AdjustOptions,
    now: DateTime<Utc>,
) -> Result<AdjustOutcome> {
    if opts.reason.trim().is_empty() {
        return Err(CoreError::validation("reason", "must be non-empty"));
    }
    if opts.reason.len() > MAX_REASON_LEN {
        return Err(CoreError::validation(
            "reason",
            format!("must be at most {MAX_REASON_LEN} characters"),
        ));
    }
    if let Some(notes) = &opts.notes {
        if notes.len() > MAX_NOTES_LEN {
            return Err(CoreError::validation(
                "notes",
                format!("must be at most {MAX_NOTES_LEN} characters"),
            ));
        }
    }
    if key.name.trim().is_empty() || key.category.trim().is_empty() || key.location.trim().is_empty()
    {
        return Err(CoreError::validation(
            "item_key",
            "name, category and location must all be non-empty",
        ));
    }

    let adjustment_type = opts
        .adjustment_type
        .unwrap_or_else(|| AdjustmentType::from_change(quantity_change));

    // A decrease against a row that does not exist is a caller mistake, not
    // an occasion to create stock at zero.
    if quantity_change < 0 && db::get_inventory_row(pool, key).await?.is_none() {
        return Err(CoreError::validation(
            "item_key",
            format!(
                "no stock row for '{}' ({}/{})",
                key.name, key.category, key.location
            ),
        ));
    }

    let mut tx = pool.begin().await?;

    if quantity_change >= 0 {
        db::ensure_inventory_row_tx(&mut tx, key).await?;
    }

    if !db::apply_quantity_change_tx(&mut tx, key, quantity_change).await? {
        // Guard rejected the write: read the live quantity for the operator
        // message and roll the transaction back.
        let current = db::inventory_row_tx(&mut tx, key)
            .await?
            .map(|row| row.quantity);
        drop(tx);
        return match current {
            Some(current) => Err(CoreError::InvalidAdjustment {
                current,
                requested: quantity_change,
            }),
            None => Err(CoreError::validation(
                "item_key",
                format!(
                    "no stock row for '{}' ({}/{})",
                    key.name, key.category, key.location
                ),
            )),
        };
    }

    let row = db::inventory_row_tx(&mut tx, key)
        .await?
        .ok_or_else(|| CoreError::not_found("inventory item"))?;
    let after = row.quantity;
    let before = after - quantity_change;

    let adjustment_id = db::insert_adjustment_tx(
        &mut tx,
        row.id,
        adjustment_type,
        quantity_change,
        before,
        after,
        &opts.reason,
        opts.notes.as_deref(),
        opts.actor_id,
        opts.source_donation_id,
        now,
    )
    .await?;

    tx.commit().await?;
    info!(
        item = %key.name,
        before,
        after,
        adjustment_id,
        "inventory adjusted"
    );
    Ok(AdjustOutcome {
        inventory_item_id: row.id,
        new_quantity: after,
        adjustment_id,
    })
}

/// Increase stock once per line item of a completed goods donation. Each
/// ledger row carries the donation id so stock traces back to its origin.
#[instrument(skip_all, fields(donation_id))]
pub async fn apply_goods_donation(
    pool: &SqlitePool,
    donation_id: i64,
    category: &str,
    location: &str,
    actor_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<AdjustOutcome>> {
    let donation = db::get_donation(pool, donation_id).await?;
    if donation.donation_type != DonationType::Goods {
        return Err(CoreError::validation(
            "donation_id",
            "only goods donations feed inventory",
        ));
    }

    let items = db::items_for_donation(pool, donation_id).await?;
    let mut outcomes = Vec::with_capacity(items.len());
    for item in items {
        let key = ItemKey::new(item.name.clone(), category, location);
        let opts = AdjustOptions {
            reason: format!("Goods donation #{donation_id}"),
            notes: None,
            actor_id,
            source_donation_id: Some(donation_id),
            adjustment_type: Some(AdjustmentType::Increase),
        };
        outcomes.push(adjust(pool, &key, item.quantity, &opts, now).await?);
    }
    Ok(outcomes)
}

pub async fn get_item(pool: &SqlitePool, key: &ItemKey) -> Result<InventoryItem> {
    let row = db::get_inventory_row(pool, key)
        .await?
        .ok_or_else(|| CoreError::not_found("inventory item"))?;
    Ok(InventoryItem {
        id: row.id,
        key: key.clone(),
        quantity: row.quantity,
        low_stock_threshold: row.low_stock_threshold,
    })
}

/// Audit helper: replay the item's full ledger. The returned sum must equal
/// the current quantity; a mismatch means a quantity write escaped the
/// ledger path.
pub async fn replay_ledger(pool: &SqlitePool, key: &ItemKey) -> Result<(i64, Vec<InventoryAdjustment>)> {
    let item = get_item(pool, key).await?;
    let rows = db::adjustments_for_item(pool, item.id).await?;
    let replayed: i64 = rows.iter().map(|a| a.quantity_change).sum();
    Ok((replayed, rows))
}
