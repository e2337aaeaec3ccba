use super::model::{InventoryRow, NewDonation, OutboxTask};
use crate::error::{CoreError, Result};
use crate::model::{
    Campaign, DonatedItem, Donation, DonationStatus, DonationType, DonorOrigin, InventoryAdjustment,
    AdjustmentType, ItemKey, OutboxKind,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON;").execute(&pool).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| CoreError::Persistence(e.into()))?;
    Ok(())
}

fn decode_error(msg: String) -> CoreError {
    CoreError::Persistence(sqlx::Error::Decode(msg.into()))
}

fn donation_from_row(row: &SqliteRow) -> Result<Donation> {
    let type_str: String = row.get("donation_type");
    let donation_type = DonationType::parse(&type_str)
        .ok_or_else(|| decode_error(format!("unknown donation type '{type_str}'")))?;
    let status_str: String = row.get("status");
    let status = DonationStatus::parse(&status_str)
        .ok_or_else(|| decode_error(format!("unknown donation status '{status_str}'")))?;

    let origin_str: String = row.get("origin");
    let origin = match origin_str.as_str() {
        "registered" => DonorOrigin::Registered {
            user_id: row
                .try_get::<Option<i64>, _>("donor_user_id")
                .ok()
                .flatten()
                .ok_or_else(|| decode_error("registered donation without donor_user_id".into()))?,
        },
        "anonymous" | "guest" => {
            let name: Option<String> = row.try_get("donor_name").ok();
            let email: Option<String> = row.try_get("donor_email").ok();
            let (name, email) = match (name, email) {
                (Some(n), Some(e)) => (n, e),
                _ => {
                    return Err(decode_error(
                        "unregistered donation without donor name/email".into(),
                    ))
                }
            };
            if origin_str == "anonymous" {
                DonorOrigin::Anonymous { name, email }
            } else {
                DonorOrigin::Guest { name, email }
            }
        }
        other => return Err(decode_error(format!("unknown donor origin '{other}'"))),
    };

    Ok(Donation {
        id: row.get("id"),
        checkout_ref: row.try_get::<Option<String>, _>("checkout_ref").ok().flatten(),
        donation_type,
        amount_minor: row.try_get::<Option<i64>, _>("amount_minor").ok().flatten(),
        status,
        message: row.try_get::<Option<String>, _>("message").ok().flatten(),
        origin,
        child_id: row.try_get::<Option<i64>, _>("child_id").ok().flatten(),
        campaign_id: row.try_get::<Option<i64>, _>("campaign_id").ok().flatten(),
        created_at: row.get("created_at"),
        resolved_at: row
            .try_get::<Option<DateTime<Utc>>, _>("resolved_at")
            .ok()
            .flatten(),
    })
}

const DONATION_COLUMNS: &str = "id, checkout_ref, donation_type, amount_minor, status, message, \
     origin, donor_user_id, donor_name, donor_email, child_id, campaign_id, created_at, resolved_at";

/// Insert a donation and all of its line items in one transaction. A failed
/// item write rolls back the parent: a goods donation never lands with zero
/// items.
#[instrument(skip_all)]
pub async fn insert_donation(pool: &Pool, new: &NewDonation) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let donation_id = insert_donation_tx(&mut tx, new).await?;
    tx.commit().await?;
    Ok(donation_id)
}

/// Transaction-scoped insert, for callers that need further writes (such as
/// an outbox task) to live or die with the donation row.
pub async fn insert_donation_tx(
    tx: &mut Transaction<'_, Sqlite>,
    new: &NewDonation,
) -> Result<i64> {
    let (donor_user_id, donor_name, donor_email) = match &new.origin {
        DonorOrigin::Registered { user_id } => (Some(*user_id), None, None),
        DonorOrigin::Anonymous { name, email } | DonorOrigin::Guest { name, email } => {
            (None, Some(name.clone()), Some(email.clone()))
        }
    };

    let rec = sqlx::query(
        "INSERT INTO donations (checkout_ref, donation_type, amount_minor, status, message, \
         origin, donor_user_id, donor_name, donor_email, child_id, campaign_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&new.checkout_ref)
    .bind(new.donation_type.as_str())
    .bind(new.amount_minor)
    .bind(new.status.as_str())
    .bind(&new.message)
    .bind(new.origin.as_str())
    .bind(donor_user_id)
    .bind(donor_name)
    .bind(donor_email)
    .bind(new.child_id)
    .bind(new.campaign_id)
    .bind(new.created_at)
    .fetch_one(&mut **tx)
    .await?;
    let donation_id: i64 = rec.get("id");

    for item in &new.items {
        sqlx::query(
            "INSERT INTO donated_items (donation_id, name, quantity, description, estimated_value_minor) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(donation_id)
        .bind(&item.name)
        .bind(item.quantity)
        .bind(&item.description)
        .bind(item.estimated_value_minor)
        .execute(&mut **tx)
        .await?;
    }

    Ok(donation_id)
}

#[instrument(skip_all)]
pub async fn get_donation(pool: &Pool, donation_id: i64) -> Result<Donation> {
    let row = sqlx::query(&format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE id = ?"
    ))
    .bind(donation_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Err(CoreError::not_found("donation"));
    };
    donation_from_row(&row)
}

/// Lookup by checkout reference. When `scope_user_id` is given the search is
/// restricted to that user's own donations (the verify path's filter).
#[instrument(skip_all)]
pub async fn find_donation_by_ref(
    pool: &Pool,
    checkout_ref: &str,
    scope_user_id: Option<i64>,
) -> Result<Option<Donation>> {
    let row = match scope_user_id {
        Some(user_id) => {
            sqlx::query(&format!(
                "SELECT {DONATION_COLUMNS} FROM donations WHERE checkout_ref = ? AND donor_user_id = ?"
            ))
            .bind(checkout_ref)
            .bind(user_id)
            .fetch_optional(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {DONATION_COLUMNS} FROM donations WHERE checkout_ref = ?"
            ))
            .bind(checkout_ref)
            .fetch_optional(pool)
            .await?
        }
    };
    row.map(|r| donation_from_row(&r)).transpose()
}

pub async fn items_for_donation(pool: &Pool, donation_id: i64) -> Result<Vec<DonatedItem>> {
    let rows = sqlx::query(
        "SELECT id, donation_id, name, quantity, description, estimated_value_minor \
         FROM donated_items WHERE donation_id = ? ORDER BY id",
    )
    .bind(donation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| DonatedItem {
            id: row.get("id"),
            donation_id: row.get("donation_id"),
            name: row.get("name"),
            quantity: row.get("quantity"),
            description: row.try_get::<Option<String>, _>("description").ok().flatten(),
            estimated_value_minor: row
                .try_get::<Option<i64>, _>("estimated_value_minor")
                .ok()
                .flatten(),
        })
        .collect())
}

/// Compare-and-swap status transition: applies only while the row is still
/// pending. Returns false when the donation was already terminal, which the
/// caller treats as an idempotent no-op.
pub async fn transition_status_tx(
    tx: &mut Transaction<'_, Sqlite>,
    donation_id: i64,
    to: DonationStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE donations SET status = ?, resolved_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(to.as_str())
    .bind(now)
    .bind(donation_id)
    .execute(&mut **tx)
    .await?;
    Ok(res.rows_affected() == 1)
}

// ---- campaigns ----

#[instrument(skip_all)]
pub async fn insert_campaign(
    pool: &Pool,
    message: &str,
    target_amount_minor: Option<i64>,
    created_by: i64,
    images: &[String],
    now: DateTime<Utc>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let rec = sqlx::query(
        "INSERT INTO campaigns (message, target_amount_minor, created_by, created_at) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(message)
    .bind(target_amount_minor)
    .bind(created_by)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;
    let campaign_id: i64 = rec.get("id");

    for (idx, path) in images.iter().enumerate() {
        sqlx::query(
            "INSERT INTO campaign_images (campaign_id, position, path) VALUES (?, ?, ?)",
        )
        .bind(campaign_id)
        .bind(idx as i64 + 1)
        .bind(path)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(campaign_id)
}

async fn campaign_images(pool: &Pool, campaign_id: i64) -> Result<Vec<String>> {
    let images = sqlx::query_scalar::<_, String>(
        "SELECT path FROM campaign_images WHERE campaign_id = ? ORDER BY position",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(images)
}

fn campaign_from_row(row: &SqliteRow, images: Vec<String>) -> Campaign {
    Campaign {
        id: row.get("id"),
        message: row.get("message"),
        target_amount_minor: row
            .try_get::<Option<i64>, _>("target_amount_minor")
            .ok()
            .flatten(),
        is_completed: row.get::<i64, _>("is_completed") != 0,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        images,
    }
}

#[instrument(skip_all)]
pub async fn get_campaign(pool: &Pool, campaign_id: i64) -> Result<Campaign> {
    let row = sqlx::query(
        "SELECT id, message, target_amount_minor, is_completed, created_by, created_at \
         FROM campaigns WHERE id = ?",
    )
    .bind(campaign_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Err(CoreError::not_found("campaign"));
    };
    let images = campaign_images(pool, campaign_id).await?;
    Ok(campaign_from_row(&row, images))
}

pub async fn list_campaigns(pool: &Pool) -> Result<Vec<Campaign>> {
    let rows = sqlx::query(
        "SELECT id, message, target_amount_minor, is_completed, created_by, created_at \
         FROM campaigns ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    let mut campaigns = Vec::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.get("id");
        let images = campaign_images(pool, id).await?;
        campaigns.push(campaign_from_row(&row, images));
    }
    Ok(campaigns)
}

pub async fn mark_campaign_completed(pool: &Pool, campaign_id: i64) -> Result<()> {
    let res = sqlx::query("UPDATE campaigns SET is_completed = 1 WHERE id = ?")
        .bind(campaign_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(CoreError::not_found("campaign"));
    }
    Ok(())
}

/// Sum of received cash donations targeting the campaign, in minor units.
/// Pending and failed rows never count.
pub async fn sum_received_cash(pool: &Pool, campaign_id: i64) -> Result<i64> {
    let total: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(amount_minor) FROM donations \
         WHERE campaign_id = ? AND donation_type = 'cash' AND status = 'received'",
    )
    .bind(campaign_id)
    .fetch_one(pool)
    .await?;
    Ok(total.unwrap_or(0))
}

// ---- inventory ----

pub async fn get_inventory_row(pool: &Pool, key: &ItemKey) -> Result<Option<InventoryRow>> {
    let row = sqlx::query(
        "SELECT id, quantity, low_stock_threshold FROM inventory_items \
         WHERE item_name = ? AND category = ? AND location = ?",
    )
    .bind(&key.name)
    .bind(&key.category)
    .bind(&key.location)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| InventoryRow {
        id: row.get("id"),
        quantity: row.get("quantity"),
        low_stock_threshold: row
            .try_get::<Option<i64>, _>("low_stock_threshold")
            .ok()
            .flatten(),
    }))
}

/// Create the stock row at quantity 0 if it does not exist yet. Increases
/// only; the service rejects decreases against missing rows before this.
pub async fn ensure_inventory_row_tx(
    tx: &mut Transaction<'_, Sqlite>,
    key: &ItemKey,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO inventory_items (item_name, category, location, quantity) \
         VALUES (?, ?, ?, 0)",
    )
    .bind(&key.name)
    .bind(&key.category)
    .bind(&key.location)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Atomic conditional quantity change. The WHERE clause re-checks
/// non-negativity against the live row, so two racing decreases can never
/// both pass a stale check. Returns false when the guard rejected the write
/// or the row does not exist.
pub async fn apply_quantity_change_tx(
    tx: &mut Transaction<'_, Sqlite>,
    key: &ItemKey,
    change: i64,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE inventory_items SET quantity = quantity + ? \
         WHERE item_name = ? AND category = ? AND location = ? AND quantity + ? >= 0",
    )
    .bind(change)
    .bind(&key.name)
    .bind(&key.category)
    .bind(&key.location)
    .bind(change)
    .execute(&mut **tx)
    .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn inventory_row_tx(
    tx: &mut Transaction<'_, Sqlite>,
    key: &ItemKey,
) -> Result<Option<InventoryRow>> {
    let row = sqlx::query(
        "SELECT id, quantity, low_stock_threshold FROM inventory_items \
         WHERE item_name = ? AND category = ? AND location = ?",
    )
    .bind(&key.name)
    .bind(&key.category)
    .bind(&key.location)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|row| InventoryRow {
        id: row.get("id"),
        quantity: row.get("quantity"),
        low_stock_threshold: row
            .try_get::<Option<i64>, _>("low_stock_threshold")
            .ok()
            .flatten(),
    }))
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_adjustment_tx(
    tx: &mut Transaction<'_, Sqlite>,
    inventory_item_id: i64,
    adjustment_type: AdjustmentType,
    quantity_change: i64,
    quantity_before: i64,
    quantity_after: i64,
    reason: &str,
    notes: Option<&str>,
    actor_id: i64,
    source_donation_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO inventory_adjustments (inventory_item_id, adjustment_type, quantity_change, \
         quantity_before, quantity_after, reason, notes, actor_id, source_donation_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(inventory_item_id)
    .bind(adjustment_type.as_str())
    .bind(quantity_change)
    .bind(quantity_before)
    .bind(quantity_after)
    .bind(reason)
    .bind(notes)
    .bind(actor_id)
    .bind(source_donation_id)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

/// Full adjustment history for one stock row, oldest first. The ledger has
/// no update or delete path.
pub async fn adjustments_for_item(
    pool: &Pool,
    inventory_item_id: i64,
) -> Result<Vec<InventoryAdjustment>> {
    let rows = sqlx::query(
        "SELECT id, inventory_item_id, adjustment_type, quantity_change, quantity_before, \
         quantity_after, reason, notes, actor_id, source_donation_id, created_at \
         FROM inventory_adjustments WHERE inventory_item_id = ? ORDER BY id",
    )
    .bind(inventory_item_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let type_str: String = row.get("adjustment_type");
        let adjustment_type = AdjustmentType::parse(&type_str)
            .ok_or_else(|| decode_error(format!("unknown adjustment type '{type_str}'")))?;
        out.push(InventoryAdjustment {
            id: row.get("id"),
            inventory_item_id: row.get("inventory_item_id"),
            adjustment_type,
            quantity_change: row.get("quantity_change"),
            quantity_before: row.get("quantity_before"),
            quantity_after: row.get("quantity_after"),
            reason: row.get("reason"),
            notes: row.try_get::<Option<String>, _>("notes").ok().flatten(),
            actor_id: row.get("actor_id"),
            source_donation_id: row
                .try_get::<Option<i64>, _>("source_donation_id")
                .ok()
                .flatten(),
            created_at: row.get("created_at"),
        });
    }
    Ok(out)
}

// ---- outbox ----

#[instrument(skip_all)]
pub async fn enqueue_outbox(
    pool: &Pool,
    kind: OutboxKind,
    ref_id: i64,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = enqueue_outbox_tx(&mut tx, kind, ref_id, due_at).await?;
    tx.commit().await?;
    Ok(id)
}

pub async fn enqueue_outbox_tx(
    tx: &mut Transaction<'_, Sqlite>,
    kind: OutboxKind,
    ref_id: i64,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO outbox (kind, ref_id, attempt, due_at) VALUES (?, ?, 0, ?) RETURNING id",
    )
    .bind(kind.as_str())
    .bind(ref_id)
    .bind(due_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn next_due_outbox(pool: &Pool) -> Result<Option<OutboxTask>> {
    let row = sqlx::query(
        "SELECT id, kind, ref_id, attempt FROM outbox \
         WHERE datetime(due_at) <= CURRENT_TIMESTAMP ORDER BY datetime(due_at) ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| OutboxTask {
        id: row.get("id"),
        kind: row.get("kind"),
        ref_id: row.get("ref_id"),
        attempt: row.get("attempt"),
    }))
}

#[instrument(skip_all)]
pub async fn delete_outbox(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM outbox WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exponential backoff: 5s * 2^attempt, capped at `max_cap_secs` when > 0.
#[instrument(skip_all)]
pub async fn backoff_outbox_with_cap(
    pool: &Pool,
    id: i64,
    attempt: i32,
    max_cap_secs: i64,
) -> Result<()> {
    let secs = (5_i64) * (1_i64 << attempt.min(10));
    let cap = if max_cap_secs <= 0 { secs } else { max_cap_secs };
    let secs = secs.min(cap);
    sqlx::query(
        "UPDATE outbox SET attempt = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_remaining_outbox_tasks(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
