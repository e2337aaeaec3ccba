use crate::db;
use crate::error::Result;
use crate::model::OutboxKind;
use crate::receipt::ReceiptService;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

/// Pick up the next due outbox task and dispatch it. Returns true when a
/// task was processed (successfully or with a backoff), false when the queue
/// had nothing due. Delivery is at-least-once: the task is deleted only
/// after the collaborator accepted it.
#[instrument(skip_all)]
pub async fn process_next_task(
    pool: &SqlitePool,
    receipts: &dyn ReceiptService,
    max_backoff_secs: i64,
) -> Result<bool> {
    if let Some(task) = db::next_due_outbox(pool).await? {
        let Some(kind) = OutboxKind::parse(&task.kind) else {
            warn!(id = task.id, kind = %task.kind, "unknown outbox kind; dropping task");
            db::delete_outbox(pool, task.id).await?;
            return Ok(true);
        };
        let res = match kind {
            OutboxKind::SendReceipt => receipts.send_receipt(task.ref_id).await,
        };
        match res {
            Ok(_) => {
                db::delete_outbox(pool, task.id).await?;
                info!(id = task.id, kind = %task.kind, ref_id = task.ref_id, "outbox task succeeded");
            }
            Err(err) => {
                warn!(
                    ?err,
                    id = task.id,
                    kind = %task.kind,
                    ref_id = task.ref_id,
                    attempt = task.attempt,
                    "outbox task failed; backoff"
                );
                db::backoff_outbox_with_cap(pool, task.id, task.attempt, max_backoff_secs).await?;
            }
        }
        return Ok(true);
    }
    Ok(false)
}
