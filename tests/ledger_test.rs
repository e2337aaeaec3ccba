use chrono::Utc;

use donation_ledger::db;
use donation_ledger::error::CoreError;
use donation_ledger::inventory::{self, AdjustOptions};
use donation_ledger::model::{AdjustmentType, ItemKey, StockStatus};

async fn setup_pool() -> (sqlx::SqlitePool, tempfile::TempDir) {
    let td = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/ledger.db?mode=rwc", td.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (pool, td)
}

fn opts(reason: &str) -> AdjustOptions {
    AdjustOptions {
        reason: reason.into(),
        notes: None,
        actor_id: 1,
        source_donation_id: None,
        adjustment_type: None,
    }
}

#[tokio::test]
async fn replaying_the_ledger_reproduces_the_quantity() {
    let (pool, _td) = setup_pool().await;
    let key = ItemKey::new("Soap", "hygiene", "main");

    // A mix of increases, decreases and rejected over-draws.
    let changes: [i64; 7] = [10, -4, 3, -12, 5, -1, -2];
    let mut expected = 0_i64;
    for change in changes {
        let res = inventory::adjust(&pool, &key, change, &opts("stock movement"), Utc::now()).await;
        if expected + change >= 0 {
            let outcome = res.unwrap();
            expected += change;
            assert_eq!(outcome.new_quantity, expected);
        } else {
            // Rejected adjustments leave no ledger row and no quantity change.
            assert!(matches!(res.unwrap_err(), CoreError::InvalidAdjustment { .. }));
        }
    }

    let item = inventory::get_item(&pool, &key).await.unwrap();
    assert_eq!(item.quantity, expected);

    let (replayed, rows) = inventory::replay_ledger(&pool, &key).await.unwrap();
    assert_eq!(replayed, expected);
    // Every row is internally consistent and chains onto its predecessor.
    let mut running = 0_i64;
    for row in &rows {
        assert_eq!(row.quantity_before, running);
        assert_eq!(row.quantity_after, row.quantity_before + row.quantity_change);
        running = row.quantity_after;
    }
}

#[tokio::test]
async fn decrease_against_missing_item_is_a_validation_error() {
    let (pool, _td) = setup_pool().await;
    let key = ItemKey::new("Ghost item", "general", "main");

    let err = inventory::adjust(&pool, &key, -1, &opts("typo"), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { field: "item_key", .. }));

    // No row was created as a side effect.
    assert!(db::get_inventory_row(&pool, &key).await.unwrap().is_none());
}

#[tokio::test]
async fn increase_creates_the_row_at_zero_first() {
    let (pool, _td) = setup_pool().await;
    let key = ItemKey::new("Notebook", "school", "annex");

    let outcome = inventory::adjust(&pool, &key, 7, &opts("donation drive"), Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome.new_quantity, 7);

    let (_, rows) = inventory::replay_ledger(&pool, &key).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity_before, 0);
    assert_eq!(rows[0].quantity_after, 7);
    assert_eq!(rows[0].adjustment_type, AdjustmentType::Increase);
}

#[tokio::test]
async fn over_draw_is_rejected_with_operator_detail() {
    let (pool, _td) = setup_pool().await;
    let key = ItemKey::new("Shoes", "clothing", "main");
    inventory::adjust(&pool, &key, 3, &opts("stocktake"), Utc::now())
        .await
        .unwrap();

    let err = inventory::adjust(&pool, &key, -5, &opts("distribution"), Utc::now())
        .await
        .unwrap_err();
    match err {
        CoreError::InvalidAdjustment { current, requested } => {
            assert_eq!(current, 3);
            assert_eq!(requested, -5);
        }
        other => panic!("expected InvalidAdjustment, got {other:?}"),
    }

    // Quantity unchanged, single ledger row.
    let item = inventory::get_item(&pool, &key).await.unwrap();
    assert_eq!(item.quantity, 3);
    let (_, rows) = inventory::replay_ledger(&pool, &key).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn stock_status_follows_quantity_and_threshold() {
    let (pool, _td) = setup_pool().await;
    let key = ItemKey::new("Milk formula", "food", "main");

    inventory::adjust(&pool, &key, 4, &opts("stocktake"), Utc::now())
        .await
        .unwrap();
    let item = inventory::get_item(&pool, &key).await.unwrap();
    assert_eq!(item.stock_status(), StockStatus::Critical);

    inventory::adjust(&pool, &key, 8, &opts("restock"), Utc::now())
        .await
        .unwrap();
    let item = inventory::get_item(&pool, &key).await.unwrap();
    assert_eq!(item.stock_status(), StockStatus::Low);

    inventory::adjust(&pool, &key, 30, &opts("bulk donation"), Utc::now())
        .await
        .unwrap();
    let item = inventory::get_item(&pool, &key).await.unwrap();
    assert_eq!(item.stock_status(), StockStatus::Good);
}

#[tokio::test]
async fn rejected_adjustment_validations() {
    let (pool, _td) = setup_pool().await;
    let key = ItemKey::new("Towels", "hygiene", "main");

    let err = inventory::adjust(&pool, &key, 1, &opts("  "), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { field: "reason", .. }));

    let blank = ItemKey::new("", "hygiene", "main");
    let err = inventory::adjust(&pool, &blank, 1, &opts("stocktake"), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { field: "item_key", .. }));
}
