//! Campaign persistence and the funding aggregator.
//!
//! Campaign progress is derived on read, never stored. Every view (list,
//! detail, donation-success) goes through `funding_summary` so the formula
//! cannot drift between call sites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::instrument;

use crate::db;
use crate::error::{CoreError, Result};
use crate::model::Campaign;

pub const MAX_CAMPAIGN_IMAGES: usize = 10;
pub const MAX_CAMPAIGN_MESSAGE_LEN: usize = 5000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FundingSummary {
    pub total_raised_minor: i64,
    pub progress_pct: f64,
    pub remaining_minor: i64,
    pub goal_reached: bool,
    pub completed: bool,
}

/// The one authoritative progress computation. `total_raised_minor` is the
/// sum of received cash donations targeting the campaign.
pub fn summarize(total_raised_minor: i64, target_amount_minor: Option<i64>, completed: bool) -> FundingSummary {
    let (progress_pct, remaining_minor, goal_reached) = match target_amount_minor {
        Some(target) if target > 0 => {
            let pct = (total_raised_minor as f64 / target as f64) * 100.0;
            (
                pct.min(100.0),
                (target - total_raised_minor).max(0),
                total_raised_minor >= target,
            )
        }
        // No target: progress stays at 0 and there is nothing remaining.
        _ => (0.0, 0, false),
    };
    FundingSummary {
        total_raised_minor,
        progress_pct,
        remaining_minor,
        goal_reached,
        completed,
    }
}

#[instrument(skip_all, fields(campaign_id))]
pub async fn funding_summary(pool: &SqlitePool, campaign_id: i64) -> Result<FundingSummary> {
    let campaign = db::get_campaign(pool, campaign_id).await?;
    let total = db::sum_received_cash(pool, campaign_id).await?;
    Ok(summarize(total, campaign.target_amount_minor, campaign.is_completed))
}

#[instrument(skip_all)]
pub async fn create_campaign(
    pool: &SqlitePool,
    message: &str,
    target_amount_minor: Option<i64>,
    created_by: i64,
    images: &[String],
    now: DateTime<Utc>,
) -> Result<i64> {
    if message.trim().is_empty() {
        return Err(CoreError::validation("message", "must be non-empty"));
    }
    if message.len() > MAX_CAMPAIGN_MESSAGE_LEN {
        return Err(CoreError::validation(
            "message",
            format!("must be at most {MAX_CAMPAIGN_MESSAGE_LEN} characters"),
        ));
    }
    if let Some(target) = target_amount_minor {
        if target <= 0 {
            return Err(CoreError::validation("target_amount", "must be positive"));
        }
    }
    if images.is_empty() || images.len() > MAX_CAMPAIGN_IMAGES {
        return Err(CoreError::validation(
            "images",
            format!("must contain between 1 and {MAX_CAMPAIGN_IMAGES} entries"),
        ));
    }

    db::insert_campaign(pool, message, target_amount_minor, created_by, images, now).await
}

pub async fn get_campaign(pool: &SqlitePool, campaign_id: i64) -> Result<Campaign> {
    db::get_campaign(pool, campaign_id).await
}

pub async fn list_campaigns(pool: &SqlitePool) -> Result<Vec<Campaign>> {
    db::list_campaigns(pool).await
}

/// Staff action closing a campaign to new attention. Donations referencing
/// it are kept untouched.
pub async fn complete_campaign(pool: &SqlitePool, campaign_id: i64) -> Result<()> {
    db::mark_campaign_completed(pool, campaign_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_target_means_zero_progress() {
        let s = summarize(500_000, None, false);
        assert_eq!(s.progress_pct, 0.0);
        assert_eq!(s.remaining_minor, 0);
        assert!(!s.goal_reached);
        assert_eq!(s.total_raised_minor, 500_000);
    }

    #[test]
    fn progress_capped_at_hundred() {
        let s = summarize(1_500_000, Some(1_000_000), false);
        assert_eq!(s.progress_pct, 100.0);
        assert_eq!(s.remaining_minor, 0);
        assert!(s.goal_reached);
    }

    #[test]
    fn partial_progress() {
        let s = summarize(500_000, Some(1_000_000), false);
        assert_eq!(s.progress_pct, 50.0);
        assert_eq!(s.remaining_minor, 500_000);
        assert!(!s.goal_reached);
    }

    #[test]
    fn exact_goal_is_reached() {
        let s = summarize(1_000_000, Some(1_000_000), true);
        assert_eq!(s.progress_pct, 100.0);
        assert_eq!(s.remaining_minor, 0);
        assert!(s.goal_reached);
        assert!(s.completed);
    }
}
