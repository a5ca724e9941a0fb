//! Per-day external-call quota ledger: `(day, run_id) -> count`, guarded
//! by a process-wide lock for atomic read-modify-write.

use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("invalid time zone: {0}")]
    InvalidTimeZone(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Localizes `moment` to `time_zone`, subtracting a day when the local
/// hour is before `reset_hour`.
pub fn quota_day_for(
    moment: DateTime<Utc>,
    time_zone: &str,
    reset_hour: u8,
) -> Result<chrono::NaiveDate, QuotaError> {
    let tz: Tz = time_zone
        .parse()
        .map_err(|_| QuotaError::InvalidTimeZone(time_zone.to_string()))?;
    let local = moment.with_timezone(&tz);
    let date = if (local.hour() as u8) < reset_hour {
        local.date_naive() - chrono::Duration::days(1)
    } else {
        local.date_naive()
    };
    Ok(date)
}

pub struct QuotaLedger {
    pool: SqlitePool,
    lock: Mutex<()>,
}

impl QuotaLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock: Mutex::new(()),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), QuotaError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_usage (
                day TEXT NOT NULL,
                run_id TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (day, run_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_daily_usage(&self, day: chrono::NaiveDate) -> Result<i64, QuotaError> {
        let total: Option<i64> =
            sqlx::query_scalar("SELECT SUM(count) FROM quota_usage WHERE day = ?")
                .bind(day.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(total.unwrap_or(0))
    }

    /// Atomic read-modify-write under the process-wide lock.
    pub async fn increment(
        &self,
        day: chrono::NaiveDate,
        run_id: &str,
        n: i64,
    ) -> Result<(), QuotaError> {
        let _guard = self.lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO quota_usage (day, run_id, count) VALUES (?, ?, ?)
            ON CONFLICT(day, run_id) DO UPDATE SET count = count + excluded.count
            "#,
        )
        .bind(day.to_string())
        .bind(run_id)
        .bind(n)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuotaOutcome {
    Completed,
    Partial { reason: &'static str },
}

/// Takes the first `max(dailyLimit - used, 0)` inputs as the dispatchable
/// subset for this call.
pub fn dispatchable_count(daily_limit: i64, used: i64, requested: usize) -> (usize, QuotaOutcome) {
    let remaining = (daily_limit - used).max(0) as usize;
    let dispatch = remaining.min(requested);
    let outcome = if dispatch == requested {
        QuotaOutcome::Completed
    } else {
        QuotaOutcome::Partial {
            reason: "quota-reached",
        }
    };
    (dispatch, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_day_for_utc_no_shift_at_midnight_reset() {
        let moment = Utc.with_ymd_and_hms(2026, 1, 15, 1, 0, 0).unwrap();
        let day = quota_day_for(moment, "UTC", 0).unwrap();
        assert_eq!(day, chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
    }

    #[test]
    fn quota_day_for_shifts_back_before_reset_hour() {
        let moment = Utc.with_ymd_and_hms(2026, 1, 15, 1, 0, 0).unwrap();
        let day = quota_day_for(moment, "UTC", 2).unwrap();
        assert_eq!(day, chrono::NaiveDate::from_ymd_opt(2026, 1, 14).unwrap());
    }

    #[test]
    fn quota_day_for_rejects_invalid_zone() {
        let moment = Utc::now();
        let err = quota_day_for(moment, "Not/AZone", 0).unwrap_err();
        assert!(matches!(err, QuotaError::InvalidTimeZone(_)));
    }

    #[test]
    fn dispatchable_count_caps_at_remaining_quota() {
        let (count, outcome) = dispatchable_count(2, 0, 4);
        assert_eq!(count, 2);
        assert_eq!(outcome, QuotaOutcome::Partial { reason: "quota-reached" });
    }

    #[test]
    fn dispatchable_count_completes_when_quota_covers_request() {
        let (count, outcome) = dispatchable_count(10, 0, 4);
        assert_eq!(count, 4);
        assert_eq!(outcome, QuotaOutcome::Completed);
    }
}
