//! Daily retrain scheduler: parses a `M H * * *` cron form and fires
//! the retrain trigger at the next local wall-clock occurrence.

use chrono::{DateTime, Duration, Local, TimeZone, Timelike};
use tokio::sync::watch;
use tokio::time::Duration as TokioDuration;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule must have 5 fields, got {0}")]
    WrongFieldCount(usize),

    #[error("only the 'M H * * *' daily form is supported; fields 3-5 must be '*'")]
    UnsupportedForm,

    #[error("invalid minute: {0}")]
    InvalidMinute(String),

    #[error("invalid hour: {0}")]
    InvalidHour(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub minute: u32,
    pub hour: u32,
}

impl DailySchedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::WrongFieldCount(fields.len()));
        }
        if fields[2] != "*" || fields[3] != "*" || fields[4] != "*" {
            return Err(ScheduleError::UnsupportedForm);
        }
        let minute: u32 = fields[0]
            .parse()
            .map_err(|_| ScheduleError::InvalidMinute(fields[0].to_string()))?;
        let hour: u32 = fields[1]
            .parse()
            .map_err(|_| ScheduleError::InvalidHour(fields[1].to_string()))?;
        if minute > 59 {
            return Err(ScheduleError::InvalidMinute(fields[0].to_string()));
        }
        if hour > 23 {
            return Err(ScheduleError::InvalidHour(fields[1].to_string()));
        }
        Ok(Self { minute, hour })
    }

    /// The first instant at or after `now` with this schedule's hour and
    /// minute, in `now`'s own timezone.
    pub fn next_occurrence<Tz: chrono::TimeZone>(&self, now: DateTime<Tz>) -> DateTime<Tz> {
        let candidate = now
            .date_naive()
            .and_hms_opt(self.hour, self.minute, 0)
            .expect("validated hour/minute are in range");
        let candidate = now.timezone().from_local_datetime(&candidate).single().unwrap_or_else(|| now.clone());
        if candidate >= now {
            candidate
        } else {
            let next_day = now.date_naive() + Duration::days(1);
            let next = next_day.and_hms_opt(self.hour, self.minute, 0).unwrap();
            now.timezone().from_local_datetime(&next).single().unwrap_or(candidate)
        }
    }
}

/// Polls roughly every 30s; on each tick compares `now` against
/// `next_run_at` and invokes `on_fire` when due, advancing to the next
/// occurrence computed from `now + 1 minute` (matching the reference
/// "advance past the instant just fired" rule).
pub struct Scheduler {
    schedule: DailySchedule,
    enabled: bool,
    stop_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(schedule: DailySchedule, enabled: bool) -> (Self, watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        (
            Self {
                schedule,
                enabled,
                stop_tx,
            },
            stop_rx,
        )
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn run<F, Fut>(&self, mut stop_rx: watch::Receiver<bool>, mut on_fire: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if !self.enabled {
            return;
        }
        let mut next_run_at = self.schedule.next_occurrence(Local::now());
        let mut interval = tokio::time::interval(TokioDuration::from_secs(30));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Local::now();
                    if now >= next_run_at {
                        on_fire().await;
                        next_run_at = self.schedule.next_occurrence(now + Duration::minutes(1));
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_daily_form() {
        let schedule = DailySchedule::parse("30 6 * * *").unwrap();
        assert_eq!(schedule.minute, 30);
        assert_eq!(schedule.hour, 6);
    }

    #[test]
    fn rejects_non_daily_form() {
        let err = DailySchedule::parse("30 6 1 * *").unwrap_err();
        assert!(matches!(err, ScheduleError::UnsupportedForm));
    }

    #[test]
    fn rejects_out_of_range_hour() {
        let err = DailySchedule::parse("0 24 * * *").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidHour(_)));
    }

    #[test]
    fn next_occurrence_is_today_when_still_ahead() {
        let schedule = DailySchedule { minute: 0, hour: 6 };
        let now = Local.with_ymd_and_hms(2026, 1, 15, 1, 0, 0).unwrap();
        let next = schedule.next_occurrence(now);
        assert_eq!(next.date_naive(), now.date_naive());
        assert_eq!(next.hour(), 6);
    }

    #[test]
    fn next_occurrence_rolls_to_tomorrow_when_already_past() {
        let schedule = DailySchedule { minute: 0, hour: 6 };
        let now = Local.with_ymd_and_hms(2026, 1, 15, 7, 0, 0).unwrap();
        let next = schedule.next_occurrence(now);
        assert_eq!(next.date_naive(), now.date_naive() + Duration::days(1));
    }
}
