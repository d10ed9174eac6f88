//! Clock math: cron parsing and next-fire evaluation in a fixed timezone,
//! one-shot fire-time resolution, countdowns and timestamp rendering.

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use croner::Cron;
use cronhook_core::FireAt;
use serde::Serialize;

use crate::error::SchedulerError;

/// A validated cron expression.
///
/// Five-field crontab expressions are widened to six fields with a `0`
/// seconds column, the form the cron scheduler requires.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    normalized: String,
    cron: Cron,
}

impl CronExpression {
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` if the expression has the wrong
    /// number of fields or does not parse.
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => format!("0 {}", fields.join(" ")),
            6 => fields.join(" "),
            n => {
                return Err(SchedulerError::validation(format!(
                    "invalid cron expression '{expression}': expected 5 or 6 fields, got {n}"
                )))
            }
        };

        let cron = Cron::new(&normalized)
            .with_seconds_required()
            .with_dom_and_dow()
            .parse()
            .map_err(|e| {
                SchedulerError::validation(format!("invalid cron expression '{expression}': {e}"))
            })?;

        Ok(Self {
            source: expression.trim().to_string(),
            normalized,
            cron,
        })
    }

    /// The expression as supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The six-field form handed to the cron scheduler.
    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Next fire time strictly after `after`, evaluated in `tz`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        self.cron
            .find_next_occurrence(&after.with_timezone(&tz), false)
            .ok()
            .map(|next| next.with_timezone(&Utc))
    }
}

/// Validate a repetition count supplied by a caller.
pub(crate) fn validate_repetitions(repetitions: i64) -> Result<u32, SchedulerError> {
    if repetitions < 1 {
        return Err(SchedulerError::validation(
            "repetitions must be at least 1",
        ));
    }
    u32::try_from(repetitions)
        .map_err(|_| SchedulerError::validation(format!("repetitions {repetitions} is too large")))
}

/// Resolve a one-shot fire time to a delay in milliseconds from `now`.
///
/// # Errors
///
/// Returns `SchedulerError::Validation` unless the delay is strictly positive
/// and lands on a representable date.
pub fn resolve_fire_at(fire_at: &FireAt, now: DateTime<Utc>) -> Result<u64, SchedulerError> {
    let delay_ms = match fire_at {
        FireAt::Delay(ms) => i64::try_from(*ms).unwrap_or(i64::MAX),
        FireAt::At(at) => (at.with_timezone(&Utc) - now).num_milliseconds(),
    };

    if delay_ms <= 0 {
        return Err(SchedulerError::validation(
            "invalid date, must be in the future",
        ));
    }

    let representable = chrono::TimeDelta::try_milliseconds(delay_ms)
        .and_then(|delay| now.checked_add_signed(delay))
        .is_some();
    if !representable {
        return Err(SchedulerError::validation(
            "invalid date, out of the supported range",
        ));
    }

    u64::try_from(delay_ms)
        .map_err(|_| SchedulerError::validation("invalid date, must be in the future"))
}

/// Time left until a job's next run, floored to whole units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Countdown {
    /// A countdown to `target`; zero once `target` has passed.
    #[must_use]
    pub fn until(target: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let total = (target - now).num_seconds().max(0);
        Self {
            days: total / 86_400,
            hours: (total % 86_400) / 3_600,
            minutes: (total % 3_600) / 60,
            seconds: total % 60,
        }
    }
}

/// Render a timestamp in the operational timezone, RFC 3339 with seconds.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz)
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[cfg(test)]
#[path = "schedule_test.rs"]
mod tests;
