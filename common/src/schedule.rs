// Schedule parsing and next-fire calculation
//
// The job schedule is a cron expression evaluated in a configured timezone,
// with an enable flag. Parsing happens at configuration load so a malformed
// expression is rejected before any Run can start.

use crate::errors::ConfigError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Parse and validate a cron expression
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ConfigError> {
    CronSchedule::from_str(expression).map_err(|e| ConfigError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// A validated recurrence rule plus its enable flag
#[derive(Debug, Clone)]
pub struct JobSchedule {
    cron: CronSchedule,
    timezone: Tz,
    pub enabled: bool,
}

impl JobSchedule {
    /// Build a schedule from raw configuration values. Fails fast on a
    /// malformed expression or unknown timezone.
    pub fn parse(expression: &str, timezone: &str, enabled: bool) -> Result<Self, ConfigError> {
        let cron = parse_cron_expression(expression)?;
        let timezone =
            Tz::from_str(timezone).map_err(|_| ConfigError::InvalidTimezone(timezone.to_string()))?;
        Ok(Self {
            cron,
            timezone,
            enabled,
        })
    }

    /// Next fire time strictly after `after`, in UTC.
    ///
    /// The expression is evaluated in the job's timezone, so "daily at 02:00"
    /// means local 02:00 regardless of the host clock.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let after_in_tz = after.with_timezone(&self.timezone);
        self.cron
            .after(&after_in_tz)
            .next()
            .map(|next| next.with_timezone(&Utc))
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}
