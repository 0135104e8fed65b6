use thiserror::Error;

/// Crate specific Errors implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Error {
    /// Empty cron expression string.
    #[error("empty cron expression")]
    EmptyExpression,
    /// Cron expression with fewer than five fields.
    #[error("missing field(s) in cron expression")]
    MissingFields,
    /// Unknown `@name` expression.
    #[error("unrecognized named cron expression: {0}")]
    UnknownNamed(String),
    /// Malformed entry in a cron field.
    #[error("syntax error in {field} field: '{entry}'")]
    Syntax {
        /// Name of the offending field.
        field: &'static str,
        /// The entry as written.
        entry: String,
    },
    /// Entry value outside the field's legal range.
    #[error("value out of range in {field} field: '{entry}'")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The entry as written.
        entry: String,
    },
    /// Step outside `1..=max-min` for the field.
    #[error("illegal step in {field} field: '{entry}'")]
    IllegalStep {
        /// Name of the offending field.
        field: &'static str,
        /// The entry as written.
        entry: String,
    },
    /// Schedule yields no fire time at submission.
    #[error("schedule is empty, never a scheduled time to arrive")]
    ScheduleEmpty,
    /// Period below the one-millisecond floor.
    #[error("period must be at least one millisecond")]
    PeriodTooSmall,
    /// Operation on a scheduler that has been shut down.
    #[error("scheduler is terminated")]
    SchedulerTerminated,
}
