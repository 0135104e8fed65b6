//! In-process job scheduler with a fast bitmask cron expression engine.
//!
//! A [`Scheduler`] fires user-provided jobs at times produced by pluggable
//! [`Schedule`]s: cron [`Expression`]s, one-shot [`After`] delays, fixed
//! [`Period`]s, or algebraic combinations built with [`Union`], [`Minus`]
//! and [`Intersect`]. A single dispatch thread owns the deadline-ordered job
//! queue; every firing runs isolated in a worker thread, and panics in job
//! code are contained and handed to a configurable handler.
//!
//! The cron engine accepts classic five-field expressions as well as the
//! extended six- and seven-field forms with seconds and years, `@named`
//! shortcuts, and the `L`, `LW`, `{day}W`, `{dow}L` and `{dow}#{n}`
//! specifiers. Every field is encoded as a 64-bit mask, so finding the next
//! matching instant is a handful of shift-and-count-leading-zeros steps
//! rather than a calendar walk.
//!
//! # Examples
//!
//! ```rust
//! use sched_lite::{Expression, Scheduler};
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new();
//! let (tx, rx) = mpsc::sync_channel(1);
//!
//! // A one-shot job, tagged for identification.
//! scheduler.after_fn(Duration::from_millis(5), move || {
//!     let _ = tx.try_send(());
//! }, "ping")?;
//! rx.recv().unwrap();
//!
//! // Cron expressions work standalone as well.
//! let expr = Expression::parse("0 0 9 * * mon-fri")?;
//! let workdays: Vec<_> = expr.iter(&chrono::Utc::now()).take(5).collect();
//! assert_eq!(workdays.len(), 5);
//!
//! scheduler.shutdown_and_wait();
//! # Ok::<(), sched_lite::Error>(())
//! ```
#![deny(unsafe_code, warnings, missing_docs)]

/// Cron expression parsing and evaluation.
pub mod cron;
/// Crate specific Errors implementation.
pub mod error;
mod independent;
mod job;
mod queue;
mod schedule;
mod scheduler;
mod utils;

/// Re-export of public entities.
pub use cron::Expression;
pub use error::Error;
pub use independent::{ind_cron, ind_delay, ind_period, ind_schedule, Canceller, IndPanicHandler};
pub use job::{Job, JobFn, ManagedJob};
pub use schedule::{After, Intersect, Minus, Period, Schedule, ScheduleFn, Union};
pub use scheduler::{PanicHandler, Scheduler};

/// Convenient alias for `Result`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
