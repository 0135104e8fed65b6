//! Independently scheduled jobs: one timer thread per job, no shared queue.
//!
//! A convenience layer over the same [`Schedule`] abstraction used by the
//! [`Scheduler`](crate::Scheduler); useful for a handful of fire-and-forget
//! jobs that do not need handles, snapshots or a common shutdown.
use crate::cron::Expression;
use crate::schedule::Schedule;
use crate::utils;
use crate::Result;
use chrono::Local;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Handler for panics escaping an independently scheduled job.
pub type IndPanicHandler = Arc<dyn Fn(&(dyn Any + Send)) + Send + Sync>;

type SafeRun = Arc<dyn Fn() + Send + Sync>;

/// Cancellation guard of an independently scheduled job.
///
/// The job stops at [`Canceller::cancel`] or when the guard is dropped,
/// whichever comes first. A running invocation is not interrupted.
pub struct Canceller {
    tx: Sender<()>,
}

impl Canceller {
    /// Stops the job. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Runs `f` first after `initial_delay` and then at every `period`.
///
/// Each firing runs in a thread of its own: if an execution takes longer
/// than the period, multiple instances of `f` run at the same time.
pub fn ind_period<F>(
    initial_delay: Duration,
    period: Duration,
    f: F,
    panic_handler: Option<IndPanicHandler>,
) -> Canceller
where
    F: Fn() + Send + Sync + 'static,
{
    let (tx, rx) = bounded(1);
    let run = safe_wrap(f, panic_handler);

    thread::spawn(move || {
        if !timer_expired(&rx, initial_delay) {
            return;
        }
        spawn_run(&run);

        loop {
            if !timer_expired(&rx, period) {
                return;
            }
            spawn_run(&run);
        }
    });

    Canceller { tx }
}

/// Runs `f` first after `initial_delay` and then `delay` after each run
/// completes.
///
/// Unlike [`ind_period`], executions run on the timer thread itself, so two
/// instances of `f` never overlap.
pub fn ind_delay<F>(
    initial_delay: Duration,
    delay: Duration,
    f: F,
    panic_handler: Option<IndPanicHandler>,
) -> Canceller
where
    F: Fn() + Send + Sync + 'static,
{
    let (tx, rx) = bounded(1);
    let run = safe_wrap(f, panic_handler);

    thread::spawn(move || {
        let mut next_delay = initial_delay;
        loop {
            if !timer_expired(&rx, next_delay) {
                return;
            }
            (*run)();
            next_delay = delay;
        }
    });

    Canceller { tx }
}

/// Runs `f` according to a cron expression, evaluated in the local zone.
pub fn ind_cron<F>(expression: &str, f: F, panic_handler: Option<IndPanicHandler>) -> Result<Canceller>
where
    F: Fn() + Send + Sync + 'static,
{
    let expression = Expression::parse(expression)?;
    Ok(ind_schedule(expression, f, panic_handler))
}

/// Runs `f` according to the given schedule, evaluated in the local zone.
///
/// The job ends on its own when the schedule returns no further firing.
pub fn ind_schedule<S, F>(schedule: S, f: F, panic_handler: Option<IndPanicHandler>) -> Canceller
where
    S: Schedule<Local> + 'static,
    F: Fn() + Send + Sync + 'static,
{
    let (tx, rx) = bounded(1);
    let run = safe_wrap(f, panic_handler);

    thread::spawn(move || {
        let mut schedule = schedule;
        let mut next = Local::now();

        loop {
            let Some(upcoming) = schedule.next(&next) else {
                return;
            };
            next = upcoming;

            // an already expired firing runs immediately
            let delay = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
            if !timer_expired(&rx, delay) {
                return;
            }
            spawn_run(&run);
        }
    });

    Canceller { tx }
}

/// Waits out `duration` on the cancel channel; `false` means cancelled.
fn timer_expired(rx: &Receiver<()>, duration: Duration) -> bool {
    matches!(rx.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
}

fn spawn_run(run: &SafeRun) {
    let run = Arc::clone(run);
    thread::spawn(move || (*run)());
}

fn safe_wrap<F>(f: F, panic_handler: Option<IndPanicHandler>) -> SafeRun
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(move || {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(&f)) {
            match &panic_handler {
                Some(handler) => {
                    let _ = panic::catch_unwind(AssertUnwindSafe(|| (**handler)(panic.as_ref())));
                }
                None => eprintln!("panic: {}", utils::panic_message(panic.as_ref())),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn period_fires_and_stops_on_cancel() {
        let counter = Arc::new(AtomicI32::new(0));
        let canceller = {
            let counter = Arc::clone(&counter);
            ind_period(
                Duration::ZERO,
                Duration::from_millis(20),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
        };

        thread::sleep(Duration::from_millis(110));
        canceller.cancel();

        // let workers spawned before the cancel finish
        thread::sleep(Duration::from_millis(50));
        let after_cancel = counter.load(Ordering::SeqCst);
        assert!(after_cancel >= 3, "counter = {after_cancel}");

        thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn delay_runs_serially() {
        let counter = Arc::new(AtomicI32::new(0));
        let _canceller = {
            let counter = Arc::clone(&counter);
            ind_delay(
                Duration::ZERO,
                Duration::from_millis(30),
                move || {
                    // longer than the delay: the serial loop absorbs it
                    thread::sleep(Duration::from_millis(40));
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
        };

        thread::sleep(Duration::from_millis(100));
        let count = counter.load(Ordering::SeqCst);
        assert!((1..=2).contains(&count), "counter = {count}");
    }

    #[test]
    fn dropping_the_guard_cancels() {
        let counter = Arc::new(AtomicI32::new(0));
        {
            let counter = Arc::clone(&counter);
            let _canceller = ind_period(
                Duration::from_millis(30),
                Duration::from_millis(30),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                None,
            );
        }

        thread::sleep(Duration::from_millis(80));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panic_handler_receives_the_payload() {
        let seen = Arc::new(AtomicI32::new(0));
        let handler: IndPanicHandler = {
            let seen = Arc::clone(&seen);
            Arc::new(move |panic| {
                assert_eq!(utils::panic_message(panic), "kaboom");
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };

        let canceller = ind_period(
            Duration::ZERO,
            Duration::from_millis(500),
            || panic!("kaboom"),
            Some(handler),
        );

        thread::sleep(Duration::from_millis(100));
        canceller.cancel();
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn bad_cron_is_rejected() {
        assert!(ind_cron("*/61 * * * * *", || {}, None).is_err());
    }
}
