use crate::{
    cron::Expression,
    job::{Job, JobFn, ManagedJob},
    queue::JobQueue,
    schedule::{After, Period, Schedule},
    utils::{self, WaitGroup},
    Error, Result,
};
use chrono::{DateTime, Local, TimeZone, Utc};
use crossbeam_channel::{after, bounded, select, Receiver, Sender};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Timer deadline used while the queue is empty.
const FAR_FUTURE: Duration = Duration::from_secs(100_000 * 3600);

/// Handler for panics escaping a job's body.
///
/// Receives the job's handle and the panic payload. The handler may log,
/// record, and/or [`cancel`](ManagedJob::cancel) the job; panics from the
/// handler itself are swallowed.
pub type PanicHandler<T, Tz> = Arc<dyn Fn(&Arc<ManagedJob<T, Tz>>, &(dyn Any + Send)) + Send + Sync>;

struct Core<T, Tz: TimeZone> {
    tz: Tz,
    count: AtomicUsize,
    terminated: AtomicBool,
    panic_handler: Mutex<PanicHandler<T, Tz>>,
    /// Tracks the dispatch thread and every spawned worker.
    threads: WaitGroup,
}

/// A registry of scheduled jobs.
///
/// Once a job is posted, the scheduler is responsible for executing it
/// whenever its [`Schedule`] triggers. One long-lived dispatch thread owns
/// the deadline-ordered job queue and serialises submissions, cancellations,
/// snapshots and firings; each firing runs in a worker thread of its own, so
/// a slow or panicking job never stalls the queue.
///
/// `T` is an application-provided tag carried by every job handle; `Tz` is
/// the zone the scheduler's clock runs in (the local zone by default).
///
/// Dropping the scheduler shuts it down without waiting for in-flight jobs;
/// call [`Scheduler::shutdown_and_wait`] for a clean handover.
///
/// # Examples
///
/// ```rust
/// use sched_lite::Scheduler;
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// let scheduler = Scheduler::new();
/// let (tx, rx) = mpsc::sync_channel(1);
///
/// scheduler.after_fn(Duration::from_millis(10), move || {
///     let _ = tx.try_send("fired");
/// }, "one-shot")?;
///
/// assert_eq!(rx.recv().unwrap(), "fired");
/// scheduler.shutdown_and_wait();
/// # Ok::<(), sched_lite::Error>(())
/// ```
pub struct Scheduler<T, Tz: TimeZone = Local> {
    core: Arc<Core<T, Tz>>,
    add_tx: Sender<Arc<ManagedJob<T, Tz>>>,
    remove_tx: Sender<Arc<ManagedJob<T, Tz>>>,
    snapshot_tx: Sender<Sender<Vec<Arc<ManagedJob<T, Tz>>>>>,
    shutdown_tx: Sender<()>,
}

impl<T> Scheduler<T, Local>
where
    T: fmt::Debug + Send + Sync + 'static,
{
    /// Creates a scheduler running in the local time zone.
    pub fn new() -> Self {
        Self::with_timezone(Local)
    }
}

impl<T> Default for Scheduler<T, Local>
where
    T: fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, Tz> Scheduler<T, Tz>
where
    T: fmt::Debug + Send + Sync + 'static,
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Send + Sync,
{
    /// Creates a scheduler running in the given time zone.
    pub fn with_timezone(tz: Tz) -> Self {
        // Rendezvous channels: callers observe back-pressure and the loop
        // handles requests in submission order.
        let (add_tx, add_rx) = bounded(0);
        let (remove_tx, remove_rx) = bounded(0);
        let (snapshot_tx, snapshot_rx) = bounded(0);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let default_handler: PanicHandler<T, Tz> = Arc::new(default_panic_handler::<T, Tz>);
        let core = Arc::new(Core {
            tz,
            count: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
            panic_handler: Mutex::new(default_handler),
            threads: WaitGroup::new(),
        });

        core.threads.add(1);
        let dispatch_core = Arc::clone(&core);
        thread::Builder::new()
            .name("sched-lite-dispatch".to_string())
            .spawn(move || dispatch(dispatch_core, add_rx, remove_rx, snapshot_rx, shutdown_rx))
            .expect("failed to spawn the dispatch thread");

        Self {
            core,
            add_tx,
            remove_tx,
            snapshot_tx,
            shutdown_tx,
        }
    }

    /// Posts a job with an arbitrary [`Schedule`].
    ///
    /// The first fire time is computed before the job is enqueued; a
    /// schedule with no upcoming firing is rejected with
    /// [`Error::ScheduleEmpty`]. After shutdown, posting fails with
    /// [`Error::SchedulerTerminated`].
    pub fn post<S, J>(&self, schedule: S, job: J, tag: T) -> Result<Arc<ManagedJob<T, Tz>>>
    where
        S: Schedule<Tz> + 'static,
        J: Job + 'static,
    {
        self.post_boxed(Box::new(schedule), Arc::new(job), tag)
    }

    /// Posts a closure with an arbitrary [`Schedule`].
    pub fn post_fn<S, F>(&self, schedule: S, f: F, tag: T) -> Result<Arc<ManagedJob<T, Tz>>>
    where
        S: Schedule<Tz> + 'static,
        F: Fn() + Send + Sync + 'static,
    {
        self.post(schedule, JobFn(f), tag)
    }

    /// Posts a job that executes once after the specified delay, then is
    /// removed from the scheduler.
    pub fn after<J>(&self, delay: Duration, job: J, tag: T) -> Result<Arc<ManagedJob<T, Tz>>>
    where
        J: Job + 'static,
    {
        self.post(After::new(delay), job, tag)
    }

    /// Posts a closure that executes once after the specified delay.
    pub fn after_fn<F>(&self, delay: Duration, f: F, tag: T) -> Result<Arc<ManagedJob<T, Tz>>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.after(delay, JobFn(f), tag)
    }

    /// Posts a job that executes first after `initial_delay` and then at
    /// every `period`.
    ///
    /// If an execution takes longer than the period, subsequent firings are
    /// not delayed and multiple instances of the job run at the same time.
    pub fn period<J>(&self, initial_delay: Duration, period: Duration, job: J, tag: T) -> Result<Arc<ManagedJob<T, Tz>>>
    where
        J: Job + 'static,
    {
        self.post(Period::new(initial_delay, period)?, job, tag)
    }

    /// Posts a closure that executes first after `initial_delay` and then at
    /// every `period`.
    pub fn period_fn<F>(&self, initial_delay: Duration, period: Duration, f: F, tag: T) -> Result<Arc<ManagedJob<T, Tz>>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.period(initial_delay, period, JobFn(f), tag)
    }

    /// Posts a job driven by a cron expression.
    pub fn cron<J>(&self, expression: &str, job: J, tag: T) -> Result<Arc<ManagedJob<T, Tz>>>
    where
        J: Job + 'static,
    {
        self.post(Expression::parse(expression)?, job, tag)
    }

    /// Posts a closure driven by a cron expression.
    pub fn cron_fn<F>(&self, expression: &str, f: F, tag: T) -> Result<Arc<ManagedJob<T, Tz>>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cron(expression, JobFn(f), tag)
    }

    /// Returns the currently scheduled jobs, in the queue's layout order.
    ///
    /// The snapshot is taken by the dispatch loop, so it never mixes the
    /// states before and after an update. After shutdown the result is
    /// empty.
    pub fn jobs(&self) -> Vec<Arc<ManagedJob<T, Tz>>> {
        let (reply_tx, reply_rx) = bounded(1);
        if self.snapshot_tx.send(reply_tx).is_err() {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }

    /// Returns the number of scheduled jobs, as last published by the
    /// dispatch loop.
    pub fn count(&self) -> usize {
        self.core.count.load(Ordering::Acquire)
    }

    /// Returns `true` once the scheduler has shut down.
    pub fn terminated(&self) -> bool {
        self.core.terminated.load(Ordering::Acquire)
    }

    /// The time zone the scheduler's clock runs in.
    pub fn location(&self) -> &Tz {
        &self.core.tz
    }

    /// Replaces the handler invoked when a job's body panics.
    ///
    /// The default handler writes `[Tag]: <tag> [Error]: <panic>` to
    /// standard error.
    pub fn set_panic_handler<F>(&self, handler: F)
    where
        F: Fn(&Arc<ManagedJob<T, Tz>>, &(dyn Any + Send)) + Send + Sync + 'static,
    {
        *self
            .core
            .panic_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(handler);
    }

    /// Shuts the scheduler down without waiting for in-flight executions.
    ///
    /// Subsequent submissions fail with [`Error::SchedulerTerminated`];
    /// cancellations and snapshots become harmless no-ops. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    /// Shuts the scheduler down and waits until the dispatch loop and all
    /// currently running job invocations have returned.
    pub fn shutdown_and_wait(&self) {
        self.shutdown();
        self.core.threads.wait();
    }

    fn post_boxed(
        &self,
        mut schedule: Box<dyn Schedule<Tz>>,
        job: Arc<dyn Job>,
        tag: T,
    ) -> Result<Arc<ManagedJob<T, Tz>>> {
        let now = self.now();
        let first = schedule.next(&now).ok_or(Error::ScheduleEmpty)?;
        let job = ManagedJob::new(tag, schedule, job, self.remove_tx.clone(), now, &first)
            .ok_or(Error::ScheduleEmpty)?;

        self.add_tx
            .send(Arc::clone(&job))
            .map_err(|_| Error::SchedulerTerminated)?;
        Ok(job)
    }

    fn now(&self) -> DateTime<Tz> {
        self.core.tz.from_utc_datetime(&Utc::now().naive_utc())
    }
}

impl<T, Tz: TimeZone> Drop for Scheduler<T, Tz> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

fn default_panic_handler<T: fmt::Debug, Tz: TimeZone>(job: &Arc<ManagedJob<T, Tz>>, panic: &(dyn Any + Send)) {
    eprintln!("[Tag]: {:?} [Error]: {}", job.tag(), utils::panic_message(panic));
}

fn dispatch<T, Tz>(
    core: Arc<Core<T, Tz>>,
    add_rx: Receiver<Arc<ManagedJob<T, Tz>>>,
    remove_rx: Receiver<Arc<ManagedJob<T, Tz>>>,
    snapshot_rx: Receiver<Sender<Vec<Arc<ManagedJob<T, Tz>>>>>,
    shutdown_rx: Receiver<()>,
) where
    T: fmt::Debug + Send + Sync + 'static,
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Send + Sync,
{
    let mut jobs: JobQueue<T, Tz> = JobQueue::new();

    loop {
        core.count.store(jobs.len(), Ordering::Release);

        let timeout = match jobs.peek() {
            Some(job) => {
                let now = Utc::now().timestamp_nanos_opt().unwrap();
                Duration::from_nanos(job.next_nanos().saturating_sub(now).max(0) as u64)
            }
            None => FAR_FUTURE,
        };

        // A disconnected channel means every handle to the scheduler is
        // gone; treat it like a shutdown request.
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(add_rx) -> job => match job {
                Ok(job) => {
                    trace!(tag = ?job.tag(), "job added");
                    jobs.push(job);
                }
                Err(_) => break,
            },
            recv(remove_rx) -> job => match job {
                Ok(job) => {
                    trace!(tag = ?job.tag(), "job removal requested");
                    remove_job(&mut jobs, &job);
                }
                Err(_) => break,
            },
            recv(snapshot_rx) -> reply => match reply {
                Ok(reply) => {
                    let _ = reply.send(jobs.snapshot());
                }
                Err(_) => break,
            },
            recv(after(timeout)) -> _ => run_expired(&core, &mut jobs),
        }
    }

    core.terminated.store(true, Ordering::Release);
    core.count.store(0, Ordering::Release);
    debug!("dispatch loop exited");
    core.threads.done();
    // The receivers drop here; pending and future sends fail over to the
    // callers' terminated paths.
}

fn remove_job<T, Tz: TimeZone>(jobs: &mut JobQueue<T, Tz>, job: &Arc<ManagedJob<T, Tz>>) {
    let index = job.index();
    if index < 0 || index as usize >= jobs.len() {
        return;
    }

    let index = index as usize;
    if jobs.get(index).is_some_and(|slot| Arc::ptr_eq(slot, job)) {
        jobs.remove(index);
    }
}

fn run_expired<T, Tz>(core: &Arc<Core<T, Tz>>, jobs: &mut JobQueue<T, Tz>)
where
    T: fmt::Debug + Send + Sync + 'static,
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Send + Sync,
{
    let now = Utc::now().timestamp_nanos_opt().unwrap();

    while let Some(job) = jobs.peek() {
        if job.next_nanos() > now {
            break;
        }
        let job = Arc::clone(job);
        spawn_worker(core, Arc::clone(&job));

        let fired = core.tz.timestamp_nanos(job.next_nanos());
        match job
            .advance_schedule(&fired)
            .and_then(|next| next.timestamp_nanos_opt())
        {
            Some(next) => {
                // update in place instead of a pop+push pair
                job.set_next_nanos(next);
                jobs.fix(0);
            }
            None => {
                trace!(tag = ?job.tag(), "schedule exhausted");
                jobs.pop();
            }
        }
    }
}

fn spawn_worker<T, Tz>(core: &Arc<Core<T, Tz>>, job: Arc<ManagedJob<T, Tz>>)
where
    T: fmt::Debug + Send + Sync + 'static,
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Send + Sync,
{
    core.threads.add(1);
    let core = Arc::clone(core);
    thread::spawn(move || {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| job.run_job())) {
            let handler = Arc::clone(&core.panic_handler.lock().unwrap_or_else(PoisonError::into_inner));
            // failures of the handler itself are swallowed
            let _ = panic::catch_unwind(AssertUnwindSafe(|| (*handler)(&job, panic.as_ref())));
        }
        core.threads.done();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn shutdown_flips_terminated() {
        let scheduler: Scheduler<()> = Scheduler::new();
        assert!(!scheduler.terminated());
        scheduler.shutdown_and_wait();
        assert!(scheduler.terminated());
    }

    #[test]
    fn post_after_shutdown_fails() {
        let scheduler = Scheduler::new();
        scheduler.shutdown_and_wait();

        let result = scheduler.period_fn(Duration::ZERO, Duration::from_secs(1), || {}, "late");
        assert!(matches!(result, Err(Error::SchedulerTerminated)));
        assert_eq!(scheduler.count(), 0);
        assert!(scheduler.jobs().is_empty());
    }

    #[test]
    fn empty_schedule_is_rejected() {
        let scheduler = Scheduler::new();

        // a cron limited to a year long gone has no upcoming firing
        let result = scheduler.cron_fn("0 0 0 1 1 * 1999", || {}, "never");
        assert!(matches!(result, Err(Error::ScheduleEmpty)));

        scheduler.shutdown_and_wait();
    }

    #[test]
    fn tiny_period_is_rejected() {
        let scheduler = Scheduler::new();
        let result = scheduler.period_fn(Duration::ZERO, Duration::from_micros(10), || {}, "fast");
        assert!(matches!(result, Err(Error::PeriodTooSmall)));
        scheduler.shutdown_and_wait();
    }

    #[test]
    fn after_runs_once() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicI32::new(0));

        let job = {
            let counter = Arc::clone(&counter);
            scheduler
                .after_fn(
                    Duration::from_millis(10),
                    move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    },
                    "once",
                )
                .unwrap()
        };

        thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(job.index(), -1, "one-shot job must leave the queue");
        assert_eq!(scheduler.count(), 0);

        job.cancel(); // cancelling a finished job is a no-op
        scheduler.shutdown_and_wait();
    }

    #[test]
    fn handle_publishes_times() {
        let scheduler = Scheduler::new();
        let job = scheduler
            .period_fn(Duration::from_secs(3600), Duration::from_secs(3600), || {}, "hourly")
            .unwrap();

        assert_eq!(job.prev_time(), None, "not fired yet");
        let next = job.next_time().expect("enqueued job has a next time");
        assert!(next > Local::now());
        assert!(job.post_time() <= Local::now());

        scheduler.shutdown_and_wait();
    }

    #[test]
    fn utc_scheduler_reports_location() {
        let scheduler: Scheduler<(), Utc> = Scheduler::with_timezone(Utc);
        assert_eq!(*scheduler.location(), Utc);
        scheduler.shutdown_and_wait();
    }

    #[test]
    fn drop_shuts_the_dispatch_loop_down() {
        let core = {
            let scheduler: Scheduler<()> = Scheduler::new();
            Arc::clone(&scheduler.core)
        };

        // dropping the scheduler must stop the loop without an explicit call
        core.threads.wait();
        assert!(core.terminated.load(Ordering::Acquire));
    }
}
