use crate::schedule::Schedule;
use chrono::{DateTime, TimeZone};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicI64, AtomicIsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Published fire-time value meaning "not set".
pub(crate) const TIME_UNSET: i64 = i64::MIN;

/// A unit of work to be performed when its schedule triggers.
///
/// Executions run concurrently when firings overlap, so the job is shared
/// between worker threads rather than handed over.
pub trait Job: Send + Sync {
    /// Called by the scheduler when the associated schedule is triggered.
    fn run(&self);
}

/// Adapter to use an ordinary closure as a [`Job`].
pub struct JobFn<F>(
    /// The wrapped closure.
    pub F,
);

impl<F: Fn() + Send + Sync> Job for JobFn<F> {
    fn run(&self) {
        (self.0)()
    }
}

/// Handle of a job registered with a [`Scheduler`](crate::Scheduler).
///
/// The handle stays valid after the job has fired, been cancelled or the
/// scheduler has shut down; the observers keep returning the last published
/// values and [`ManagedJob::cancel`] degrades to a no-op.
pub struct ManagedJob<T, Tz: TimeZone> {
    /// Slot in the scheduler's queue, -1 when not enqueued.
    index: AtomicIsize,
    me: Weak<Self>,
    tag: T,
    schedule: Mutex<Box<dyn Schedule<Tz>>>,
    job: Arc<dyn Job>,
    remove_tx: Sender<Arc<ManagedJob<T, Tz>>>,
    post_time: DateTime<Tz>,
    /// Fire times in epoch nanoseconds, written only by the dispatch loop
    /// and read lock-free by outside observers.
    next: AtomicI64,
    prev: AtomicI64,
}

impl<T, Tz: TimeZone> ManagedJob<T, Tz> {
    pub(crate) fn new(
        tag: T,
        schedule: Box<dyn Schedule<Tz>>,
        job: Arc<dyn Job>,
        remove_tx: Sender<Arc<ManagedJob<T, Tz>>>,
        post_time: DateTime<Tz>,
        first: &DateTime<Tz>,
    ) -> Option<Arc<Self>> {
        let first = first.timestamp_nanos_opt()?;
        Some(Arc::new_cyclic(|me| Self {
            index: AtomicIsize::new(-1),
            me: me.clone(),
            tag,
            schedule: Mutex::new(schedule),
            job,
            remove_tx,
            post_time,
            next: AtomicI64::new(first),
            prev: AtomicI64::new(TIME_UNSET),
        }))
    }

    /// The application-provided tag of the job.
    pub fn tag(&self) -> &T {
        &self.tag
    }

    /// The time the job was posted to the scheduler.
    pub fn post_time(&self) -> DateTime<Tz> {
        self.post_time.clone()
    }

    /// The previous fire time of the job, if it has fired at all.
    pub fn prev_time(&self) -> Option<DateTime<Tz>> {
        self.time_at(self.prev.load(Ordering::Acquire))
    }

    /// The next scheduled fire time of the job.
    pub fn next_time(&self) -> Option<DateTime<Tz>> {
        self.time_at(self.next.load(Ordering::Acquire))
    }

    /// Cancels the job.
    ///
    /// A running invocation is not interrupted; only future firings are
    /// prevented. Cancelling twice, or after the scheduler has shut down,
    /// is a harmless no-op.
    pub fn cancel(&self) {
        if let Some(job) = self.me.upgrade() {
            let _ = self.remove_tx.send(job);
        }
    }

    fn time_at(&self, nanos: i64) -> Option<DateTime<Tz>> {
        (nanos != TIME_UNSET).then(|| self.post_time.timezone().timestamp_nanos(nanos))
    }

    pub(crate) fn next_nanos(&self) -> i64 {
        self.next.load(Ordering::Acquire)
    }

    /// Publishes a new next fire time, moving the current one to `prev`.
    pub(crate) fn set_next_nanos(&self, nanos: i64) {
        self.prev.store(self.next.load(Ordering::Acquire), Ordering::Release);
        self.next.store(nanos, Ordering::Release);
    }

    pub(crate) fn index(&self) -> isize {
        self.index.load(Ordering::Acquire)
    }

    pub(crate) fn set_index(&self, index: isize) {
        self.index.store(index, Ordering::Release);
    }

    pub(crate) fn run_job(&self) {
        self.job.run()
    }

    /// Asks the job's schedule for the fire time following `after`.
    ///
    /// Called only from the dispatch loop; the lock is uncontended.
    pub(crate) fn advance_schedule(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::After;
    use chrono::Utc;
    use std::time::Duration;

    fn test_job(first: DateTime<Utc>) -> (Arc<ManagedJob<&'static str, Utc>>, crossbeam_channel::Receiver<Arc<ManagedJob<&'static str, Utc>>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let job = ManagedJob::new(
            "tag",
            Box::new(After::new(Duration::from_secs(1))),
            Arc::new(JobFn(|| {})),
            tx,
            Utc::now(),
            &first,
        )
        .unwrap();
        (job, rx)
    }

    #[test]
    fn publishes_fire_times() {
        let first = Utc::now();
        let (job, _rx) = test_job(first);

        assert_eq!(job.prev_time(), None);
        assert_eq!(
            job.next_time().unwrap().timestamp_nanos_opt(),
            first.timestamp_nanos_opt()
        );

        let second = first + Duration::from_secs(5);
        job.set_next_nanos(second.timestamp_nanos_opt().unwrap());
        assert_eq!(
            job.prev_time().unwrap().timestamp_nanos_opt(),
            first.timestamp_nanos_opt()
        );
        assert_eq!(
            job.next_time().unwrap().timestamp_nanos_opt(),
            second.timestamp_nanos_opt()
        );
    }

    #[test]
    fn cancel_sends_the_handle_itself() {
        let (job, rx) = test_job(Utc::now());
        job.cancel();
        let sent = rx.try_recv().unwrap();
        assert!(Arc::ptr_eq(&job, &sent));
    }

    #[test]
    fn cancel_after_disconnect_is_silent() {
        let (job, rx) = test_job(Utc::now());
        drop(rx);
        job.cancel();
        job.cancel();
    }

    #[test]
    fn starts_dequeued() {
        let (job, _rx) = test_job(Utc::now());
        assert_eq!(job.index(), -1);
    }
}
