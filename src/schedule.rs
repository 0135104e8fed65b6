use crate::{cron::Expression, Error, Result};
use chrono::{DateTime, TimeDelta, TimeZone};
use std::time::Duration;

/// Minimum allowed period of a [`Period`] schedule.
pub(crate) const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A job's duty cycle: yields successive fire times.
///
/// `next` returns the next activation time strictly later than `after`, or
/// `None` when the schedule has no further firings. Implementations may keep
/// state between calls (see [`After`] and [`Period`]); once a job is posted,
/// only the dispatch loop calls `next` on its schedule.
pub trait Schedule<Tz: TimeZone>: Send {
    /// Returns the next activation time later than `after`, or `None` to
    /// terminate the job.
    fn next(&mut self, after: &DateTime<Tz>) -> Option<DateTime<Tz>>;
}

impl<Tz: TimeZone> Schedule<Tz> for Expression {
    fn next(&mut self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        Expression::next(self, after)
    }
}

/// Adapter to use an ordinary closure as a [`Schedule`].
///
/// # Examples
///
/// ```rust
/// use chrono::{DateTime, TimeDelta, Utc};
/// use sched_lite::{Schedule, ScheduleFn};
///
/// // Fires every ten minutes, forever.
/// let mut every_10m = ScheduleFn(|after: &DateTime<Utc>| {
///     after.checked_add_signed(TimeDelta::minutes(10))
/// });
/// let next = every_10m.next(&Utc::now());
/// assert!(next.is_some());
/// ```
pub struct ScheduleFn<F>(
    /// The wrapped closure.
    pub F,
);

impl<Tz, F> Schedule<Tz> for ScheduleFn<F>
where
    Tz: TimeZone,
    F: FnMut(&DateTime<Tz>) -> Option<DateTime<Tz>> + Send,
{
    fn next(&mut self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        (self.0)(after)
    }
}

/// One-shot schedule: fires once, `delay` after the submission time.
#[derive(Debug, Clone)]
pub struct After {
    delay: TimeDelta,
    called: bool,
}

impl After {
    /// Creates a one-shot schedule with the given delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX),
            called: false,
        }
    }
}

impl<Tz: TimeZone> Schedule<Tz> for After {
    fn next(&mut self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        if self.called {
            return None;
        }

        self.called = true;
        after.clone().checked_add_signed(self.delay)
    }
}

/// Fixed-period schedule: fires `initial_delay` after submission, then every
/// `period`.
///
/// The period is measured from the previous *scheduled* time, not from the
/// end of the previous run. If an execution takes longer than the period,
/// firings bunch up and multiple instances of the job run at the same time.
#[derive(Debug, Clone)]
pub struct Period {
    initial_delay: TimeDelta,
    period: TimeDelta,
    called: bool,
}

impl Period {
    /// Creates a fixed-period schedule.
    ///
    /// Returns [`Error::PeriodTooSmall`] when `period` is below one
    /// millisecond.
    pub fn new(initial_delay: Duration, period: Duration) -> Result<Self> {
        if period < MIN_PERIOD {
            return Err(Error::PeriodTooSmall);
        }

        Ok(Self {
            initial_delay: TimeDelta::from_std(initial_delay).unwrap_or(TimeDelta::MAX),
            period: TimeDelta::from_std(period).unwrap_or(TimeDelta::MAX),
            called: false,
        })
    }
}

impl<Tz: TimeZone> Schedule<Tz> for Period {
    fn next(&mut self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let delta = if self.called { self.period } else { self.initial_delay };

        self.called = true;
        after.clone().checked_add_signed(delta)
    }
}

/// Union of two schedules: fires whenever either side fires.
pub struct Union<L, R> {
    left: L,
    right: R,
}

impl<L, R> Union<L, R> {
    /// Combines two schedules into their union (`left ∪ right`).
    pub fn new(left: L, right: R) -> Self {
        Self { left, right }
    }
}

impl<Tz, L, R> Schedule<Tz> for Union<L, R>
where
    Tz: TimeZone,
    L: Schedule<Tz>,
    R: Schedule<Tz>,
{
    fn next(&mut self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match (self.left.next(after), self.right.next(after)) {
            (Some(left), Some(right)) => Some(left.min(right)),
            (left, None) => left,
            (None, right) => right,
        }
    }
}

/// Difference of two schedules: fires when the left side fires, unless the
/// right side fires at the very same instant.
pub struct Minus<L, R> {
    left: L,
    right: R,
}

impl<L, R> Minus<L, R> {
    /// Combines two schedules into their difference (`left - right`).
    pub fn new(left: L, right: R) -> Self {
        Self { left, right }
    }
}

impl<Tz, L, R> Schedule<Tz> for Minus<L, R>
where
    Tz: TimeZone,
    L: Schedule<Tz>,
    R: Schedule<Tz>,
{
    fn next(&mut self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let mut left = self.left.next(after);
        let mut right = self.right.next(after);

        loop {
            let (Some(l), Some(r)) = (left.clone(), right.clone()) else {
                // the right side is exhausted, nothing left to subtract
                return left;
            };

            if l < r {
                return left;
            }
            if l == r {
                // suppressed, recalculate both sides
                left = self.left.next(&l);
                right = self.right.next(&r);
                continue;
            }
            // l > r: catch the right side up
            right = self.right.next(&r);
        }
    }
}

/// Intersection of two schedules: fires only when both sides fire at the
/// same instant.
pub struct Intersect<L, R> {
    left: L,
    right: R,
}

impl<L, R> Intersect<L, R> {
    /// Combines two schedules into their intersection (`left ∩ right`).
    pub fn new(left: L, right: R) -> Self {
        Self { left, right }
    }
}

impl<Tz, L, R> Schedule<Tz> for Intersect<L, R>
where
    Tz: TimeZone,
    L: Schedule<Tz>,
    R: Schedule<Tz>,
{
    fn next(&mut self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let mut left = self.left.next(after)?;
        let mut right = self.right.next(after)?;

        loop {
            if left == right {
                return Some(left);
            }
            if left < right {
                left = self.left.next(&left)?;
            } else {
                right = self.right.next(&right)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, Utc};
    use rstest::rstest;
    use std::time::Duration;

    fn utc(datetime: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(datetime, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn fires_at<S: Schedule<Utc>>(schedule: &mut S, at: &str) -> bool {
        let at = utc(at);
        let from = at - TimeDelta::seconds(1);
        schedule.next(&from) == Some(at)
    }

    #[test]
    fn after_fires_once() {
        let mut after = After::new(Duration::from_secs(30));
        let from = utc("2024-01-01 00:00:00");

        assert_eq!(
            Schedule::<Utc>::next(&mut after, &from),
            Some(utc("2024-01-01 00:00:30"))
        );
        assert_eq!(Schedule::<Utc>::next(&mut after, &from), None);
        assert_eq!(Schedule::<Utc>::next(&mut after, &from), None);
    }

    #[test]
    fn period_advances_from_the_scheduled_time() {
        let mut period = Period::new(Duration::ZERO, Duration::from_secs(10)).unwrap();
        let from = utc("2024-01-01 00:00:00");

        let first = Schedule::<Utc>::next(&mut period, &from).unwrap();
        assert_eq!(first, from, "zero initial delay fires immediately");

        let second = Schedule::<Utc>::next(&mut period, &first).unwrap();
        assert_eq!(second, utc("2024-01-01 00:00:10"));

        let third = Schedule::<Utc>::next(&mut period, &second).unwrap();
        assert_eq!(third, utc("2024-01-01 00:00:20"));
    }

    #[test]
    fn period_below_floor_is_rejected() {
        assert_eq!(
            Period::new(Duration::ZERO, Duration::from_micros(999)).unwrap_err(),
            Error::PeriodTooSmall
        );
        assert!(Period::new(Duration::ZERO, MIN_PERIOD).is_ok());
    }

    #[rstest]
    #[case("2012-07-09 15:00:00", true)]
    #[case("2012-07-09 15:06:00", true)]
    #[case("2012-07-09 15:12:00", true)]
    #[case("2012-07-09 15:15:00", true)]
    #[case("2012-07-09 15:16:00", false)]
    #[case("2012-07-09 15:18:00", true)]
    fn union_of_crons(#[case] at: &str, #[case] expected: bool) {
        let mut union = Union::new(
            Expression::parse("0 0/6 * * * *").unwrap(),
            Expression::parse("0 0/15 * * * *").unwrap(),
        );
        assert_eq!(fires_at(&mut union, at), expected, "at = {at}");
    }

    #[rstest]
    #[case("2012-07-09 15:00:00", false)]
    #[case("2012-07-09 15:06:00", true)]
    #[case("2012-07-09 15:12:00", true)]
    #[case("2012-07-09 15:15:00", false)]
    #[case("2012-07-09 15:16:00", false)]
    #[case("2012-07-09 15:18:00", true)]
    fn minus_of_crons(#[case] at: &str, #[case] expected: bool) {
        let mut minus = Minus::new(
            Expression::parse("0 0/6 * * * *").unwrap(),
            Expression::parse("0 0/15 * * * *").unwrap(),
        );
        assert_eq!(fires_at(&mut minus, at), expected, "at = {at}");
    }

    #[rstest]
    #[case("2012-07-09 15:00:00", true)]
    #[case("2012-07-09 15:06:00", false)]
    #[case("2012-07-09 15:12:00", false)]
    #[case("2012-07-09 15:15:00", false)]
    #[case("2012-07-09 15:18:00", false)]
    #[case("2012-07-09 15:30:00", true)]
    fn intersect_of_crons(#[case] at: &str, #[case] expected: bool) {
        let mut intersect = Intersect::new(
            Expression::parse("0 0/6 * * * *").unwrap(),
            Expression::parse("0 0/15 * * * *").unwrap(),
        );
        assert_eq!(fires_at(&mut intersect, at), expected, "at = {at}");
    }

    #[test]
    fn union_is_terminal_aware_min() {
        // The bounded side runs out; the union must keep following the live side.
        let mut union = Union::new(
            Expression::parse("0 0 0 1 1 * 2024").unwrap(),
            Expression::parse("0 0 0 1 * *").unwrap(),
        );
        let from = utc("2024-06-15 00:00:00");
        assert_eq!(union.next(&from), Some(utc("2024-07-01 00:00:00")));

        // Both sides terminal: so is the union.
        let mut union = Union::new(
            Expression::parse("0 0 0 1 1 * 2024").unwrap(),
            Expression::parse("0 0 0 1 1 * 2024").unwrap(),
        );
        let from = utc("2025-01-01 00:00:00");
        assert_eq!(union.next(&from), None);
    }

    #[test]
    fn union_matches_min_of_sides() {
        let from = utc("2012-07-09 15:01:00");
        let mut left = Expression::parse("0 0/6 * * * *").unwrap();
        let mut right = Expression::parse("0 0/15 * * * *").unwrap();
        let expected = Schedule::<Utc>::next(&mut left, &from)
            .unwrap()
            .min(Schedule::<Utc>::next(&mut right, &from).unwrap());

        let mut union = Union::new(left.clone(), right.clone());
        assert_eq!(union.next(&from), Some(expected));
    }

    #[test]
    fn intersect_terminates_when_one_side_does() {
        let mut intersect = Intersect::new(
            Expression::parse("0 0 0 1 1 * 2024").unwrap(),
            Expression::parse("0 0 0 1 * *").unwrap(),
        );
        let from = utc("2024-06-15 00:00:00");
        assert_eq!(intersect.next(&from), None);
    }

    #[test]
    fn minus_returns_left_when_right_exhausted() {
        let mut minus = Minus::new(
            Expression::parse("0 0 0 1 * *").unwrap(),
            Expression::parse("0 0 0 1 1 * 2024").unwrap(),
        );
        let from = utc("2024-06-15 00:00:00");
        assert_eq!(minus.next(&from), Some(utc("2024-07-01 00:00:00")));
    }

    #[test]
    fn schedule_fn_adapter() {
        let mut every_minute =
            ScheduleFn(|after: &DateTime<Utc>| after.checked_add_signed(TimeDelta::minutes(1)));
        let from = utc("2024-01-01 00:00:00");
        assert_eq!(every_minute.next(&from), Some(utc("2024-01-01 00:01:00")));
    }
}
