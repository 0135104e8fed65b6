//! Common utility functions and small synchronization helpers.
use chrono::{Datelike, NaiveDate, Weekday};
use std::any::Any;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Returns the number of days in the specified month.
pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    let first = first_of_month(year, month);
    let next = if month == 12 {
        first_of_month(year + 1, 1)
    } else {
        first_of_month(year, month + 1)
    };
    next.signed_duration_since(first).num_days() as u32
}

/// Day of week of the specified date, Sunday is 0.
pub(crate) fn day_of_week(year: i32, month: u32, day: u32) -> u32 {
    date(year, month, day).weekday().num_days_from_sunday()
}

/// Returns the day of the weekday (not Saturday or Sunday) nearest to the
/// specified date, never leaving its month.
pub(crate) fn nearest_weekday(year: i32, month: u32, day: u32) -> u32 {
    match date(year, month, day).weekday() {
        // Saturday the 1st cannot reach back to Friday, so jump to Monday the 3rd
        Weekday::Sat if day == 1 => 3,
        Weekday::Sat => day - 1,
        // a Sunday ending the month falls back to the Friday before it
        Weekday::Sun if day == days_in_month(year, month) => day - 2,
        Weekday::Sun => day + 1,
        _ => day,
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_else(|| panic!("month out of range: {month}"))
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap_or_else(|| panic!("no such date: {year:04}-{month:02}-{day:02}"))
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Counter of in-flight threads: the dispatch loop and every spawned worker.
///
/// `wait` blocks until the count returns to zero.
#[derive(Clone)]
pub(crate) struct WaitGroup {
    state: Arc<(Mutex<usize>, Condvar)>,
}

impl WaitGroup {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }

    pub(crate) fn add(&self, n: usize) {
        let (count, _) = &*self.state;
        *count.lock().unwrap_or_else(PoisonError::into_inner) += n;
    }

    pub(crate) fn done(&self) {
        let (count, cond) = &*self.state;
        let mut count = count.lock().unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
        if *count == 0 {
            cond.notify_all();
        }
    }

    pub(crate) fn wait(&self) {
        let (count, cond) = &*self.state;
        let mut count = count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = cond.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }
}
