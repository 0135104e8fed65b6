use crate::utils;
use chrono::{DateTime, Datelike, TimeZone, Timelike};
use std::fmt::Display;

mod parser;

pub(crate) const MIN_YEAR: i32 = 1970;
pub(crate) const MAX_YEAR: i32 = 2099;

const NOT_FOUND: u32 = 64;
const START_BIT: u64 = 1 << 63;

const SECONDS_MASK: u64 = 0xffff_ffff_ffff_fff0;
const MINUTES_MASK: u64 = 0xffff_ffff_ffff_fff0;
const HOURS_MASK: u64 = 0xffff_ff00_0000_0000;
const DOMS_MASK: u64 = 0x7fff_ffff_0000_0000;
const MONTHS_MASK: u64 = 0x7ff8_0000_0000_0000;
const DOWS_MASK: u64 = 0x7fff_ffff_f000_0000;

const ALL_YEARS: [u64; 3] = [u64::MAX; 3];

/// Index of the next legal value `>= i` in a bitmask field, or `NOT_FOUND`.
///
/// Every field stores value `v` at bit `1 << (63 - v)`, so "smallest legal
/// value at or after `i`" is a mask shift plus a leading-zeros count.
#[inline]
fn match_field(v: u64, mask: u64, i: u32) -> u32 {
    (v & ((mask << i) >> i)).leading_zeros()
}

/// Smallest value present in a non-empty bitmask field.
#[inline]
fn min_value(v: u64) -> u32 {
    v.leading_zeros()
}

#[inline]
fn make_date<Tz: TimeZone>(
    tz: &Tz,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<DateTime<Tz>> {
    tz.with_ymd_and_hms(year, month, day, hour, minute, second).earliest()
}

/// A parsed cron expression.
///
/// | Field        | Required | Allowed values  | Allowed special characters |
/// | ------------ | -------- | --------------- | -------------------------- |
/// | Seconds      | No       | 0-59            | * , - /                    |
/// | Minutes      | Yes      | 0-59            | * , - /                    |
/// | Hours        | Yes      | 0-23            | * , - /                    |
/// | Day of Month | Yes      | 1-31            | * , - / ? L W              |
/// | Month        | Yes      | 1-12 or JAN-DEC | * , - /                    |
/// | Day of Week  | Yes      | 0-7 or SUN-SAT  | * , - / ? L #              |
/// | Year         | No       | 1970-2099       | * , - /                    |
///
/// With five fields the seconds default to `0` and the year to `*`; with six
/// fields the year defaults to `*`. The named forms `@yearly` (`@annually`),
/// `@monthly`, `@weekly`, `@daily` (`@midnight`) and `@hourly` are accepted.
/// Day of week `7` is an alias for `0` (Sunday).
///
/// Each field is a 64-bit set with value `v` at bit `1 << (63 - v)`, which
/// lets [`Expression::next`] jump to the next matching value with a single
/// mask-and-count-leading-zeros per field.
///
/// # Examples
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use sched_lite::Expression;
///
/// let expr = Expression::parse("0 30 9 * * mon-fri")?;
/// let from = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap(); // Friday noon
/// let next = expr.next(&from).unwrap();
/// assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 9, 30, 0).unwrap());
/// # Ok::<(), sched_lite::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression {
    expression: String,
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    workdays_of_month: u64,
    last_day_of_month: bool,
    last_workday_of_month: bool,
    months: u64,
    days_of_week: u64,
    ith_weekdays_of_week: u64,
    last_weekdays_of_week: u64,
    years: [u64; 3],
}

impl Expression {
    /// Returns the closest time instant strictly after `from` which matches
    /// the expression, or `None` when no such instant exists before the end
    /// of 2099.
    ///
    /// The zone of the returned instant is the zone of `from`. Sub-second
    /// precision of `from` is ignored: the result is the smallest matching
    /// whole second greater than `from` truncated to seconds.
    pub fn next<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        // The next_* helpers expect a time stamp that already matches the
        // expression. `from` is arbitrary, so walk the fields coarse to fine
        // and jump to the closest future match on the first mismatch.
        let year = self.match_year(from.year())?;
        if year != from.year() {
            return self.next_year(from);
        }

        let v = from.month();
        let i = match_field(self.months, MONTHS_MASK, v);
        if i == NOT_FOUND {
            return self.next_year(from);
        }
        if i != v {
            return self.next_month(from);
        }

        let actual_days = self.actual_days_of_month(from.year(), from.month());
        if actual_days == 0 {
            return self.next_month(from);
        }

        let v = from.day();
        let i = match_field(actual_days, DOMS_MASK, v);
        if i == NOT_FOUND {
            return self.next_month(from);
        }
        if i != v {
            return self.next_day_of_month(from, actual_days);
        }

        let v = from.hour();
        let i = match_field(self.hours, HOURS_MASK, v);
        if i == NOT_FOUND {
            return self.next_day_of_month(from, actual_days);
        }
        if i != v {
            return self.next_hour(from, actual_days);
        }

        let v = from.minute();
        let i = match_field(self.minutes, MINUTES_MASK, v);
        if i == NOT_FOUND {
            return self.next_hour(from, actual_days);
        }
        if i != v {
            return self.next_minute(from, actual_days);
        }

        let v = from.second();
        let i = match_field(self.seconds, SECONDS_MASK, v);
        if i == NOT_FOUND {
            return self.next_minute(from, actual_days);
        }

        // Whatever the current second is, there is nothing better to do
        // than to move to the next matching one.
        self.next_second(from, actual_days)
    }

    /// Returns an iterator over the successive fire times strictly after `from`.
    pub fn iter<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> impl Iterator<Item = DateTime<Tz>> {
        ExpressionIter {
            expression: self.clone(),
            next: self.next(from),
        }
    }

    /// The same as [`Expression::iter`] but consumes the expression.
    pub fn into_iter<Tz: TimeZone>(self, from: &DateTime<Tz>) -> impl Iterator<Item = DateTime<Tz>> {
        let next = self.next(from);
        ExpressionIter {
            expression: self,
            next,
        }
    }

    /// The expression as it was written.
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Smallest scheduled year at or after `year`, clamped up to 1970.
    fn match_year(&self, year: i32) -> Option<i32> {
        if year > MAX_YEAR {
            return None;
        }
        let idx = (year.max(MIN_YEAR) - MIN_YEAR) as u32;

        let mut bit = idx & 0x3f;
        for word in (idx >> 6) as usize..3 {
            let found = match_field(self.years[word], u64::MAX, bit);
            if found != NOT_FOUND {
                return Some(((word as u32) << 6) as i32 + found as i32 + MIN_YEAR);
            }
            bit = 0;
        }
        None
    }

    fn next_year<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let year = self.match_year(t.year() + 1)?;
        let month = min_value(self.months);

        // Year changed, so the actual days of month must be recalculated.
        let actual_days = self.actual_days_of_month(year, month);
        if actual_days == 0 {
            return self.next_month(&make_date(
                &t.timezone(),
                year,
                month,
                1,
                min_value(self.hours),
                min_value(self.minutes),
                min_value(self.seconds),
            )?);
        }

        make_date(
            &t.timezone(),
            year,
            month,
            min_value(actual_days),
            min_value(self.hours),
            min_value(self.minutes),
            min_value(self.seconds),
        )
    }

    fn next_month<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let i = match_field(self.months, MONTHS_MASK, t.month() + 1);
        if i == NOT_FOUND {
            return self.next_year(t);
        }

        // Month changed, so the actual days of month must be recalculated.
        let actual_days = self.actual_days_of_month(t.year(), i);
        if actual_days == 0 {
            return self.next_month(&make_date(
                &t.timezone(),
                t.year(),
                i,
                1,
                min_value(self.hours),
                min_value(self.minutes),
                min_value(self.seconds),
            )?);
        }

        make_date(
            &t.timezone(),
            t.year(),
            i,
            min_value(actual_days),
            min_value(self.hours),
            min_value(self.minutes),
            min_value(self.seconds),
        )
    }

    fn next_day_of_month<Tz: TimeZone>(&self, t: &DateTime<Tz>, actual_days: u64) -> Option<DateTime<Tz>> {
        let i = match_field(actual_days, DOMS_MASK, t.day() + 1);
        if i == NOT_FOUND {
            return self.next_month(t);
        }

        make_date(
            &t.timezone(),
            t.year(),
            t.month(),
            i,
            min_value(self.hours),
            min_value(self.minutes),
            min_value(self.seconds),
        )
    }

    fn next_hour<Tz: TimeZone>(&self, t: &DateTime<Tz>, actual_days: u64) -> Option<DateTime<Tz>> {
        let i = match_field(self.hours, HOURS_MASK, t.hour() + 1);
        if i == NOT_FOUND {
            return self.next_day_of_month(t, actual_days);
        }

        make_date(
            &t.timezone(),
            t.year(),
            t.month(),
            t.day(),
            i,
            min_value(self.minutes),
            min_value(self.seconds),
        )
    }

    fn next_minute<Tz: TimeZone>(&self, t: &DateTime<Tz>, actual_days: u64) -> Option<DateTime<Tz>> {
        let i = match_field(self.minutes, MINUTES_MASK, t.minute() + 1);
        if i == NOT_FOUND {
            return self.next_hour(t, actual_days);
        }

        make_date(
            &t.timezone(),
            t.year(),
            t.month(),
            t.day(),
            t.hour(),
            i,
            min_value(self.seconds),
        )
    }

    fn next_second<Tz: TimeZone>(&self, t: &DateTime<Tz>, actual_days: u64) -> Option<DateTime<Tz>> {
        let i = match_field(self.seconds, SECONDS_MASK, t.second() + 1);
        if i == NOT_FOUND {
            return self.next_minute(t, actual_days);
        }

        make_date(&t.timezone(), t.year(), t.month(), t.day(), t.hour(), t.minute(), i)
    }

    /// Effective set of legal days for one (year, month), folding the
    /// day-of-month and day-of-week constraints into a single mask.
    ///
    /// As per the crontab man page: when both the day-of-month and the
    /// day-of-week field are restricted, a day matching either of them fires.
    fn actual_days_of_month(&self, year: i32, month: u32) -> u64 {
        let last_day = utils::days_in_month(year, month);
        // remove bits over the month's last day
        let this_month_mask = (DOMS_MASK >> (63 - last_day)) << (63 - last_day);

        // If both fields are unrestricted, all days of the month are a hit.
        if self.days_of_month == DOMS_MASK && self.days_of_week == DOWS_MASK {
            return this_month_mask;
        }

        let first_weekday = utils::day_of_week(year, month, 1);
        let mut actual_days = 0u64;

        // day-of-month != `*`
        if self.days_of_month != DOMS_MASK {
            actual_days |= self.days_of_month;

            // Last day of month (L)
            if self.last_day_of_month {
                actual_days |= START_BIT >> last_day;
            }
            // Last workday of month (LW)
            if self.last_workday_of_month {
                actual_days |= START_BIT >> utils::nearest_weekday(year, month, last_day);
            }
            // Workdays of month ({day}W); month boundaries are not crossed.
            let workdays = self.workdays_of_month & this_month_mask;
            if workdays != 0 {
                let end = 63 - workdays.trailing_zeros();
                let mut day = workdays.leading_zeros();
                while day <= end {
                    if workdays & (START_BIT >> day) != 0 {
                        actual_days |= START_BIT >> utils::nearest_weekday(year, month, day);
                    }
                    day += 1;
                }
            }
        }

        // day-of-week != `*`
        if self.days_of_week != DOWS_MASK {
            // The five-week window has Sunday of week one at bit 1; shifting
            // left by the first weekday aligns bit 1 with day one.
            actual_days |= self.days_of_week << first_weekday;

            // nth weekday of the month ({day}#{n})
            actual_days |= self.ith_weekdays_of_week << first_weekday;

            // Last weekdays of the month ({day}L): keep the last week only.
            let last_weekdays = self.last_weekdays_of_week << first_weekday;
            actual_days |= (last_weekdays << (last_day - 7)) >> (last_day - 7);
        }

        actual_days & this_month_mask
    }
}

struct ExpressionIter<Tz: TimeZone> {
    expression: Expression,
    next: Option<DateTime<Tz>>,
}

impl<Tz: TimeZone> Iterator for ExpressionIter<Tz> {
    type Item = DateTime<Tz>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = self.expression.next(&current);
        Some(current)
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}
