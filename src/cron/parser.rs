//! Cron expression parsing into the bitmask representation.
use super::{Expression, ALL_YEARS, DOMS_MASK, DOWS_MASK, HOURS_MASK, MONTHS_MASK, START_BIT};
use crate::{Error, Result};
use std::str::FromStr;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const MONTHS_FULL: [&str; 12] = [
    "JANUARY",
    "FEBRUARY",
    "MARCH",
    "APRIL",
    "MAY",
    "JUNE",
    "JULY",
    "AUGUST",
    "SEPTEMBER",
    "OCTOBER",
    "NOVEMBER",
    "DECEMBER",
];
const DAYS_OF_WEEK: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
const DAYS_OF_WEEK_FULL: [&str; 7] = [
    "SUNDAY",
    "MONDAY",
    "TUESDAY",
    "WEDNESDAY",
    "THURSDAY",
    "FRIDAY",
    "SATURDAY",
];

impl Expression {
    /// Parses a cron expression.
    ///
    /// Accepts the named forms (`@yearly`, `@monthly`, `@weekly`, `@daily`,
    /// `@hourly` and their aliases) and whitespace-separated field lists of
    /// five, six or seven fields; anything after the seventh field is
    /// ignored. See [`Expression`] for the field grammar.
    pub fn parse(spec: &str) -> Result<Self> {
        let cron = spec.trim();
        if cron.is_empty() {
            return Err(Error::EmptyExpression);
        }

        if cron.starts_with('@') {
            return parse_named(cron);
        }

        let fields: Vec<&str> = cron.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(Error::MissingFields);
        }

        let mut expr = Expression::empty(spec);
        let mut specs = FIELDS.iter();
        if fields.len() == 5 {
            // classic cron: seconds default to 0
            expr.seconds = START_BIT;
            specs.next();
        }
        for (field, field_spec) in fields.iter().zip(specs) {
            field_spec.parse(&mut expr, field)?;
        }
        if fields.len() < 7 {
            expr.years = ALL_YEARS;
        }

        // day of week 7 is an alias for 0 (Sunday)
        if expr.days_of_week & (START_BIT >> 7) != 0 {
            expr.days_of_week |= START_BIT;
        }
        if expr.last_weekdays_of_week & (START_BIT >> 7) != 0 {
            expr.last_weekdays_of_week |= START_BIT;
        }

        // replicate the one-week template into five consecutive weeks
        const WEEK_TEMPLATE: u64 = 0xfe00_0000_0000_0000;
        let days_of_week = expr.days_of_week & WEEK_TEMPLATE;
        let last_weekdays = expr.last_weekdays_of_week;
        let mut shift = 0;
        while shift < 35 {
            expr.days_of_week |= days_of_week >> shift;
            expr.last_weekdays_of_week |= last_weekdays >> shift;
            shift += 7;
        }

        // move Sunday of week one to bit 1
        expr.days_of_week >>= 1;
        expr.last_weekdays_of_week >>= 1;

        Ok(expr)
    }

    fn empty(spec: &str) -> Self {
        Self {
            expression: spec.to_string(),
            seconds: 0,
            minutes: 0,
            hours: 0,
            days_of_month: 0,
            workdays_of_month: 0,
            last_day_of_month: false,
            last_workday_of_month: false,
            months: 0,
            days_of_week: 0,
            ith_weekdays_of_week: 0,
            last_weekdays_of_week: 0,
            years: [0; 3],
        }
    }
}

fn parse_named(spec: &str) -> Result<Expression> {
    let mut expr = Expression::empty(spec);
    expr.seconds = START_BIT;
    expr.minutes = START_BIT;
    expr.hours = START_BIT;
    expr.days_of_month = DOMS_MASK;
    expr.months = MONTHS_MASK;
    expr.days_of_week = DOWS_MASK;
    expr.years = ALL_YEARS;

    match spec {
        "@yearly" | "@annually" => {
            // 0 0 0 1 1 * *
            expr.days_of_month = START_BIT >> 1;
            expr.months = START_BIT >> 1;
        }
        "@monthly" => {
            // 0 0 0 1 * * *
            expr.days_of_month = START_BIT >> 1;
        }
        "@weekly" => {
            // 0 0 0 * * 0 *
            expr.days_of_week = weekday_bits(0);
        }
        "@daily" | "@midnight" => {
            // 0 0 0 * * * *
        }
        "@hourly" => {
            // 0 0 * * * * *
            expr.hours = HOURS_MASK;
        }
        _ => return Err(Error::UnknownNamed(spec.to_string())),
    }
    Ok(expr)
}

/// Bits of one weekday in all five weeks of the canonical window.
fn weekday_bits(weekday: u32) -> u64 {
    (0..5).fold(0, |bits, week| bits | (START_BIT >> (1 + weekday + 7 * week)))
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    value: fn(&str) -> Option<u32>,
    populate: fn(&mut Expression, u32, u32, u32),
    special: Option<fn(&mut Expression, &str, fn(&str) -> Option<u32>) -> bool>,
}

static FIELDS: [FieldSpec; 7] = [
    FieldSpec {
        name: "second",
        min: 0,
        max: 59,
        value: atoi,
        populate: populate_seconds,
        special: None,
    },
    FieldSpec {
        name: "minute",
        min: 0,
        max: 59,
        value: atoi,
        populate: populate_minutes,
        special: None,
    },
    FieldSpec {
        name: "hour",
        min: 0,
        max: 23,
        value: atoi,
        populate: populate_hours,
        special: None,
    },
    FieldSpec {
        name: "day of month",
        min: 1,
        max: 31,
        value: atoi,
        populate: populate_days_of_month,
        special: Some(special_dom_entry),
    },
    FieldSpec {
        name: "month",
        min: 1,
        max: 12,
        value: month_value,
        populate: populate_months,
        special: None,
    },
    FieldSpec {
        name: "day of week",
        min: 0,
        max: 7,
        value: dow_value,
        populate: populate_days_of_week,
        special: Some(special_dow_entry),
    },
    FieldSpec {
        name: "year",
        min: 1970,
        max: 2099,
        value: atoi,
        populate: populate_years,
        special: None,
    },
];

impl FieldSpec {
    fn parse(&self, expr: &mut Expression, field: &str) -> Result<()> {
        for entry in field.split(',') {
            self.parse_entry(expr, entry)?;
        }
        Ok(())
    }

    fn parse_entry(&self, expr: &mut Expression, entry: &str) -> Result<()> {
        if entry == "*" {
            (self.populate)(expr, self.min, self.max, 1);
            return Ok(());
        }

        // one value
        if let Some(n) = (self.value)(entry) {
            if !self.in_range(n) {
                return self.out_of_range(entry);
            }
            (self.populate)(expr, n, n, 1);
            return Ok(());
        }

        // stepped: */s, a/s or a-b/s
        if let Some((base, step)) = entry.split_once('/') {
            let step = match step.parse::<u32>() {
                Ok(step) if step >= 1 && step <= self.max - self.min => step,
                _ => {
                    return Err(Error::IllegalStep {
                        field: self.name,
                        entry: entry.to_owned(),
                    })
                }
            };
            return self.parse_stepped(expr, base, step, entry);
        }

        // span: a-b
        if entry.contains('-') {
            return self.parse_stepped(expr, entry, 1, entry);
        }

        if let Some(special) = self.special {
            if special(expr, entry, self.value) {
                return Ok(());
            }
        }

        self.syntax_error(entry)
    }

    fn parse_stepped(&self, expr: &mut Expression, base: &str, step: u32, entry: &str) -> Result<()> {
        if base == "*" {
            // min-max
            (self.populate)(expr, self.min, self.max, step);
            return Ok(());
        }

        if let Some(n) = (self.value)(base) {
            // n-max
            if !self.in_range(n) {
                return self.out_of_range(entry);
            }
            (self.populate)(expr, n, self.max, step);
            return Ok(());
        }

        // standard begin-end
        if let Some((begin, end)) = base.split_once('-') {
            let Some(begin) = (self.value)(begin) else {
                return self.syntax_error(entry);
            };
            let Some(end) = (self.value)(end) else {
                return self.syntax_error(entry);
            };
            if !self.in_range(begin) || !self.in_range(end) {
                return self.out_of_range(entry);
            }
            (self.populate)(expr, begin, end, step);
            return Ok(());
        }

        self.syntax_error(entry)
    }

    #[inline]
    fn in_range(&self, n: u32) -> bool {
        n >= self.min && n <= self.max
    }

    fn syntax_error(&self, entry: &str) -> Result<()> {
        Err(Error::Syntax {
            field: self.name,
            entry: entry.to_owned(),
        })
    }

    fn out_of_range(&self, entry: &str) -> Result<()> {
        Err(Error::OutOfRange {
            field: self.name,
            entry: entry.to_owned(),
        })
    }
}

fn populate_seconds(expr: &mut Expression, begin: u32, end: u32, step: u32) {
    let mut i = begin;
    while i <= end {
        expr.seconds |= START_BIT >> i;
        i += step;
    }
}

fn populate_minutes(expr: &mut Expression, begin: u32, end: u32, step: u32) {
    let mut i = begin;
    while i <= end {
        expr.minutes |= START_BIT >> i;
        i += step;
    }
}

fn populate_hours(expr: &mut Expression, begin: u32, end: u32, step: u32) {
    let mut i = begin;
    while i <= end {
        expr.hours |= START_BIT >> i;
        i += step;
    }
}

fn populate_days_of_month(expr: &mut Expression, begin: u32, end: u32, step: u32) {
    let mut i = begin;
    while i <= end {
        expr.days_of_month |= START_BIT >> i;
        i += step;
    }
}

fn populate_months(expr: &mut Expression, begin: u32, end: u32, step: u32) {
    let mut i = begin;
    while i <= end {
        expr.months |= START_BIT >> i;
        i += step;
    }
}

fn populate_days_of_week(expr: &mut Expression, begin: u32, end: u32, step: u32) {
    let mut i = begin;
    while i <= end {
        expr.days_of_week |= START_BIT >> i;
        i += step;
    }
}

fn populate_years(expr: &mut Expression, begin: u32, end: u32, step: u32) {
    let mut i = begin - 1970;
    let end = end - 1970;
    while i <= end {
        expr.years[(i >> 6) as usize] |= 1 << (63 - (i & 0x3f));
        i += step;
    }
}

fn special_dom_entry(expr: &mut Expression, entry: &str, value: fn(&str) -> Option<u32>) -> bool {
    match entry {
        "?" => expr.days_of_month |= DOMS_MASK,
        "L" => expr.last_day_of_month = true,
        "LW" => expr.last_workday_of_month = true,
        _ => {
            // {day}W
            let Some(day) = entry.strip_suffix('W').and_then(value) else {
                return false;
            };
            if !(1..=31).contains(&day) {
                return false;
            }
            expr.workdays_of_month |= START_BIT >> day;
        }
    }
    true
}

fn special_dow_entry(expr: &mut Expression, entry: &str, value: fn(&str) -> Option<u32>) -> bool {
    if entry == "?" {
        expr.days_of_week |= DOWS_MASK << 1;
        return true;
    }

    // {day}L
    if let Some(day) = entry.strip_suffix('L').and_then(value) {
        if day > 7 {
            return false;
        }
        expr.last_weekdays_of_week |= START_BIT >> day;
        return true;
    }

    // {day}#{n}
    if let Some((day, nth)) = entry.split_once('#') {
        let Some(mut day) = value(day) else {
            return false;
        };
        let Ok(nth) = nth.parse::<u32>() else {
            return false;
        };
        if day > 7 || !(1..=5).contains(&nth) {
            return false;
        }
        if day == 7 {
            day = 0;
        }
        // Sunday sits at bit 1 in the canonical window
        expr.ith_weekdays_of_week |= START_BIT >> ((nth - 1) * 7 + day + 1);
        return true;
    }

    false
}

fn atoi(input: &str) -> Option<u32> {
    input.parse().ok()
}

fn month_value(input: &str) -> Option<u32> {
    atoi(input).or_else(|| {
        parse_string_value(input, &MONTHS)
            .or_else(|| parse_string_value(input, &MONTHS_FULL))
            .map(|i| i + 1)
    })
}

fn dow_value(input: &str) -> Option<u32> {
    atoi(input)
        .or_else(|| parse_string_value(input, &DAYS_OF_WEEK))
        .or_else(|| parse_string_value(input, &DAYS_OF_WEEK_FULL))
}

fn parse_string_value(input: &str, values: &[&str]) -> Option<u32> {
    if input.is_empty() {
        None
    } else {
        values
            .iter()
            .position(|&value| value.eq_ignore_ascii_case(input))
            .map(|i| i as u32)
    }
}

impl TryFrom<String> for Expression {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl TryFrom<&String> for Expression {
    type Error = Error;

    fn try_from(value: &String) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for Expression {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl FromStr for Expression {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}
