//! Date and time answers computed from the local clock.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate};
use regex::Regex;

use vox_core::{Capability, Error, Tool};

const TIME_FORMAT: &str = "%-I:%M %p";
const DATE_FORMAT: &str = "%A, %B %-d, %Y";

static ACTIVATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(time|date|today|tonight|tomorrow|yesterday|day|days|week|weeks|month|months|year|clock|o'clock|timezone|time zone|utc|gmt|calendar|until|till|ago|since|weekday|now)\b",
    )
    .expect("date/time activation pattern is valid")
});

const MONTHS: &str = r"january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("ISO date pattern is valid")
});

static US_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("US date pattern is valid")
});

static MONTH_DAY_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
    ))
    .expect("month-day-year pattern is valid")
});

static DAY_MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTHS})\.?,?\s+(\d{{4}})\b"
    ))
    .expect("day-month-year pattern is valid")
});

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn ymd(year: &str, month: u32, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

/// Find the first recognizable date in free text.
///
/// Recognized: `MM/DD/YYYY`, `Month DD, YYYY`, `DD Month YYYY`, `YYYY-MM-DD`.
pub fn extract_date(text: &str) -> Option<NaiveDate> {
    if let Some(date) = US_DATE
        .captures(text)
        .and_then(|c| ymd(&c[3], c[1].parse().ok()?, &c[2]))
    {
        return Some(date);
    }
    if let Some(date) = MONTH_DAY_YEAR
        .captures(text)
        .and_then(|c| ymd(&c[3], month_number(&c[1])?, &c[2]))
    {
        return Some(date);
    }
    if let Some(date) = DAY_MONTH_YEAR
        .captures(text)
        .and_then(|c| ymd(&c[3], month_number(&c[2])?, &c[1]))
    {
        return Some(date);
    }
    ISO_DATE
        .captures(text)
        .and_then(|c| ymd(&c[1], c[2].parse().ok()?, &c[3]))
}

/// Whole calendar months from `from` to `to` (`to` >= `from`).
fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    let mut months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(0)
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

fn long_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateQuery {
    Until,
    Since,
    Tomorrow,
    Yesterday,
    DayOfWeek,
    Timezone,
    FullDateTime,
    CurrentTime,
    CurrentDate,
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

impl DateQuery {
    fn detect(query: &str) -> Self {
        let q = query.to_lowercase();

        if contains_any(&q, &["until", "till ", "how long before", "countdown"]) {
            DateQuery::Until
        } else if contains_any(&q, &[" ago", "since", "elapsed", "passed"]) {
            DateQuery::Since
        } else if contains_any(&q, &["tomorrow"]) {
            DateQuery::Tomorrow
        } else if contains_any(&q, &["yesterday"]) {
            DateQuery::Yesterday
        } else if contains_any(&q, &["day of the week", "what day", "which day", "weekday"]) {
            DateQuery::DayOfWeek
        } else if contains_any(&q, &["timezone", "time zone", "utc", "gmt", "offset"]) {
            DateQuery::Timezone
        } else if contains_any(&q, &["time"]) && contains_any(&q, &["date", "day"]) {
            DateQuery::FullDateTime
        } else if contains_any(&q, &["time", "clock", "hour"]) {
            DateQuery::CurrentTime
        } else if contains_any(&q, &["date", "today"]) {
            DateQuery::CurrentDate
        } else {
            DateQuery::FullDateTime
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DateTimeTool;

impl DateTimeTool {
    pub fn new() -> Self {
        Self
    }

    /// Answer `query` as if the current instant were `now`.
    pub fn answer_at(&self, query: &str, now: DateTime<FixedOffset>) -> String {
        let today = now.date_naive();

        match DateQuery::detect(query) {
            DateQuery::CurrentTime => format!("The current time is {}.", now.format(TIME_FORMAT)),
            DateQuery::CurrentDate => format!("Today is {}.", long_date(today)),
            DateQuery::Tomorrow => format!("Tomorrow is {}.", long_date(today + Duration::days(1))),
            DateQuery::Yesterday => {
                format!("Yesterday was {}.", long_date(today - Duration::days(1)))
            }
            DateQuery::DayOfWeek => format!("Today is {}.", today.format("%A")),
            DateQuery::Timezone => format!(
                "Your current UTC offset is {} (local time {}, {} UTC).",
                now.format("%:z"),
                now.format(TIME_FORMAT),
                now.naive_utc().format("%H:%M")
            ),
            DateQuery::FullDateTime => format!(
                "It is {} on {} (UTC{}).",
                now.format(TIME_FORMAT),
                long_date(today),
                now.format("%:z")
            ),
            DateQuery::Until => match extract_date(query) {
                Some(target) => Self::until(today, target),
                None => "Which date should I count down to? Give it as MM/DD/YYYY, \"Month DD, YYYY\", \"DD Month YYYY\" or YYYY-MM-DD.".to_string(),
            },
            DateQuery::Since => match extract_date(query) {
                Some(target) => Self::since(today, target),
                None => "Which date should I count back from? Give it as MM/DD/YYYY, \"Month DD, YYYY\", \"DD Month YYYY\" or YYYY-MM-DD.".to_string(),
            },
        }
    }

    fn until(today: NaiveDate, target: NaiveDate) -> String {
        let days = (target - today).num_days();
        if days == 0 {
            return format!("{} is today.", long_date(target));
        }
        if days < 0 {
            return format!(
                "{} has already passed; it was {} ago.",
                long_date(target),
                plural(-days, "day")
            );
        }
        format!(
            "There are {} until {} ({} and {}).",
            plural(days, "day"),
            long_date(target),
            plural(days / 7, "week"),
            plural(days % 7, "day")
        )
    }

    fn since(today: NaiveDate, target: NaiveDate) -> String {
        let days = (today - target).num_days();
        if days < 0 {
            return format!(
                "{} is in the future, {} from now.",
                long_date(target),
                plural(-days, "day")
            );
        }
        format!(
            "{} was {} ago ({}, {}).",
            long_date(target),
            plural(days, "day"),
            plural(days / 7, "week"),
            plural(i64::from(months_between(target, today)), "month")
        )
    }
}

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "date_time"
    }

    fn description(&self) -> &str {
        "Current date, time, timezone and day counts between dates."
    }

    fn capability(&self) -> Capability {
        Capability::DateTime
    }

    fn should_activate(&self, query: &str) -> bool {
        ACTIVATION.is_match(query)
    }

    async fn execute(&self, query: &str) -> Result<String, Error> {
        Ok(self.answer_at(query, Local::now().fixed_offset()))
    }
}
