//! Time expression recognizer
//!
//! Dictionary terms map surface forms ("上周", "last week") to expression
//! keys such as `last_week`; a built-in pattern pass handles counted
//! windows ("最近3天", "past 2 weeks"), absolute dates and year-months.
//! Every match carries a `DateRange` anchored to the caller's `today`.

use std::sync::Arc;

use chrono::{Datelike, Days, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use intent_core::{ConfigError, EntityMatch, EntityType, ResolvedValue};

use crate::dictionary::{DictionaryFile, DictionarySource};
use crate::numeral;
use crate::recognizer::{char_offset, merge_pattern_matches, DictionaryRecognizer};
use crate::{EntityRecognizer, StagedReload};

/// Expression keys a time dictionary may map terms to
pub const EXPRESSION_KEYS: &[&str] = &[
    "today",
    "yesterday",
    "day_before_yesterday",
    "this_week",
    "last_week",
    "this_month",
    "last_month",
    "this_quarter",
    "last_quarter",
    "q1",
    "q2",
    "q3",
    "q4",
    "this_year",
    "last_year",
    "recently",
];

/// Days covered by "recently"
const RECENT_DAYS: u64 = 7;

const RELATIVE_CONFIDENCE: f32 = 0.9;
const ABSOLUTE_CONFIDENCE: f32 = 0.95;

static RELATIVE_CN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:最近|近|过去)([0-9]+|[零一二两三四五六七八九十百]+)个?(天|日|周|星期|月)")
        .expect("valid relative pattern")
});

static RELATIVE_EN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:last|past)\s+([0-9]+)\s+(day|week|month)s?\b")
        .expect("valid relative pattern")
});

static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]{4})[-/.]([0-9]{1,2})[-/.]([0-9]{1,2})").expect("valid date pattern")
});

static CN_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]{4})年([0-9]{1,2})月([0-9]{1,2})[日号]").expect("valid date pattern")
});

static CN_YEAR_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]{4})年([0-9]{1,2})月").expect("valid year-month pattern")
});

// ============================================================================
// Calendar helpers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeUnit {
    Day,
    Week,
    Month,
}

impl TimeUnit {
    fn parse(unit: &str) -> Option<Self> {
        match unit.to_ascii_lowercase().as_str() {
            "天" | "日" | "day" => Some(Self::Day),
            "周" | "星期" | "week" => Some(Self::Week),
            "月" | "month" => Some(Self::Month),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Day => "days",
            Self::Week => "weeks",
            Self::Month => "months",
        }
    }
}

fn monday_of(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
}

fn first_of_month(date: NaiveDate) -> Option<NaiveDate> {
    date.with_day(1)
}

fn quarter_start(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), (date.month() - 1) / 3 * 3 + 1, 1)
}

fn full_month(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((start, end))
}

fn full_quarter(year: i32, quarter: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)?;
    let end = start.checked_add_months(Months::new(3))?.pred_opt()?;
    Some((start, end))
}

/// Range of a dictionary expression key
///
/// Current periods end at `today`; past periods use full calendar bounds.
pub fn expression_range(key: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let days_ago = |n: u64| today.checked_sub_days(Days::new(n));

    match key {
        "today" => Some((today, today)),
        "yesterday" => days_ago(1).map(|d| (d, d)),
        "day_before_yesterday" => days_ago(2).map(|d| (d, d)),
        "this_week" => Some((monday_of(today)?, today)),
        "last_week" => {
            let monday = monday_of(today)?;
            Some((monday.checked_sub_days(Days::new(7))?, monday.pred_opt()?))
        }
        "this_month" => Some((first_of_month(today)?, today)),
        "last_month" => {
            let prev = first_of_month(today)?.checked_sub_months(Months::new(1))?;
            full_month(prev.year(), prev.month())
        }
        "this_quarter" => Some((quarter_start(today)?, today)),
        "last_quarter" => {
            let start = quarter_start(today)?;
            Some((start.checked_sub_months(Months::new(3))?, start.pred_opt()?))
        }
        "q1" | "q2" | "q3" | "q4" => {
            let quarter = key[1..].parse().ok()?;
            let (start, end) = full_quarter(today.year(), quarter)?;
            // The running quarter stops at today
            if start <= today && today <= end {
                Some((start, today))
            } else {
                Some((start, end))
            }
        }
        "this_year" => Some((NaiveDate::from_ymd_opt(today.year(), 1, 1)?, today)),
        "last_year" => Some((
            NaiveDate::from_ymd_opt(today.year() - 1, 1, 1)?,
            NaiveDate::from_ymd_opt(today.year() - 1, 12, 31)?,
        )),
        "recently" => Some((days_ago(RECENT_DAYS - 1)?, today)),
        _ => None,
    }
}

/// Range covering the last `count` units up to `today`
///
/// Days are a fixed window; weeks start on the Monday `count - 1` weeks
/// back; months start on the first of the month `count - 1` months back.
pub fn last_n_range(count: u32, unit: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    if count == 0 {
        return None;
    }
    let back = count - 1;

    let start = match TimeUnit::parse(unit)? {
        TimeUnit::Day => today.checked_sub_days(Days::new(u64::from(back)))?,
        TimeUnit::Week => monday_of(today)?.checked_sub_days(Days::new(7 * u64::from(back)))?,
        TimeUnit::Month => first_of_month(today)?.checked_sub_months(Months::new(back))?,
    };
    Some((start, today))
}

fn validate_time_dictionary(file: &DictionaryFile) -> Result<(), ConfigError> {
    let known = |key: &str| EXPRESSION_KEYS.contains(&key);

    for term in &file.terms {
        if !known(&term.name) {
            return Err(ConfigError::InvalidValue {
                key: "time.terms.name".to_string(),
                value: term.name.clone(),
            });
        }
    }
    for pattern in &file.patterns {
        match pattern.normalized.as_deref() {
            Some(key) if known(key) => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "time.patterns.normalized".to_string(),
                    value: format!("{other:?}"),
                })
            }
        }
    }
    Ok(())
}

// ============================================================================
// Recognizer
// ============================================================================

/// Recognizer for relative and absolute time expressions
pub struct TimeRecognizer {
    terms: DictionaryRecognizer,
}

impl TimeRecognizer {
    pub fn new(source: Arc<dyn DictionarySource>) -> Result<Self, ConfigError> {
        let terms =
            DictionaryRecognizer::with_validator(EntityType::Time, source, validate_time_dictionary)?;
        Ok(Self { terms })
    }

    fn builtin_matches(text: &str, today: NaiveDate) -> Vec<EntityMatch> {
        let mut matches = Vec::new();

        for regex in [&*RELATIVE_CN, &*RELATIVE_EN] {
            for caps in regex.captures_iter(text) {
                let (Some(whole), Some(count), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2))
                else {
                    continue;
                };
                let Some(n) = numeral::parse_count(count.as_str()) else {
                    continue;
                };
                let Some(time_unit) = TimeUnit::parse(unit.as_str()) else {
                    continue;
                };
                let Some(range) = last_n_range(n, unit.as_str(), today) else {
                    continue;
                };
                matches.push(time_match(
                    text,
                    whole,
                    format!("last_{n}_{}", time_unit.key()),
                    RELATIVE_CONFIDENCE,
                    range,
                ));
            }
        }

        // ISO dates must not touch digits on either side; CN dates end in a
        // unit character and only need the leading check
        for (regex, trailing) in [(&*ISO_DATE, true), (&*CN_DATE, false)] {
            for caps in regex.captures_iter(text) {
                let Some(whole) = caps.get(0) else { continue };
                if !standalone(text, whole, trailing) {
                    continue;
                }
                let Some(date) = ymd(&caps, true) else { continue };
                matches.push(time_match(
                    text,
                    whole,
                    date.format("%Y-%m-%d").to_string(),
                    ABSOLUTE_CONFIDENCE,
                    (date, date),
                ));
            }
        }

        for caps in CN_YEAR_MONTH.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if !standalone(text, whole, false) {
                continue;
            }
            let Some(first) = ymd(&caps, false) else { continue };
            let Some(range) = full_month(first.year(), first.month()) else {
                continue;
            };
            matches.push(time_match(
                text,
                whole,
                first.format("%Y-%m").to_string(),
                ABSOLUTE_CONFIDENCE,
                range,
            ));
        }

        matches
    }
}

/// Whether a numeric match is not cut out of a longer digit run
fn standalone(text: &str, whole: regex::Match<'_>, trailing: bool) -> bool {
    let is_digit = |c: Option<char>| c.is_some_and(|c| c.is_ascii_digit());
    if is_digit(text[..whole.start()].chars().next_back()) {
        return false;
    }
    !(trailing && is_digit(text[whole.end()..].chars().next()))
}

fn ymd(caps: &regex::Captures<'_>, with_day: bool) -> Option<NaiveDate> {
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let year = i32::try_from(field(1)?).ok()?;
    let day = if with_day { field(3)? } else { 1 };
    NaiveDate::from_ymd_opt(year, field(2)?, day)
}

fn time_match(
    text: &str,
    whole: regex::Match<'_>,
    normalized_name: String,
    confidence: f32,
    (start, end): (NaiveDate, NaiveDate),
) -> EntityMatch {
    EntityMatch {
        text: whole.as_str().to_string(),
        start: char_offset(text, whole.start()),
        end: char_offset(text, whole.end()),
        entity_type: EntityType::Time,
        normalized_name,
        parent: None,
        confidence,
        matched_via_alias: false,
        value: Some(ResolvedValue::DateRange { start, end }),
    }
}

impl EntityRecognizer for TimeRecognizer {
    fn domain(&self) -> EntityType {
        EntityType::Time
    }

    fn recognize(&self, text: &str, today: NaiveDate) -> Vec<EntityMatch> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let dictionary: Vec<EntityMatch> = self
            .terms
            .recognize(text, today)
            .into_iter()
            .filter_map(|mut m| {
                let (start, end) = expression_range(&m.normalized_name, today)?;
                m.value = Some(ResolvedValue::DateRange { start, end });
                Some(m)
            })
            .collect();

        merge_pattern_matches(dictionary, Self::builtin_matches(text, today))
    }

    fn stage_reload(&self) -> Result<Box<dyn StagedReload + '_>, ConfigError> {
        self.terms.stage_reload()
    }
}
