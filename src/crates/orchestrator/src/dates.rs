//! Date parsing and normalization for timeline events and tabular cells.
//!
//! Accepts the formats the corpus actually contains: ISO, `DD.MM.YYYY`,
//! Russian long forms ("20 сентября 2023 г."), and relative phrases
//! ("через 5 дней после подписания") resolved against a reference date.
//! Years outside 1900..=2100 are rejected.

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

static RUSSIAN_LONG: OnceLock<Regex> = OnceLock::new();
static DOTTED: OnceLock<Regex> = OnceLock::new();
static RELATIVE: OnceLock<Regex> = OnceLock::new();

const RUSSIAN_MONTHS: [(&str, u32); 12] = [
    ("января", 1),
    ("февраля", 2),
    ("марта", 3),
    ("апреля", 4),
    ("мая", 5),
    ("июня", 6),
    ("июля", 7),
    ("августа", 8),
    ("сентября", 9),
    ("октября", 10),
    ("ноября", 11),
    ("декабря", 12),
];

fn check_year(date: NaiveDate) -> Result<NaiveDate, String> {
    let year = date.year();
    if (MIN_YEAR..=MAX_YEAR).contains(&year) {
        Ok(date)
    } else {
        Err(format!("year {year} outside {MIN_YEAR}..{MAX_YEAR}"))
    }
}

/// Parse a date string in any supported format and normalize to
/// `YYYY-MM-DD`.
pub fn parse_and_normalize_date(
    raw: &str,
    reference_date: Option<NaiveDate>,
) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty date string".into());
    }

    // Relative phrases first: they contain digits that would otherwise
    // confuse the absolute parsers.
    if let Some(reference) = reference_date {
        let lower = raw.to_lowercase();
        if lower.contains("через") || lower.contains("после") || lower.contains("в течение") {
            if let Some(date) = parse_relative(&lower, reference) {
                return check_year(date).map(|d| d.format("%Y-%m-%d").to_string());
            }
        }
    }

    // ISO is the fast path.
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return check_year(date).map(|d| d.format("%Y-%m-%d").to_string());
    }

    // Russian long form: "20 сентября 2023" (optional "г."/"года").
    let russian = RUSSIAN_LONG.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,2})\s+([а-яё]+)\s+(\d{4})").expect("static regex")
    });
    if let Some(captures) = russian.captures(raw) {
        let day: u32 = captures[1].parse().map_err(|_| "bad day".to_string())?;
        let month_name = captures[2].to_lowercase();
        let year: i32 = captures[3].parse().map_err(|_| "bad year".to_string())?;
        if let Some((_, month)) = RUSSIAN_MONTHS.iter().find(|(name, _)| *name == month_name) {
            let date = NaiveDate::from_ymd_opt(year, *month, day)
                .ok_or_else(|| format!("invalid calendar date: {raw}"))?;
            return check_year(date).map(|d| d.format("%Y-%m-%d").to_string());
        }
    }

    // Dotted form: DD.MM.YYYY.
    let dotted =
        DOTTED.get_or_init(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{4})").expect("static regex"));
    if let Some(captures) = dotted.captures(raw) {
        let day: u32 = captures[1].parse().map_err(|_| "bad day".to_string())?;
        let month: u32 = captures[2].parse().map_err(|_| "bad month".to_string())?;
        let year: i32 = captures[3].parse().map_err(|_| "bad year".to_string())?;
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| format!("invalid calendar date: {raw}"))?;
        return check_year(date).map(|d| d.format("%Y-%m-%d").to_string());
    }

    Err(format!("unrecognized date format: {raw}"))
}

/// Resolve "через N дней/недель/месяцев" against a reference date.
fn parse_relative(lower: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let relative = RELATIVE.get_or_init(|| {
        Regex::new(r"(\d+)\s*(день|дня|дней|недел\w*|месяц\w*|год\w*|лет)").expect("static regex")
    });
    let captures = relative.captures(lower)?;
    let amount: i64 = captures[1].parse().ok()?;
    let unit = &captures[2];

    if unit.starts_with("ден") || unit.starts_with("дн") {
        reference.checked_add_signed(Duration::days(amount))
    } else if unit.starts_with("недел") {
        reference.checked_add_signed(Duration::weeks(amount))
    } else if unit.starts_with("месяц") {
        add_months(reference, amount as i32)
    } else {
        // годы / лет
        NaiveDate::from_ymd_opt(
            reference.year() + amount as i32,
            reference.month(),
            reference.day(),
        )
    }
}

fn add_months(date: NaiveDate, months: i32) -> Option<NaiveDate> {
    let zero_based = date.month0() as i32 + months;
    let year = date.year() + zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    // Clamp the day for shorter target months.
    (1..=date.day())
        .rev()
        .find_map(|day| NaiveDate::from_ymd_opt(year, month, day))
}

/// Whether a normalized `YYYY-MM-DD` string is in the accepted range.
pub fn is_reasonable_date(normalized: &str) -> bool {
    NaiveDate::parse_from_str(normalized, "%Y-%m-%d")
        .map(|d| (MIN_YEAR..=MAX_YEAR).contains(&d.year()))
        .unwrap_or(false)
}
