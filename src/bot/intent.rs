//! Parsing of "I am expecting <person> at <time>" direct messages.
//!
//! Recognition is deliberately rigid: the keyword must start at byte offset 5,
//! so "I am expecting ..." is accepted while "  I am expecting ..." or
//! "I'm expecting ..." are not. `ParseMode::Lenient` relaxes the prefix check
//! (leading whitespace, any casing) but extracts the same fields.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::LazyLock;

const KEYWORD: &str = "expecting";
const KEYWORD_OFFSET: usize = 5;
const CANONICAL_PREFIX: &str = "I am expecting";

static PERSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"expecting (.*) at").expect("static regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    #[default]
    Strict,
    Lenient,
}

/// Fields pulled out of a recognized utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub person: String,
    pub time: String,
}

impl Expectation {
    /// Combine the spoken time with `today`. No timezone conversion happens;
    /// the local clock is authoritative.
    pub fn expected_at(&self, today: NaiveDate) -> Option<NaiveDateTime> {
        parse_time_of_day(&self.time).map(|t| today.and_time(t))
    }
}

pub fn parse_expectation(text: &str, mode: ParseMode) -> Option<Expectation> {
    match mode {
        ParseMode::Strict => parse_strict(text),
        ParseMode::Lenient => {
            let trimmed = text.trim_start();
            let prefix = trimmed.get(..CANONICAL_PREFIX.len())?;
            if !prefix.eq_ignore_ascii_case(CANONICAL_PREFIX) {
                return None;
            }
            let canonical = format!("{CANONICAL_PREFIX}{}", &trimmed[CANONICAL_PREFIX.len()..]);
            parse_strict(&canonical)
        }
    }
}

fn parse_strict(text: &str) -> Option<Expectation> {
    if text.find(KEYWORD) != Some(KEYWORD_OFFSET) {
        return None;
    }
    if !text[KEYWORD_OFFSET + KEYWORD.len()..].contains("at") {
        return None;
    }

    let person = PERSON.captures(text)?.get(1)?.as_str().trim().to_string();
    let time_start = text.rfind("at ")? + "at ".len();
    let time = text[time_start..].trim().to_string();

    if person.is_empty() || time.is_empty() {
        return None;
    }
    Some(Expectation { person, time })
}

/// Parse "3:00 PM", "3pm", "3 p.m.", "15:00" and similar.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let cleaned = raw
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ','))
        .to_uppercase()
        .replace('.', "");
    let compact: String = cleaned.chars().filter(|c| !c.is_whitespace()).collect();

    let (clock, meridiem) = if let Some(clock) = compact.strip_suffix("AM") {
        (clock, Some("AM"))
    } else if let Some(clock) = compact.strip_suffix("PM") {
        (clock, Some("PM"))
    } else {
        (compact.as_str(), None)
    };
    if clock.is_empty() {
        return None;
    }
    let clock = if clock.contains(':') {
        clock.to_string()
    } else {
        format!("{clock}:00")
    };

    match meridiem {
        Some(m) => NaiveTime::parse_from_str(&format!("{clock} {m}"), "%I:%M %p").ok(),
        None => NaiveTime::parse_from_str(&clock, "%H:%M").ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict(text: &str) -> Option<Expectation> {
        parse_expectation(text, ParseMode::Strict)
    }

    #[test]
    fn test_canonical_phrase() {
        let e = strict("I am expecting Bob at 3:00 PM").unwrap();
        assert_eq!(e.person, "Bob");
        assert_eq!(e.time, "3:00 PM");
    }

    #[test]
    fn test_person_with_spaces() {
        let e = strict("I am expecting the plumber from Acme at 10am").unwrap();
        assert_eq!(e.person, "the plumber from Acme");
        assert_eq!(e.time, "10am");
    }

    #[test]
    fn test_name_containing_at() {
        let e = strict("I am expecting Pat at 3PM").unwrap();
        assert_eq!(e.person, "Pat");
        assert_eq!(e.time, "3PM");
    }

    #[test]
    fn test_time_is_after_last_at() {
        let e = strict("I am expecting Bob at the lobby at 4 PM").unwrap();
        assert_eq!(e.person, "Bob at the lobby");
        assert_eq!(e.time, "4 PM");
    }

    #[test]
    fn test_unrecognized() {
        assert!(strict("hello there").is_none());
        assert!(strict("I'm expecting Bob at 3PM").is_none());
        assert!(strict(" I am expecting Bob at 3PM").is_none());
        assert!(strict("I am expecting Bob").is_none());
        assert!(strict("I am expecting Bob at").is_none());
        assert!(strict("I am expecting  at 3PM").is_none());
        assert!(strict("").is_none());
    }

    #[test]
    fn test_lenient_accepts_whitespace_and_case() {
        let e = parse_expectation("   i AM Expecting Carol at 9:15 am", ParseMode::Lenient).unwrap();
        assert_eq!(e.person, "Carol");
        assert_eq!(e.time, "9:15 am");
        assert!(parse_expectation("I'm expecting Carol at 9", ParseMode::Lenient).is_none());
        assert!(parse_expectation("hi", ParseMode::Lenient).is_none());
    }

    #[test]
    fn test_lenient_does_not_panic_on_multibyte() {
        assert!(parse_expectation("héllo wörld, ünïcode ✓", ParseMode::Lenient).is_none());
        assert!(strict("héllo expecting ✓ at ✓").is_none());
    }

    #[test]
    fn test_parse_time_of_day() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert_eq!(parse_time_of_day("3:00 PM"), Some(t(15, 0)));
        assert_eq!(parse_time_of_day("3:00pm"), Some(t(15, 0)));
        assert_eq!(parse_time_of_day("3 pm"), Some(t(15, 0)));
        assert_eq!(parse_time_of_day("3PM."), Some(t(15, 0)));
        assert_eq!(parse_time_of_day("10 a.m."), Some(t(10, 0)));
        assert_eq!(parse_time_of_day("12:30 AM"), Some(t(0, 30)));
        assert_eq!(parse_time_of_day("15:45"), Some(t(15, 45)));
        assert_eq!(parse_time_of_day("9"), Some(t(9, 0)));
        assert_eq!(parse_time_of_day("noon"), None);
        assert_eq!(parse_time_of_day("PM"), None);
        assert_eq!(parse_time_of_day("25:00"), None);
    }

    #[test]
    fn test_expected_at_uses_given_date() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let e = strict("I am expecting Bob at 3:00 PM").unwrap();
        let at = e.expected_at(today).unwrap();
        assert_eq!(at.format("%Y-%m-%d %H:%M").to_string(), "2026-10-19 15:00");

        let vague = Expectation { person: "Bob".into(), time: "later".into() };
        assert!(vague.expected_at(today).is_none());
    }
}
