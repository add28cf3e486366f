use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::request::FormData;
use crate::domain::user::LeaveType;
use crate::vacation::VacationLedger;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavePeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl LeavePeriod {
    pub fn business_days(&self) -> i32 {
        VacationLedger::business_days_inclusive(self.start, self.end)
    }
}

/// Reads leave fields out of a free-form submission.
pub trait FormFieldExtractor: Send + Sync {
    fn leave_type(&self, form: &FormData) -> Option<LeaveType>;
    fn leave_period(&self, form: &FormData) -> Option<LeavePeriod>;
}

/// Matches field names against keywords, since template authors name fields freely.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordFormFieldExtractor;

const LEAVE_TYPE_KEYS: &[&str] = &["leave", "type", "kind"];
const START_KEYS: &[&str] = &["start", "from", "begin"];
const END_KEYS: &[&str] = &["end", "until", "to"];

impl FormFieldExtractor for KeywordFormFieldExtractor {
    fn leave_type(&self, form: &FormData) -> Option<LeaveType> {
        form.iter()
            .filter(|(key, _)| key_matches(key, LEAVE_TYPE_KEYS))
            .find_map(|(_, value)| value.as_str().and_then(|raw| raw.parse().ok()))
    }

    fn leave_period(&self, form: &FormData) -> Option<LeavePeriod> {
        let dated: Vec<(String, NaiveDate)> = form
            .iter()
            .filter_map(|(key, value)| {
                parse_date(value).map(|date| (key.to_ascii_lowercase(), date))
            })
            .collect();

        let start =
            dated.iter().find(|(key, _)| key_matches(key, START_KEYS)).map(|(_, date)| *date);
        let end = dated
            .iter()
            .find(|(key, _)| !key_matches(key, START_KEYS) && key_matches(key, END_KEYS))
            .map(|(_, date)| *date);

        match (start, end) {
            (Some(start), Some(end)) => Some(LeavePeriod { start, end }),
            _ if dated.len() == 2 => {
                let (first, second) = (dated[0].1, dated[1].1);
                Some(LeavePeriod { start: first.min(second), end: first.max(second) })
            }
            _ => None,
        }
    }
}

fn key_matches(key: &str, keywords: &[&str]) -> bool {
    let key = key.to_ascii_lowercase();
    keywords.iter().any(|keyword| key.contains(keyword))
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| raw.get(..10).and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()))
}
