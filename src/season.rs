//! Crop-season labels and the date-to-season mapping.
//!
//! A soy season spans September of year Y through March of year Y+1 and is
//! labeled `"YY/YY+1"` with zero-padded two-digit years. The label is the
//! join key between climate, NDVI and yield tables and the partition key for
//! rolling windows and the train/test split, so the zero padding matters:
//! labels sort correctly as plain strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::Date;

/// Two-digit season label such as `"22/23"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeasonLabel(String);

impl SeasonLabel {
    /// Map a calendar date to its season.
    ///
    /// Months September through December start the season of that calendar
    /// year; every other month belongs to the season started the previous
    /// year. Off-season months (April through August) never occur in the
    /// filtered inputs but still map deterministically under the same rule.
    pub fn from_date(date: Date) -> Self {
        let year = date.year();
        let start = if u8::from(date.month()) >= 9 {
            year
        } else {
            year - 1
        };
        Self::from_start_year(start)
    }

    /// Build a label from the season's starting calendar year.
    pub fn from_start_year(start: i32) -> Self {
        let end = start + 1;
        Self(format!("{:02}/{:02}", start.rem_euclid(100), end.rem_euclid(100)))
    }

    /// Parse a label of the form `"YY/YY"`.
    pub fn parse(text: &str) -> Option<Self> {
        let (start, end) = text.split_once('/')?;
        if start.len() != 2 || end.len() != 2 {
            return None;
        }
        let start: u8 = start.parse().ok()?;
        let end: u8 = end.parse().ok()?;
        if (start + 1) % 100 != end {
            return None;
        }
        Some(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeasonLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn second_semester_starts_the_season() {
        assert_eq!(SeasonLabel::from_date(date!(2000 - 10 - 15)).as_str(), "00/01");
        assert_eq!(SeasonLabel::from_date(date!(1999 - 12 - 31)).as_str(), "99/00");
        assert_eq!(SeasonLabel::from_date(date!(2022 - 09 - 01)).as_str(), "22/23");
    }

    #[test]
    fn first_semester_belongs_to_previous_start() {
        assert_eq!(SeasonLabel::from_date(date!(2001 - 02 - 10)).as_str(), "00/01");
        assert_eq!(SeasonLabel::from_date(date!(2023 - 03 - 31)).as_str(), "22/23");
        assert_eq!(SeasonLabel::from_date(date!(2000 - 01 - 01)).as_str(), "99/00");
    }

    #[test]
    fn off_season_months_use_the_same_rule() {
        assert_eq!(SeasonLabel::from_date(date!(2010 - 06 - 15)).as_str(), "09/10");
    }

    #[test]
    fn labels_sort_chronologically_as_strings() {
        let mut labels = vec![
            SeasonLabel::from_start_year(2010),
            SeasonLabel::from_start_year(2003),
            SeasonLabel::from_start_year(2022),
        ];
        labels.sort();
        let sorted: Vec<&str> = labels.iter().map(SeasonLabel::as_str).collect();
        assert_eq!(sorted, vec!["03/04", "10/11", "22/23"]);
    }

    #[test]
    fn parse_rejects_malformed_labels() {
        assert!(SeasonLabel::parse("23/24").is_some());
        assert!(SeasonLabel::parse("23/25").is_none());
        assert!(SeasonLabel::parse("2324").is_none());
        assert!(SeasonLabel::parse("3/4").is_none());
    }
}
