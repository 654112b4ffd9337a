//! Date-times that remember how precise they are.
//!
//! A `GranularDateTime` pairs a naive UTC datetime with the `Granularity`
//! it was known to, so "2019" and "2019-01-01T00:00:00" stay distinct after
//! a round trip through the cache. Serialization emits the ISO prefix for the
//! granularity; deserialization accepts any such prefix.

use std::fmt;

use chrono::format::{Parsed, StrftimeItems, parse};
use chrono::{Datelike, NaiveDateTime, SubsecRound, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// ISO templates, indexed by granularity value minus one
pub const TEMPLATES: [&str; 7] = [
    "%Y",
    "%Y-%m",
    "%Y-%m-%d",
    "%Y-%m-%dT%H",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S.%f",
];

/// Rendered length of each template in `TEMPLATES`
const TEMPLATE_LENGTHS: [usize; 7] = [4, 7, 10, 13, 16, 19, 26];

pub type TimeResult<T> = Result<T, TimeError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("datetime data '{value}' does not match any formats: {templates:?}")]
    NoMatchingTemplate {
        value: String,
        templates: Vec<String>,
    },

    #[error("Unknown granularity: {0}")]
    UnknownGranularity(String),
}

/// Precision of a datetime, from year down to microsecond
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    Year = 1,
    Month = 2,
    Day = 3,
    Hour = 4,
    Minute = 5,
    Second = 6,
    Microsecond = 7,
}

impl Granularity {
    pub const ALL: [Granularity; 7] = [
        Granularity::Year,
        Granularity::Month,
        Granularity::Day,
        Granularity::Hour,
        Granularity::Minute,
        Granularity::Second,
        Granularity::Microsecond,
    ];

    #[must_use]
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Granularity for a 1-based value, clamped into `YEAR..=MICROSECOND`
    #[must_use]
    pub fn from_value_clamped(value: usize) -> Self {
        let index = value.clamp(1, Self::ALL.len()) - 1;
        Self::ALL[index]
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Granularity::Year => "YEAR",
            Granularity::Month => "MONTH",
            Granularity::Day => "DAY",
            Granularity::Hour => "HOUR",
            Granularity::Minute => "MINUTE",
            Granularity::Second => "SECOND",
            Granularity::Microsecond => "MICROSECOND",
        }
    }

    /// Parse a granularity name case-insensitively.
    ///
    /// Qualified names such as `Granularity.DAY` are accepted too.
    pub fn from_name(name: &str) -> TimeResult<Self> {
        let bare = name.rsplit('.').next().unwrap_or(name).trim();
        Self::ALL
            .into_iter()
            .find(|g| g.name().eq_ignore_ascii_case(bare))
            .ok_or_else(|| TimeError::UnknownGranularity(name.to_string()))
    }

    #[must_use]
    pub fn template(self) -> &'static str {
        TEMPLATES[usize::from(self.value()) - 1]
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Naive UTC datetime plus the granularity it is known to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GranularDateTime {
    datetime: NaiveDateTime,
    granularity: Granularity,
}

impl GranularDateTime {
    #[must_use]
    pub fn new(datetime: NaiveDateTime, granularity: Granularity) -> Self {
        Self {
            datetime,
            granularity,
        }
    }

    /// Full-precision datetime
    #[must_use]
    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        Self::new(datetime, Granularity::Microsecond)
    }

    /// Current UTC time, truncated to the microseconds it can store
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now().naive_utc().trunc_subsecs(6))
    }

    #[must_use]
    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    #[must_use]
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    #[must_use]
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Parse `value` with each template in turn, returning the first match.
    ///
    /// The whole value must match. Components the template does not carry
    /// default to the start of the period. Granularity is the number of `%`
    /// directives in the winning template.
    pub fn strptime<S: AsRef<str>>(value: &str, templates: &[S]) -> TimeResult<Self> {
        for template in templates {
            let template = template.as_ref();
            if let Some(datetime) = parse_with_defaults(value, template) {
                let directives = template.matches('%').count();
                return Ok(Self::new(
                    datetime,
                    Granularity::from_value_clamped(directives),
                ));
            }
        }

        Err(TimeError::NoMatchingTemplate {
            value: value.to_string(),
            templates: templates.iter().map(|t| t.as_ref().to_string()).collect(),
        })
    }

    /// ISO-formatted prefix matching the granularity
    #[must_use]
    pub fn serialize(&self) -> String {
        self.strftime(self.granularity.template())
    }

    /// Inverse of `serialize`; short years are zero-padded to four digits.
    pub fn deserialize(value: &str) -> TimeResult<Self> {
        if let Some(position) = TEMPLATE_LENGTHS.iter().position(|l| *l == value.len())
            && let Ok(parsed) = Self::strptime(value, &[TEMPLATES[position]])
        {
            return Ok(parsed);
        }

        let padded = match value.split_once('-') {
            Some((year, rest)) if year.len() < 4 => format!("{year:0>4}-{rest}"),
            None if value.len() < 4 => format!("{value:0>4}"),
            _ => value.to_string(),
        };
        Self::strptime(&padded, &TEMPLATES)
    }

    /// Render with strftime directives; `%f` means six-digit microseconds.
    #[must_use]
    pub fn strftime(&self, template: &str) -> String {
        let translated = template.replace("%f", "%6f");
        self.datetime.format(&translated).to_string()
    }

    /// Named component access used by back-references such as `<date.year>`
    #[must_use]
    pub fn component(&self, name: &str) -> Option<i64> {
        let dt = &self.datetime;
        let value = match name {
            "year" => i64::from(dt.year()),
            "month" => i64::from(dt.month()),
            "day" => i64::from(dt.day()),
            "hour" => i64::from(dt.hour()),
            "minute" => i64::from(dt.minute()),
            "second" => i64::from(dt.second()),
            "microsecond" => i64::from(dt.nanosecond() / 1_000),
            "granularity" => i64::from(self.granularity.value()),
            _ => return None,
        };
        Some(value)
    }
}

impl fmt::Display for GranularDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl Serialize for GranularDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&GranularDateTime::serialize(self))
    }
}

impl<'de> Deserialize<'de> for GranularDateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        GranularDateTime::deserialize(&raw).map_err(serde::de::Error::custom)
    }
}

/// Translate fractional-second directives into chrono's parsing forms.
fn parsing_template(template: &str) -> String {
    template.replace(".%f", "%.f").replace("%f", "%6f")
}

fn parse_with_defaults(value: &str, template: &str) -> Option<NaiveDateTime> {
    let translated = parsing_template(template);
    let mut parsed = Parsed::new();
    parse(&mut parsed, value, StrftimeItems::new(&translated)).ok()?;

    // Already-parsed components win; these only fill gaps
    let _ = parsed.set_month(1);
    let _ = parsed.set_day(1);
    let _ = parsed.set_hour(0);
    let _ = parsed.set_minute(0);
    let _ = parsed.set_second(0);
    let _ = parsed.set_nanosecond(0);

    parsed.to_naive_datetime_with_offset(0).ok()
}
