//! Extraction status lattice and its aggregation rule.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::errors::{ExtractionError, ExtractionResult};

/// Totally ordered extraction status.
///
/// `FAILURE < EMPTY < INITIATED < PRELIMINARY < COMPLETED`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtractionStatus {
    Failure = 1,
    Empty = 2,
    Initiated = 3,
    Preliminary = 4,
    Completed = 5,
}

impl ExtractionStatus {
    pub const ALL: [ExtractionStatus; 5] = [
        ExtractionStatus::Failure,
        ExtractionStatus::Empty,
        ExtractionStatus::Initiated,
        ExtractionStatus::Preliminary,
        ExtractionStatus::Completed,
    ];

    #[must_use]
    pub fn value(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ExtractionStatus::Failure => "FAILURE",
            ExtractionStatus::Empty => "EMPTY",
            ExtractionStatus::Initiated => "INITIATED",
            ExtractionStatus::Preliminary => "PRELIMINARY",
            ExtractionStatus::Completed => "COMPLETED",
        }
    }

    /// Case-insensitive lookup by name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Overall status of a non-empty multiset of statuses; `None` when empty.
    ///
    /// All COMPLETED gives COMPLETED. Otherwise any status at or above
    /// PRELIMINARY gives PRELIMINARY. Otherwise the maximum wins.
    pub fn aggregate<I>(statuses: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        let mut iter = statuses.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), s| (min.min(s), max.max(s)));

        if min == ExtractionStatus::Completed {
            Some(ExtractionStatus::Completed)
        } else if max >= ExtractionStatus::Preliminary {
            Some(ExtractionStatus::Preliminary)
        } else {
            Some(max)
        }
    }

    /// FAILURE, EMPTY and COMPLETED end an extraction
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExtractionStatus::Failure | ExtractionStatus::Empty | ExtractionStatus::Completed
        )
    }

    /// Statuses that stamp `last_extracted` when stored
    #[must_use]
    pub fn records_extraction_time(self) -> bool {
        self >= ExtractionStatus::Empty && self != ExtractionStatus::Initiated
    }

    /// Whether results may be read back for this status
    #[must_use]
    pub fn indicates_results(self) -> bool {
        self >= ExtractionStatus::Preliminary
    }

    /// Check that moving from `current` to `requested` never goes backward.
    ///
    /// The one downward move allowed is an INITIATED extraction concluding at
    /// FAILURE or EMPTY. Re-opening a stale terminal status happens on a new
    /// extractor whose in-memory status starts unset.
    pub fn validate_transition(current: Option<Self>, requested: Self) -> ExtractionResult<()> {
        let Some(current) = current else {
            return Ok(());
        };
        let concludes = current == ExtractionStatus::Initiated
            && matches!(requested, ExtractionStatus::Failure | ExtractionStatus::Empty);
        if requested >= current || concludes {
            Ok(())
        } else {
            Err(ExtractionError::StatusRegression { current, requested })
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ExtractionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ExtractionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ExtractionStatus::from_name(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::ExtractionStatus::*;
    use super::*;

    #[test]
    fn ordering_follows_values() {
        assert!(Failure < Empty);
        assert!(Empty < Initiated);
        assert!(Initiated < Preliminary);
        assert!(Preliminary < Completed);
        assert_eq!(Completed.value(), 5);
    }

    #[test]
    fn aggregate_rules() {
        assert_eq!(ExtractionStatus::aggregate([]), None);
        assert_eq!(ExtractionStatus::aggregate([Completed, Completed]), Some(Completed));
        assert_eq!(ExtractionStatus::aggregate([Completed, Failure]), Some(Preliminary));
        assert_eq!(ExtractionStatus::aggregate([Initiated, Preliminary]), Some(Preliminary));
        assert_eq!(ExtractionStatus::aggregate([Failure, Empty]), Some(Empty));
        assert_eq!(ExtractionStatus::aggregate([Failure, Empty, Initiated]), Some(Initiated));
        assert_eq!(ExtractionStatus::aggregate([Failure]), Some(Failure));
    }

    #[test]
    fn names_round_trip() {
        for status in ExtractionStatus::ALL {
            assert_eq!(ExtractionStatus::from_name(status.name()), Some(status));
        }
        assert_eq!(ExtractionStatus::from_name("completed"), Some(Completed));
        assert_eq!(ExtractionStatus::from_name("DONE"), None);
    }

    #[test]
    fn transitions_never_go_backward() {
        assert!(ExtractionStatus::validate_transition(None, Failure).is_ok());
        assert!(ExtractionStatus::validate_transition(Some(Initiated), Preliminary).is_ok());
        assert!(ExtractionStatus::validate_transition(Some(Initiated), Empty).is_ok());
        assert!(ExtractionStatus::validate_transition(Some(Initiated), Failure).is_ok());
        assert!(ExtractionStatus::validate_transition(Some(Completed), Completed).is_ok());

        let err = ExtractionStatus::validate_transition(Some(Completed), Preliminary).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::StatusRegression {
                current: Completed,
                requested: Preliminary
            }
        ));
        assert!(ExtractionStatus::validate_transition(Some(Preliminary), Initiated).is_err());
        assert!(ExtractionStatus::validate_transition(Some(Empty), Failure).is_err());
    }

    #[test]
    fn extraction_time_is_recorded_once_results_are_known() {
        assert!(!Failure.records_extraction_time());
        assert!(!Initiated.records_extraction_time());
        assert!(Empty.records_extraction_time());
        assert!(Preliminary.records_extraction_time());
        assert!(Completed.records_extraction_time());
    }
}
