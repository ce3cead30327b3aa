#![forbid(unsafe_code)]

//! The four ordered phases of the validation pipeline.

use core::fmt;

/// A phase of the edit-group pipeline.
///
/// Steps are totally ordered; a run advances through them in declaration
/// order and never goes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValidationStep {
    /// The unconverted value taken from the UI target.
    RawProposedValue,
    /// The value after the binding's converter ran.
    ConvertedProposedValue,
    /// The value after it was written to the source item.
    UpdatedValue,
    /// The value after each transactional item committed.
    CommittedValue,
}

impl ValidationStep {
    /// All steps in pipeline order.
    pub const ALL: [Self; 4] = [
        Self::RawProposedValue,
        Self::ConvertedProposedValue,
        Self::UpdatedValue,
        Self::CommittedValue,
    ];

    /// The step after this one, or `None` for [`ValidationStep::CommittedValue`].
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::RawProposedValue => Some(Self::ConvertedProposedValue),
            Self::ConvertedProposedValue => Some(Self::UpdatedValue),
            Self::UpdatedValue => Some(Self::CommittedValue),
            Self::CommittedValue => None,
        }
    }

    /// Steps from the first up to and including `self`.
    pub fn through(self) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().take_while(move |s| *s <= self)
    }

    /// Whether a run reaching this step writes to sources.
    #[must_use]
    pub const fn writes_sources(self) -> bool {
        matches!(self, Self::UpdatedValue | Self::CommittedValue)
    }
}

impl fmt::Display for ValidationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RawProposedValue => "raw",
            Self::ConvertedProposedValue => "converted",
            Self::UpdatedValue => "updated",
            Self::CommittedValue => "committed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_ordered() {
        assert!(ValidationStep::RawProposedValue < ValidationStep::ConvertedProposedValue);
        assert!(ValidationStep::ConvertedProposedValue < ValidationStep::UpdatedValue);
        assert!(ValidationStep::UpdatedValue < ValidationStep::CommittedValue);
    }

    #[test]
    fn through_stops_at_target() {
        let steps: Vec<_> = ValidationStep::UpdatedValue.through().collect();
        assert_eq!(
            steps,
            vec![
                ValidationStep::RawProposedValue,
                ValidationStep::ConvertedProposedValue,
                ValidationStep::UpdatedValue,
            ]
        );
    }

    #[test]
    fn next_terminates() {
        let mut step = Some(ValidationStep::RawProposedValue);
        let mut count = 0;
        while let Some(s) = step {
            count += 1;
            step = s.next();
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn only_late_steps_write() {
        assert!(!ValidationStep::ConvertedProposedValue.writes_sources());
        assert!(ValidationStep::UpdatedValue.writes_sources());
    }
}
