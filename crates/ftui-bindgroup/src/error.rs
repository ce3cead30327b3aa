#![forbid(unsafe_code)]

//! Validation error records and the group's error ledger.
//!
//! Nothing that goes wrong inside a pipeline run escapes as a Rust error.
//! Conversion failures, failing rules, unavailable rule inputs, failed source
//! writes and failed item commits all become [`ValidationError`] records.
//! Each record has an owner (the group, one binding, or one item) so it can
//! be re-attributed or pruned when that owner goes away.
//!
//! # Failure Modes
//!
//! | Kind | Produced by | Owner |
//! |------|-------------|-------|
//! | `Conversion` | binding could not convert its proposed value | binding |
//! | `Rule` | a rule returned `Invalid` | binding or group |
//! | `Unavailable` | a rule returned `Unavailable` | binding or group |
//! | `SourceUpdate` | a source write failed | binding |
//! | `Commit` | an item's `end_edit` failed | item |
//! | `Entity` | an entity error source reported an error | item |

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::item::WeakItem;
use crate::live::BindingId;
use crate::step::ValidationStep;

static ERROR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a validation error record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorId(u64);

impl ErrorId {
    fn next() -> Self {
        Self(ERROR_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[inline]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// What went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValidationErrorKind {
    /// A binding could not convert its proposed value.
    Conversion,
    /// A rule reported the value invalid.
    Rule,
    /// A rule could not obtain its input.
    Unavailable,
    /// Writing a value to its source failed.
    SourceUpdate,
    /// An item's commit hook failed.
    Commit,
    /// An entity error source reported an error.
    Entity,
}

impl ValidationErrorKind {
    /// Kinds produced by rule evaluation (cleared before rules re-run).
    #[must_use]
    pub const fn from_rules(self) -> bool {
        matches!(self, Self::Rule | Self::Unavailable)
    }
}

/// Who an error is attributed to.
#[derive(Clone, Debug)]
pub enum ErrorOwner {
    /// The edit group itself.
    Group,
    /// One live binding.
    Binding(BindingId),
    /// One data item.
    Item(WeakItem),
}

impl ErrorOwner {
    /// Whether the owner is the group.
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self, Self::Group)
    }

    /// The owning binding, if any.
    #[must_use]
    pub const fn binding(&self) -> Option<BindingId> {
        match self {
            Self::Binding(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether both denote the same owner.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Group, Self::Group) => true,
            (Self::Binding(a), Self::Binding(b)) => a == b,
            (Self::Item(a), Self::Item(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// One validation failure.
#[derive(Clone, Debug)]
pub struct ValidationError {
    id: ErrorId,
    kind: ValidationErrorKind,
    step: ValidationStep,
    owner: ErrorOwner,
    content: String,
    rule: Option<String>,
    origin: Option<BindingId>,
}

impl ValidationError {
    /// Create a new error record with a fresh id.
    #[must_use]
    pub fn new(
        kind: ValidationErrorKind,
        step: ValidationStep,
        owner: ErrorOwner,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: ErrorId::next(),
            kind,
            step,
            owner,
            content: content.into(),
            rule: None,
            origin: None,
        }
    }

    /// Name the rule that produced this error.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Unique id.
    #[must_use]
    pub const fn id(&self) -> ErrorId {
        self.id
    }

    /// Error kind.
    #[must_use]
    pub const fn kind(&self) -> ValidationErrorKind {
        self.kind
    }

    /// Step the error was produced at.
    #[must_use]
    pub const fn step(&self) -> ValidationStep {
        self.step
    }

    /// Current owner.
    #[must_use]
    pub const fn owner(&self) -> &ErrorOwner {
        &self.owner
    }

    /// User-facing message.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Name of the failing rule, if a rule produced this error.
    #[must_use]
    pub fn rule(&self) -> Option<&str> {
        self.rule.as_deref()
    }

    /// The synthesized binding that produced this error before it was
    /// re-attributed to the group.
    #[must_use]
    pub const fn origin(&self) -> Option<BindingId> {
        self.origin
    }
}

impl PartialEq for ValidationError {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            Some(rule) => write!(f, "[{}] {rule}: {}", self.step, self.content),
            None => write!(f, "[{}] {}", self.step, self.content),
        }
    }
}

/// Failure to read a field through [`EditGroup::get_value`](crate::EditGroup::get_value).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueError {
    /// No binding or pending edit in the group covers this field.
    NotInGroup {
        /// The requested property.
        property: String,
    },
    /// The field is in the group but its value cannot be produced right now.
    Unavailable {
        /// The requested property.
        property: String,
    },
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInGroup { property } => {
                write!(f, "property '{property}' is not bound in this group")
            }
            Self::Unavailable { property } => {
                write!(f, "value of '{property}' is unavailable")
            }
        }
    }
}

impl std::error::Error for ValueError {}

/// Whether an error was added to or removed from a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorChange {
    /// The error was recorded.
    Added,
    /// The error was cleared.
    Removed,
}

/// Notification delivered to validation-error listeners.
#[derive(Clone, Debug)]
pub struct ValidationEvent {
    /// Added or removed.
    pub change: ErrorChange,
    /// The error concerned.
    pub error: ValidationError,
}

/// The group's list of current errors.
///
/// Mutations return the [`ValidationEvent`]s they caused so the caller can
/// dispatch them after releasing its borrow.
#[derive(Debug, Default)]
pub(crate) struct ErrorLedger {
    errors: Vec<ValidationError>,
}

impl ErrorLedger {
    pub(crate) fn add(&mut self, error: ValidationError) -> ValidationEvent {
        self.errors.push(error.clone());
        ValidationEvent {
            change: ErrorChange::Added,
            error,
        }
    }

    /// Remove every error matching `pred`.
    pub(crate) fn remove_where(
        &mut self,
        mut pred: impl FnMut(&ValidationError) -> bool,
    ) -> Vec<ValidationEvent> {
        let mut removed = Vec::new();
        self.errors.retain(|e| {
            if pred(e) {
                removed.push(ValidationEvent {
                    change: ErrorChange::Removed,
                    error: e.clone(),
                });
                false
            } else {
                true
            }
        });
        removed
    }

    /// Move every error matching `pred` to `owner`, remembering the old
    /// binding owner as the origin.
    pub(crate) fn reassign_where(
        &mut self,
        owner: &ErrorOwner,
        mut pred: impl FnMut(&ValidationError) -> bool,
    ) -> usize {
        let mut moved = 0;
        for error in &mut self.errors {
            if !pred(error) {
                continue;
            }
            if owner.is_group() {
                error.origin = error.owner.binding();
            }
            error.owner = owner.clone();
            moved += 1;
        }
        moved
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: ErrorId) -> bool {
        self.errors.iter().any(|e| e.id == id)
    }

    pub(crate) fn first_for_binding(&self, binding: BindingId) -> Option<ErrorId> {
        self.errors
            .iter()
            .find(|e| e.owner.binding() == Some(binding))
            .map(ValidationError::id)
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    pub(crate) fn snapshot(&self) -> Vec<ValidationError> {
        self.errors.clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_rule_error(step: ValidationStep) -> ValidationError {
        ValidationError::new(ValidationErrorKind::Rule, step, ErrorOwner::Group, "bad")
    }

    #[test]
    fn ids_are_unique() {
        let a = group_rule_error(ValidationStep::RawProposedValue);
        let b = group_rule_error(ValidationStep::RawProposedValue);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn ledger_add_and_remove_emit_events() {
        let mut ledger = ErrorLedger::default();
        let err = group_rule_error(ValidationStep::UpdatedValue);
        let id = err.id();
        let added = ledger.add(err);
        assert_eq!(added.change, ErrorChange::Added);
        assert!(ledger.contains(id));

        let removed = ledger.remove_where(|e| e.step() == ValidationStep::UpdatedValue);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].change, ErrorChange::Removed);
        assert!(ledger.is_empty());
    }

    #[test]
    fn reassign_to_group_records_origin() {
        let mut ledger = ErrorLedger::default();
        let binding = BindingId::fresh();
        ledger.add(ValidationError::new(
            ValidationErrorKind::Conversion,
            ValidationStep::ConvertedProposedValue,
            ErrorOwner::Binding(binding),
            "not a number",
        ));
        let moved = ledger.reassign_where(&ErrorOwner::Group, |e| {
            e.owner().binding() == Some(binding)
        });
        assert_eq!(moved, 1);
        let err = ledger.iter().next().unwrap();
        assert!(err.owner().is_group());
        assert_eq!(err.origin(), Some(binding));
    }

    #[test]
    fn display_includes_rule_and_step() {
        let err = group_rule_error(ValidationStep::CommittedValue).with_rule("limit");
        assert_eq!(err.to_string(), "[committed] limit: bad");
    }

    #[test]
    fn value_error_messages() {
        let err = ValueError::NotInGroup {
            property: "Age".into(),
        };
        assert_eq!(err.to_string(), "property 'Age' is not bound in this group");
    }

    #[test]
    fn rule_kinds() {
        assert!(ValidationErrorKind::Rule.from_rules());
        assert!(ValidationErrorKind::Unavailable.from_rules());
        assert!(!ValidationErrorKind::Commit.from_rules());
    }
}
