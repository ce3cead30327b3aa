#![forbid(unsafe_code)]

//! Validation rules and their tri-state outcome.
//!
//! A rule is tagged with the [`ValidationStep`] it runs at. Field rules (held
//! by a live binding) receive the field's value for that step; group rules
//! receive no value and read whatever fields they need through
//! [`RuleContext::get`].
//!
//! A rule whose input cannot be produced returns [`RuleOutcome::Unavailable`]
//! instead of guessing. The group records that as an `Unavailable` error and
//! fails the step, the same as an invalid result.

use core::fmt;
use std::rc::Rc;

use crate::error::ValueError;
use crate::group::EditGroup;
use crate::item::ItemRef;
use crate::step::ValidationStep;
use crate::value::Value;

/// Result of evaluating one rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The input is acceptable.
    Valid,
    /// The input is not acceptable; the payload is the user-facing message.
    Invalid(String),
    /// The rule could not obtain its input.
    Unavailable,
}

impl RuleOutcome {
    /// Shorthand for [`RuleOutcome::Invalid`].
    #[must_use]
    pub fn invalid(content: impl Into<String>) -> Self {
        Self::Invalid(content.into())
    }

    /// Whether the outcome is [`RuleOutcome::Valid`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Everything a rule may look at while it runs.
pub struct RuleContext<'a> {
    value: Option<&'a Value>,
    group: &'a EditGroup,
    step: ValidationStep,
    culture: &'a str,
}

impl<'a> RuleContext<'a> {
    pub(crate) fn new(
        value: Option<&'a Value>,
        group: &'a EditGroup,
        step: ValidationStep,
        culture: &'a str,
    ) -> Self {
        Self {
            value,
            group,
            step,
            culture,
        }
    }

    /// The field value under validation. `None` for group rules.
    #[must_use]
    pub fn value(&self) -> Option<&'a Value> {
        self.value
    }

    /// The edit group running the rule.
    #[must_use]
    pub fn group(&self) -> &'a EditGroup {
        self.group
    }

    /// The step the rule runs at.
    #[must_use]
    pub const fn step(&self) -> ValidationStep {
        self.step
    }

    /// Culture (normalized locale tag) for culture-sensitive comparisons.
    #[must_use]
    pub fn culture(&self) -> &'a str {
        self.culture
    }

    /// Read a field through the group, as of the current step.
    pub fn get(&self, item: &ItemRef, property: &str) -> Result<Value, ValueError> {
        self.group.get_value(item, property)
    }
}

impl fmt::Debug for RuleContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("value", &self.value)
            .field("step", &self.step)
            .field("culture", &self.culture)
            .finish_non_exhaustive()
    }
}

/// A validation rule.
pub trait ValidationRule {
    /// The step this rule runs at.
    fn step(&self) -> ValidationStep;

    /// Short name used in error records and logs.
    fn name(&self) -> &str {
        "rule"
    }

    /// Evaluate the rule.
    fn validate(&self, ctx: &RuleContext<'_>) -> RuleOutcome;
}

type RuleFn = dyn Fn(&RuleContext<'_>) -> RuleOutcome;

/// A rule backed by a closure.
///
/// ```ignore
/// let rule = FnRule::new("name-length", ValidationStep::ConvertedProposedValue, |ctx| {
///     let Ok(first) = ctx.get(&person, "First") else {
///         return RuleOutcome::Unavailable;
///     };
///     if first.char_len() <= 20 {
///         RuleOutcome::Valid
///     } else {
///         RuleOutcome::invalid("name too long")
///     }
/// });
/// ```
#[derive(Clone)]
pub struct FnRule {
    name: String,
    step: ValidationStep,
    check: Rc<RuleFn>,
}

impl FnRule {
    /// Create a rule running `check` at `step`.
    pub fn new(
        name: impl Into<String>,
        step: ValidationStep,
        check: impl Fn(&RuleContext<'_>) -> RuleOutcome + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            step,
            check: Rc::new(check),
        }
    }
}

impl ValidationRule for FnRule {
    fn step(&self) -> ValidationStep {
        self.step
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        (self.check)(ctx)
    }
}

impl fmt::Debug for FnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule")
            .field("name", &self.name)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

/// Rejects null and empty-text values.
#[derive(Clone, Copy, Debug)]
pub struct RequiredRule {
    step: ValidationStep,
}

impl RequiredRule {
    /// Check at `step`.
    #[must_use]
    pub const fn at(step: ValidationStep) -> Self {
        Self { step }
    }
}

impl Default for RequiredRule {
    fn default() -> Self {
        Self::at(ValidationStep::RawProposedValue)
    }
}

impl ValidationRule for RequiredRule {
    fn step(&self) -> ValidationStep {
        self.step
    }

    fn name(&self) -> &str {
        "required"
    }

    fn validate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        match ctx.value() {
            None => RuleOutcome::Unavailable,
            Some(Value::Null) => RuleOutcome::invalid("a value is required"),
            Some(Value::Text(s)) if s.trim().is_empty() => {
                RuleOutcome::invalid("a value is required")
            }
            Some(_) => RuleOutcome::Valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_rule_reports_step_and_name() {
        let rule = FnRule::new("always", ValidationStep::UpdatedValue, |_| {
            RuleOutcome::Valid
        });
        assert_eq!(rule.step(), ValidationStep::UpdatedValue);
        assert_eq!(rule.name(), "always");
    }

    #[test]
    fn required_rule_outcomes() {
        let group = EditGroup::new();
        let rule = RequiredRule::default();
        let culture = "en";
        let step = ValidationStep::RawProposedValue;

        let empty = Value::from("  ");
        let ctx = RuleContext::new(Some(&empty), &group, step, culture);
        assert_eq!(rule.validate(&ctx), RuleOutcome::invalid("a value is required"));

        let full = Value::from("Ada");
        let ctx = RuleContext::new(Some(&full), &group, step, culture);
        assert!(rule.validate(&ctx).is_valid());

        let ctx = RuleContext::new(None, &group, step, culture);
        assert_eq!(rule.validate(&ctx), RuleOutcome::Unavailable);
    }

    #[test]
    fn context_exposes_culture_and_step() {
        let group = EditGroup::new();
        let ctx = RuleContext::new(None, &group, ValidationStep::CommittedValue, "fr-FR");
        assert_eq!(ctx.culture(), "fr-FR");
        assert_eq!(ctx.step(), ValidationStep::CommittedValue);
        assert!(ctx.value().is_none());
    }
}
