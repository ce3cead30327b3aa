#![forbid(unsafe_code)]

//! The live-binding contract.
//!
//! A live binding is the runtime instance that connects one UI field to one
//! property of one data item. It owns conversion and transfer; the edit
//! group only drives it through [`LiveBinding`] at the right moments of the
//! pipeline.
//!
//! # Composite bindings
//!
//! Bindings built from one composite descriptor share a root id. Joining the
//! root also joins its [`children`](LiveBinding::children); leaving any of
//! them removes every member with the same root.
//!
//! # Invariants
//!
//! 1. `id()` is stable for the lifetime of the binding and unique.
//! 2. `obtain_converted_proposed_value` stores its result with
//!    [`store_value_in_group`](LiveBinding::store_value_in_group) before
//!    returning `true`.
//! 3. Binding-owned errors are reported through the group
//!    ([`EditGroup::report_error`]) so the group can prune them when the
//!    binding leaves.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ErrorOwner, ValidationError, ValidationErrorKind};
use crate::group::EditGroup;
use crate::item::ItemRef;
use crate::rule::{RuleContext, RuleOutcome, ValidationRule};
use crate::step::ValidationStep;
use crate::value::Value;

static BINDING_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a live binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    /// Allocate a new unique binding id.
    #[must_use]
    pub fn fresh() -> Self {
        Self(BINDING_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    #[inline]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Direction(s) a binding transfers values in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BindingMode {
    /// Source to target and back.
    #[default]
    TwoWay,
    /// Source to target only.
    OneWay,
    /// Source to target once, at attach time.
    OneTime,
    /// Target to source only.
    OneWayToSource,
}

impl BindingMode {
    /// Whether the binding writes edits back to its source.
    #[must_use]
    pub const fn updates_source(self) -> bool {
        matches!(self, Self::TwoWay | Self::OneWayToSource)
    }
}

/// One pending value reported by a binding that is about to detach.
#[derive(Clone, Debug)]
pub struct ProposedValue {
    /// Source item.
    pub item: ItemRef,
    /// Source property.
    pub property: String,
    /// Unconverted value taken from the target.
    pub raw: Value,
    /// Converted value, `None` when conversion failed.
    pub converted: Option<Value>,
}

/// Result of [`LiveBinding::validate_and_convert_proposed_value`].
#[derive(Clone, Debug, Default)]
pub struct ConvertedProposal {
    /// Whether conversion and field validation succeeded.
    pub success: bool,
    /// The pending values, one per field the binding writes.
    pub values: Vec<ProposedValue>,
}

/// Runtime binding attached to one field.
pub trait LiveBinding {
    /// Stable unique id.
    fn id(&self) -> BindingId;

    /// Id shared by every binding built from the same composite descriptor.
    fn root_id(&self) -> BindingId {
        self.id()
    }

    /// Item the binding reads from and writes to.
    fn source_item(&self) -> Option<ItemRef>;

    /// Property of [`source_item`](Self::source_item) the binding targets.
    fn source_property(&self) -> Option<&str>;

    /// Transfer direction.
    fn mode(&self) -> BindingMode {
        BindingMode::TwoWay
    }

    /// Whether the target holds an edit not yet written to the source.
    fn is_dirty(&self) -> bool {
        false
    }

    /// Convert the target's current value and store it in the group.
    /// Returns `false` if conversion failed.
    fn obtain_converted_proposed_value(&self, group: &EditGroup) -> bool;

    /// Write the converted value to the source. Returns `false` on failure.
    fn update_source(&self, group: &EditGroup) -> bool;

    /// Run this binding's rules tagged for `step`.
    fn check_validation_rules(&self, group: &EditGroup, step: ValidationStep) -> bool;

    /// Record `value` as this binding's value for the current run.
    fn store_value_in_group(&self, value: Value, group: &EditGroup) {
        group.store_value(self.id(), value);
    }

    /// Convert and validate the pending edit outside a pipeline run, so it
    /// can be handed to the group before this binding detaches.
    fn validate_and_convert_proposed_value(&self) -> ConvertedProposal;

    /// Re-read the source and push it to the target, discarding any edit.
    fn update_target(&self);

    /// Unconverted value currently held by the target.
    fn raw_proposed_value(&self) -> Option<Value>;

    /// Rules this binding validates with.
    fn validation_rules(&self) -> Vec<Rc<dyn ValidationRule>> {
        Vec::new()
    }

    /// Take over a pending edit left by a binding that detached.
    fn adopt_proposed_value(&self, _raw: &Value, _converted: Option<&Value>) {}

    /// Display a pending edit this binding cannot itself write.
    fn show_proposed_value(&self, _converted: &Value) {}

    /// Composite siblings that join together with this binding.
    fn children(&self) -> Vec<Rc<dyn LiveBinding>> {
        Vec::new()
    }
}

/// Evaluate `rules` tagged for `step` on behalf of binding `owner`.
///
/// Clears the binding's previous rule errors for `step` first, then reports
/// one error per failing rule. Every rule runs even after a failure.
pub fn check_binding_rules(
    owner: BindingId,
    rules: &[Rc<dyn ValidationRule>],
    value: Option<&Value>,
    group: &EditGroup,
    step: ValidationStep,
) -> bool {
    group.clear_binding_errors(owner, |e| e.step() == step && e.kind().from_rules());

    let culture = group.culture();
    let mut valid = true;
    for rule in rules.iter().filter(|r| r.step() == step) {
        let ctx = RuleContext::new(value, group, step, &culture);
        let (kind, content) = match rule.validate(&ctx) {
            RuleOutcome::Valid => continue,
            RuleOutcome::Invalid(content) => (ValidationErrorKind::Rule, content),
            RuleOutcome::Unavailable => (
                ValidationErrorKind::Unavailable,
                format!("input for '{}' is unavailable", rule.name()),
            ),
        };
        valid = false;
        group.report_error(
            ValidationError::new(kind, step, ErrorOwner::Binding(owner), content)
                .with_rule(rule.name()),
        );
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::FnRule;

    #[test]
    fn binding_ids_are_unique() {
        let a = BindingId::fresh();
        let b = BindingId::fresh();
        assert_ne!(a, b);
        assert!(b.id() > a.id());
    }

    #[test]
    fn mode_source_updates() {
        assert!(BindingMode::TwoWay.updates_source());
        assert!(BindingMode::OneWayToSource.updates_source());
        assert!(!BindingMode::OneWay.updates_source());
        assert!(!BindingMode::OneTime.updates_source());
    }

    #[test]
    fn check_binding_rules_reports_and_clears() {
        let group = EditGroup::new();
        let owner = BindingId::fresh();
        let rules: Vec<Rc<dyn ValidationRule>> = vec![Rc::new(FnRule::new(
            "positive",
            ValidationStep::ConvertedProposedValue,
            |ctx| match ctx.value().and_then(Value::as_int) {
                Some(v) if v > 0 => RuleOutcome::Valid,
                Some(_) => RuleOutcome::invalid("must be positive"),
                None => RuleOutcome::Unavailable,
            },
        ))];

        let bad = Value::from(-3);
        assert!(!check_binding_rules(
            owner,
            &rules,
            Some(&bad),
            &group,
            ValidationStep::ConvertedProposedValue
        ));
        assert_eq!(group.validation_errors().len(), 1);

        let good = Value::from(3);
        assert!(check_binding_rules(
            owner,
            &rules,
            Some(&good),
            &group,
            ValidationStep::ConvertedProposedValue
        ));
        assert!(group.validation_errors().is_empty());
    }

    #[test]
    fn rules_for_other_steps_are_skipped() {
        let group = EditGroup::new();
        let rules: Vec<Rc<dyn ValidationRule>> = vec![Rc::new(FnRule::new(
            "never",
            ValidationStep::CommittedValue,
            |_| RuleOutcome::invalid("no"),
        ))];
        assert!(check_binding_rules(
            BindingId::fresh(),
            &rules,
            None,
            &group,
            ValidationStep::RawProposedValue
        ));
    }
}
