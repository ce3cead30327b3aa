#![forbid(unsafe_code)]

//! Untargeted two-way bindings that write pending shared edits.
//!
//! A pending edit in the proposed-value table has no live binding left to
//! write it. For runs that reach the write step the group synthesizes one
//! [`ShadowBinding`] per entry, pointed at the entry's item and property and
//! carrying the rules of the binding that made the edit. The shadow joins the
//! run like any member and is detached when the run ends.

use std::rc::Rc;

use crate::error::{ErrorOwner, ValidationError, ValidationErrorKind};
use crate::group::EditGroup;
use crate::item::ItemRef;
use crate::live::{
    BindingId, BindingMode, ConvertedProposal, LiveBinding, ProposedValue, check_binding_rules,
};
use crate::proposed::ProposedValueEntry;
use crate::rule::ValidationRule;
use crate::step::ValidationStep;
use crate::value::Value;

/// Stand-in binding for one proposed-value entry.
pub(crate) struct ShadowBinding {
    id: BindingId,
    origin: BindingId,
    item: ItemRef,
    property: String,
    raw: Value,
    converted: Option<Value>,
    rules: Vec<Rc<dyn ValidationRule>>,
}

impl ShadowBinding {
    /// Shadow `entry`, or `None` if its item is gone.
    pub(crate) fn for_entry(entry: &ProposedValueEntry) -> Option<Self> {
        Some(Self {
            id: BindingId::fresh(),
            origin: entry.binding(),
            item: entry.item()?,
            property: entry.property().to_owned(),
            raw: entry.raw().clone(),
            converted: entry.converted().cloned(),
            rules: entry.rules().to_vec(),
        })
    }

    /// The binding whose edit this shadow carries.
    pub(crate) const fn origin(&self) -> BindingId {
        self.origin
    }

    pub(crate) const fn item(&self) -> &ItemRef {
        &self.item
    }

    pub(crate) fn property(&self) -> &str {
        &self.property
    }

    fn fail(&self, group: &EditGroup, kind: ValidationErrorKind, step: ValidationStep, msg: String) {
        group.report_error(ValidationError::new(
            kind,
            step,
            ErrorOwner::Binding(self.id),
            msg,
        ));
    }
}

impl LiveBinding for ShadowBinding {
    fn id(&self) -> BindingId {
        self.id
    }

    fn source_item(&self) -> Option<ItemRef> {
        Some(self.item.clone())
    }

    fn source_property(&self) -> Option<&str> {
        Some(&self.property)
    }

    fn mode(&self) -> BindingMode {
        BindingMode::TwoWay
    }

    fn is_dirty(&self) -> bool {
        true
    }

    fn obtain_converted_proposed_value(&self, group: &EditGroup) -> bool {
        group.clear_binding_errors(self.id, |_| true);
        match &self.converted {
            Some(value) => {
                self.store_value_in_group(value.clone(), group);
                true
            }
            None => {
                self.fail(
                    group,
                    ValidationErrorKind::Conversion,
                    ValidationStep::ConvertedProposedValue,
                    format!("value '{}' could not be converted", self.raw),
                );
                false
            }
        }
    }

    fn update_source(&self, group: &EditGroup) -> bool {
        let Some(value) = &self.converted else {
            return false;
        };
        match self.item.get().set_property(&self.property, value.clone()) {
            Ok(()) => true,
            Err(err) => {
                self.fail(
                    group,
                    ValidationErrorKind::SourceUpdate,
                    ValidationStep::UpdatedValue,
                    err.to_string(),
                );
                false
            }
        }
    }

    fn check_validation_rules(&self, group: &EditGroup, step: ValidationStep) -> bool {
        let value = if step == ValidationStep::RawProposedValue {
            Some(&self.raw)
        } else {
            self.converted.as_ref()
        };
        check_binding_rules(self.id, &self.rules, value, group, step)
    }

    fn validate_and_convert_proposed_value(&self) -> ConvertedProposal {
        ConvertedProposal {
            success: self.converted.is_some(),
            values: vec![ProposedValue {
                item: self.item.clone(),
                property: self.property.clone(),
                raw: self.raw.clone(),
                converted: self.converted.clone(),
            }],
        }
    }

    fn update_target(&self) {}

    fn raw_proposed_value(&self) -> Option<Value> {
        Some(self.raw.clone())
    }

    fn validation_rules(&self) -> Vec<Rc<dyn ValidationRule>> {
        self.rules.clone()
    }
}
