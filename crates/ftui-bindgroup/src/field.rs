#![forbid(unsafe_code)]

//! A ready-made [`LiveBinding`] for one item property.
//!
//! [`FieldBinding`] connects a property of a [`DataItem`](crate::DataItem) to
//! a target value (the text of an input, the state of a toggle). The UI side
//! calls [`set_target`](FieldBinding::set_target) as the user types; the
//! group converts, validates and writes the value back when it runs.
//!
//! ```ignore
//! let age = Rc::new(
//!     FieldBinding::new(person.clone(), "Age")
//!         .with_converter(|v| v.as_text().and_then(|t| t.parse::<i64>().ok())
//!             .map(Value::Int)
//!             .ok_or_else(|| "not a number".to_string())),
//! );
//! group.join(age.clone());
//! age.set_target("31");
//! assert!(group.commit_edit());
//! ```
//!
//! # Invariants
//!
//! 1. A binding is dirty when its mode writes to the source and the target
//!    differs from the last value pushed from the source.
//! 2. A successful source write makes the binding clean.
//! 3. Converters run on every conversion; nothing is memoized across runs.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{ErrorOwner, ValidationError, ValidationErrorKind};
use crate::group::EditGroup;
use crate::item::ItemRef;
use crate::live::{
    BindingId, BindingMode, ConvertedProposal, LiveBinding, ProposedValue, check_binding_rules,
};
use crate::rule::ValidationRule;
use crate::step::ValidationStep;
use crate::value::Value;

type ConvertFn = dyn Fn(&Value) -> Result<Value, String>;
type FormatFn = dyn Fn(&Value) -> Value;

/// Binding between a target value and one property of an item.
pub struct FieldBinding {
    id: BindingId,
    root: BindingId,
    item: ItemRef,
    property: String,
    mode: BindingMode,
    target: RefCell<Value>,
    pushed: RefCell<Value>,
    converted: RefCell<Option<Value>>,
    convert: Rc<ConvertFn>,
    format: Rc<FormatFn>,
    rules: Vec<Rc<dyn ValidationRule>>,
    children: Vec<Rc<dyn LiveBinding>>,
}

impl FieldBinding {
    /// Two-way binding to `property` of `item` with identity conversion.
    /// The target starts at the property's current value.
    #[must_use]
    pub fn new(item: ItemRef, property: impl Into<String>) -> Self {
        let id = BindingId::fresh();
        let binding = Self {
            id,
            root: id,
            item,
            property: property.into(),
            mode: BindingMode::TwoWay,
            target: RefCell::new(Value::Null),
            pushed: RefCell::new(Value::Null),
            converted: RefCell::new(None),
            convert: Rc::new(|v: &Value| -> Result<Value, String> { Ok(v.clone()) }),
            format: Rc::new(Value::clone),
            rules: Vec::new(),
            children: Vec::new(),
        };
        binding.update_target();
        binding
    }

    /// Set the binding direction.
    #[must_use]
    pub fn with_mode(mut self, mode: BindingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Convert target values to source values. An `Err` is reported as a
    /// conversion error carrying the message.
    #[must_use]
    pub fn with_converter(
        mut self,
        convert: impl Fn(&Value) -> Result<Value, String> + 'static,
    ) -> Self {
        self.convert = Rc::new(convert);
        self
    }

    /// Format source values for the target. Re-reads the source.
    #[must_use]
    pub fn with_formatter(mut self, format: impl Fn(&Value) -> Value + 'static) -> Self {
        self.format = Rc::new(format);
        self.update_target();
        self
    }

    /// Append a rule evaluated at the rule's step.
    #[must_use]
    pub fn with_rule(mut self, rule: impl ValidationRule + 'static) -> Self {
        self.rules.push(Rc::new(rule));
        self
    }

    /// Make this binding part of the composite rooted at `root`.
    #[must_use]
    pub fn with_root(mut self, root: BindingId) -> Self {
        self.root = root;
        self
    }

    /// Attach child bindings that join and leave with this one.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Rc<dyn LiveBinding>>) -> Self {
        self.children = children;
        self
    }

    /// Current target value.
    #[must_use]
    pub fn target(&self) -> Value {
        self.target.borrow().clone()
    }

    /// Set the target value, as the UI does on user input.
    pub fn set_target(&self, value: impl Into<Value>) {
        *self.target.borrow_mut() = value.into();
        *self.converted.borrow_mut() = None;
    }

    /// The bound item.
    #[must_use]
    pub fn item(&self) -> &ItemRef {
        &self.item
    }

    fn convert_target(&self) -> Result<Value, String> {
        let target = self.target.borrow().clone();
        (self.convert)(&target)
    }

    fn show(&self, source: &Value) {
        let shown = (self.format)(source);
        *self.target.borrow_mut() = shown.clone();
        *self.pushed.borrow_mut() = shown;
    }
}

impl std::fmt::Debug for FieldBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBinding")
            .field("id", &self.id)
            .field("property", &self.property)
            .field("mode", &self.mode)
            .field("target", &*self.target.borrow())
            .finish_non_exhaustive()
    }
}

impl LiveBinding for FieldBinding {
    fn id(&self) -> BindingId {
        self.id
    }

    fn root_id(&self) -> BindingId {
        self.root
    }

    fn source_item(&self) -> Option<ItemRef> {
        Some(self.item.clone())
    }

    fn source_property(&self) -> Option<&str> {
        Some(&self.property)
    }

    fn mode(&self) -> BindingMode {
        self.mode
    }

    fn is_dirty(&self) -> bool {
        self.mode.updates_source() && *self.target.borrow() != *self.pushed.borrow()
    }

    fn obtain_converted_proposed_value(&self, group: &EditGroup) -> bool {
        group.clear_binding_errors(self.id, |e| {
            e.step() >= ValidationStep::ConvertedProposedValue
        });
        match self.convert_target() {
            Ok(value) => {
                *self.converted.borrow_mut() = Some(value.clone());
                self.store_value_in_group(value, group);
                true
            }
            Err(msg) => {
                *self.converted.borrow_mut() = None;
                group.report_error(ValidationError::new(
                    ValidationErrorKind::Conversion,
                    ValidationStep::ConvertedProposedValue,
                    ErrorOwner::Binding(self.id),
                    msg,
                ));
                false
            }
        }
    }

    fn update_source(&self, group: &EditGroup) -> bool {
        if !self.is_dirty() {
            return true;
        }
        let Some(value) = self.converted.borrow().clone() else {
            return false;
        };
        match self.item.get().set_property(&self.property, value) {
            Ok(()) => {
                let target = self.target.borrow().clone();
                *self.pushed.borrow_mut() = target;
                true
            }
            Err(err) => {
                group.report_error(ValidationError::new(
                    ValidationErrorKind::SourceUpdate,
                    ValidationStep::UpdatedValue,
                    ErrorOwner::Binding(self.id),
                    err.to_string(),
                ));
                false
            }
        }
    }

    fn check_validation_rules(&self, group: &EditGroup, step: ValidationStep) -> bool {
        let value = if step == ValidationStep::RawProposedValue {
            Some(self.target.borrow().clone())
        } else {
            self.converted.borrow().clone()
        };
        check_binding_rules(self.id, &self.rules, value.as_ref(), group, step)
    }

    fn validate_and_convert_proposed_value(&self) -> ConvertedProposal {
        let converted = self.convert_target().ok();
        ConvertedProposal {
            success: converted.is_some(),
            values: vec![ProposedValue {
                item: self.item.clone(),
                property: self.property.clone(),
                raw: self.target(),
                converted,
            }],
        }
    }

    fn update_target(&self) {
        let source = self.item.get().property(&self.property).unwrap_or_default();
        self.show(&source);
        *self.converted.borrow_mut() = None;
    }

    fn raw_proposed_value(&self) -> Option<Value> {
        Some(self.target())
    }

    fn validation_rules(&self) -> Vec<Rc<dyn ValidationRule>> {
        self.rules.clone()
    }

    fn adopt_proposed_value(&self, raw: &Value, converted: Option<&Value>) {
        *self.target.borrow_mut() = raw.clone();
        *self.converted.borrow_mut() = converted.cloned();
    }

    fn show_proposed_value(&self, converted: &Value) {
        self.show(converted);
    }

    fn children(&self) -> Vec<Rc<dyn LiveBinding>> {
        self.children.clone()
    }
}
