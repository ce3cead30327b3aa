#![forbid(unsafe_code)]

//! Transactional edit groups for FrankenTUI field bindings.
//!
//! This crate provides:
//! - [`EditGroup`] to validate, write and commit many bindings as one unit
//!   through the four [`ValidationStep`]s
//! - [`LiveBinding`] as the seam a binding implements to take part, with
//!   [`FieldBinding`] as a ready-made implementation
//! - [`ValidationRule`] for per-field and cross-field rules
//! - [`DataItem`], [`EditableItem`] and [`EntityErrorSource`] for the data
//!   objects being edited
//! - [`EditGroupRegistry`] to track groups that still hold dirty or invalid
//!   state
//!
//! # Example
//!
//! ```ignore
//! let group = EditGroup::new();
//! let name = Rc::new(FieldBinding::new(person.clone(), "Name")
//!     .with_rule(RequiredRule::default()));
//! group.join(name.clone());
//!
//! group.begin_edit();
//! name.set_target("Grace");
//! if !group.commit_edit() {
//!     for error in group.validation_errors() {
//!         eprintln!("{error}");
//!     }
//!     group.cancel_edit();
//! }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod field;
pub mod group;
pub mod item;
pub mod live;
pub mod locale;
pub mod proposed;
pub mod rule;
pub mod scope;
mod shadow;
pub mod snapshot;
pub mod step;
pub mod value;

pub use config::{ConfigError, EditGroupConfig};
pub use entity::{EntityErrorSource, ErrorsChanged, ErrorsChangedNotifier, SourceToken};
pub use error::{
    ErrorChange, ErrorId, ErrorOwner, ValidationError, ValidationErrorKind, ValidationEvent,
    ValueError,
};
pub use field::FieldBinding;
pub use group::{EditGroup, ErrorSubscription, GroupId, PendingEdit, WeakEditGroup};
pub use item::{
    DataItem, EditableItem, ItemCapabilities, ItemError, ItemRef, WeakItem, items_equal,
};
pub use live::{
    BindingId, BindingMode, ConvertedProposal, LiveBinding, ProposedValue, check_binding_rules,
};
pub use locale::Locale;
pub use proposed::{ProposedValueEntry, ProposedValueTable};
pub use rule::{FnRule, RequiredRule, RuleContext, RuleOutcome, ValidationRule};
pub use scope::{CurrentItem, EditGroupRegistry, ScopeOwner};
pub use snapshot::{ValueSnapshotEntry, ValueSnapshotTable};
pub use step::ValidationStep;
pub use value::Value;
