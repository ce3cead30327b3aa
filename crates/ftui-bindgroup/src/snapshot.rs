#![forbid(unsafe_code)]

//! Per-run view of "the value of field X right now".
//!
//! Group rules read other fields while the pipeline is running. What a field
//! is worth depends on how far the run got: before conversion it is the raw
//! text in the UI, after conversion it is the converted value, after the
//! write it is what the source holds. The snapshot table answers those
//! lookups consistently for the duration of one run.
//!
//! # Invariants
//!
//! 1. Exactly one entry per joined binding, keyed by [`BindingId`];
//!    inserting an id that is already present replaces its entry.
//! 2. Entries reset to pending at the raw step of every run; values are
//!    derived lazily on first read and cached until the next reset.
//! 3. Entries denormalize `(item, property)` so lookups never call into the
//!    binding just to find it.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::item::{ItemRef, WeakItem, weak_key_matches};
use crate::live::{BindingId, LiveBinding};
use crate::step::ValidationStep;
use crate::value::Value;

/// One joined binding's slot.
pub struct ValueSnapshotEntry {
    binding: BindingId,
    handle: Weak<dyn LiveBinding>,
    item: Option<WeakItem>,
    property: Option<String>,
    raw: Option<Value>,
    converted: Option<Value>,
}

impl ValueSnapshotEntry {
    fn new(binding: &Rc<dyn LiveBinding>) -> Self {
        Self {
            binding: binding.id(),
            handle: Rc::downgrade(binding),
            item: binding.source_item().map(|item| item.downgrade()),
            property: binding.source_property().map(str::to_owned),
            raw: None,
            converted: None,
        }
    }

    /// The binding this entry belongs to.
    #[must_use]
    pub const fn binding(&self) -> BindingId {
        self.binding
    }

    /// Bound property.
    #[must_use]
    pub fn property(&self) -> Option<&str> {
        self.property.as_deref()
    }

    /// Bound item, if still alive.
    #[must_use]
    pub fn item(&self) -> Option<ItemRef> {
        self.item.as_ref().and_then(WeakItem::upgrade)
    }

    fn matches(&self, item: &ItemRef, property: &str) -> bool {
        self.property.as_deref() == Some(property)
            && weak_key_matches(self.item.as_ref(), Some(item))
    }
}

impl std::fmt::Debug for ValueSnapshotEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueSnapshotEntry")
            .field("binding", &self.binding)
            .field("property", &self.property)
            .field("raw", &self.raw)
            .field("converted", &self.converted)
            .finish_non_exhaustive()
    }
}

/// Outcome of a snapshot lookup.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Resolved {
    /// No joined binding covers the field.
    Missing,
    /// The field is covered but no value can be produced.
    Unavailable,
    /// The field's value.
    Value(Value),
}

/// Work that must happen outside the table borrow.
enum Derive {
    Raw(BindingId, Weak<dyn LiveBinding>),
    Source(ItemRef, String),
}

/// Table of per-binding value slots.
#[derive(Debug, Default)]
pub struct ValueSnapshotTable {
    entries: Vec<ValueSnapshotEntry>,
}

impl ValueSnapshotTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the slot for `binding`, replacing any slot with the same id.
    pub fn insert(&mut self, binding: &Rc<dyn LiveBinding>) {
        let id = binding.id();
        self.entries.retain(|e| e.binding != id);
        self.entries.push(ValueSnapshotEntry::new(binding));
    }

    /// Remove the slot for `binding`. Returns whether one existed.
    pub fn remove(&mut self, binding: BindingId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.binding != binding);
        before != self.entries.len()
    }

    /// Mark every slot pending.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.raw = None;
            entry.converted = None;
        }
    }

    /// Record the converted value `binding` produced in this run.
    pub fn store(&mut self, binding: BindingId, value: Value) -> bool {
        match self.entries.iter_mut().find(|e| e.binding == binding) {
            Some(entry) => {
                entry.converted = Some(value);
                true
            }
            None => false,
        }
    }

    /// Whether a slot exists for `binding`.
    #[must_use]
    pub fn contains(&self, binding: BindingId) -> bool {
        self.entries.iter().any(|e| e.binding == binding)
    }

    /// Slot for `(item, property)`.
    #[must_use]
    pub fn find(&self, item: &ItemRef, property: &str) -> Option<&ValueSnapshotEntry> {
        self.entries.iter().find(|e| e.matches(item, property))
    }

    /// Ids of every slot, in join order.
    #[must_use]
    pub fn bindings(&self) -> Vec<BindingId> {
        self.entries.iter().map(|e| e.binding).collect()
    }

    /// Iterate slots in join order.
    pub fn iter(&self) -> impl Iterator<Item = &ValueSnapshotEntry> {
        self.entries.iter()
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve `(item, property)` as of `step` (`None` when idle).
///
/// At the raw step the binding's raw candidate is used; otherwise the value
/// the binding stored during the run, falling back to the item's current
/// source value. Derived values are cached in the slot. The table borrow is
/// released before calling into bindings or items.
pub(crate) fn resolve(
    table: &RefCell<ValueSnapshotTable>,
    item: &ItemRef,
    property: &str,
    step: Option<ValidationStep>,
) -> Resolved {
    let derive = {
        let table = table.borrow();
        let Some(entry) = table.find(item, property) else {
            return Resolved::Missing;
        };
        if step == Some(ValidationStep::RawProposedValue) {
            if let Some(raw) = &entry.raw {
                return Resolved::Value(raw.clone());
            }
            Derive::Raw(entry.binding, entry.handle.clone())
        } else {
            if let Some(converted) = &entry.converted {
                return Resolved::Value(converted.clone());
            }
            match entry.item() {
                Some(live) => Derive::Source(live, property.to_owned()),
                None => return Resolved::Unavailable,
            }
        }
    };

    match derive {
        Derive::Raw(id, handle) => {
            let Some(value) = handle.upgrade().and_then(|b| b.raw_proposed_value()) else {
                return Resolved::Unavailable;
            };
            if let Some(entry) = table.borrow_mut().entries.iter_mut().find(|e| e.binding == id) {
                entry.raw = Some(value.clone());
            }
            Resolved::Value(value)
        }
        Derive::Source(live, property) => match live.get().property(&property) {
            Some(value) => Resolved::Value(value),
            None => Resolved::Unavailable,
        },
    }
}
