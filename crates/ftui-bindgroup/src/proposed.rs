#![forbid(unsafe_code)]

//! Pending shared edits that outlive the binding that made them.
//!
//! When value sharing is enabled and a dirty binding detaches (for example
//! because a template swapped the edit representation of a field for its
//! display representation), the binding's pending edit moves into this
//! table. Until a two-way binding for the same field joins and adopts it,
//! the entry is the authoritative value of that field for the group.
//!
//! # Invariants
//!
//! 1. At most one entry per `(item, property)`; [`ProposedValueTable::add`]
//!    replaces an existing entry for the same key.
//! 2. Keys compare with the item-equality contract.
//! 3. Entries hold their item weakly; entries whose item was dropped are
//!    skipped by lookups and removed by [`ProposedValueTable::prune_dead`].

use std::rc::{Rc, Weak};

use crate::error::ErrorId;
use crate::item::{ItemRef, WeakItem, weak_key_matches};
use crate::live::{BindingId, LiveBinding, ProposedValue};
use crate::rule::ValidationRule;
use crate::value::Value;

/// One pending edit.
pub struct ProposedValueEntry {
    item: WeakItem,
    property: String,
    raw: Value,
    converted: Option<Value>,
    binding: BindingId,
    rules: Vec<Rc<dyn ValidationRule>>,
    error: Option<ErrorId>,
    dependents: Vec<(BindingId, Weak<dyn LiveBinding>)>,
}

impl ProposedValueEntry {
    /// Build an entry from a detaching binding's proposal.
    #[must_use]
    pub fn new(
        value: ProposedValue,
        binding: BindingId,
        rules: Vec<Rc<dyn ValidationRule>>,
    ) -> Self {
        Self {
            item: value.item.downgrade(),
            property: value.property,
            raw: value.raw,
            converted: value.converted,
            binding,
            rules,
            error: None,
            dependents: Vec::new(),
        }
    }

    /// Attach the validation error the detaching binding carried.
    #[must_use]
    pub fn with_error(mut self, error: Option<ErrorId>) -> Self {
        self.error = error;
        self
    }

    /// The item, if still alive.
    #[must_use]
    pub fn item(&self) -> Option<ItemRef> {
        self.item.upgrade()
    }

    /// Property name.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Unconverted value.
    #[must_use]
    pub const fn raw(&self) -> &Value {
        &self.raw
    }

    /// Converted value; `None` when conversion failed.
    #[must_use]
    pub const fn converted(&self) -> Option<&Value> {
        self.converted.as_ref()
    }

    /// Binding that produced the edit.
    #[must_use]
    pub const fn binding(&self) -> BindingId {
        self.binding
    }

    /// Rules inherited from the producing binding.
    #[must_use]
    pub fn rules(&self) -> &[Rc<dyn ValidationRule>] {
        &self.rules
    }

    /// Error held on behalf of the producing binding.
    #[must_use]
    pub const fn error(&self) -> Option<ErrorId> {
        self.error
    }

    pub(crate) fn take_error(&mut self) -> Option<ErrorId> {
        self.error.take()
    }

    /// Register a read-only binding that displays this pending value.
    pub fn add_dependent(&mut self, binding: &Rc<dyn LiveBinding>) {
        let id = binding.id();
        if self.dependents.iter().all(|(existing, _)| *existing != id) {
            self.dependents.push((id, Rc::downgrade(binding)));
        }
    }

    /// Dependents that are still alive.
    #[must_use]
    pub fn live_dependents(&self) -> Vec<Rc<dyn LiveBinding>> {
        self.dependents
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    /// Whether this entry is keyed by `(item, property)`.
    #[must_use]
    pub fn matches(&self, item: &ItemRef, property: &str) -> bool {
        self.property == property && weak_key_matches(Some(&self.item), Some(item))
    }

    fn same_key(&self, other: &Self) -> bool {
        other
            .item
            .upgrade()
            .is_some_and(|item| self.matches(&item, &other.property))
    }
}

impl std::fmt::Debug for ProposedValueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProposedValueEntry")
            .field("item", &self.item)
            .field("property", &self.property)
            .field("raw", &self.raw)
            .field("converted", &self.converted)
            .field("binding", &self.binding)
            .field("error", &self.error)
            .field("dependents", &self.dependents.len())
            .finish()
    }
}

/// Keyed store of pending edits.
#[derive(Debug, Default)]
pub struct ProposedValueTable {
    entries: Vec<ProposedValueEntry>,
}

impl ProposedValueTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry`, returning the entry it replaced, if any.
    pub fn add(&mut self, entry: ProposedValueEntry) -> Option<ProposedValueEntry> {
        let replaced = self
            .entries
            .iter()
            .position(|e| e.same_key(&entry))
            .map(|idx| self.entries.remove(idx));
        self.entries.push(entry);
        replaced
    }

    /// Entry for `(item, property)`.
    #[must_use]
    pub fn get(&self, item: &ItemRef, property: &str) -> Option<&ProposedValueEntry> {
        self.entries.iter().find(|e| e.matches(item, property))
    }

    /// Mutable entry for `(item, property)`.
    pub fn get_mut(&mut self, item: &ItemRef, property: &str) -> Option<&mut ProposedValueEntry> {
        self.entries.iter_mut().find(|e| e.matches(item, property))
    }

    /// Remove and return the entry for `(item, property)`.
    pub fn remove(&mut self, item: &ItemRef, property: &str) -> Option<ProposedValueEntry> {
        let idx = self.entries.iter().position(|e| e.matches(item, property))?;
        Some(self.entries.remove(idx))
    }

    /// Remove every entry, returning them in insertion order.
    pub fn take_all(&mut self) -> Vec<ProposedValueEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Drop entries whose item no longer exists.
    pub fn prune_dead(&mut self) -> Vec<ProposedValueEntry> {
        let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.item.is_dead());
        self.entries = live;
        dead
    }

    /// Whether some entry holds error `id`.
    #[must_use]
    pub fn has_error(&self, id: ErrorId) -> bool {
        self.entries.iter().any(|e| e.error == Some(id))
    }

    /// Live items referenced by entries.
    #[must_use]
    pub fn items(&self) -> Vec<ItemRef> {
        self.entries.iter().filter_map(ProposedValueEntry::item).collect()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ProposedValueEntry> {
        self.entries.iter()
    }

    /// Iterate entries mutably in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ProposedValueEntry> {
        self.entries.iter_mut()
    }

    /// Number of entries.
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
