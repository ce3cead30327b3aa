#![forbid(unsafe_code)]

//! Host-side collaborators: the scope that owns a group and the registry of
//! groups with unfinished work.
//!
//! A form or row that owns an [`EditGroup`] implements [`ScopeOwner`]. The
//! group asks it for its current item (part of the item snapshot) and whether
//! it is still live. A host that wants to know which groups still hold dirty
//! or invalid state (for example to block navigation away from a grid row)
//! shares one [`EditGroupRegistry`] between its groups.

use std::cell::RefCell;

use crate::group::{EditGroup, WeakEditGroup};
use crate::item::ItemRef;

/// The owning scope's current logical item.
#[derive(Clone, Debug, Default)]
pub enum CurrentItem {
    /// The scope has no item.
    #[default]
    None,
    /// The scope edits this item.
    Item(ItemRef),
    /// The scope shows the placeholder row for a not-yet-created item.
    NewItemPlaceholder,
}

impl CurrentItem {
    /// The item, if this is [`CurrentItem::Item`].
    #[must_use]
    pub fn item(&self) -> Option<&ItemRef> {
        match self {
            Self::Item(item) => Some(item),
            _ => None,
        }
    }
}

/// The UI scope an edit group belongs to.
pub trait ScopeOwner {
    /// The item the scope is currently editing.
    fn current_item(&self) -> CurrentItem;

    /// Whether the scope is still part of a live UI tree.
    fn is_live(&self) -> bool {
        true
    }
}

/// Registry of groups that still hold dirty or invalid state.
///
/// Groups are held weakly; a dropped group silently leaves the registry.
#[derive(Debug, Default)]
pub struct EditGroupRegistry {
    groups: RefCell<Vec<WeakEditGroup>>,
}

impl EditGroupRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `group` if it is not already present.
    pub fn register(&self, group: &EditGroup) {
        let mut groups = self.groups.borrow_mut();
        groups.retain(|g| !g.is_dead());
        if !groups.iter().any(|g| g.refers_to(group)) {
            groups.push(group.downgrade());
        }
    }

    /// Remove `group` if present.
    pub fn deregister(&self, group: &EditGroup) {
        self.groups
            .borrow_mut()
            .retain(|g| !g.is_dead() && !g.refers_to(group));
    }

    /// Whether `group` is registered.
    #[must_use]
    pub fn contains(&self, group: &EditGroup) -> bool {
        self.groups.borrow().iter().any(|g| g.refers_to(group))
    }

    /// Registered groups that are still alive.
    #[must_use]
    pub fn pending(&self) -> Vec<EditGroup> {
        self.groups
            .borrow()
            .iter()
            .filter_map(WeakEditGroup::upgrade)
            .collect()
    }

    /// Number of live registered groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.borrow().iter().filter(|g| !g.is_dead()).count()
    }

    /// Whether no live group is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let registry = EditGroupRegistry::new();
        let group = EditGroup::new();
        registry.register(&group);
        registry.register(&group);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&group));
        registry.deregister(&group);
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_groups_leave_registry() {
        let registry = EditGroupRegistry::new();
        let group = EditGroup::new();
        registry.register(&group);
        drop(group);
        assert!(registry.is_empty());
        assert!(registry.pending().is_empty());
    }

    #[test]
    fn current_item_accessor() {
        assert!(CurrentItem::None.item().is_none());
        assert!(CurrentItem::NewItemPlaceholder.item().is_none());
    }
}
