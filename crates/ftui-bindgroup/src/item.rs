#![forbid(unsafe_code)]

//! Data items, the item-equality contract, and optional item capabilities.
//!
//! An edit group never owns the items it edits. It holds [`WeakItem`]
//! back-references for lookup and upgrades them only for the duration of a
//! call, so deleted items do not leak through a pending transaction.
//!
//! # Equality
//!
//! Two items are the same item when both report a [`DataItem::key`] and the
//! keys are equal; otherwise they must be the same allocation. Lookups that
//! accept an absent item are null-safe: absent only matches absent.
//!
//! # Capabilities
//!
//! Transactional editing ([`EditableItem`]) and asynchronous entity errors
//! ([`EntityErrorSource`]) are opt-in. The group probes them once per item
//! through [`ItemCapabilities::probe`] and caches the result.

use core::fmt;
use std::rc::{Rc, Weak};

use crate::entity::EntityErrorSource;
use crate::value::Value;

/// Failure reported by an item while writing, committing or rolling back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemError {
    message: String,
}

impl ItemError {
    /// Create an item error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ItemError {}

impl From<&str> for ItemError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ItemError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// A data item whose named properties can be bound to UI fields.
///
/// Items use interior mutability: the engine writes through `&self` because
/// it only ever holds shared references.
pub trait DataItem {
    /// Current value of `name`, or `None` when the item has no such property.
    fn property(&self, name: &str) -> Option<Value>;

    /// Write `value` to `name`.
    fn set_property(&self, name: &str, value: Value) -> Result<(), ItemError>;

    /// Value-equality key. Items without a key compare by identity.
    fn key(&self) -> Option<&str> {
        None
    }

    /// Transactional editing capability.
    fn as_editable(&self) -> Option<&dyn EditableItem> {
        None
    }

    /// Entity-level asynchronous error capability.
    fn as_error_source(&self) -> Option<&dyn EntityErrorSource> {
        None
    }
}

/// Begin/cancel/commit semantics on a single item.
pub trait EditableItem {
    /// Snapshot the item so a later [`cancel_edit`](Self::cancel_edit) can restore it.
    fn begin_edit(&self);

    /// Restore the snapshot taken by [`begin_edit`](Self::begin_edit).
    fn cancel_edit(&self) -> Result<(), ItemError>;

    /// Commit pending changes. An error becomes a validation error
    /// attributed to this item; panics propagate unchanged.
    fn end_edit(&self) -> Result<(), ItemError>;
}

/// Shared handle to a data item.
#[derive(Clone)]
pub struct ItemRef(Rc<dyn DataItem>);

impl ItemRef {
    /// Wrap a freshly constructed item.
    pub fn new<T: DataItem + 'static>(item: T) -> Self {
        Self(Rc::new(item))
    }

    /// Wrap an item the caller already shares.
    pub fn from_rc<T: DataItem + 'static>(item: Rc<T>) -> Self {
        Self(item)
    }

    /// Borrow the underlying item.
    #[must_use]
    pub fn get(&self) -> &dyn DataItem {
        &*self.0
    }

    /// Weak back-reference to this item.
    #[must_use]
    pub fn downgrade(&self) -> WeakItem {
        WeakItem(Rc::downgrade(&self.0))
    }

    /// Item-equality contract: equal keys, otherwise the same allocation.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self.0.key(), other.0.key()) {
            (Some(a), Some(b)) => a == b,
            _ => std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0)),
        }
    }

    /// Probe the optional capabilities of this item.
    #[must_use]
    pub fn capabilities(&self) -> ItemCapabilities {
        ItemCapabilities::probe(self)
    }
}

impl PartialEq for ItemRef {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.key() {
            Some(key) => f.debug_tuple("ItemRef").field(&key).finish(),
            None => f
                .debug_tuple("ItemRef")
                .field(&Rc::as_ptr(&self.0).cast::<()>())
                .finish(),
        }
    }
}

/// Null-safe item comparison.
#[must_use]
pub fn items_equal(a: Option<&ItemRef>, b: Option<&ItemRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same(b),
        _ => false,
    }
}

/// Weak back-reference to a data item.
#[derive(Clone)]
pub struct WeakItem(Weak<dyn DataItem>);

impl WeakItem {
    /// Upgrade to a strong handle if the item is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ItemRef> {
        self.0.upgrade().map(ItemRef)
    }

    /// Whether the item has been dropped.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }

    /// Whether both references point at the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }

    /// Whether this reference denotes `item` under the equality contract.
    /// A dead reference matches nothing.
    #[must_use]
    pub fn refers_to(&self, item: &ItemRef) -> bool {
        self.upgrade().is_some_and(|live| live.same(item))
    }
}

impl fmt::Debug for WeakItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(item) => write!(f, "Weak({item:?})"),
            None => f.write_str("Weak(<dropped>)"),
        }
    }
}

/// Null-safe comparison between a stored weak key and a lookup item.
#[must_use]
pub fn weak_key_matches(stored: Option<&WeakItem>, item: Option<&ItemRef>) -> bool {
    match (stored, item) {
        (None, None) => true,
        (Some(stored), Some(item)) => stored.refers_to(item),
        _ => false,
    }
}

/// Cached result of probing an item's optional capabilities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ItemCapabilities {
    /// Supports [`EditableItem`].
    pub editable: bool,
    /// Supports [`EntityErrorSource`].
    pub error_source: bool,
}

impl ItemCapabilities {
    /// Probe `item` once.
    #[must_use]
    pub fn probe(item: &ItemRef) -> Self {
        Self {
            editable: item.get().as_editable().is_some(),
            error_source: item.get().as_error_source().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Row {
        key: Option<&'static str>,
        name: RefCell<Value>,
    }

    impl Row {
        fn keyed(key: &'static str) -> Self {
            Self {
                key: Some(key),
                name: RefCell::new(Value::Null),
            }
        }

        fn anonymous() -> Self {
            Self {
                key: None,
                name: RefCell::new(Value::Null),
            }
        }
    }

    impl DataItem for Row {
        fn property(&self, name: &str) -> Option<Value> {
            (name == "Name").then(|| self.name.borrow().clone())
        }

        fn set_property(&self, name: &str, value: Value) -> Result<(), ItemError> {
            if name != "Name" {
                return Err(ItemError::new(format!("no property {name}")));
            }
            *self.name.borrow_mut() = value;
            Ok(())
        }

        fn key(&self) -> Option<&str> {
            self.key
        }
    }

    #[test]
    fn keyed_items_compare_by_key() {
        let a = ItemRef::new(Row::keyed("42"));
        let b = ItemRef::new(Row::keyed("42"));
        let c = ItemRef::new(Row::keyed("43"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn anonymous_items_compare_by_identity() {
        let a = ItemRef::new(Row::anonymous());
        let b = ItemRef::new(Row::anonymous());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn null_safe_equality() {
        let a = ItemRef::new(Row::anonymous());
        assert!(items_equal(None, None));
        assert!(!items_equal(Some(&a), None));
        assert!(!items_equal(None, Some(&a)));
    }

    #[test]
    fn weak_item_does_not_keep_item_alive() {
        let item = ItemRef::new(Row::anonymous());
        let weak = item.downgrade();
        assert!(weak.refers_to(&item));
        let other = item.clone();
        drop(item);
        assert!(!weak.is_dead());
        drop(other);
        assert!(weak.is_dead());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn weak_key_matching() {
        let item = ItemRef::new(Row::anonymous());
        let weak = item.downgrade();
        assert!(weak_key_matches(Some(&weak), Some(&item)));
        assert!(weak_key_matches(None, None));
        assert!(!weak_key_matches(Some(&weak), None));
    }

    #[test]
    fn plain_items_have_no_capabilities() {
        let item = ItemRef::new(Row::anonymous());
        assert_eq!(item.capabilities(), ItemCapabilities::default());
    }

    #[test]
    fn property_round_trip_through_handle() {
        let item = ItemRef::new(Row::anonymous());
        item.get().set_property("Name", Value::from("Ada")).unwrap();
        assert_eq!(item.get().property("Name"), Some(Value::from("Ada")));
        assert!(item.get().set_property("Age", Value::from(3)).is_err());
    }
}
