#![forbid(unsafe_code)]

//! The edit group: one transaction over many live bindings.
//!
//! An [`EditGroup`] coordinates every binding that edits the same logical
//! record. The host drives it with [`begin_edit`](EditGroup::begin_edit),
//! [`commit_edit`](EditGroup::commit_edit) and
//! [`cancel_edit`](EditGroup::cancel_edit); the group runs the validation
//! pipeline across its members and the items they edit.
//!
//! # Pipeline
//!
//! ```text
//!   RawProposedValue ──► ConvertedProposedValue ──► UpdatedValue ──► CommittedValue
//!   reset snapshot       members convert            members write     items end_edit
//!        │                      │                        │                 │
//!        └──── rules for the step (members, then group) after each action ─┘
//! ```
//!
//! A run stops after the first failing step. Effects of completed steps are
//! not rolled back; only `cancel_edit` restores items, and only items that
//! implement [`EditableItem`](crate::EditableItem).
//!
//! # Architecture
//!
//! `EditGroup` is a cheap `Rc` handle: clones share one
//! group. Bindings, items, the owning scope and the registry are held
//! weakly. No `RefCell` borrow is held while calling into a binding, an item
//! or a rule, so those may call back into the group.
//!
//! # Invariants
//!
//! 1. One snapshot slot per joined binding, added on join and removed the
//!    moment the binding leaves.
//! 2. At most one proposed value per `(item, property)`.
//! 3. At most one run at a time: a second run while one is active is
//!    rejected and returns `false`.
//! 4. `commit_edit` clears the editing flag only when it succeeds.
//!
//! # Failure Modes
//!
//! - Conversion, rule, write and commit failures become validation errors;
//!   the operation returns `false`.
//! - A rule, binding or item that panics propagates the panic; the group
//!   resets its step so later runs are not locked out.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::EditGroupConfig;
use crate::entity::{EntityErrorInbox, EntityErrorSource, SourceToken};
use crate::error::{
    ErrorLedger, ErrorOwner, ValidationError, ValidationErrorKind, ValidationEvent, ValueError,
};
use crate::item::{ItemCapabilities, ItemRef, WeakItem, weak_key_matches};
use crate::live::{BindingId, LiveBinding};
use crate::locale::Locale;
use crate::proposed::{ProposedValueEntry, ProposedValueTable};
use crate::rule::{RuleContext, RuleOutcome, ValidationRule};
use crate::scope::{CurrentItem, EditGroupRegistry, ScopeOwner};
use crate::shadow::ShadowBinding;
use crate::snapshot::{self, Resolved, ValueSnapshotTable};
use crate::step::ValidationStep;
use crate::value::Value;

static GROUP_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of an edit group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(u64);

impl GroupId {
    fn next() -> Self {
        Self(GROUP_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[inline]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A pending shared edit as seen from outside the group.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEdit {
    /// Unconverted value.
    pub raw: Value,
    /// Converted value, `None` when conversion failed.
    pub converted: Option<Value>,
}

type ErrorListener = dyn Fn(&ValidationEvent);

/// Keeps a validation-error listener registered. Dropping it unsubscribes.
#[must_use = "dropping this subscription unsubscribes the listener"]
pub struct ErrorSubscription {
    _callback: Rc<ErrorListener>,
}

impl std::fmt::Debug for ErrorSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSubscription").finish()
    }
}

struct Member {
    id: BindingId,
    root: BindingId,
    handle: Weak<dyn LiveBinding>,
}

struct ItemRecord {
    item: WeakItem,
    caps: ItemCapabilities,
    token: Option<SourceToken>,
}

/// Identifies the pending edit a detached shadow validated.
struct ShadowKey {
    shadow: BindingId,
    item: WeakItem,
    property: String,
}

struct GroupInner {
    id: GroupId,
    config: RefCell<EditGroupConfig>,
    culture: RefCell<Locale>,
    rules: RefCell<Vec<Rc<dyn ValidationRule>>>,
    members: RefCell<Vec<Member>>,
    shadows: RefCell<Vec<Rc<ShadowBinding>>>,
    shadow_keys: RefCell<Vec<ShadowKey>>,
    snapshot: RefCell<ValueSnapshotTable>,
    proposed: RefCell<ProposedValueTable>,
    item_cache: RefCell<Option<Vec<WeakItem>>>,
    records: RefCell<Vec<ItemRecord>>,
    errors: RefCell<ErrorLedger>,
    listeners: RefCell<Vec<Weak<ErrorListener>>>,
    editing: Cell<bool>,
    step: Cell<Option<ValidationStep>>,
    owner: RefCell<Option<Weak<dyn ScopeOwner>>>,
    registry: RefCell<Option<Weak<EditGroupRegistry>>>,
    inbox: EntityErrorInbox,
}

/// Resets the current step when a run ends, including by panic.
struct RunGuard<'a> {
    step: &'a Cell<Option<ValidationStep>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.step.set(None);
    }
}

/// Transactional validation and commit over a set of live bindings.
#[derive(Clone)]
pub struct EditGroup {
    inner: Rc<GroupInner>,
}

impl Default for EditGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl EditGroup {
    /// Create a group with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EditGroupConfig::default())
    }

    /// Create a group from `config`.
    #[must_use]
    pub fn with_config(config: EditGroupConfig) -> Self {
        let culture = config.resolved_culture();
        Self {
            inner: Rc::new(GroupInner {
                id: GroupId::next(),
                config: RefCell::new(config),
                culture: RefCell::new(culture),
                rules: RefCell::new(Vec::new()),
                members: RefCell::new(Vec::new()),
                shadows: RefCell::new(Vec::new()),
                shadow_keys: RefCell::new(Vec::new()),
                snapshot: RefCell::new(ValueSnapshotTable::new()),
                proposed: RefCell::new(ProposedValueTable::new()),
                item_cache: RefCell::new(None),
                records: RefCell::new(Vec::new()),
                errors: RefCell::new(ErrorLedger::default()),
                listeners: RefCell::new(Vec::new()),
                editing: Cell::new(false),
                step: Cell::new(None),
                owner: RefCell::new(None),
                registry: RefCell::new(None),
                inbox: EntityErrorInbox::new(),
            }),
        }
    }

    /// A new group with the same name, flags, culture, rules and registry,
    /// but no members, no pending edits and not editing. Used to stamp out
    /// one group per repeated row.
    #[must_use]
    pub fn replicate(&self) -> Self {
        let copy = Self::with_config(self.config());
        *copy.inner.culture.borrow_mut() = self.culture();
        *copy.inner.rules.borrow_mut() = self.inner.rules.borrow().clone();
        *copy.inner.registry.borrow_mut() = self.inner.registry.borrow().clone();
        copy
    }

    // -----------------------------------------------------------------------
    // Identity & configuration
    // -----------------------------------------------------------------------

    /// Unique id.
    #[must_use]
    pub fn id(&self) -> GroupId {
        self.inner.id
    }

    /// Group name, if configured.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner.config.borrow().name.clone()
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> EditGroupConfig {
        self.inner.config.borrow().clone()
    }

    /// Culture passed to rules.
    #[must_use]
    pub fn culture(&self) -> Locale {
        self.inner.culture.borrow().clone()
    }

    /// Override the culture passed to rules.
    pub fn set_culture(&self, culture: impl Into<String>) {
        *self.inner.culture.borrow_mut() = crate::locale::normalize_locale(&culture.into());
    }

    /// Weak handle to this group.
    #[must_use]
    pub fn downgrade(&self) -> WeakEditGroup {
        WeakEditGroup(Rc::downgrade(&self.inner))
    }

    /// Whether both handles denote the same group.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach the scope that owns this group.
    pub fn set_owner<O: ScopeOwner + 'static>(&self, owner: &Rc<O>) {
        let weak: Weak<dyn ScopeOwner> = Rc::downgrade(owner) as Weak<dyn ScopeOwner>;
        *self.inner.owner.borrow_mut() = Some(weak);
        self.invalidate_items();
    }

    /// Attach the host's registry of groups with unfinished work.
    pub fn set_registry(&self, registry: &Rc<EditGroupRegistry>) {
        *self.inner.registry.borrow_mut() = Some(Rc::downgrade(registry));
    }

    /// Append a group-level rule.
    pub fn add_rule(&self, rule: impl ValidationRule + 'static) {
        self.inner.rules.borrow_mut().push(Rc::new(rule));
    }

    /// Group-level rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> Vec<Rc<dyn ValidationRule>> {
        self.inner.rules.borrow().clone()
    }

    /// Register a validation-error listener. Events are delivered only when
    /// `notify_on_validation_error` is enabled.
    pub fn subscribe_errors(
        &self,
        callback: impl Fn(&ValidationEvent) + 'static,
    ) -> ErrorSubscription {
        let callback: Rc<ErrorListener> = Rc::new(callback);
        self.inner
            .listeners
            .borrow_mut()
            .push(Rc::downgrade(&callback));
        ErrorSubscription {
            _callback: callback,
        }
    }

    fn label(&self) -> String {
        self.name()
            .unwrap_or_else(|| format!("#{}", self.inner.id.id()))
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Join `binding` and its composite children to the group.
    ///
    /// A two-way binding whose field has a pending shared edit adopts it and
    /// the entry leaves the proposed-value table. A binding that cannot
    /// write displays the pending value and becomes a dependent of it.
    pub fn join(&self, binding: Rc<dyn LiveBinding>) {
        let children = binding.children();
        self.join_one(binding);
        for child in children {
            self.join_one(child);
        }
    }

    fn join_one(&self, binding: Rc<dyn LiveBinding>) {
        let id = binding.id();
        {
            let mut members = self.inner.members.borrow_mut();
            if members.iter().any(|m| m.id == id) {
                return;
            }
            members.push(Member {
                id,
                root: binding.root_id(),
                handle: Rc::downgrade(&binding),
            });
        }

        let item = binding.source_item();
        let newly_seen = item
            .as_ref()
            .is_some_and(|item| !self.items().iter().any(|i| i.same(item)));

        self.inner.snapshot.borrow_mut().insert(&binding);
        self.invalidate_items();
        tracing::debug!(group = %self.label(), binding = id.id(), "binding joined");

        if let Some(item) = &item {
            if newly_seen && self.inner.editing.get() && self.capabilities(item).editable {
                if let Some(editable) = item.get().as_editable() {
                    editable.begin_edit();
                }
            }
            if let Some(property) = binding.source_property().map(str::to_owned) {
                self.hand_off_proposed_value(&binding, item, &property);
            }
        }
    }

    fn hand_off_proposed_value(
        &self,
        binding: &Rc<dyn LiveBinding>,
        item: &ItemRef,
        property: &str,
    ) {
        if binding.mode().updates_source() {
            let entry = self.inner.proposed.borrow_mut().remove(item, property);
            let Some(mut entry) = entry else {
                return;
            };
            if let Some(error) = entry.take_error() {
                let owner = ErrorOwner::Binding(binding.id());
                self.inner
                    .errors
                    .borrow_mut()
                    .reassign_where(&owner, |e| e.id() == error);
            }
            self.clear_shadow_errors(|key| {
                key.property == property && weak_key_matches(Some(&key.item), Some(item))
            });
            self.invalidate_items();
            binding.adopt_proposed_value(entry.raw(), entry.converted());
            tracing::debug!(
                group = %self.label(),
                binding = binding.id().id(),
                property,
                "binding adopted pending edit"
            );
        } else {
            let converted = {
                let mut proposed = self.inner.proposed.borrow_mut();
                proposed.get_mut(item, property).and_then(|entry| {
                    entry.add_dependent(binding);
                    entry.converted().cloned()
                })
            };
            if let Some(value) = converted {
                binding.show_proposed_value(&value);
            }
        }
    }

    /// Remove the binding with id `binding`, together with every member that
    /// shares its root.
    ///
    /// With value sharing enabled, a dirty leaving binding's pending edit is
    /// kept in the proposed-value table so it survives the detach.
    pub fn leave(&self, binding: BindingId) {
        let leaving: Vec<Member> = {
            let mut members = self.inner.members.borrow_mut();
            let Some(root) = members.iter().find(|m| m.id == binding).map(|m| m.root) else {
                return;
            };
            let (leaving, staying) = std::mem::take(&mut *members)
                .into_iter()
                .partition(|m| m.root == root);
            *members = staying;
            leaving
        };

        for member in leaving {
            self.inner.snapshot.borrow_mut().remove(member.id);
            tracing::debug!(group = %self.label(), binding = member.id.id(), "binding left");
            let Some(handle) = member.handle.upgrade() else {
                continue;
            };
            if self.inner.config.borrow().shares_proposed_values && handle.is_dirty() {
                self.keep_proposed_values(&handle);
            }
        }
        self.invalidate_items();
        self.prune_orphaned_errors();
        self.update_registry();
    }

    fn keep_proposed_values(&self, binding: &Rc<dyn LiveBinding>) {
        let proposal = binding.validate_and_convert_proposed_value();
        let rules = binding.validation_rules();
        let mut error = self.inner.errors.borrow().first_for_binding(binding.id());

        for value in proposal.values {
            let item = value.item.clone();
            let property = value.property.clone();
            let entry =
                ProposedValueEntry::new(value, binding.id(), rules.clone()).with_error(error.take());
            let converted = entry.converted().cloned();
            self.inner.proposed.borrow_mut().add(entry);

            let watchers: Vec<Rc<dyn LiveBinding>> = self
                .live_members()
                .into_iter()
                .filter(|b| {
                    !b.mode().updates_source()
                        && b.source_property() == Some(property.as_str())
                        && b.source_item().is_some_and(|i| i.same(&item))
                })
                .collect();
            for watcher in watchers {
                if let Some(entry) = self.inner.proposed.borrow_mut().get_mut(&item, &property) {
                    entry.add_dependent(&watcher);
                }
                if let Some(value) = &converted {
                    watcher.show_proposed_value(value);
                }
            }
            tracing::debug!(
                group = %self.label(),
                binding = binding.id().id(),
                property = %property,
                converted = converted.is_some(),
                "pending edit kept after detach"
            );
        }
        self.invalidate_items();
    }

    /// Live members in join order. Members whose binding was dropped are
    /// removed along with their snapshot slots.
    #[must_use]
    pub fn members(&self) -> Vec<Rc<dyn LiveBinding>> {
        self.live_members()
    }

    fn live_members(&self) -> Vec<Rc<dyn LiveBinding>> {
        let mut dead = Vec::new();
        let live: Vec<Rc<dyn LiveBinding>> = {
            let mut members = self.inner.members.borrow_mut();
            members.retain(|m| {
                let alive = m.handle.strong_count() > 0;
                if !alive {
                    dead.push(m.id);
                }
                alive
            });
            members.iter().filter_map(|m| m.handle.upgrade()).collect()
        };
        if !dead.is_empty() {
            let mut snapshot = self.inner.snapshot.borrow_mut();
            for id in dead {
                snapshot.remove(id);
            }
            drop(snapshot);
            self.invalidate_items();
        }
        live
    }

    /// Ids of joined bindings, in join order.
    #[must_use]
    pub fn member_ids(&self) -> Vec<BindingId> {
        self.inner.members.borrow().iter().map(|m| m.id).collect()
    }

    /// Ids of bindings that hold a snapshot slot, in join order.
    #[must_use]
    pub fn snapshot_ids(&self) -> Vec<BindingId> {
        self.inner.snapshot.borrow().bindings()
    }

    fn participants(&self) -> Vec<Rc<dyn LiveBinding>> {
        let mut all = self.live_members();
        all.extend(
            self.inner
                .shadows
                .borrow()
                .iter()
                .map(|s| Rc::clone(s) as Rc<dyn LiveBinding>),
        );
        all
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    fn invalidate_items(&self) {
        *self.inner.item_cache.borrow_mut() = None;
    }

    fn owner_current_item(&self) -> CurrentItem {
        let owner = self.inner.owner.borrow().as_ref().and_then(Weak::upgrade);
        owner.map_or(CurrentItem::None, |o| o.current_item())
    }

    fn cached_items(&self) -> Vec<WeakItem> {
        if let Some(cached) = self.inner.item_cache.borrow().as_ref() {
            return cached.clone();
        }
        let mut distinct: Vec<ItemRef> = Vec::new();
        for item in self
            .inner
            .snapshot
            .borrow()
            .iter()
            .filter_map(snapshot::ValueSnapshotEntry::item)
        {
            push_distinct(&mut distinct, item);
        }
        for item in self.inner.proposed.borrow().items() {
            push_distinct(&mut distinct, item);
        }
        let weak: Vec<WeakItem> = distinct.iter().map(ItemRef::downgrade).collect();
        *self.inner.item_cache.borrow_mut() = Some(weak.clone());
        weak
    }

    /// Distinct items the group edits: the owner's current item, every
    /// member's source item and every item with a pending shared edit.
    #[must_use]
    pub fn items(&self) -> Vec<ItemRef> {
        let mut distinct = Vec::new();
        if let CurrentItem::Item(item) = self.owner_current_item() {
            push_distinct(&mut distinct, item);
        }
        for item in self.cached_items().iter().filter_map(WeakItem::upgrade) {
            push_distinct(&mut distinct, item);
        }
        distinct
    }

    fn capabilities(&self, item: &ItemRef) -> ItemCapabilities {
        let mut records = self.inner.records.borrow_mut();
        records.retain(|r| !r.item.is_dead());
        if let Some(record) = records.iter().find(|r| r.item.refers_to(item)) {
            return record.caps;
        }
        let caps = ItemCapabilities::probe(item);
        records.push(ItemRecord {
            item: item.downgrade(),
            caps,
            token: None,
        });
        caps
    }

    /// Whether every item supports transactional editing, so `cancel_edit`
    /// can restore all of them.
    #[must_use]
    pub fn can_restore_values(&self) -> bool {
        self.items()
            .iter()
            .all(|item| self.capabilities(item).editable)
    }

    // -----------------------------------------------------------------------
    // State queries
    // -----------------------------------------------------------------------

    /// Whether `begin_edit` ran and no commit or cancel finished it since.
    #[must_use]
    pub fn is_editing(&self) -> bool {
        self.inner.editing.get()
    }

    /// Whether any member holds an unwritten edit or a shared edit is pending.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.inner.proposed.borrow().is_empty()
            || self.live_members().iter().any(|b| b.is_dirty())
    }

    /// The step of the run in progress, `None` when idle.
    #[must_use]
    pub fn current_step(&self) -> Option<ValidationStep> {
        self.inner.step.get()
    }

    /// Whether the group currently has any validation error.
    #[must_use]
    pub fn has_validation_error(&self) -> bool {
        self.pump_entity_errors();
        !self.inner.errors.borrow().is_empty()
    }

    /// Every current validation error, oldest first.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        self.pump_entity_errors();
        self.inner.errors.borrow().snapshot()
    }

    /// The pending shared edit for `(item, property)`, if any.
    #[must_use]
    pub fn proposed_value(&self, item: &ItemRef, property: &str) -> Option<PendingEdit> {
        self.inner
            .proposed
            .borrow()
            .get(item, property)
            .map(|entry| PendingEdit {
                raw: entry.raw().clone(),
                converted: entry.converted().cloned(),
            })
    }

    /// Number of pending shared edits.
    #[must_use]
    pub fn proposed_value_count(&self) -> usize {
        self.inner.proposed.borrow().len()
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    /// Value of `(item, property)` as of the current step.
    ///
    /// A pending shared edit wins over the snapshot slot of a joined binding.
    ///
    /// # Errors
    ///
    /// - [`ValueError::NotInGroup`] if neither covers the field.
    /// - [`ValueError::Unavailable`] if the field is covered but its value
    ///   cannot be produced.
    pub fn get_value(&self, item: &ItemRef, property: &str) -> Result<Value, ValueError> {
        let step = self.inner.step.get();
        let pending = self.inner.proposed.borrow().get(item, property).map(|entry| {
            if step == Some(ValidationStep::RawProposedValue) {
                Some(entry.raw().clone())
            } else {
                entry.converted().cloned()
            }
        });
        let resolved = match pending {
            Some(Some(value)) => Resolved::Value(value),
            Some(None) => Resolved::Unavailable,
            None => snapshot::resolve(&self.inner.snapshot, item, property, step),
        };
        match resolved {
            Resolved::Value(value) => Ok(value),
            Resolved::Unavailable => Err(ValueError::Unavailable {
                property: property.to_owned(),
            }),
            Resolved::Missing => Err(ValueError::NotInGroup {
                property: property.to_owned(),
            }),
        }
    }

    /// [`get_value`](Self::get_value) without the reason for failure.
    #[must_use]
    pub fn try_get_value(&self, item: &ItemRef, property: &str) -> Option<Value> {
        self.get_value(item, property).ok()
    }

    /// Record the converted value of member `binding` for the current run.
    pub fn store_value(&self, binding: BindingId, value: Value) -> bool {
        self.inner.snapshot.borrow_mut().store(binding, value)
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    /// Record a validation error.
    pub fn report_error(&self, error: ValidationError) {
        let event = self.inner.errors.borrow_mut().add(error);
        self.emit(vec![event]);
    }

    /// Clear errors owned by `binding` that match `pred`.
    pub fn clear_binding_errors(
        &self,
        binding: BindingId,
        pred: impl Fn(&ValidationError) -> bool,
    ) {
        self.remove_errors(|e| e.owner().binding() == Some(binding) && pred(e));
    }

    fn remove_errors(&self, pred: impl FnMut(&ValidationError) -> bool) {
        let events = self.inner.errors.borrow_mut().remove_where(pred);
        self.emit(events);
    }

    fn emit(&self, events: Vec<ValidationEvent>) {
        if events.is_empty() || !self.inner.config.borrow().notify_on_validation_error {
            return;
        }
        let listeners: Vec<Rc<ErrorListener>> = {
            let mut listeners = self.inner.listeners.borrow_mut();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for event in &events {
            for listener in &listeners {
                listener(event);
            }
        }
    }

    /// Drop binding errors whose binding left and whose pending edit is gone,
    /// and errors of dropped items.
    fn prune_orphaned_errors(&self) {
        if !self.inner.proposed.borrow_mut().prune_dead().is_empty() {
            self.invalidate_items();
        }
        let mut owners = self.member_ids();
        owners.extend(self.inner.shadows.borrow().iter().map(|s| s.id()));
        let events = {
            let proposed = self.inner.proposed.borrow();
            self.inner
                .errors
                .borrow_mut()
                .remove_where(|e| match e.owner() {
                    ErrorOwner::Binding(id) => !owners.contains(id) && !proposed.has_error(e.id()),
                    ErrorOwner::Item(item) => item.is_dead(),
                    ErrorOwner::Group => false,
                })
        };
        self.emit(events);
    }

    // -----------------------------------------------------------------------
    // Entity errors
    // -----------------------------------------------------------------------

    /// Fold pending entity-error notifications into the group. Returns the
    /// number of notifications processed.
    pub fn pump_entity_errors(&self) -> usize {
        let changes = self.inner.inbox.drain();
        if changes.is_empty() || !self.inner.config.borrow().validates_on_entity_errors {
            return changes.len();
        }
        for change in &changes {
            if change.property.is_some() {
                continue;
            }
            let item = self
                .inner
                .records
                .borrow()
                .iter()
                .find(|r| r.token == Some(change.source))
                .and_then(|r| r.item.upgrade());
            let Some(item) = item else {
                continue;
            };
            if let Some(source) = item.get().as_error_source() {
                let errors = source.errors(None);
                tracing::debug!(
                    group = %self.label(),
                    count = errors.len(),
                    "entity errors changed"
                );
                self.replace_entity_errors(&item, errors);
            }
        }
        changes.len()
    }

    /// Re-query entity-level errors of every item. Returns `true` when none
    /// reports an error.
    fn refresh_entity_errors(&self) -> bool {
        let mut clean = true;
        for item in self.items() {
            if !self.capabilities(&item).error_source {
                continue;
            }
            let Some(source) = item.get().as_error_source() else {
                continue;
            };
            self.connect_error_source(&item, source);
            clean &= self.replace_entity_errors(&item, source.errors(None));
        }
        clean
    }

    fn connect_error_source(&self, item: &ItemRef, source: &dyn EntityErrorSource) {
        let notifier = {
            let mut records = self.inner.records.borrow_mut();
            let Some(record) = records.iter_mut().find(|r| r.item.refers_to(item)) else {
                return;
            };
            if record.token.is_some() {
                return;
            }
            let notifier = self.inner.inbox.notifier();
            record.token = Some(notifier.source());
            notifier
        };
        source.connect(notifier);
    }

    fn replace_entity_errors(&self, item: &ItemRef, errors: Vec<String>) -> bool {
        let owner = ErrorOwner::Item(item.downgrade());
        self.remove_errors(|e| e.kind() == ValidationErrorKind::Entity && e.owner().same(&owner));
        let clean = errors.is_empty();
        for content in errors {
            self.report_error(ValidationError::new(
                ValidationErrorKind::Entity,
                ValidationStep::UpdatedValue,
                owner.clone(),
                content,
            ));
        }
        clean
    }

    // -----------------------------------------------------------------------
    // Transaction
    // -----------------------------------------------------------------------

    /// Start an edit transaction. Calls `begin_edit` once on every
    /// transactional item; a second call while editing does nothing.
    pub fn begin_edit(&self) {
        if self.inner.editing.get() {
            return;
        }
        let _span = tracing::debug_span!("edit_group_begin", group = %self.label()).entered();
        for item in self.items() {
            if !self.capabilities(&item).editable {
                continue;
            }
            if let Some(editable) = item.get().as_editable() {
                editable.begin_edit();
            }
        }
        self.inner.editing.set(true);
    }

    /// Abandon the transaction.
    ///
    /// Clears group, commit and pending-edit errors, rolls back every
    /// transactional item, makes every member re-read its source, makes the
    /// dependents of pending edits re-read theirs and drops the pending edits.
    /// One item failing to roll back does not stop the others.
    pub fn cancel_edit(&self) {
        if let Some(active) = self.inner.step.get() {
            tracing::warn!(group = %self.label(), active = %active, "cancel rejected during a run");
            return;
        }
        let _span = tracing::debug_span!("edit_group_cancel", group = %self.label()).entered();

        let events = {
            let proposed = self.inner.proposed.borrow();
            self.inner.errors.borrow_mut().remove_where(|e| {
                e.owner().is_group()
                    || e.kind() == ValidationErrorKind::Commit
                    || proposed.has_error(e.id())
            })
        };
        self.emit(events);
        self.inner.shadow_keys.borrow_mut().clear();

        for item in self.items() {
            if !self.capabilities(&item).editable {
                continue;
            }
            if let Some(editable) = item.get().as_editable() {
                if let Err(err) = editable.cancel_edit() {
                    tracing::warn!(group = %self.label(), item = ?item, error = %err, "rollback failed");
                }
            }
        }

        for binding in self.live_members() {
            self.clear_binding_errors(binding.id(), |_| true);
            binding.update_target();
        }

        let entries = self.inner.proposed.borrow_mut().take_all();
        for entry in &entries {
            for dependent in entry.live_dependents() {
                dependent.update_target();
            }
        }
        self.invalidate_items();
        self.prune_orphaned_errors();

        if self.inner.config.borrow().validates_on_entity_errors {
            self.refresh_entity_errors();
        }
        self.inner.editing.set(false);
        self.update_registry();
    }

    /// Run the whole pipeline and commit. Editing ends only on success.
    pub fn commit_edit(&self) -> bool {
        let ok = self.update_and_validate(ValidationStep::CommittedValue);
        if ok {
            self.inner.editing.set(false);
        }
        ok
    }

    /// Convert and validate without writing anything.
    pub fn validate_without_update(&self) -> bool {
        self.update_and_validate(ValidationStep::ConvertedProposedValue)
    }

    /// Convert, validate and write to sources, without committing items.
    pub fn update_sources(&self) -> bool {
        self.update_and_validate(ValidationStep::UpdatedValue)
    }

    fn update_and_validate(&self, target: ValidationStep) -> bool {
        if let Some(active) = self.inner.step.get() {
            tracing::warn!(
                group = %self.label(),
                active = %active,
                requested = %target,
                "edit group run rejected: a run is already in progress"
            );
            return false;
        }
        if matches!(self.owner_current_item(), CurrentItem::NewItemPlaceholder) {
            tracing::debug!(group = %self.label(), "new-item placeholder, nothing to validate");
            return true;
        }

        let _span =
            tracing::debug_span!("edit_group_run", group = %self.label(), target = %target)
                .entered();
        self.pump_entity_errors();
        self.clear_stale_shadow_errors();

        let ok = {
            let _guard = RunGuard {
                step: &self.inner.step,
            };
            if target.writes_sources() {
                self.attach_shadows();
            }
            let participants = self.participants();

            let mut ok = true;
            for step in target.through() {
                self.inner.step.set(Some(step));
                let acted = match step {
                    ValidationStep::RawProposedValue => {
                        self.inner.snapshot.borrow_mut().reset();
                        true
                    }
                    ValidationStep::ConvertedProposedValue => participants
                        .iter()
                        .fold(true, |ok, b| b.obtain_converted_proposed_value(self) && ok),
                    ValidationStep::UpdatedValue => participants
                        .iter()
                        .fold(true, |ok, b| b.update_source(self) && ok),
                    ValidationStep::CommittedValue => self.commit_items(),
                };
                let checked = self.check_rules(step, &participants);
                ok = acted && checked;
                tracing::debug!(step = %step, acted, checked, "edit group step finished");
                if !ok {
                    break;
                }
            }

            self.detach_shadows();
            if ok && target == ValidationStep::CommittedValue {
                self.promote_proposed_values();
            }
            ok
        };

        self.prune_orphaned_errors();
        self.update_registry();
        ok
    }

    fn attach_shadows(&self) {
        let held: Vec<_> = self
            .inner
            .proposed
            .borrow_mut()
            .iter_mut()
            .filter_map(ProposedValueEntry::take_error)
            .collect();
        self.clear_shadow_errors(|_| true);
        self.remove_errors(|e| held.contains(&e.id()));

        let shadows: Vec<Rc<ShadowBinding>> = self
            .inner
            .proposed
            .borrow()
            .iter()
            .filter_map(ShadowBinding::for_entry)
            .map(Rc::new)
            .collect();
        if shadows.is_empty() {
            return;
        }
        {
            let mut snapshot = self.inner.snapshot.borrow_mut();
            for shadow in &shadows {
                let binding: Rc<dyn LiveBinding> = Rc::clone(shadow) as Rc<dyn LiveBinding>;
                snapshot.insert(&binding);
                tracing::trace!(
                    shadow = shadow.id().id(),
                    origin = shadow.origin().id(),
                    "shadow binding attached"
                );
            }
        }
        *self.inner.shadows.borrow_mut() = shadows;
        self.invalidate_items();
    }

    fn detach_shadows(&self) {
        let shadows = std::mem::take(&mut *self.inner.shadows.borrow_mut());
        if shadows.is_empty() {
            return;
        }
        let ids: Vec<BindingId> = shadows.iter().map(|s| s.id()).collect();
        self.inner
            .shadow_keys
            .borrow_mut()
            .extend(shadows.iter().map(|s| ShadowKey {
                shadow: s.id(),
                item: s.item().downgrade(),
                property: s.property().to_owned(),
            }));
        {
            let mut snapshot = self.inner.snapshot.borrow_mut();
            for id in &ids {
                snapshot.remove(*id);
            }
        }
        let moved = self
            .inner
            .errors
            .borrow_mut()
            .reassign_where(&ErrorOwner::Group, |e| {
                e.owner().binding().is_some_and(|b| ids.contains(&b))
            });
        tracing::debug!(shadows = ids.len(), reattributed = moved, "shadow bindings detached");
        self.invalidate_items();
    }

    /// Drop the group errors of detached shadows whose key matches `stale`.
    fn clear_shadow_errors(&self, mut stale: impl FnMut(&ShadowKey) -> bool) {
        let gone: Vec<BindingId> = {
            let mut keys = self.inner.shadow_keys.borrow_mut();
            let (gone, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *keys).into_iter().partition(&mut stale);
            *keys = kept;
            gone.into_iter().map(|key| key.shadow).collect()
        };
        if gone.is_empty() {
            return;
        }
        self.remove_errors(|e| {
            e.owner().is_group() && e.origin().is_some_and(|origin| gone.contains(&origin))
        });
    }

    /// Shadow errors outlive their run only while the edit is still pending.
    fn clear_stale_shadow_errors(&self) {
        let proposed = &self.inner.proposed;
        self.clear_shadow_errors(|key| {
            key.item
                .upgrade()
                .is_none_or(|item| proposed.borrow().get(&item, &key.property).is_none())
        });
    }

    fn promote_proposed_values(&self) {
        let entries = self.inner.proposed.borrow_mut().take_all();
        if entries.is_empty() {
            return;
        }
        for entry in &entries {
            for dependent in entry.live_dependents() {
                dependent.update_target();
            }
        }
        tracing::debug!(count = entries.len(), "pending edits promoted");
        self.invalidate_items();
    }

    fn commit_items(&self) -> bool {
        self.remove_errors(|e| e.kind() == ValidationErrorKind::Commit);
        let mut ok = true;
        for item in self.items() {
            if !self.capabilities(&item).editable {
                continue;
            }
            let Some(editable) = item.get().as_editable() else {
                continue;
            };
            if let Err(err) = editable.end_edit() {
                tracing::warn!(group = %self.label(), item = ?item, error = %err, "commit failed");
                ok = false;
                self.report_error(ValidationError::new(
                    ValidationErrorKind::Commit,
                    ValidationStep::CommittedValue,
                    ErrorOwner::Item(item.downgrade()),
                    err.to_string(),
                ));
            }
        }
        ok
    }

    fn check_rules(&self, step: ValidationStep, participants: &[Rc<dyn LiveBinding>]) -> bool {
        self.remove_errors(|e| {
            e.owner().is_group() && e.origin().is_none() && e.step() == step && e.kind().from_rules()
        });

        let mut ok = participants
            .iter()
            .fold(true, |ok, b| b.check_validation_rules(self, step) && ok);

        let rules: Vec<Rc<dyn ValidationRule>> = self
            .inner
            .rules
            .borrow()
            .iter()
            .filter(|r| r.step() == step)
            .cloned()
            .collect();
        let culture = self.culture();
        for rule in rules {
            let ctx = RuleContext::new(None, self, step, &culture);
            let (kind, content) = match rule.validate(&ctx) {
                RuleOutcome::Valid => continue,
                RuleOutcome::Invalid(content) => (ValidationErrorKind::Rule, content),
                RuleOutcome::Unavailable => (
                    ValidationErrorKind::Unavailable,
                    format!("input for '{}' is unavailable", rule.name()),
                ),
            };
            ok = false;
            self.report_error(
                ValidationError::new(kind, step, ErrorOwner::Group, content).with_rule(rule.name()),
            );
        }

        if step == ValidationStep::UpdatedValue
            && self.inner.config.borrow().validates_on_entity_errors
        {
            ok &= self.refresh_entity_errors();
        }
        ok
    }

    fn update_registry(&self) {
        let registry = self.inner.registry.borrow().as_ref().and_then(Weak::upgrade);
        let Some(registry) = registry else {
            return;
        };
        let owner = self.inner.owner.borrow().as_ref().and_then(Weak::upgrade);
        let live_scope = owner.is_some_and(|o| o.is_live());
        let unfinished = self.is_dirty() || !self.inner.errors.borrow().is_empty();
        if live_scope && unfinished {
            registry.register(self);
        } else {
            registry.deregister(self);
        }
    }
}

impl std::fmt::Debug for EditGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditGroup")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.borrow().name)
            .field("editing", &self.inner.editing.get())
            .field("step", &self.inner.step.get())
            .field("members", &self.inner.members.borrow().len())
            .field("proposed", &self.inner.proposed.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Weak handle to an [`EditGroup`].
#[derive(Clone)]
pub struct WeakEditGroup(Weak<GroupInner>);

impl WeakEditGroup {
    /// Upgrade if the group is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<EditGroup> {
        self.0.upgrade().map(|inner| EditGroup { inner })
    }

    /// Whether the group was dropped.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }

    /// Whether this handle points at `group`.
    #[must_use]
    pub fn refers_to(&self, group: &EditGroup) -> bool {
        std::ptr::eq(self.0.as_ptr(), Rc::as_ptr(&group.inner))
    }
}

impl std::fmt::Debug for WeakEditGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakEditGroup")
            .field("alive", &!self.is_dead())
            .finish()
    }
}

fn push_distinct(items: &mut Vec<ItemRef>, item: ItemRef) {
    if !items.iter().any(|i| i.same(&item)) {
        items.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::FnRule;
    use tracing_test::traced_test;

    #[test]
    fn empty_group_commits() {
        let group = EditGroup::new();
        group.begin_edit();
        assert!(group.is_editing());
        assert!(group.commit_edit());
        assert!(!group.is_editing());
        assert!(group.current_step().is_none());
    }

    #[test]
    fn replicate_shares_rules_not_state() {
        let group = EditGroup::with_config(EditGroupConfig::new().with_name("row"));
        group.add_rule(FnRule::new("ok", ValidationStep::RawProposedValue, |_| {
            RuleOutcome::Valid
        }));
        group.begin_edit();

        let copy = group.replicate();
        assert_eq!(copy.name().as_deref(), Some("row"));
        assert_eq!(copy.rules().len(), 1);
        assert!(!copy.is_editing());
        assert!(!copy.ptr_eq(&group));
    }

    #[test]
    fn group_rule_failure_is_group_owned() {
        let group = EditGroup::new();
        group.add_rule(FnRule::new("no", ValidationStep::ConvertedProposedValue, |_| {
            RuleOutcome::invalid("rejected")
        }));
        assert!(!group.validate_without_update());
        let errors = group.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].owner().is_group());
        assert_eq!(errors[0].rule(), Some("no"));
    }

    #[test]
    fn unavailable_rule_input_is_recorded() {
        let group = EditGroup::new();
        group.add_rule(FnRule::new("needs", ValidationStep::RawProposedValue, |_| {
            RuleOutcome::Unavailable
        }));
        assert!(!group.commit_edit());
        assert_eq!(
            group.validation_errors()[0].kind(),
            ValidationErrorKind::Unavailable
        );
    }

    #[test]
    fn rule_errors_clear_when_rule_passes() {
        let flag = Rc::new(Cell::new(false));
        let seen = Rc::clone(&flag);
        let group = EditGroup::new();
        group.add_rule(FnRule::new("flag", ValidationStep::RawProposedValue, move |_| {
            if seen.get() {
                RuleOutcome::Valid
            } else {
                RuleOutcome::invalid("flag unset")
            }
        }));
        assert!(!group.validate_without_update());
        assert!(group.has_validation_error());
        flag.set(true);
        assert!(group.validate_without_update());
        assert!(!group.has_validation_error());
    }

    #[test]
    fn listeners_fire_only_when_enabled() {
        let count = Rc::new(Cell::new(0));
        let quiet = EditGroup::new();
        let c = Rc::clone(&count);
        let _sub = quiet.subscribe_errors(move |_| c.set(c.get() + 1));
        quiet.add_rule(FnRule::new("no", ValidationStep::RawProposedValue, |_| {
            RuleOutcome::invalid("x")
        }));
        quiet.validate_without_update();
        assert_eq!(count.get(), 0);

        let loud = EditGroup::with_config(EditGroupConfig::new().notify_on_validation_error(true));
        let c = Rc::clone(&count);
        let sub = loud.subscribe_errors(move |_| c.set(c.get() + 1));
        loud.add_rule(FnRule::new("no", ValidationStep::RawProposedValue, |_| {
            RuleOutcome::invalid("x")
        }));
        loud.validate_without_update();
        assert_eq!(count.get(), 1);

        drop(sub);
        loud.cancel_edit();
        assert_eq!(count.get(), 1, "dropped subscription must not fire");
    }

    #[test]
    fn get_value_outside_group_is_not_in_group() {
        struct Bare;
        impl crate::item::DataItem for Bare {
            fn property(&self, _name: &str) -> Option<Value> {
                None
            }
            fn set_property(&self, _name: &str, _value: Value) -> Result<(), crate::ItemError> {
                Ok(())
            }
        }
        let group = EditGroup::new();
        let item = ItemRef::new(Bare);
        assert_eq!(
            group.get_value(&item, "Age"),
            Err(ValueError::NotInGroup {
                property: "Age".into()
            })
        );
        assert!(group.try_get_value(&item, "Age").is_none());
    }

    #[test]
    fn item_capabilities_are_looked_up_once() {
        struct Plain {
            lookups: Cell<u32>,
        }
        impl crate::item::DataItem for Plain {
            fn property(&self, _name: &str) -> Option<Value> {
                Some(Value::Int(1))
            }
            fn set_property(&self, _name: &str, _value: Value) -> Result<(), crate::ItemError> {
                Ok(())
            }
            fn as_editable(&self) -> Option<&dyn crate::EditableItem> {
                self.lookups.set(self.lookups.get() + 1);
                None
            }
        }
        let plain = Rc::new(Plain {
            lookups: Cell::new(0),
        });
        let binding: Rc<dyn LiveBinding> = Rc::new(crate::field::FieldBinding::new(
            ItemRef::from_rc(Rc::clone(&plain)),
            "A",
        ));
        let group = EditGroup::new();
        group.join(Rc::clone(&binding));

        group.begin_edit();
        group.commit_edit();
        group.begin_edit();
        group.cancel_edit();
        assert!(!group.can_restore_values());
        assert_eq!(plain.lookups.get(), 1);
    }

    #[test]
    #[traced_test]
    fn nested_run_is_rejected_and_logged() {
        let group = EditGroup::new();
        let nested = Rc::new(Cell::new(None));
        let seen = Rc::clone(&nested);
        group.add_rule(FnRule::new(
            "nested",
            ValidationStep::ConvertedProposedValue,
            move |ctx| {
                seen.set(Some(ctx.group().commit_edit()));
                RuleOutcome::Valid
            },
        ));
        assert!(group.validate_without_update());
        assert_eq!(nested.get(), Some(false));
        assert!(group.current_step().is_none());
        assert!(logs_contain("a run is already in progress"));
    }
}
