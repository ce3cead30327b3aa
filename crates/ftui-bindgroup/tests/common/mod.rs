#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use ftui_bindgroup::{
    CurrentItem, DataItem, EditableItem, EntityErrorSource, ErrorsChangedNotifier, ItemError,
    ItemRef, ScopeOwner, Value,
};

/// A record with rollback support, per-call counters and switchable failures.
#[derive(Default)]
pub struct Person {
    fields: RefCell<HashMap<String, Value>>,
    backup: RefCell<Option<HashMap<String, Value>>>,
    transactional: bool,
    pub begins: Cell<u32>,
    pub cancels: Cell<u32>,
    pub commits: Cell<u32>,
    pub writes: Cell<u32>,
    refused: RefCell<Vec<String>>,
    commit_failure: RefCell<Option<String>>,
    cancel_failure: RefCell<Option<String>>,
    entity_errors: Arc<Mutex<Vec<String>>>,
    notifier: RefCell<Option<ErrorsChangedNotifier>>,
}

impl Person {
    pub fn new(fields: &[(&str, Value)]) -> Rc<Self> {
        let person = Self {
            transactional: true,
            ..Self::default()
        };
        person.fill(fields);
        Rc::new(person)
    }

    /// A person without begin/cancel/end support.
    pub fn plain(fields: &[(&str, Value)]) -> Rc<Self> {
        let person = Self::default();
        person.fill(fields);
        Rc::new(person)
    }

    fn fill(&self, fields: &[(&str, Value)]) {
        let mut map = self.fields.borrow_mut();
        for (name, value) in fields {
            map.insert((*name).to_owned(), value.clone());
        }
    }

    pub fn item(self: &Rc<Self>) -> ItemRef {
        ItemRef::from_rc(Rc::clone(self))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    /// Make writes to `name` fail.
    pub fn refuse(&self, name: &str) {
        self.refused.borrow_mut().push(name.to_owned());
    }

    /// Make `end_edit` fail with `message`.
    pub fn fail_commit(&self, message: &str) {
        *self.commit_failure.borrow_mut() = Some(message.to_owned());
    }

    /// Make `cancel_edit` fail with `message`, leaving the fields as edited.
    pub fn fail_cancel(&self, message: &str) {
        *self.cancel_failure.borrow_mut() = Some(message.to_owned());
    }

    /// Shared error list and notifier, for reporting from another thread.
    pub fn error_channel(&self) -> (Arc<Mutex<Vec<String>>>, Option<ErrorsChangedNotifier>) {
        (
            Arc::clone(&self.entity_errors),
            self.notifier.borrow().clone(),
        )
    }
}

impl DataItem for Person {
    fn property(&self, name: &str) -> Option<Value> {
        self.get(name)
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), ItemError> {
        if self.refused.borrow().iter().any(|r| r == name) {
            return Err(ItemError::new(format!("{name} is read-only")));
        }
        self.writes.set(self.writes.get() + 1);
        self.fields.borrow_mut().insert(name.to_owned(), value);
        Ok(())
    }

    fn as_editable(&self) -> Option<&dyn EditableItem> {
        if self.transactional { Some(self) } else { None }
    }

    fn as_error_source(&self) -> Option<&dyn EntityErrorSource> {
        Some(self)
    }
}

impl EditableItem for Person {
    fn begin_edit(&self) {
        self.begins.set(self.begins.get() + 1);
        let mut backup = self.backup.borrow_mut();
        if backup.is_none() {
            *backup = Some(self.fields.borrow().clone());
        }
    }

    fn cancel_edit(&self) -> Result<(), ItemError> {
        self.cancels.set(self.cancels.get() + 1);
        if let Some(message) = self.cancel_failure.borrow().clone() {
            return Err(ItemError::new(message));
        }
        if let Some(saved) = self.backup.borrow_mut().take() {
            *self.fields.borrow_mut() = saved;
        }
        Ok(())
    }

    fn end_edit(&self) -> Result<(), ItemError> {
        self.commits.set(self.commits.get() + 1);
        if let Some(message) = self.commit_failure.borrow().clone() {
            return Err(ItemError::new(message));
        }
        self.backup.borrow_mut().take();
        Ok(())
    }
}

impl EntityErrorSource for Person {
    fn errors(&self, property: Option<&str>) -> Vec<String> {
        if property.is_some() {
            return Vec::new();
        }
        self.entity_errors
            .lock()
            .map(|errors| errors.clone())
            .unwrap_or_default()
    }

    fn connect(&self, notifier: ErrorsChangedNotifier) {
        *self.notifier.borrow_mut() = Some(notifier);
    }
}

/// A form hosting one group.
pub struct Form {
    current: RefCell<CurrentItem>,
    live: Cell<bool>,
}

impl Form {
    pub fn new(current: CurrentItem) -> Rc<Self> {
        Rc::new(Self {
            current: RefCell::new(current),
            live: Cell::new(true),
        })
    }

    pub fn close(&self) {
        self.live.set(false);
    }
}

impl ScopeOwner for Form {
    fn current_item(&self) -> CurrentItem {
        self.current.borrow().clone()
    }

    fn is_live(&self) -> bool {
        self.live.get()
    }
}

/// Parse text into an integer, passing integers through.
pub fn parse_int(value: &Value) -> Result<Value, String> {
    match value {
        Value::Int(v) => Ok(Value::Int(*v)),
        Value::Text(text) => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("'{text}' is not a number")),
        other => Err(format!("'{other}' is not a number")),
    }
}

/// Show any value as text.
pub fn as_text(value: &Value) -> Value {
    Value::Text(value.to_string())
}
