#![forbid(unsafe_code)]

//! Entity-level error sources and cross-thread change notifications.
//!
//! An item that validates itself asynchronously (for example against a
//! remote service) implements [`EntityErrorSource`]. When an edit group
//! first sees such an item it hands the item an [`ErrorsChangedNotifier`].
//! The notifier is `Send + Clone`, so the item may report changes from any
//! worker thread.
//!
//! # Thread model
//!
//! Notifications travel over an `std::sync::mpsc` channel owned by the group.
//! Nothing touches the group's error state from the worker thread: the group
//! drains the channel on its owning thread, re-queries the item there, and
//! only then folds the result into its error list.

use std::cell::Cell;
use std::sync::mpsc;

/// An item that reports field- or entity-level validation errors on its own
/// schedule.
pub trait EntityErrorSource {
    /// Current errors for `property`, or for the entity as a whole when `None`.
    fn errors(&self, property: Option<&str>) -> Vec<String>;

    /// Register the notifier to call whenever the errors change.
    fn connect(&self, notifier: ErrorsChangedNotifier);
}

/// Identifies which connected item a notification came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceToken(u64);

/// A single "errors changed" notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorsChanged {
    /// The connected item.
    pub source: SourceToken,
    /// The property whose errors changed, `None` for entity-level errors.
    pub property: Option<String>,
}

/// Sending half handed to an [`EntityErrorSource`].
#[derive(Clone, Debug)]
pub struct ErrorsChangedNotifier {
    source: SourceToken,
    tx: mpsc::Sender<ErrorsChanged>,
}

impl ErrorsChangedNotifier {
    /// Report that the errors for `property` changed.
    ///
    /// Returns `false` once the owning group has been dropped.
    pub fn notify(&self, property: Option<&str>) -> bool {
        self.tx
            .send(ErrorsChanged {
                source: self.source,
                property: property.map(str::to_owned),
            })
            .is_ok()
    }

    /// Token of the item this notifier was issued to.
    #[must_use]
    pub const fn source(&self) -> SourceToken {
        self.source
    }
}

/// Receiving half, owned by an edit group.
#[derive(Debug)]
pub(crate) struct EntityErrorInbox {
    tx: mpsc::Sender<ErrorsChanged>,
    rx: mpsc::Receiver<ErrorsChanged>,
    next_token: Cell<u64>,
}

impl EntityErrorInbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            next_token: Cell::new(1),
        }
    }

    /// Issue a notifier with a fresh source token.
    pub(crate) fn notifier(&self) -> ErrorsChangedNotifier {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        ErrorsChangedNotifier {
            source: SourceToken(token),
            tx: self.tx.clone(),
        }
    }

    /// Drain every pending notification without blocking.
    pub(crate) fn drain(&self) -> Vec<ErrorsChanged> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn notifiers_get_distinct_tokens() {
        let inbox = EntityErrorInbox::new();
        let a = inbox.notifier();
        let b = inbox.notifier();
        assert_ne!(a.source(), b.source());
    }

    #[test]
    fn notifications_cross_threads() {
        let inbox = EntityErrorInbox::new();
        let notifier = inbox.notifier();
        let token = notifier.source();
        let worker = thread::spawn(move || notifier.notify(None));
        assert!(worker.join().unwrap());

        let drained = inbox.drain();
        assert_eq!(
            drained,
            vec![ErrorsChanged {
                source: token,
                property: None
            }]
        );
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn notify_after_inbox_dropped_reports_false() {
        let inbox = EntityErrorInbox::new();
        let notifier = inbox.notifier();
        drop(inbox);
        assert!(!notifier.notify(Some("Age")));
    }
}
