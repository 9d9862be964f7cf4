#![forbid(unsafe_code)]

//! Single-slot mailbox for possibly-late subscribers.
//!
//! An asynchronous producer may need to hand a value to a consumer that has
//! not registered yet, or whose previous registration was torn down and will
//! re-register shortly (a view unmounting and remounting mid-commit). The
//! mailbox delivers to the live subscriber when one is present and otherwise
//! holds the *latest* value, flushing it to the next subscriber that
//! registers. Dropping to a no-op would lose information; delivering to a
//! stale subscriber would write into a dead instance — this does neither.
//!
//! # Invariants
//!
//! 1. At most one value is held; a newer `set` replaces it (latest wins).
//! 2. `subscribe` immediately receives the held value, if any.
//! 3. After `unsubscribe`, values are held again rather than delivered.

/// Deliver-or-hold slot for a single subscriber.
pub struct Mailbox<T> {
    subscriber: Option<Box<dyn FnMut(T)>>,
    held: Option<T>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            subscriber: None,
            held: None,
        }
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("subscribed", &self.subscriber.is_some())
            .field("holding", &self.held.is_some())
            .finish()
    }
}

impl<T> Mailbox<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a value to the subscriber, or hold it (replacing any held
    /// value) until one registers.
    pub fn set(&mut self, value: T) {
        match &mut self.subscriber {
            Some(f) => f(value),
            None => self.held = Some(value),
        }
    }

    /// Register the subscriber. A held value is flushed to it immediately.
    pub fn subscribe(&mut self, mut f: impl FnMut(T) + 'static) {
        if let Some(held) = self.held.take() {
            f(held);
        }
        self.subscriber = Some(Box::new(f));
    }

    /// Remove the subscriber; subsequent values are held.
    pub fn unsubscribe(&mut self) {
        self.subscriber = None;
    }

    /// Whether a subscriber is currently registered.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscriber.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<i32>>>, impl FnMut(i32) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |v| sink.borrow_mut().push(v))
    }

    #[test]
    fn live_subscriber_receives_directly() {
        let mut mb = Mailbox::new();
        let (seen, f) = recorder();
        mb.subscribe(f);
        mb.set(1);
        mb.set(2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn held_value_flushes_on_subscribe() {
        let mut mb = Mailbox::new();
        mb.set(1);
        mb.set(2); // Latest wins while held.
        let (seen, f) = recorder();
        mb.subscribe(f);
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn unsubscribe_returns_to_holding() {
        let mut mb = Mailbox::new();
        let (seen, f) = recorder();
        mb.subscribe(f);
        mb.set(1);
        mb.unsubscribe();
        mb.set(2);
        mb.set(3);
        assert_eq!(*seen.borrow(), vec![1]);

        let (seen2, f2) = recorder();
        mb.subscribe(f2);
        assert_eq!(*seen2.borrow(), vec![3]);
    }

    #[test]
    fn resubscribe_replaces_subscriber() {
        let mut mb = Mailbox::new();
        let (seen1, f1) = recorder();
        mb.subscribe(f1);
        let (seen2, f2) = recorder();
        mb.subscribe(f2);
        mb.set(9);
        assert!(seen1.borrow().is_empty());
        assert_eq!(*seen2.borrow(), vec![9]);
    }

    #[test]
    fn empty_subscribe_receives_nothing() {
        let mut mb: Mailbox<i32> = Mailbox::new();
        let (seen, f) = recorder();
        mb.subscribe(f);
        assert!(seen.borrow().is_empty());
        assert!(mb.is_subscribed());
    }
}
