//! Event-driven requests.
//!
//! A [`Request`] is the engine's only way of reporting an outcome: it starts
//! pending, settles exactly once, and calls its completion listeners
//! synchronously at that moment. Listeners registered after settlement are
//! never called; callers that may arrive late read [`Request::outcome`]
//! first.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::StorageResult;

type Listener<T> = Box<dyn FnOnce(StorageResult<T>)>;

enum Slot<T> {
    Pending(Vec<Listener<T>>),
    Done(StorageResult<T>),
}

/// A pending or settled engine request.
///
/// Clones share the same slot.
pub struct Request<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.borrow() {
            Slot::Pending(_) => "pending",
            Slot::Done(Ok(_)) => "succeeded",
            Slot::Done(Err(_)) => "failed",
        };
        f.debug_struct("Request").field("state", &state).finish()
    }
}

impl<T: Clone + 'static> Request<T> {
    /// Create a pending request.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            slot: Rc::new(RefCell::new(Slot::Pending(Vec::new()))),
        }
    }

    /// Whether the request has not settled yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(&*self.slot.borrow(), Slot::Pending(_))
    }

    /// The outcome, once settled.
    #[must_use]
    pub fn outcome(&self) -> Option<StorageResult<T>> {
        match &*self.slot.borrow() {
            Slot::Pending(_) => None,
            Slot::Done(outcome) => Some(outcome.clone()),
        }
    }

    /// Register a completion listener.
    ///
    /// Has no effect once the request has settled.
    pub fn on_complete(&self, listener: impl FnOnce(StorageResult<T>) + 'static) {
        if let Slot::Pending(listeners) = &mut *self.slot.borrow_mut() {
            listeners.push(Box::new(listener));
        }
    }

    /// Settle the request and run its listeners in registration order.
    ///
    /// Returns `false` if the request had already settled, in which case
    /// nothing happens.
    pub fn settle(&self, outcome: StorageResult<T>) -> bool {
        let listeners = {
            let mut slot = self.slot.borrow_mut();
            match std::mem::replace(&mut *slot, Slot::Done(outcome.clone())) {
                Slot::Pending(listeners) => listeners,
                done @ Slot::Done(_) => {
                    *slot = done;
                    return false;
                }
            }
        };
        for listener in listeners {
            listener(outcome.clone());
        }
        true
    }

    /// A request that settles with `f` applied to this one's success value.
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> Request<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        let mapped = Request::pending();
        match self.outcome() {
            Some(outcome) => {
                mapped.settle(outcome.map(f));
            }
            None => {
                let target = mapped.clone();
                self.on_complete(move |outcome| {
                    target.settle(outcome.map(f));
                });
            }
        }
        mapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use std::cell::Cell;

    #[test]
    fn listeners_run_once_in_order() {
        let request: Request<u32> = Request::pending();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Rc::clone(&seen);
            request.on_complete(move |outcome| seen.borrow_mut().push((tag, outcome)));
        }
        assert!(request.is_pending());
        assert!(request.settle(Ok(7)));
        assert!(!request.settle(Ok(8)));

        assert_eq!(*seen.borrow(), vec![("a", Ok(7)), ("b", Ok(7))]);
        assert_eq!(request.outcome(), Some(Ok(7)));
    }

    #[test]
    fn late_listener_is_not_called() {
        let request: Request<()> = Request::pending();
        request.settle(Err(StorageError::Aborted));

        let called = Rc::new(Cell::new(false));
        let flag = Rc::clone(&called);
        request.on_complete(move |_| flag.set(true));

        assert!(!called.get());
        assert_eq!(request.outcome(), Some(Err(StorageError::Aborted)));
    }

    #[test]
    fn listener_may_inspect_request() {
        let request: Request<u8> = Request::pending();
        let observer = request.clone();
        let seen = Rc::new(Cell::new(None));
        let out = Rc::clone(&seen);
        request.on_complete(move |_| out.set(observer.outcome()));

        request.settle(Ok(1));
        assert_eq!(seen.take(), Some(Ok(1)));
    }

    #[test]
    fn map_follows_source() {
        let request: Request<u8> = Request::pending();
        let doubled = request.map(|n| u16::from(n) * 2);
        assert!(doubled.is_pending());

        request.settle(Ok(21));
        assert_eq!(doubled.outcome(), Some(Ok(42)));

        let failed: Request<u8> = Request::pending();
        failed.settle(Err(StorageError::ReadOnly));
        assert_eq!(failed.map(|n| n + 1).outcome(), Some(Err(StorageError::ReadOnly)));
    }
}
