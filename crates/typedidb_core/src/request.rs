//! Awaitable results and chainable request handles.
//!
//! The engine commits a transaction as soon as control returns to its event
//! loop with nothing outstanding. Awaiting a request and only then issuing
//! the next one would let the transaction commit in between, so the next
//! request has to be issued from inside the completion of the previous one.
//!
//! [`RequestHandle`] is that discipline as an API. [`RequestHandle::cont`],
//! [`RequestHandle::cont2`] and [`RequestHandle::and_then`] all run their
//! closure synchronously inside the completion listener of the request they
//! follow, so whatever request the closure issues lands while the
//! transaction is still active. [`AsyncResult`] is the `Future` side: it
//! carries a final outcome out to `async` code once nothing more needs to
//! be chained.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_channel::oneshot;
use typedidb_storage::{Request, StorageResult};

use crate::error::{CoreError, CoreResult};

/// A one-shot future of a [`CoreResult`].
///
/// Either already resolved, or waiting on a value that an engine callback
/// will deliver. If the engine drops the callback without delivering, the
/// future resolves to [`CoreError::Abandoned`].
#[must_use = "an AsyncResult does nothing unless awaited or polled"]
pub struct AsyncResult<T> {
    state: AsyncState<T>,
}

enum AsyncState<T> {
    Ready(Option<CoreResult<T>>),
    Waiting(oneshot::Receiver<CoreResult<T>>),
}

impl<T> AsyncResult<T> {
    /// An already resolved result.
    pub fn ready(result: CoreResult<T>) -> Self {
        Self {
            state: AsyncState::Ready(Some(result)),
        }
    }

    /// A pending result and the handle that resolves it.
    pub(crate) fn channel() -> (Completer<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        let completer = Completer {
            sender: Rc::new(RefCell::new(Some(sender))),
        };
        (
            completer,
            Self {
                state: AsyncState::Waiting(receiver),
            },
        )
    }

    /// Takes the outcome if it is already available, without waiting.
    ///
    /// Returns `None` while pending, and after the outcome has been taken.
    pub fn try_take(&mut self) -> Option<CoreResult<T>> {
        match &mut self.state {
            AsyncState::Ready(result) => result.take(),
            AsyncState::Waiting(receiver) => match receiver.try_recv() {
                Ok(Some(result)) => {
                    self.state = AsyncState::Ready(None);
                    Some(result)
                }
                Ok(None) => None,
                Err(oneshot::Canceled) => {
                    self.state = AsyncState::Ready(None);
                    Some(Err(CoreError::Abandoned))
                }
            },
        }
    }
}

impl<T> Unpin for AsyncResult<T> {}

impl<T> Future for AsyncResult<T> {
    type Output = CoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            AsyncState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(CoreError::Abandoned)))
            }
            AsyncState::Waiting(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(received) => {
                    this.state = AsyncState::Ready(None);
                    Poll::Ready(received.unwrap_or(Err(CoreError::Abandoned)))
                }
            },
        }
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            AsyncState::Ready(Some(_)) => "ready",
            AsyncState::Ready(None) => "taken",
            AsyncState::Waiting(_) => "waiting",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

/// Resolves an [`AsyncResult`]. Clones share the same target; only the
/// first completion counts.
pub(crate) struct Completer<T> {
    sender: Rc<RefCell<Option<oneshot::Sender<CoreResult<T>>>>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Rc::clone(&self.sender),
        }
    }
}

impl<T> Completer<T> {
    /// Returns `false` if the result was already completed.
    pub fn complete(&self, result: CoreResult<T>) -> bool {
        let Some(sender) = self.sender.borrow_mut().take() else {
            return false;
        };
        // The receiver may already be gone; nobody is waiting then.
        let _ = sender.send(result);
        true
    }

    pub fn is_completed(&self) -> bool {
        self.sender.borrow().is_none()
    }
}

type Listener<T> = Box<dyn FnOnce(CoreResult<T>)>;

enum Slot<T> {
    Pending(Vec<Listener<T>>),
    Done(CoreResult<T>),
}

/// Settles a [`RequestHandle`].
pub(crate) struct Settler<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T: Clone> Settler<T> {
    pub fn settle(self, result: CoreResult<T>) {
        let listeners = {
            let mut slot = self.slot.borrow_mut();
            match std::mem::replace(&mut *slot, Slot::Done(result.clone())) {
                Slot::Pending(listeners) => listeners,
                done @ Slot::Done(_) => {
                    *slot = done;
                    return;
                }
            }
        };
        for listener in listeners {
            listener(result.clone());
        }
    }
}

/// A typed, chainable data request.
///
/// A handle stands for one outcome that the engine will deliver on its
/// event loop. Chaining consumes the handle; [`result`](Self::result) and
/// [`try_result`](Self::try_result) may be called any number of times.
#[must_use = "a request handle should be chained or awaited"]
pub struct RequestHandle<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> fmt::Debug for RequestHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.borrow() {
            Slot::Pending(_) => "pending",
            Slot::Done(Ok(_)) => "succeeded",
            Slot::Done(Err(_)) => "failed",
        };
        f.debug_struct("RequestHandle").field("state", &state).finish()
    }
}

impl<T: Clone + 'static> RequestHandle<T> {
    pub(crate) fn pending() -> (Settler<T>, Self) {
        let slot = Rc::new(RefCell::new(Slot::Pending(Vec::new())));
        (
            Settler {
                slot: Rc::clone(&slot),
            },
            Self { slot },
        )
    }

    /// A handle that has already completed with `result`.
    pub fn ready(result: CoreResult<T>) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Slot::Done(result))),
        }
    }

    /// Wraps an engine request, converting its outcome with `convert`.
    pub(crate) fn from_request<S, F>(request: &Request<S>, convert: F) -> Self
    where
        S: Clone + 'static,
        F: FnOnce(StorageResult<S>) -> CoreResult<T> + 'static,
    {
        if let Some(outcome) = request.outcome() {
            return Self::ready(convert(outcome));
        }
        let (settler, handle) = Self::pending();
        request.on_complete(move |outcome| settler.settle(convert(outcome)));
        handle
    }

    /// Runs `listener` with the outcome: right away if it is known,
    /// otherwise from the completion.
    fn subscribe(&self, listener: impl FnOnce(CoreResult<T>) + 'static) {
        let done = {
            let mut slot = self.slot.borrow_mut();
            match &mut *slot {
                Slot::Pending(listeners) => {
                    listeners.push(Box::new(listener));
                    return;
                }
                Slot::Done(result) => result.clone(),
            }
        };
        listener(done);
    }

    /// Whether the outcome is still unknown.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(&*self.slot.borrow(), Slot::Pending(_))
    }

    /// The outcome, if known.
    #[must_use]
    pub fn try_result(&self) -> Option<CoreResult<T>> {
        match &*self.slot.borrow() {
            Slot::Pending(_) => None,
            Slot::Done(result) => Some(result.clone()),
        }
    }

    /// The outcome as a future.
    pub fn result(&self) -> AsyncResult<T> {
        if let Some(result) = self.try_result() {
            return AsyncResult::ready(result);
        }
        let (completer, result) = AsyncResult::channel();
        self.subscribe(move |outcome| {
            completer.complete(outcome);
        });
        result
    }

    /// Issues the next request once this one succeeds.
    ///
    /// `make_next` runs inside this request's completion, so the request it
    /// issues joins the same transaction. The future resolves to the new
    /// handle, or to the first error. If this handle has already completed,
    /// `make_next` runs immediately.
    pub fn cont<U, F>(self, make_next: F) -> AsyncResult<RequestHandle<U>>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> CoreResult<RequestHandle<U>> + 'static,
    {
        let (completer, result) = AsyncResult::channel();
        self.subscribe(move |outcome| {
            completer.complete(outcome.and_then(make_next));
        });
        result
    }

    /// Like [`cont`](Self::cont), but also hands back this request's value.
    pub fn cont2<U, F>(self, make_next: F) -> AsyncResult<(T, RequestHandle<U>)>
    where
        U: Clone + 'static,
        F: FnOnce(&T) -> CoreResult<RequestHandle<U>> + 'static,
    {
        let (completer, result) = AsyncResult::channel();
        self.subscribe(move |outcome| {
            completer.complete(outcome.and_then(|value| {
                let next = make_next(&value)?;
                Ok((value, next))
            }));
        });
        result
    }

    /// Chains `make_next` and returns a handle for the request it issues.
    ///
    /// Unlike [`cont`](Self::cont) the result is itself a handle, so longer
    /// chains can be built up front and awaited once at the end.
    pub fn and_then<U, F>(self, make_next: F) -> RequestHandle<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> CoreResult<RequestHandle<U>> + 'static,
    {
        let (settler, chained) = RequestHandle::pending();
        self.subscribe(move |outcome| match outcome.and_then(make_next) {
            Ok(next) => next.subscribe(move |result| settler.settle(result)),
            Err(err) => settler.settle(Err(err)),
        });
        chained
    }

    /// Transforms the success value.
    pub fn map<U, F>(self, f: F) -> RequestHandle<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Transforms the success value with a fallible function.
    pub fn try_map<U, F>(self, f: F) -> RequestHandle<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> CoreResult<U> + 'static,
    {
        let (settler, mapped) = RequestHandle::pending();
        self.subscribe(move |outcome| settler.settle(outcome.and_then(f)));
        mapped
    }
}
