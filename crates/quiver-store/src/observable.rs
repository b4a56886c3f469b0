// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! A minimal lazy observable for the network boundary.
//!
//! Contract (mirrors the mutation executor's needs, nothing more):
//!
//! - **Lazy** — the producer runs only when a consumer subscribes.
//! - **At most one terminal** — after `error` or `complete`, every
//!   further event is ignored.
//! - **Cancelable** — `unsubscribe` closes the sink (subsequent events
//!   are dropped) and runs the producer's teardown exactly once.
//!
//! Everything is single-threaded; producers that complete asynchronously
//! hold a [`Sink`] clone and push events on the caller's context, per
//! the cooperative scheduling model.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Consumer callbacks for one subscription.
pub struct Observer<T, E> {
    next: Option<Box<dyn FnMut(T)>>,
    error: Option<Box<dyn FnOnce(E)>>,
    complete: Option<Box<dyn FnOnce()>>,
}

impl<T, E> Default for Observer<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Observer<T, E> {
    /// Creates an observer with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    /// Sets the per-value callback.
    #[must_use]
    pub fn on_next(mut self, f: impl FnMut(T) + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    /// Sets the terminal error callback.
    #[must_use]
    pub fn on_error(mut self, f: impl FnOnce(E) + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Sets the terminal completion callback.
    #[must_use]
    pub fn on_complete(mut self, f: impl FnOnce() + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

struct SinkState<T, E> {
    observer: Option<Observer<T, E>>,
    terminated: bool,
}

/// The producer-facing side of a subscription. Cloneable so producers
/// that finish later can hold on to it.
pub struct Sink<T, E> {
    state: Rc<RefCell<SinkState<T, E>>>,
    closed: Rc<Cell<bool>>,
}

impl<T, E> Clone for Sink<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            closed: Rc::clone(&self.closed),
        }
    }
}

impl<T, E> Sink<T, E> {
    /// True once the subscription terminated or was unsubscribed;
    /// further events would be dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get() || self.state.borrow().terminated
    }

    /// Emits a value.
    pub fn next(&self, value: T) {
        if self.is_closed() {
            return;
        }
        // The observer is taken out for the duration of the call so a
        // reentrant emission cannot alias the callback.
        let observer = self.state.borrow_mut().observer.take();
        if let Some(mut observer) = observer {
            if let Some(f) = observer.next.as_mut() {
                f(value);
            }
            self.state.borrow_mut().observer = Some(observer);
        }
    }

    /// Emits the error terminal.
    pub fn error(&self, err: E) {
        if self.is_closed() {
            return;
        }
        let observer = {
            let mut state = self.state.borrow_mut();
            state.terminated = true;
            state.observer.take()
        };
        if let Some(observer) = observer {
            if let Some(f) = observer.error {
                f(err);
            }
        }
    }

    /// Emits the completion terminal.
    pub fn complete(&self) {
        if self.is_closed() {
            return;
        }
        let observer = {
            let mut state = self.state.borrow_mut();
            state.terminated = true;
            state.observer.take()
        };
        if let Some(observer) = observer {
            if let Some(f) = observer.complete {
                f();
            }
        }
    }
}

type SourceFn<T, E> = Box<dyn FnOnce(Sink<T, E>) -> Option<Box<dyn FnOnce()>>>;

/// A lazy, pull-initiated stream of values.
pub struct Observable<T, E> {
    source: SourceFn<T, E>,
}

impl<T, E> Observable<T, E> {
    /// Wraps a producer. The producer runs when [`Observable::subscribe`]
    /// is called, receives the subscription's [`Sink`], and may return a
    /// teardown closure that runs on unsubscribe.
    pub fn new(
        source: impl FnOnce(Sink<T, E>) -> Option<Box<dyn FnOnce()>> + 'static,
    ) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// An observable that immediately emits `value` and completes.
    pub fn of(value: T) -> Self
    where
        T: 'static,
    {
        Self::new(move |sink| {
            sink.next(value);
            sink.complete();
            None
        })
    }

    /// An observable that immediately errors.
    pub fn throw(err: E) -> Self
    where
        E: 'static,
    {
        Self::new(move |sink| {
            sink.error(err);
            None
        })
    }

    /// Starts the producer and routes its events to `observer`.
    pub fn subscribe(self, observer: Observer<T, E>) -> ObservableSubscription {
        let state = Rc::new(RefCell::new(SinkState {
            observer: Some(observer),
            terminated: false,
        }));
        let closed = Rc::new(Cell::new(false));
        let sink = Sink {
            state,
            closed: Rc::clone(&closed),
        };
        let teardown = (self.source)(sink);
        ObservableSubscription { closed, teardown }
    }
}

/// Handle for an active subscription.
pub struct ObservableSubscription {
    closed: Rc<Cell<bool>>,
    teardown: Option<Box<dyn FnOnce()>>,
}

impl ObservableSubscription {
    /// Cancels the subscription: further events are dropped and the
    /// producer's teardown runs. Idempotent.
    pub fn unsubscribe(&mut self) {
        if !self.closed.replace(true) {
            if let Some(teardown) = self.teardown.take() {
                teardown();
            }
        }
    }
}
