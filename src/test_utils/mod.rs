//! Shared fixtures for the module test suites.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// RAII leak detector: increments a shared count while alive.
///
/// Tests move one into a task body (or clone it across bodies) and assert the
/// count is back to zero once the tree has completed or unwound — cancelled
/// frames must still run their destructors.
pub(crate) struct Counter {
    count: Rc<Cell<i32>>,
}

impl Counter {
    pub(crate) fn new(count: &Rc<Cell<i32>>) -> Self {
        count.set(count.get() + 1);
        Self {
            count: Rc::clone(count),
        }
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self::new(&self.count)
    }
}

impl Drop for Counter {
    fn drop(&mut self) {
        self.count.set(self.count.get() - 1);
    }
}

/// Before/after flags shared between a task body and the test.
#[derive(Clone, Default)]
pub(crate) struct Marks {
    pub(crate) before: Rc<Cell<bool>>,
    pub(crate) after: Rc<Cell<bool>>,
}

/// A manually released suspension point.
///
/// `gate.wait().await` parks the awaiting task and hands its resumption
/// token to the test; `release` fires it. The stand-in for external events
/// (I/O readiness, timers) in every scenario that needs a task parked at a
/// known place.
#[derive(Clone)]
pub(crate) struct Gate {
    inner: Rc<GateInner>,
}

struct GateInner {
    waker: RefCell<Option<Waker>>,
    released: Cell<bool>,
    armed_once: Cell<bool>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(GateInner {
                waker: RefCell::new(None),
                released: Cell::new(false),
                armed_once: Cell::new(false),
            }),
        }
    }

    pub(crate) fn wait(&self) -> GateWait {
        GateWait {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Like [`wait`](Gate::wait), but the resume yields `Err(Cancelled)` —
    /// models an awaiter that reports cancellation of its own accord.
    pub(crate) fn wait_then_cancel(&self) -> GateCancelWait {
        GateCancelWait {
            inner: Rc::clone(&self.inner),
        }
    }

    pub(crate) fn release(&self) {
        self.inner.released.set(true);
        let waker = self.inner.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// A waiter is currently parked here.
    pub(crate) fn is_armed(&self) -> bool {
        self.inner.waker.borrow().is_some()
    }

    /// A waiter parked here at some point.
    pub(crate) fn was_armed(&self) -> bool {
        self.inner.armed_once.get()
    }
}

pub(crate) struct GateWait {
    inner: Rc<GateInner>,
}

impl Future for GateWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.inner.released.get() {
            return Poll::Ready(());
        }
        *self.inner.waker.borrow_mut() = Some(cx.waker().clone());
        self.inner.armed_once.set(true);
        Poll::Pending
    }
}

pub(crate) struct GateCancelWait {
    inner: Rc<GateInner>,
}

impl Future for GateCancelWait {
    type Output = crate::Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.inner.released.get() {
            return Poll::Ready(Err(crate::Cancelled));
        }
        *self.inner.waker.borrow_mut() = Some(cx.waker().clone());
        self.inner.armed_once.set(true);
        Poll::Pending
    }
}
