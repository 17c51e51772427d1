//! The per-task heap frame and its lifecycle state machine.

use crate::exec::Executor;
use crate::task::error::{Cancelled, Outcome};
use crate::task::id::Id;
use crate::task::scope::{self, Flag, Scope};
use crate::task::waker::{self, Wakeable};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// Constructed; the body has never been polled.
    Idle,
    /// A dispatch to the executor is in flight.
    Scheduled,
    /// The body is being polled right now.
    Running,
    /// Parked on an awaiter that holds this frame's waker.
    Suspended,
    /// The body produced a value; the result slot is (or was) populated.
    Finished,
    /// The body unwound after observing cancellation.
    Cancelled,
}

/// Heap record backing one task.
///
/// A frame is shared between its owning handle, the executor closures that
/// poll it and the wakers held by whatever it is suspended on; the last
/// reference to go reclaims it. The body future is dropped as soon as the
/// frame reaches a terminal state, which is what runs the body's destructors
/// ("unwinding") on cancellation.
pub(crate) struct Frame<T, E: Executor> {
    id: Id,
    state: Cell<State>,
    /// Latches a wake that arrives while the body is mid-poll, so the poll
    /// loop runs once more instead of losing the wake. The inline executor
    /// makes this reachable: a child completing inside the parent's poll
    /// wakes the parent re-entrantly.
    notified: Cell<bool>,
    /// Detached frames keep this false: their children must not inherit the
    /// dispatch executor and fall back to a default-constructed one.
    share_executor: bool,
    body: RefCell<Option<Pin<Box<dyn Future<Output = Outcome<T>>>>>>,
    result: RefCell<Option<T>>,
    /// The awaiting parent's waker, installed while the parent is suspended
    /// on this task and consumed by completion.
    continuation: RefCell<Option<Waker>>,
    /// The ownership tree's cancellation flag. Replaced with the parent's
    /// flag when the frame starts under one.
    cancelled: RefCell<Flag>,
    executor: RefCell<Option<Rc<E>>>,
}

impl<T: 'static, E: Executor> Frame<T, E> {
    pub(crate) fn new(
        body: impl Future<Output = Outcome<T>> + 'static,
        share_executor: bool,
    ) -> Rc<Self> {
        Rc::new(Self {
            id: Id::next(),
            state: Cell::new(State::Idle),
            notified: Cell::new(false),
            share_executor,
            body: RefCell::new(Some(Box::pin(body))),
            result: RefCell::new(None),
            continuation: RefCell::new(None),
            cancelled: RefCell::new(scope::new_flag()),
            executor: RefCell::new(None),
        })
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn state(&self) -> State {
        self.state.get()
    }

    pub(crate) fn flag(&self) -> Flag {
        self.cancelled.borrow().clone()
    }

    /// Transitions `Idle → Scheduled` and dispatches the initial poll.
    ///
    /// `inherited` carries the parent's cancellation flag when this frame
    /// joins an existing ownership tree; a root keeps the flag it was born
    /// with.
    pub(crate) fn start(self: &Rc<Self>, executor: E, inherited: Option<Flag>) {
        debug_assert_eq!(self.state.get(), State::Idle);
        if let Some(flag) = inherited {
            *self.cancelled.borrow_mut() = flag;
        }
        *self.executor.borrow_mut() = Some(Rc::new(executor));
        trace!(id = %self.id, "task started");
        self.schedule();
    }

    pub(crate) fn set_continuation(&self, waker: Waker) {
        *self.continuation.borrow_mut() = Some(waker);
    }

    pub(crate) fn take_result(&self) -> T {
        self.result
            .borrow_mut()
            .take()
            .expect("task result already taken")
    }

    fn schedule(self: &Rc<Self>) {
        self.state.set(State::Scheduled);
        let executor = self
            .executor
            .borrow()
            .clone()
            .expect("task scheduled before start");
        let frame = Rc::clone(self);
        executor.execute(Box::new(move || frame.step()));
    }

    fn scope(&self) -> Scope {
        let executor = if self.share_executor {
            self.executor
                .borrow()
                .clone()
                .map(|executor| executor as Rc<dyn Any>)
        } else {
            None
        };
        Scope {
            cancelled: self.flag(),
            executor,
        }
    }

    /// One dispatched resume: polls the body until it parks or terminates.
    ///
    /// Also the place where a pending cancellation is acted on — a frame
    /// whose flag is set unwinds here without polling the body at all, which
    /// covers both cancel-before-first-poll and resumes delivered to an
    /// already-cancelled ownership tree.
    pub(crate) fn step(self: &Rc<Self>) {
        if self.state.get() != State::Scheduled {
            // Stale dispatch: the frame terminated after this resume was
            // queued.
            return;
        }
        if self.flag().get() {
            self.unwind();
            return;
        }
        self.state.set(State::Running);
        let waker = waker::waker_for(Rc::clone(self));
        let mut cx = Context::from_waker(&waker);
        loop {
            self.notified.set(false);
            let poll = {
                let _scope = scope::enter(self.scope());
                let mut body = self.body.borrow_mut();
                let body = body.as_mut().expect("task frame polled without a body");
                body.as_mut().poll(&mut cx)
            };
            match poll {
                Poll::Ready(Ok(value)) => {
                    self.complete(value);
                    return;
                }
                Poll::Ready(Err(Cancelled)) => {
                    self.unwind();
                    return;
                }
                Poll::Pending if self.notified.get() => continue,
                Poll::Pending => {
                    self.state.set(State::Suspended);
                    return;
                }
            }
        }
    }

    fn complete(&self, value: T) {
        self.state.set(State::Finished);
        *self.result.borrow_mut() = Some(value);
        // Take the body out before dropping it: its destructors may re-enter
        // the runtime (wake other frames inline) and must not find the slot
        // borrowed.
        let body = self.body.borrow_mut().take();
        drop(body);
        trace!(id = %self.id, "task finished");
        self.resume_continuation();
    }

    fn unwind(&self) {
        self.state.set(State::Cancelled);
        // Dropping the body is the unwind: destructors of everything the
        // suspended computation held run here, after the borrow is released.
        let body = self.body.borrow_mut().take();
        drop(body);
        trace!(id = %self.id, "task unwound");
        self.resume_continuation();
    }

    fn resume_continuation(&self) {
        let continuation = self.continuation.borrow_mut().take();
        if let Some(waker) = continuation {
            waker.wake();
        }
    }
}

impl<T: 'static, E: Executor> Wakeable for Frame<T, E> {
    fn wake_task(self: &Rc<Self>) {
        match self.state.get() {
            State::Suspended => self.schedule(),
            State::Running => self.notified.set(true),
            State::Idle | State::Scheduled | State::Finished | State::Cancelled => {}
        }
    }
}

/// Launches an unowned frame: no handle, so nobody can cancel it directly —
/// it lives until it terminates on its own or its inherited flag is set.
///
/// The combinators use this for their per-child wrappers, whose lifetime must
/// not end with the combinator's own frame.
pub(crate) fn spawn_probe<E: Executor>(
    executor: E,
    flag: Flag,
    body: impl Future<Output = Outcome<()>> + 'static,
) {
    let frame = Frame::<(), E>::new(body, true);
    frame.start(executor, Some(flag));
}
