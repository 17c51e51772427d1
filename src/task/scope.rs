//! The thread-local scope stack.
//!
//! While a frame polls its body it publishes a [`Scope`] here; the awaiters
//! reached by that poll — nested task handles, combinators, channel
//! consumers — read the top of the stack to inherit the executor and to
//! share the cancellation flag. The stack nests because the inline executor
//! polls child frames from inside the parent's poll.

use crate::exec::Executor;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// The cancellation flag shared by one ownership tree.
///
/// Set once, never cleared. Every suspension point in the tree observes it on
/// resume and unwinds when it is set.
pub(crate) type Flag = Rc<Cell<bool>>;

pub(crate) fn new_flag() -> Flag {
    Rc::new(Cell::new(false))
}

/// What an executing frame exposes to the awaiters beneath it.
#[derive(Clone)]
pub(crate) struct Scope {
    pub(crate) cancelled: Flag,
    /// The frame's executor, type-erased so one thread-local serves every
    /// executor type. `None` under a detached body: tasks awaited there
    /// start on a default-constructed executor instead.
    pub(crate) executor: Option<Rc<dyn Any>>,
}

thread_local! {
    static SCOPES: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

/// Publishes `scope` for the duration of the returned guard.
pub(crate) fn enter(scope: Scope) -> EnterGuard {
    SCOPES.with(|stack| stack.borrow_mut().push(scope));
    EnterGuard {
        _not_send: PhantomData,
    }
}

pub(crate) fn with_current<R>(f: impl FnOnce(Option<&Scope>) -> R) -> R {
    SCOPES.with(|stack| f(stack.borrow().last()))
}

pub(crate) struct EnterGuard {
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        SCOPES.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Never-suspending retriever for the enclosing frame's typed context.
///
/// The combinators await this to learn which executor and cancellation flag
/// their own frame runs under, so they can launch child frames with the same
/// pair.
pub(crate) fn current_scope<E: Executor + Default>() -> CurrentScope<E> {
    CurrentScope {
        _executor: PhantomData,
    }
}

pub(crate) struct CurrentScope<E> {
    _executor: PhantomData<fn() -> E>,
}

impl<E: Executor + Default> Future for CurrentScope<E> {
    type Output = (E, Flag);

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        Poll::Ready(with_current(|scope| {
            let scope = scope.expect("task context retrieved outside of a task");
            let executor = scope
                .executor
                .as_ref()
                .map(|executor| {
                    executor
                        .downcast_ref::<E>()
                        .expect("task context retrieved under a different executor type")
                        .clone()
                })
                .unwrap_or_default();
            (executor, scope.cancelled.clone())
        }))
    }
}
