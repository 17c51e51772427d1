//! Race ([`any_of`]) and join ([`all_of`]) over tuples of tasks.
//!
//! Both combinators are ordinary tasks: they read their own frame's executor
//! and cancellation flag, launch one unowned wrapper frame per child on that
//! pair, and park until the completion condition is met. The children are
//! therefore full members of the caller's ownership tree — dropping the
//! combinator handle (or any ancestor) unwinds all of them at their next
//! resume — while a decided race never cancels its losers: they keep running
//! to completion and reclaim themselves.

use crate::exec::Executor;
use crate::task::frame;
use crate::task::scope::{self, Flag};
use crate::task::{Cancelled, Outcome, TaskHandle};
use pin_project::pin_project;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker, ready};

/// Races a tuple of tasks; the first to complete decides the result.
///
/// The children start when the returned task starts, on its executor and
/// cancellation flag. The winner's value is recorded exactly once; children
/// completing later are ignored (their frames still run to completion). A
/// child that finishes during launch short-circuits the launch: children
/// after it are never started.
///
/// Implemented for tuples of [`TaskHandle`]s of arity 2 through 5 with a
/// common executor type; the result is the matching [`AnyOf2`]…[`AnyOf5`]
/// discriminated union.
pub fn any_of<Ex, S>(tasks: S) -> TaskHandle<S::Winner, Ex>
where
    Ex: Executor + Default,
    S: AnyOfTasks<Ex> + 'static,
{
    TaskHandle::new(async move {
        let (executor, flag) = scope::current_scope::<Ex>().await;
        let winner = Rc::new(RefCell::new(None));
        let rouse = Rc::new(Cell::new(None));
        tasks.launch(&Launcher::new(&executor, &flag), &winner, &rouse);
        let decided = Rc::clone(&winner);
        WaitCell::new(Rc::clone(&rouse), move || decided.borrow().is_some()).await?;
        let value = winner
            .borrow_mut()
            .take()
            .expect("any_of resumed without a winner");
        Ok(value)
    })
}

/// Joins a tuple of tasks; resolves to the tuple of their results once every
/// child has completed.
///
/// The children start when the returned task starts, on its executor and
/// cancellation flag; each records into its own slot and the last one to
/// complete resumes the combinator.
pub fn all_of<Ex, S>(tasks: S) -> TaskHandle<S::Gathered, Ex>
where
    Ex: Executor + Default,
    S: AllOfTasks<Ex> + 'static,
{
    TaskHandle::new(async move {
        let (executor, flag) = scope::current_scope::<Ex>().await;
        let slots = Rc::new(RefCell::new(S::empty()));
        let remaining = Rc::new(Cell::new(S::LEN));
        let rouse = Rc::new(Cell::new(None));
        tasks.launch(&Launcher::new(&executor, &flag), &slots, &remaining, &rouse);
        let outstanding = Rc::clone(&remaining);
        WaitCell::new(Rc::clone(&rouse), move || outstanding.get() == 0).await?;
        let gathered = slots.replace(S::empty());
        Ok(S::assemble(gathered))
    })
}

/// Spawns the per-child wrapper frames for a combinator, carrying the
/// combinator's executor and cancellation flag.
pub struct Launcher<'a, Ex: Executor> {
    executor: &'a Ex,
    flag: &'a Flag,
}

impl<'a, Ex: Executor> Launcher<'a, Ex> {
    pub(crate) fn new(executor: &'a Ex, flag: &'a Flag) -> Self {
        Self { executor, flag }
    }

    pub(crate) fn spawn(&self, body: impl Future<Output = Outcome<()>> + 'static) {
        frame::spawn_probe(self.executor.clone(), self.flag.clone(), body);
    }
}

/// Tuples of tasks accepted by [`any_of`].
pub trait AnyOfTasks<Ex: Executor> {
    /// The discriminated union over the children's result types.
    type Winner: 'static;

    #[doc(hidden)]
    fn launch(
        self,
        launcher: &Launcher<'_, Ex>,
        winner: &Rc<RefCell<Option<Self::Winner>>>,
        rouse: &Rc<Cell<Option<Waker>>>,
    );
}

/// Tuples of tasks accepted by [`all_of`].
pub trait AllOfTasks<Ex: Executor> {
    /// The product of the children's result types.
    type Gathered: 'static;
    /// The in-progress product: one optional slot per child.
    #[doc(hidden)]
    type Partial: 'static;
    #[doc(hidden)]
    const LEN: usize;

    #[doc(hidden)]
    fn empty() -> Self::Partial;
    #[doc(hidden)]
    fn assemble(partial: Self::Partial) -> Self::Gathered;
    #[doc(hidden)]
    fn launch(
        self,
        launcher: &Launcher<'_, Ex>,
        slots: &Rc<RefCell<Self::Partial>>,
        remaining: &Rc<Cell<usize>>,
        rouse: &Rc<Cell<Option<Waker>>>,
    );
}

/// Armed drop-guard: wakes the parked combinator unless disarmed first.
///
/// A wrapper that goes away without completing normally — unwound by the
/// cancellation flag, or failed by its child — still has to resume the
/// combinator, so the combinator's own frame can observe what happened and
/// unwind.
struct Rouser {
    rouse: Rc<Cell<Option<Waker>>>,
    armed: bool,
}

impl Rouser {
    fn new(rouse: Rc<Cell<Option<Waker>>>) -> Self {
        Self { rouse, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn fire(rouse: &Rc<Cell<Option<Waker>>>) {
        if let Some(waker) = rouse.take() {
            waker.wake();
        }
    }
}

impl Drop for Rouser {
    fn drop(&mut self) {
        if self.armed {
            Self::fire(&self.rouse);
        }
    }
}

/// A wrapper body plus its [`Rouser`], held as a field rather than a local of
/// the body.
///
/// A local inside an async block only starts existing once the body has been
/// polled that far; a frame cancelled before its first poll would drop the
/// body without ever having created the guard. As a field the guard lives
/// from the moment the wrapper frame does, so dropping the frame fires it no
/// matter how far the body got.
#[pin_project]
struct Guarded<F> {
    rouser: Rouser,
    #[pin]
    body: F,
}

impl<F> Guarded<F> {
    fn new(rouser: Rouser, body: F) -> Self {
        Self { rouser, body }
    }
}

impl<F: Future<Output = Outcome<()>>> Future for Guarded<F> {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.body.poll(cx));
        if result.is_ok() {
            this.rouser.disarm();
        }
        Poll::Ready(result)
    }
}

/// Parks the combinator body until the wrappers report the completion
/// condition. Checks the tree's cancellation flag on every resume.
struct WaitCell<C: Fn() -> bool> {
    ready: C,
    rouse: Rc<Cell<Option<Waker>>>,
}

impl<C: Fn() -> bool> WaitCell<C> {
    fn new(rouse: Rc<Cell<Option<Waker>>>, ready: C) -> Self {
        Self { ready, rouse }
    }
}

impl<C: Fn() -> bool> Future for WaitCell<C> {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let cancelled =
            scope::with_current(|scope| scope.expect("combinator outside of a task").cancelled.get());
        if cancelled {
            return Poll::Ready(Err(Cancelled));
        }
        if (self.ready)() {
            return Poll::Ready(Ok(()));
        }
        self.rouse.set(Some(cx.waker().clone()));
        Poll::Pending
    }
}

macro_rules! tuple_combinators {
    (@one $T:ident) => { 1 };
    (@none $T:ident) => { None };
    ($any:ident, $(($T:ident, $idx:tt, $variant:ident)),+) => {
        /// Discriminated union naming which child of the race won, by
        /// position.
        #[derive(Debug, Clone, PartialEq)]
        pub enum $any<$($T),+> {
            $( $variant($T), )+
        }

        impl<Ex, $($T),+> AnyOfTasks<Ex> for ($(TaskHandle<$T, Ex>,)+)
        where
            Ex: Executor + Default,
            $($T: 'static,)+
        {
            type Winner = $any<$($T),+>;

            fn launch(
                self,
                launcher: &Launcher<'_, Ex>,
                winner: &Rc<RefCell<Option<Self::Winner>>>,
                rouse: &Rc<Cell<Option<Waker>>>,
            ) {
                $(
                    {
                        let task = self.$idx;
                        let winner = Rc::clone(winner);
                        let rouse = Rc::clone(rouse);
                        let rouser = Rouser::new(Rc::clone(&rouse));
                        launcher.spawn(Guarded::new(rouser, async move {
                            // A sibling that completed during launch already
                            // decided the race; leave this child unstarted.
                            if winner.borrow().is_some() {
                                return Ok(());
                            }
                            let value = task.await?;
                            let mut decided = winner.borrow_mut();
                            if decided.is_none() {
                                *decided = Some($any::$variant(value));
                                drop(decided);
                                Rouser::fire(&rouse);
                            }
                            Ok(())
                        }));
                    }
                )+
            }
        }

        impl<Ex, $($T),+> AllOfTasks<Ex> for ($(TaskHandle<$T, Ex>,)+)
        where
            Ex: Executor + Default,
            $($T: 'static,)+
        {
            type Gathered = ($($T,)+);
            type Partial = ($(Option<$T>,)+);

            const LEN: usize = 0 $(+ tuple_combinators!(@one $T))+;

            fn empty() -> Self::Partial {
                ($(tuple_combinators!(@none $T),)+)
            }

            fn assemble(partial: Self::Partial) -> Self::Gathered {
                ($( partial.$idx.expect("all_of resumed with an empty slot"), )+)
            }

            fn launch(
                self,
                launcher: &Launcher<'_, Ex>,
                slots: &Rc<RefCell<Self::Partial>>,
                remaining: &Rc<Cell<usize>>,
                rouse: &Rc<Cell<Option<Waker>>>,
            ) {
                $(
                    {
                        let task = self.$idx;
                        let slots = Rc::clone(slots);
                        let remaining = Rc::clone(remaining);
                        let rouse = Rc::clone(rouse);
                        let rouser = Rouser::new(Rc::clone(&rouse));
                        launcher.spawn(Guarded::new(rouser, async move {
                            let value = task.await?;
                            slots.borrow_mut().$idx = Some(value);
                            remaining.set(remaining.get() - 1);
                            if remaining.get() == 0 {
                                Rouser::fire(&rouse);
                            }
                            Ok(())
                        }));
                    }
                )+
            }
        }
    };
}

tuple_combinators!(AnyOf2, (R1, 0, First), (R2, 1, Second));
tuple_combinators!(AnyOf3, (R1, 0, First), (R2, 1, Second), (R3, 2, Third));
tuple_combinators!(
    AnyOf4,
    (R1, 0, First),
    (R2, 1, Second),
    (R3, 2, Third),
    (R4, 3, Fourth)
);
tuple_combinators!(
    AnyOf5,
    (R1, 0, First),
    (R2, 1, Second),
    (R3, 2, Third),
    (R4, 3, Fourth),
    (R5, 4, Fifth)
);
