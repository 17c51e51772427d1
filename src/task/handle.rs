use crate::exec::{Executor, InlineExecutor};
use crate::task::error::{Cancelled, Outcome};
use crate::task::frame::{Frame, State};
use crate::task::id::Id;
use crate::task::scope::{self, Flag};
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Owning handle to a lazily-started, single-result task.
///
/// Created by [`TaskHandle::new`] over an async body; nothing runs until the
/// task is started. There are exactly two ways to start it, and they are
/// mutually exclusive:
///
/// - [`run`](TaskHandle::run) — schedule the body on an executor. Used for
///   roots; the handle is then held (often by a [`TaskOwner`]) purely for its
///   cancel-on-drop effect and for [`is_finished`](TaskHandle::is_finished).
/// - `.await` from inside another task — the child inherits the awaiting
///   task's executor and cancellation flag, the parent parks until the child
///   completes, and the child's result is moved out as the await's value.
///
/// Dropping a handle whose task has not finished sets the ownership tree's
/// cancellation flag: every descendant unwinds at its next resume. Dropping a
/// finished handle just releases the frame.
///
/// Handles are `!Send`; a task frame is never touched from two threads.
///
/// # Examples
///
/// ```
/// use tether::{InlineExecutor, TaskHandle};
///
/// let task = TaskHandle::<i32>::new(async { Ok(40 + 2) });
/// assert!(!task.is_finished());
/// task.run(InlineExecutor);
/// assert!(task.is_finished());
/// ```
///
/// [`TaskOwner`]: crate::TaskOwner
pub struct TaskHandle<T: 'static, E: Executor = InlineExecutor> {
    frame: Rc<Frame<T, E>>,
    /// Set once this handle has been awaited, so later polls of the same
    /// await don't re-run the adoption step.
    adopted: Cell<bool>,
}

impl<T: 'static, E: Executor> TaskHandle<T, E> {
    /// Wraps an async body into a suspended task.
    ///
    /// The body's captures are owned by the task frame from here on and are
    /// dropped when the task completes or unwinds.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = Outcome<T>> + 'static,
    {
        Self {
            frame: Frame::new(body, true),
            adopted: Cell::new(false),
        }
    }

    /// Starts the task as a root on `executor`.
    ///
    /// The initial resume is dispatched like any other: an inline executor
    /// runs the body up to its first suspension before `run` returns, a
    /// queued executor runs nothing until drained.
    ///
    /// # Panics
    ///
    /// Panics if the task was already started.
    pub fn run(&self, executor: E) {
        assert_eq!(
            self.frame.state(),
            State::Idle,
            "task already started"
        );
        self.frame.start(executor, None);
    }

    /// True once the task has completed or unwound.
    pub fn is_finished(&self) -> bool {
        matches!(self.frame.state(), State::Finished | State::Cancelled)
    }

    /// True if the task unwound after observing cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.frame.state() == State::Cancelled
    }

    /// The task's unique [`Id`].
    pub fn id(&self) -> Id {
        self.frame.id()
    }

    /// Starts the task inside an existing ownership tree: on the given
    /// executor, observing the given cancellation flag.
    pub(crate) fn start_with(&self, executor: E, flag: Flag) {
        assert_eq!(
            self.frame.state(),
            State::Idle,
            "task already started"
        );
        self.frame.start(executor, Some(flag));
    }
}

impl<T: 'static, E: Executor + Default> TaskHandle<T, E> {
    /// [`run`](TaskHandle::run) on a default-constructed executor.
    pub fn run_default(&self) {
        self.run(E::default());
    }
}

/// Awaiting a handle starts the task under the awaiting task's executor and
/// cancellation flag and resolves to the task's result.
///
/// The flag is checked before the result slot on every resume, so a parent
/// that was cancelled while its child completed still observes `Cancelled`.
///
/// # Panics
///
/// Panics when awaited outside of a task or detached body, when awaited
/// under a task whose executor type differs from `E`, or when the task was
/// already started with [`run`](TaskHandle::run).
impl<T: 'static, E: Executor + Default> Future for TaskHandle<T, E> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.adopted.get() {
            assert_eq!(
                self.frame.state(),
                State::Idle,
                "cannot await a task that was already started"
            );
            let (flag, executor) = scope::with_current(|scope| {
                let scope = scope.expect("TaskHandle awaited outside of a task context");
                let executor = scope.executor.as_ref().map(|executor| {
                    executor
                        .downcast_ref::<E>()
                        .expect("task awaited under a different executor type")
                        .clone()
                });
                (scope.cancelled.clone(), executor)
            });
            self.adopted.set(true);
            if flag.get() {
                return Poll::Ready(Err(Cancelled));
            }
            self.frame.start(executor.unwrap_or_default(), Some(flag));
        }
        if self.frame.flag().get() {
            return Poll::Ready(Err(Cancelled));
        }
        match self.frame.state() {
            State::Finished => Poll::Ready(Ok(self.frame.take_result())),
            State::Cancelled => Poll::Ready(Err(Cancelled)),
            _ => {
                self.frame.set_continuation(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T: 'static, E: Executor> Drop for TaskHandle<T, E> {
    fn drop(&mut self) {
        if !self.is_finished() {
            self.frame.flag().set(true);
        }
    }
}

impl<T: 'static, E: Executor> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("finished", &self.is_finished())
            .finish()
    }
}
