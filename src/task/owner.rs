use crate::exec::{Executor, InlineExecutor};
use crate::task::TaskHandle;
use crate::task::error::{Cancelled, Outcome};
use crate::task::scope;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use tracing::trace;

/// Type-erased view of a held task; dropping the box cancels it.
trait Held {
    fn is_finished(&self) -> bool;
}

impl<T: 'static, E: Executor> Held for TaskHandle<T, E> {
    fn is_finished(&self) -> bool {
        TaskHandle::is_finished(self)
    }
}

struct OwnerCore<E: Executor> {
    executor: E,
    tasks: RefCell<SmallVec<[Box<dyn Held>; 4]>>,
}

impl<E: Executor> OwnerCore<E> {
    fn hold(&self, task: Box<dyn Held>) {
        let mut tasks = self.tasks.borrow_mut();
        // Finished tasks have nothing left to cancel; let their frames go.
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }
}

impl<E: Executor> Drop for OwnerCore<E> {
    fn drop(&mut self) {
        let live = self
            .tasks
            .borrow()
            .iter()
            .filter(|task| !task.is_finished())
            .count();
        if live > 0 {
            trace!(tasks = live, "task owner dropped, cancelling held tasks");
        }
    }
}

/// A group handle that owns a set of tasks and cancels all of them when it
/// dies.
///
/// Roots go in with [`start_root`]; tasks started from *inside* one of the
/// owner's tasks go in with [`start_nested`], which ties them to the awaiting
/// parent's executor and cancellation flag while the owner keeps the handle.
/// Either way the owner's destruction is the single point where everything it
/// holds gets cancelled.
///
/// Task bodies that need to start nested work capture an [`OwnerHandle`]
/// (from [`handle`](TaskOwner::handle)) rather than the owner itself — the
/// owner transitively owns those bodies, and a strong reference back would
/// keep the whole group alive forever.
///
/// [`start_root`]: TaskOwner::start_root
/// [`start_nested`]: TaskOwner::start_nested
pub struct TaskOwner<E: Executor = InlineExecutor> {
    core: Rc<OwnerCore<E>>,
}

impl<E: Executor> TaskOwner<E> {
    /// An owner whose root tasks run on `executor`.
    pub fn new(executor: E) -> Self {
        Self {
            core: Rc::new(OwnerCore {
                executor,
                tasks: RefCell::new(SmallVec::new()),
            }),
        }
    }

    /// Takes ownership of `task`, starts it on the owner's executor and
    /// retains the handle until the owner dies.
    pub fn start_root<T: 'static>(&self, task: TaskHandle<T, E>) {
        task.run(self.core.executor.clone());
        self.core.hold(Box::new(task));
    }

    /// Returns an awaitable that starts `task` with the awaiting parent's
    /// executor and cancellation flag, hands the handle to this owner and
    /// completes immediately.
    ///
    /// The nested task is thereby cancelled by whichever goes first: its
    /// parent's tree, or this owner.
    pub fn start_nested<T: 'static>(&self, task: TaskHandle<T, E>) -> StartNested<T, E> {
        StartNested {
            core: Rc::downgrade(&self.core),
            task: Some(task),
        }
    }

    /// A weak reference for capture inside task bodies.
    pub fn handle(&self) -> OwnerHandle<E> {
        OwnerHandle {
            core: Rc::downgrade(&self.core),
        }
    }
}

impl<E: Executor + Default> Default for TaskOwner<E> {
    fn default() -> Self {
        Self::new(E::default())
    }
}

impl<E: Executor> fmt::Debug for TaskOwner<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOwner")
            .field("tasks", &self.core.tasks.borrow().len())
            .finish()
    }
}

/// Weak reference to a [`TaskOwner`], cloneable into task bodies.
///
/// Once the owner is gone, [`start_nested`](OwnerHandle::start_nested)
/// resolves to `Err(Cancelled)` — by the owner's own contract the caller's
/// tree is being cancelled at that point anyway.
pub struct OwnerHandle<E: Executor> {
    core: Weak<OwnerCore<E>>,
}

impl<E: Executor> OwnerHandle<E> {
    /// See [`TaskOwner::start_nested`].
    pub fn start_nested<T: 'static>(&self, task: TaskHandle<T, E>) -> StartNested<T, E> {
        StartNested {
            core: Weak::clone(&self.core),
            task: Some(task),
        }
    }
}

impl<E: Executor> Clone for OwnerHandle<E> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

/// Future returned by [`TaskOwner::start_nested`] / [`OwnerHandle::start_nested`].
///
/// Never parks the awaiting task: the first poll starts the nested task,
/// parks *it* wherever its body suspends, and resolves to `Ok(())`.
pub struct StartNested<T: 'static, E: Executor> {
    core: Weak<OwnerCore<E>>,
    task: Option<TaskHandle<T, E>>,
}

impl<T: 'static, E: Executor> Future for StartNested<T, E> {
    type Output = Outcome<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let (flag, executor) = scope::with_current(|scope| {
            let scope = scope.expect("StartNested awaited outside of a task context");
            let executor = scope.executor.as_ref().map(|executor| {
                executor
                    .downcast_ref::<E>()
                    .expect("nested task started under a different executor type")
                    .clone()
            });
            (scope.cancelled.clone(), executor)
        });
        if flag.get() {
            return Poll::Ready(Err(Cancelled));
        }
        let Some(core) = this.core.upgrade() else {
            return Poll::Ready(Err(Cancelled));
        };
        let task = this.task.take().expect("StartNested polled after completion");
        // A detached parent exposes no executor; fall back to the owner's.
        task.start_with(executor.unwrap_or_else(|| core.executor.clone()), flag);
        core.hold(Box::new(task));
        Poll::Ready(Ok(()))
    }
}
