use crate::exec::{Executor, Work};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

thread_local! {
    static THREAD_DEFAULT: ManualExecutor = ManualExecutor::new();
}

/// A FIFO executor drained explicitly by the caller.
///
/// Submitted work sits in a queue until [`run_one`] or [`run_all`] is called,
/// which is what makes task progress observable step by step — the embedding
/// event loop (or a test) decides when the next resume happens. Clones share
/// the same queue.
///
/// [`run_one`]: ManualExecutor::run_one
/// [`run_all`]: ManualExecutor::run_all
#[derive(Clone)]
pub struct ManualExecutor {
    queue: Rc<RefCell<VecDeque<Work>>>,
}

impl ManualExecutor {
    /// Creates an executor with its own empty queue.
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// The queue shared by every default-constructed `ManualExecutor` on this
    /// thread.
    ///
    /// Detached bodies start the tasks they await on a default-constructed
    /// executor, so this instance is where such work lands; whoever owns the
    /// thread's loop drains it from here.
    pub fn thread_default() -> Self {
        THREAD_DEFAULT.with(Clone::clone)
    }

    /// Pops and runs the oldest queued work item. Returns false if the queue
    /// was empty.
    pub fn run_one(&self) -> bool {
        let work = self.queue.borrow_mut().pop_front();
        match work {
            Some(work) => {
                work();
                true
            }
            None => false,
        }
    }

    /// Drains the queue, including work enqueued while draining. Returns the
    /// number of items run.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Number of queued work items.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// True when no work is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

/// Attaches to the thread-shared queue, not a fresh one; use
/// [`ManualExecutor::new`] for a private queue.
impl Default for ManualExecutor {
    fn default() -> Self {
        Self::thread_default()
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, work: Work) {
        self.queue.borrow_mut().push_back(work);
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.len())
            .finish()
    }
}
