//! Structured concurrency on stackless tasks.
//!
//! A [`TaskHandle`] owns a lazily-started asynchronous computation. Nothing
//! runs until the handle is started with [`TaskHandle::run`] or awaited from
//! inside another task; dropping the handle cancels the computation and every
//! descendant it started. Cancellation is cooperative: it is observed at the
//! next suspension point, where it surfaces as [`Cancelled`] through the
//! [`Outcome`] result type and unwinds the task body via `?`.
//!
//! Scheduling is delegated to an [`Executor`] — any cheap-to-clone value that
//! can run a closure later, in FIFO order. [`InlineExecutor`] runs work at the
//! call site; [`ManualExecutor`] queues it for an explicit drain, which is how
//! this crate embeds into an existing event loop.
//!
//! On top of the task core sit [`any_of`] / [`all_of`] (race and join over a
//! tuple of tasks), [`TaskOwner`] (a group handle that cancels everything it
//! holds when dropped) and [`Unichannel`] (an asynchronous FIFO delivering
//! items to suspended consumers in subscription order).
//!
//! The whole crate is single-threaded: handles, frames and channels are
//! deliberately `!Send`.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tether::{TaskHandle, spawn_detached};
//!
//! fn double(x: i32) -> TaskHandle<i32> {
//!     TaskHandle::new(async move { Ok(x * 2) })
//! }
//!
//! let result = Rc::new(Cell::new(0));
//! let out = Rc::clone(&result);
//! spawn_detached(async move {
//!     let doubled = double(21).await?;
//!     out.set(doubled);
//!     Ok(())
//! });
//! assert_eq!(result.get(), 42);
//! ```

pub mod channel;
pub use channel::{Producer, Subscriber, Unichannel};

pub mod combine;
pub use combine::{AnyOf2, AnyOf3, AnyOf4, AnyOf5, all_of, any_of};

pub mod exec;
pub use exec::{Executor, InlineExecutor, ManualExecutor, Work};

pub mod task;
pub use task::{Cancelled, Id, Outcome, OwnerHandle, TaskHandle, TaskOwner, spawn_detached};

#[cfg(test)]
pub(crate) mod test_utils;
