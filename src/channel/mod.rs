//! `Unichannel`: an asynchronous FIFO with one strongly-owned receiver side
//! and weakly-referencing producers.
//!
//! Items flow through the channel's executor: [`Producer::send`] enqueues a
//! delivery closure, so mutation of the channel's queues is serialised per
//! channel no matter where `send` is called from. Consumers subscribe by
//! awaiting [`Unichannel::next`] (or [`Subscriber::next`]) and are resumed in
//! subscription order: the i-th subscriber gets the i-th item. Destroying the
//! last channel handle wakes every waiting consumer with [`Cancelled`].
//!
//! [`Cancelled`]: crate::Cancelled

use crate::exec::{Executor, InlineExecutor};
use crate::task::scope::{self, Flag};
use crate::task::{Cancelled, Outcome, TaskHandle};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use tracing::trace;

struct Consumer<T> {
    waker: Waker,
    /// The consuming task's tree flag, captured at subscription. Delivery
    /// skips consumers whose tree has been cancelled since: they are woken to
    /// unwind but never given an item.
    cancelled: Flag,
    /// Where a delivered item is parked until the consumer's next poll. A
    /// dedicated slot per consumer keeps an assignment from being stolen by
    /// whichever consumer happens to poll first.
    slot: Rc<RefCell<Option<T>>>,
}

struct Shared<T, E: Executor> {
    executor: E,
    items: RefCell<VecDeque<T>>,
    consumers: RefCell<VecDeque<Consumer<T>>>,
}

impl<T, E: Executor> Shared<T, E> {
    /// Runs on the channel's executor for every sent item.
    fn submit(&self, item: T) {
        let mut item = Some(item);
        loop {
            let consumer = self.consumers.borrow_mut().pop_front();
            let Some(consumer) = consumer else { break };
            if consumer.cancelled.get() {
                trace!("skipping cancelled channel consumer");
                consumer.waker.wake();
                continue;
            }
            *consumer.slot.borrow_mut() = item.take();
            consumer.waker.wake();
            return;
        }
        self.items
            .borrow_mut()
            .push_back(item.take().expect("item delivered twice"));
    }
}

impl<T, E: Executor> Drop for Shared<T, E> {
    fn drop(&mut self) {
        debug_assert!(self.items.get_mut().is_empty() || self.consumers.get_mut().is_empty());
        let consumers = std::mem::take(self.consumers.get_mut());
        if !consumers.is_empty() {
            trace!(waiters = consumers.len(), "channel closed with waiting consumers");
        }
        for consumer in consumers {
            // Each woken consumer finds the channel gone and unwinds.
            consumer.waker.wake();
        }
    }
}

/// The owned receiver side of the channel. Cloning shares ownership; the
/// channel dies with its last `Unichannel` clone (pending deliveries keep it
/// alive until they run).
pub struct Unichannel<T: 'static, E: Executor = InlineExecutor> {
    shared: Rc<Shared<T, E>>,
}

impl<T: 'static, E: Executor> Unichannel<T, E> {
    /// A channel whose deliveries run on `executor`.
    pub fn new(executor: E) -> Self {
        Self {
            shared: Rc::new(Shared {
                executor,
                items: RefCell::new(VecDeque::new()),
                consumers: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// A task resolving to the next item.
    ///
    /// Lazy like any task: the subscription is taken when the task first
    /// polls, so consumer order is the order these tasks reached their
    /// suspension, not the order `next` was called.
    pub fn next(&self) -> TaskHandle<T, E> {
        next_task(Rc::downgrade(&self.shared))
    }

    /// A weak receiver port for capture inside task bodies, so a waiting
    /// consumer never keeps its own channel alive.
    pub fn subscriber(&self) -> Subscriber<T, E> {
        Subscriber {
            chan: Rc::downgrade(&self.shared),
        }
    }

    /// A producer port for this channel.
    pub fn producer(&self) -> Producer<T, E> {
        Producer {
            chan: Rc::downgrade(&self.shared),
            executor: self.shared.executor.clone(),
        }
    }
}

impl<T: 'static, E: Executor> Clone for Unichannel<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: 'static, E: Executor> fmt::Debug for Unichannel<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unichannel")
            .field("buffered", &self.shared.items.borrow().len())
            .field("waiting", &self.shared.consumers.borrow().len())
            .finish()
    }
}

/// Weak receiver port; see [`Unichannel::subscriber`].
pub struct Subscriber<T: 'static, E: Executor> {
    chan: Weak<Shared<T, E>>,
}

impl<T: 'static, E: Executor> Subscriber<T, E> {
    /// Same contract as [`Unichannel::next`]; on a dead channel the returned
    /// task resolves to `Err(Cancelled)`.
    pub fn next(&self) -> TaskHandle<T, E> {
        next_task(Weak::clone(&self.chan))
    }
}

impl<T: 'static, E: Executor> Clone for Subscriber<T, E> {
    fn clone(&self) -> Self {
        Self {
            chan: Weak::clone(&self.chan),
        }
    }
}

/// Producer port holding a weak reference to the channel and a copy of its
/// executor.
pub struct Producer<T: 'static, E: Executor> {
    chan: Weak<Shared<T, E>>,
    executor: E,
}

impl<T: 'static, E: Executor> Producer<T, E> {
    /// Submits an item.
    ///
    /// Returns false once the channel is dead. Otherwise the item is handed
    /// to the channel's executor for delivery; the delivery closure holds the
    /// channel alive until it runs.
    pub fn send(&self, item: T) -> bool {
        let Some(chan) = self.chan.upgrade() else {
            trace!("send on a dead channel");
            return false;
        };
        self.executor.execute(Box::new(move || chan.submit(item)));
        true
    }
}

impl<T: 'static, E: Executor> Clone for Producer<T, E> {
    fn clone(&self) -> Self {
        Self {
            chan: Weak::clone(&self.chan),
            executor: self.executor.clone(),
        }
    }
}

fn next_task<T: 'static, E: Executor>(chan: Weak<Shared<T, E>>) -> TaskHandle<T, E> {
    TaskHandle::new(async move { Recv { chan, slot: None }.await })
}

/// The consumer suspension point inside a `next` task.
struct Recv<T: 'static, E: Executor> {
    chan: Weak<Shared<T, E>>,
    /// Present once subscribed.
    slot: Option<Rc<RefCell<Option<T>>>>,
}

impl<T: 'static, E: Executor> Future for Recv<T, E> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let flag = scope::with_current(|scope| {
            scope
                .expect("channel consumer polled outside of a task")
                .cancelled
                .clone()
        });
        if flag.get() {
            return Poll::Ready(Err(Cancelled));
        }
        if let Some(slot) = &this.slot {
            if let Some(item) = slot.borrow_mut().take() {
                return Poll::Ready(Ok(item));
            }
            // Woken without a delivery: only channel death does that.
            return match this.chan.upgrade() {
                None => Poll::Ready(Err(Cancelled)),
                Some(_) => Poll::Pending,
            };
        }
        match this.chan.upgrade() {
            None => Poll::Ready(Err(Cancelled)),
            Some(chan) => {
                // Buffered items only exist while no consumer waits, so
                // taking one directly cannot jump the queue.
                if let Some(item) = chan.items.borrow_mut().pop_front() {
                    return Poll::Ready(Ok(item));
                }
                let slot = Rc::new(RefCell::new(None));
                chan.consumers.borrow_mut().push_back(Consumer {
                    waker: cx.waker().clone(),
                    cancelled: flag,
                    slot: Rc::clone(&slot),
                });
                this.slot = Some(slot);
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests;
