use crate::exec::InlineExecutor;
use crate::task::error::Outcome;
use crate::task::frame::Frame;
use std::future::Future;

/// Starts an eager, ownerless task: the bridge from synchronous code into
/// task land.
///
/// The body is polled synchronously up to its first suspension before this
/// function returns; afterwards the frame owns itself, kept alive by the
/// wakers of whatever it suspends on, and is reclaimed when the body
/// completes or unwinds. Nobody can cancel a detached body from outside —
/// cancellation reaches it only through what it awaits (a dropped channel, a
/// dead owner).
///
/// Tasks awaited inside a detached body are started on a default-constructed
/// executor of their own type, since a detached body has no executor of its
/// own to pass down.
pub fn spawn_detached<F>(body: F)
where
    F: Future<Output = Outcome<()>> + 'static,
{
    let frame = Frame::<(), InlineExecutor>::new(body, false);
    frame.start(InlineExecutor, None);
}
