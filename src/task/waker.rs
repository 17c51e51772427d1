#![allow(unsafe_op_in_unsafe_fn)]

//! `Waker`s over `Rc` for a single-threaded runtime.
//!
//! A frame's resumption token is a standard [`Waker`] whose data pointer is a
//! leaked `Rc` to the frame, so every outstanding token keeps the frame
//! alive and waking is just a method call on it.

use std::mem::ManuallyDrop;
use std::rc::Rc;
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Something a [`Waker`] can point at.
pub(crate) trait Wakeable: 'static {
    fn wake_task(self: &Rc<Self>);
}

/// Builds a waker holding one strong reference to `target`.
///
/// # Safety (upheld here, relied on by callers)
///
/// `Waker` is `Send + Sync` by type, but these wakers are backed by `Rc` and
/// must never leave the thread they were created on. Every type in this crate
/// that could carry one is `!Send`, which keeps the lie contained.
pub(crate) fn waker_for<W: Wakeable>(target: Rc<W>) -> Waker {
    unsafe { Waker::from_raw(raw_waker(target)) }
}

fn raw_waker<W: Wakeable>(target: Rc<W>) -> RawWaker {
    // Does not decrement the reference count; the waker now owns one ref.
    let ptr = Rc::into_raw(target) as *const ();
    RawWaker::new(ptr, vtable::<W>())
}

fn vtable<W: Wakeable>() -> &'static RawWakerVTable {
    &RawWakerVTable::new(
        clone_waker::<W>,
        wake_by_val::<W>,
        wake_by_ref::<W>,
        drop_waker::<W>,
    )
}

unsafe fn clone_waker<W: Wakeable>(ptr: *const ()) -> RawWaker {
    Rc::<W>::increment_strong_count(ptr as *const W);
    RawWaker::new(ptr, vtable::<W>())
}

// Wake by consuming the waker's reference.
unsafe fn wake_by_val<W: Wakeable>(ptr: *const ()) {
    let target = Rc::<W>::from_raw(ptr as *const W);
    target.wake_task();
}

// Wake without consuming the reference.
unsafe fn wake_by_ref<W: Wakeable>(ptr: *const ()) {
    let target = ManuallyDrop::new(Rc::<W>::from_raw(ptr as *const W));
    target.wake_task();
}

unsafe fn drop_waker<W: Wakeable>(ptr: *const ()) {
    drop(Rc::<W>::from_raw(ptr as *const W));
}
