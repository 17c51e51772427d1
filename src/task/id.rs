use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identifier stamped on every task frame.
///
/// Purely diagnostic: it shows up in `Debug` output and trace events. Ids
/// are never reused, and their numeric order says nothing about when tasks
/// start or finish.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Id(NonZeroU64);

impl Id {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);

        match NonZeroU64::new(NEXT.fetch_add(1, Ordering::Relaxed)) {
            Some(id) => Self(id),
            // Zero only comes back once the counter has wrapped all of u64,
            // i.e. after 2^64 - 1 tasks.
            None => panic!("task id counter wrapped around"),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
