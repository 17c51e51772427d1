/// The cancellation sentinel.
///
/// Produced at the resume side of a suspension point once the owning
/// cancellation flag has been set (or once the resource being awaited — a
/// channel, an owner — is gone). Task bodies normally let it propagate with
/// `?`, which unwinds the body and in turn cancels whoever was awaiting it;
/// catching it at a suspension point is allowed when a body wants to finish
/// normally despite a dead collaborator.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("task was cancelled")]
pub struct Cancelled;

/// What a suspension point yields: a value, or the cancellation sentinel.
///
/// Every task body has the shape `async { ...; Ok(value) }` with this as its
/// output type, so `?` on inner awaits short-circuits the body on
/// cancellation.
pub type Outcome<T> = std::result::Result<T, Cancelled>;
