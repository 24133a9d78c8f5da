//! Errors returned by queue operations.

use std::fmt;

use thiserror::Error;

/// Error returned by [`LockFreeQueue::try_push`](crate::LockFreeQueue::try_push).
///
/// The rejected value is handed back so the caller keeps ownership.
#[derive(Error, PartialEq, Eq)]
pub enum PushError<T> {
    /// The allocator could not provide storage for the node or its value.
    #[error("failed to allocate a queue node")]
    AllocationFailed(T),
}

impl<T> PushError<T> {
    /// Recover the value that could not be pushed.
    pub fn into_inner(self) -> T {
        match self {
            PushError::AllocationFailed(value) => value,
        }
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::AllocationFailed(_) => f.write_str("AllocationFailed(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Opaque(u8);

    #[test]
    fn test_push_error_returns_value() {
        let err = PushError::AllocationFailed(Opaque(7));
        assert_eq!(err.to_string(), "failed to allocate a queue node");
        assert_eq!(format!("{:?}", err), "AllocationFailed(..)");
        assert_eq!(err.into_inner().0, 7);
    }
}
