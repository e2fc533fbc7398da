// SPDX-License-Identifier: CC0-1.0

use core::fmt;

/// All the possible errors from a fast store.
#[derive(Debug)]
pub enum StoreError {
    /// Wrapper of a redis client error.
    Redis(redis::RedisError),
    /// An internal mutex was poisoned by a panicking thread.
    Poisoned,
    /// The store returned a value of an unexpected shape.
    BadValue { key: String, detail: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use StoreError::*;

        match self {
            Redis(e) => write!(f, "redis error: {}", e),
            Poisoned => write!(f, "store mutex poisoned"),
            BadValue { key, detail } => write!(f, "bad value under {}: {}", key, detail),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use StoreError::*;

        match self {
            Redis(ref e) => Some(e),
            Poisoned | BadValue { .. } => None,
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self { StoreError::Redis(e) }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self { StoreError::Poisoned }
}
