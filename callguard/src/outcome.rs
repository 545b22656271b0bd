//! Result of one orchestrated call.

/// Where a call's value came from.
///
/// A fallback is never mistaken for a real result: callers match on the
/// variant or check [`is_fallback`](Self::is_fallback).
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    /// The operation ran and succeeded.
    Fresh {
        /// The result.
        value: T,
        /// Attempts it took.
        attempts: u32,
    },
    /// Served from the cache without running the operation.
    Cached {
        /// The cached result.
        value: T,
    },
    /// Every attempt failed; this is the configured fallback.
    Fallback {
        /// The fallback value.
        value: T,
        /// Attempts made.
        attempts: u32,
        /// Message of the last failure.
        last_error: String,
    },
}

impl<T> CallOutcome<T> {
    /// Borrow the value.
    pub fn value(&self) -> &T {
        match self {
            Self::Fresh { value, .. } | Self::Cached { value } | Self::Fallback { value, .. } => {
                value
            }
        }
    }

    /// Take the value.
    pub fn into_value(self) -> T {
        match self {
            Self::Fresh { value, .. } | Self::Cached { value } | Self::Fallback { value, .. } => {
                value
            }
        }
    }

    /// Number of times the operation ran. Zero for cache hits.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fresh { attempts, .. } | Self::Fallback { attempts, .. } => *attempts,
            Self::Cached { .. } => 0,
        }
    }

    /// Check if the operation ran and succeeded.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }

    /// Check if the value came from the cache.
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }

    /// Check if the value is the fallback.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}
