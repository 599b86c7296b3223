//! Structural self-checks for nodes, shells and contexts.
//!
//! Checks run in debug builds and under the `strict-invariants` feature;
//! release builds skip them entirely.

use crate::path_error::PathError;

pub trait DebugInvariants {
    /// Panics with the first violation when checking is enabled.
    fn debug_assert_invariants(&self);
    /// Returns the first violation found.
    fn validate_invariants(&self) -> Result<(), PathError>;
}

/// `Err(InvariantViolation)` carrying `msg()` unless `cond` holds.
#[inline]
pub fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<(), PathError> {
    if cond {
        Ok(())
    } else {
        Err(PathError::InvariantViolation(msg()))
    }
}

/// Runs a fallible check and panics on error when checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($what:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[path invariants] ", $($what)*, ": {}"), e);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_maps_to_invariant_violation() {
        assert!(ensure(true, || unreachable!()).is_ok());
        let err = ensure(1 > 2, || "shell distance went backwards".into()).unwrap_err();
        assert_eq!(err.to_string(), "invariant violated: shell distance went backwards");
    }
}
