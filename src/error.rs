//! Error type for the collision engine.
//!
//! Tunable setters, body registration and pair dispatch return
//! `Result<T, CollisionError>`. Numerical degeneracies are not errors; they
//! resolve to "no hit" / "no spin" inside the geometry code.

use core::fmt;

use crate::body::Token;

/// Unified error type for collision operations.
#[derive(Clone, Debug, PartialEq)]
pub enum CollisionError {
    /// A tunable was assigned a value outside its documented range.
    /// The previous value stays in effect.
    OutOfRange {
        /// Name of the tunable
        name: &'static str,
        /// The rejected value
        value: f32,
    },
    /// The response routines were called on a pair they cannot resolve,
    /// e.g. one side has no mass or velocity.
    UnsupportedPair {
        /// Token of the first body
        first: Token,
        /// Token of the second body
        second: Token,
    },
    /// A fixed-capacity buffer is full.
    CapacityExceeded {
        /// What resource was exhausted
        resource: &'static str,
        /// The limit that was hit
        limit: usize,
    },
    /// No live body carries this token.
    UnknownToken(Token),
    /// A body with this token is already registered.
    DuplicateToken(Token),
}

impl fmt::Display for CollisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { name, value } => {
                write!(f, "{name} out of range: {value}")
            }
            Self::UnsupportedPair { first, second } => {
                write!(f, "cannot resolve collision between {first} and {second}")
            }
            Self::CapacityExceeded { resource, limit } => {
                write!(f, "{resource} capacity exceeded (limit={limit})")
            }
            Self::UnknownToken(token) => write!(f, "no body with token {token}"),
            Self::DuplicateToken(token) => write!(f, "token {token} already registered"),
        }
    }
}

#[cfg(feature = "std")]
extern crate std;

#[cfg(feature = "std")]
impl std::error::Error for CollisionError {}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, CollisionError>;

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::format;

    #[test]
    fn test_out_of_range_display() {
        let e = CollisionError::OutOfRange {
            name: "penetration_threshold_percent",
            value: 1.5,
        };
        let s = format!("{}", e);
        assert!(s.contains("penetration_threshold_percent"));
        assert!(s.contains("1.5"));
    }

    #[test]
    fn test_unsupported_pair_display() {
        let e = CollisionError::UnsupportedPair {
            first: Token(3),
            second: Token(9),
        };
        let s = format!("{}", e);
        assert!(s.contains('3'));
        assert!(s.contains('9'));
    }

    #[test]
    fn test_variants_differ() {
        let a = CollisionError::UnknownToken(Token(1));
        let b = CollisionError::DuplicateToken(Token(1));
        assert_ne!(a, b);
    }
}
