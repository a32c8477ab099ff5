//! # Error Types
//!
//! Errors for the shared entities themselves. Crate-specific failures
//! (bus, registry, loader) are defined next to the code that raises them.

use thiserror::Error;

/// Errors raised while parsing shared entities from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Priority name not one of Low/Normal/High.
    #[error("Unknown priority: {0}")]
    UnknownPriority(String),

    /// Module descriptor is missing a mandatory field.
    #[error("Invalid module descriptor: {0}")]
    InvalidDescriptor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError::UnknownPriority("urgent".into());
        assert_eq!(err.to_string(), "Unknown priority: urgent");
    }
}
