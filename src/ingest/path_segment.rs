//! Path-segment validation shared by the modern and legacy endpoints.
//!
//! Spec §4.5 step 3 ("ValidatePath"): reject a segment that is empty, `.`,
//! or contains `..`, before it is ever used to build a filesystem path or
//! an allow-list lookup key. This is distinct from the allow-list's own
//! reserved-name filter (which runs once at config-load time over trusted
//! file content) but enforces the same rule against untrusted request
//! input, on every request.

use crate::error::IngestError;

pub fn validate_segment(segment: &str) -> Result<(), IngestError> {
    if segment.is_empty() || segment == "." || segment.contains("..") {
        Err(IngestError::PathInvalid)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_segment() {
        assert!(validate_segment("insights-desktop").is_ok());
    }

    #[test]
    fn rejects_empty_dot_and_traversal() {
        assert!(validate_segment("").is_err());
        assert!(validate_segment(".").is_err());
        assert!(validate_segment("..").is_err());
        assert!(validate_segment("a/../b").is_err());
        assert!(validate_segment("../etc").is_err());
    }
}
