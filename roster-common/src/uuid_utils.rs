//! UUID utilities

use crate::{Error, Result};
use uuid::Uuid;

/// Parse a UUID read back from a database column
///
/// A malformed id in storage is an internal invariant violation, not caller error.
pub fn parse_stored(column: &str, s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Invalid {} '{}': {}", column, s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stored_rejects_garbage() {
        let err = parse_stored("student_id", "not-a-uuid").unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_parse_stored_roundtrip() {
        let id = Uuid::new_v4();
        assert_eq!(parse_stored("id", &id.to_string()).unwrap(), id);
    }
}
