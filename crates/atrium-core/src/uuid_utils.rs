//! UUID v7 utilities for time-ordered identifiers.
//!
//! Entity ids are stored as strings because user ids come from the external
//! identity provider; ids minted here are hyphenated UUIDv7 strings so they
//! sort by creation time.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Generate a new time-ordered entity id.
pub fn new_entity_id() -> String {
    new_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_version_7() {
        assert_eq!(new_v7().get_version_num(), 7);
    }

    #[test]
    fn test_entity_ids_sort_by_creation() {
        let a = new_entity_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_entity_id();
        assert!(a < b);
    }
}
