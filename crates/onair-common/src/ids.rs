//! Prefixed ID generation.
//!
//! Users and audit rows use a `prefix_` followed by a UUIDv7
//! (time-ordered), making them sortable by creation time and instantly
//! identifiable in logs. Channels and destinations keep numeric surrogate
//! ids assigned by the database.

use uuid::Uuid;

fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Generate a user ID: `usr_<uuid7>`
pub fn user_id() -> String {
    prefixed_id("usr")
}

/// Generate an audit log entry ID: `adt_<uuid7>`
pub fn audit_id() -> String {
    prefixed_id("adt")
}

/// Generate an organization ID: `org_<uuid7>`
pub fn org_id() -> String {
    prefixed_id("org")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_correct_prefix() {
        assert!(user_id().starts_with("usr_"));
        assert!(audit_id().starts_with("adt_"));
        assert!(org_id().starts_with("org_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(user_id(), user_id());
    }

    #[test]
    fn ids_are_sortable_by_time() {
        let a = audit_id();
        let b = audit_id();
        assert!(b > a, "Expected {b} > {a}");
    }
}
