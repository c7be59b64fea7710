//! Entity tags for optimistic concurrency
//!
//! An entity tag is a SHA-256 digest over an explicit, ordered projection of
//! an entity's scalar fields. Each tagged entity lists its own
//! `(name, canonical value)` pairs, which keeps the canonical form auditable
//! and avoids any runtime reflection.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// An entity that can be projected into a canonical scalar form.
///
/// Implementations must return every simple scalar field (ids, strings,
/// enums as ordinals, timestamps) and nothing else. Field order does not
/// matter; the tag computation sorts by name.
pub trait TaggedEntity {
    fn scalar_fields(&self) -> Vec<(&'static str, String)>;
}

/// Canonical rendering for optional values; absent fields still contribute
/// to the digest so Some("") and None produce different tags.
pub fn opt<T: ToString>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "<null>".to_string(),
    }
}

/// Canonical rendering for timestamps (UTC RFC 3339, microsecond precision).
pub fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Canonical rendering for optional timestamps.
pub fn opt_timestamp(value: &Option<DateTime<Utc>>) -> String {
    match value {
        Some(v) => timestamp(v),
        None => "<null>".to_string(),
    }
}

/// Compute the quoted entity tag for the current state of an entity.
pub fn compute<T: TaggedEntity>(entity: &T) -> String {
    let mut fields = entity.scalar_fields();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    let canonical = fields
        .iter()
        .map(|(name, value)| format!("{}:{}", name, value))
        .collect::<Vec<_>>()
        .join("|");

    let digest = Sha256::digest(canonical.as_bytes());
    format!("\"{}\"", hex::encode(digest))
}

/// Check an `If-Match` header against the current entity state.
///
/// A missing header or `*` passes. Otherwise the header is split on commas,
/// weak prefixes and quotes are stripped, and one candidate must exactly
/// match the tag of the entity as it exists now (not as the client last saw
/// it).
pub fn is_if_match_satisfied<T: TaggedEntity>(header: Option<&str>, current: &T) -> bool {
    let header = match header {
        Some(value) if !value.trim().is_empty() => value,
        _ => return true,
    };

    let current_tag = normalize_tag(&compute(current));
    header
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .any(|candidate| candidate == "*" || normalize_tag(candidate) == current_tag)
}

fn normalize_tag(tag: &str) -> String {
    let mut normalized = tag.trim();
    if let Some(stripped) = normalized.strip_prefix("W/") {
        normalized = stripped.trim();
    }
    if normalized.len() >= 2 && normalized.starts_with('"') && normalized.ends_with('"') {
        normalized = &normalized[1..normalized.len() - 1];
    }
    normalized.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Widget {
        id: u32,
        name: String,
        status: u8,
        updated_at: Option<DateTime<Utc>>,
    }

    impl TaggedEntity for Widget {
        fn scalar_fields(&self) -> Vec<(&'static str, String)> {
            vec![
                ("id", self.id.to_string()),
                ("name", self.name.clone()),
                ("status", self.status.to_string()),
                ("updated_at", opt_timestamp(&self.updated_at)),
            ]
        }
    }

    fn widget() -> Widget {
        Widget {
            id: 7,
            name: "drill".to_string(),
            status: 0,
            updated_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_equal_snapshots_yield_equal_tags() {
        assert_eq!(compute(&widget()), compute(&widget()));
    }

    #[test]
    fn test_any_scalar_change_changes_tag() {
        let base = compute(&widget());

        let mut changed = widget();
        changed.name = "saw".to_string();
        assert_ne!(compute(&changed), base);

        let mut changed = widget();
        changed.status = 1;
        assert_ne!(compute(&changed), base);

        let mut changed = widget();
        changed.updated_at = None;
        assert_ne!(compute(&changed), base);
    }

    #[test]
    fn test_tag_is_quoted() {
        let tag = compute(&widget());
        assert!(tag.starts_with('"') && tag.ends_with('"'));
    }

    #[test]
    fn test_if_match_missing_or_star_passes() {
        assert!(is_if_match_satisfied(None, &widget()));
        assert!(is_if_match_satisfied(Some(""), &widget()));
        assert!(is_if_match_satisfied(Some("*"), &widget()));
    }

    #[test]
    fn test_if_match_exact_and_weak() {
        let tag = compute(&widget());
        assert!(is_if_match_satisfied(Some(&tag), &widget()));
        assert!(is_if_match_satisfied(Some(&format!("W/{}", tag)), &widget()));
        assert!(is_if_match_satisfied(
            Some(&format!("\"deadbeef\", {}", tag)),
            &widget()
        ));
    }

    #[test]
    fn test_if_match_stale_tag_fails() {
        let mut stale = widget();
        stale.status = 2;
        let stale_tag = compute(&stale);
        assert!(!is_if_match_satisfied(Some(&stale_tag), &widget()));
        assert!(!is_if_match_satisfied(Some("\"deadbeef\""), &widget()));
    }
}
