//! Knowledge-graph query enhancement.
//!
//! Appends expanded entity names to the user's query as an `OR` list so the
//! lexical tier can pick up chunks that mention related entities without
//! repeating the query words.

use std::collections::HashSet;

use crate::models::Entity;

/// Build `original OR name1 OR name2 ...`.
///
/// Names shorter than `min_name_length` characters, names already present
/// in the original query (case-insensitive), and repeated names are
/// skipped. The original query always comes first, so it is a prefix of
/// the result.
///
/// ```rust
/// use corpus_rag_core::models::{Entity, EntityKind};
/// use corpus_rag_core::query::build_enhanced_query;
///
/// let e = |name: &str| Entity {
///     id: name.to_lowercase(),
///     name: name.to_string(),
///     kind: EntityKind::Technology,
///     authority: 0.0,
///     mention_count: 0,
/// };
/// let q = build_enhanced_query("Leia displays", &[e("lightfield"), e("AI"), e("Leia")], 3);
/// assert_eq!(q, "Leia displays OR lightfield");
/// ```
pub fn build_enhanced_query(original: &str, expanded: &[Entity], min_name_length: usize) -> String {
    let original_lower = original.to_lowercase();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = original.to_string();

    for entity in expanded {
        let name = entity.name.trim();
        if name.chars().count() < min_name_length {
            continue;
        }
        let lower = name.to_lowercase();
        if original_lower.contains(&lower) || !seen.insert(lower) {
            continue;
        }
        out.push_str(" OR ");
        out.push_str(name);
    }
    out
}
