//! Entity resolution: free text to canonical knowledge-graph entities.
//!
//! Three sources are consulted:
//!
//! 1. Entity display names.
//! 2. Aliases, resolved to their owning entity.
//! 3. A fixed-vocabulary [`Gazetteer`], only when 1 and 2 found nothing.
//!
//! All matching is case-insensitive substring containment, so inflected
//! forms ("displays", "lightfields") still resolve. Results are
//! deduplicated by entity id and ordered by where they first appear in the
//! text, then by name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RetrievalError, RetrievalResult};
use crate::models::{Alias, Entity, EntityKind};
use crate::store::GraphStore;
use crate::text::find_substring;

/// Prefix of ids synthesized for gazetteer terms with no stored entity.
pub const GAZETTEER_ID_PREFIX: &str = "gazetteer:";

/// A surface term and the canonical entity name it stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazetteerEntry {
    pub term: String,
    pub canonical: String,
    #[serde(default = "default_gazetteer_kind")]
    pub kind: EntityKind,
}

fn default_gazetteer_kind() -> EntityKind {
    EntityKind::Technology
}

/// Fixed vocabulary used when the graph knows nothing about a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Gazetteer {
    entries: Vec<GazetteerEntry>,
}

const BUILTIN_TERMS: &[(&str, &str)] = &[
    ("lightfield", "lightfield"),
    ("light field", "lightfield"),
    ("light-field", "lightfield"),
    ("holography", "holography"),
    ("holographic", "holography"),
    ("hologram", "holography"),
    ("autostereoscopic", "autostereoscopic display"),
    ("glasses-free 3d", "autostereoscopic display"),
    ("3d display", "3d display"),
    ("multiview", "multiview display"),
    ("multi-view", "multiview display"),
    ("diffractive backlighting", "diffractive backlighting"),
    ("diffractive backlight", "diffractive backlighting"),
    ("lenticular", "lenticular lens"),
    ("parallax barrier", "parallax barrier"),
    ("eye tracking", "eye tracking"),
    ("head tracking", "eye tracking"),
    ("volumetric display", "volumetric display"),
    ("augmented reality", "augmented reality"),
    ("virtual reality", "virtual reality"),
];

impl Gazetteer {
    pub fn new(entries: Vec<GazetteerEntry>) -> Self {
        Self { entries }
    }

    /// The built-in display-technology vocabulary.
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_TERMS
                .iter()
                .map(|(term, canonical)| GazetteerEntry {
                    term: term.to_string(),
                    canonical: canonical.to_string(),
                    kind: EntityKind::Technology,
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[GazetteerEntry] {
        &self.entries
    }

    /// Entries whose term occurs in `text`, one per canonical name, with
    /// the earliest match position. Ordered by position, then canonical.
    pub fn lookup(&self, text: &str) -> Vec<(usize, &GazetteerEntry)> {
        let lower = text.to_lowercase();
        let mut best: HashMap<String, (usize, &GazetteerEntry)> = HashMap::new();
        for entry in &self.entries {
            if let Some(pos) = find_substring(&lower, &entry.term.to_lowercase()) {
                let key = entry.canonical.to_lowercase();
                match best.get(&key) {
                    Some((existing, _)) if *existing <= pos => {}
                    _ => {
                        best.insert(key, (pos, entry));
                    }
                }
            }
        }
        let mut hits: Vec<_> = best.into_values().collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.canonical.cmp(&b.1.canonical)));
        hits
    }
}

impl Default for Gazetteer {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Lowercase, dash-separated form of a name: `"Light Field"` → `"light-field"`.
pub fn slug(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Match `text` against entity names and aliases.
///
/// Pure; the caller supplies the candidate sets. Aliases pointing at an
/// entity not present in `entities` are ignored.
pub fn match_entities(text: &str, entities: &[Entity], aliases: &[Alias]) -> Vec<Entity> {
    let lower = text.to_lowercase();
    let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut hits: Vec<(&str, usize)> = Vec::new();
    for entity in entities {
        if let Some(pos) = find_substring(&lower, &entity.name.to_lowercase()) {
            hits.push((entity.id.as_str(), pos));
        }
    }
    for alias in aliases {
        if !by_id.contains_key(alias.entity_id.as_str()) {
            continue;
        }
        if let Some(pos) = find_substring(&lower, &alias.alias.to_lowercase()) {
            hits.push((alias.entity_id.as_str(), pos));
        }
    }

    let mut first_pos: HashMap<&str, usize> = HashMap::new();
    for (id, pos) in hits {
        let slot = first_pos.entry(id).or_insert(pos);
        *slot = (*slot).min(pos);
    }

    let mut matched: Vec<(usize, &Entity)> = first_pos
        .into_iter()
        .filter_map(|(id, pos)| by_id.get(id).map(|e| (pos, *e)))
        .collect();
    matched.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.name.cmp(&b.1.name))
            .then_with(|| a.1.id.cmp(&b.1.id))
    });
    matched.into_iter().map(|(_, e)| e.clone()).collect()
}

/// Resolve `text` to entities using the graph store, falling back to the
/// gazetteer when neither names nor aliases match.
///
/// Gazetteer hits resolve to the stored entity of the same canonical name
/// when one exists; otherwise a transient entity with id
/// `gazetteer:<slug>` is synthesized. Store errors become
/// [`RetrievalError::StoreUnavailable`].
pub async fn resolve<G: GraphStore + ?Sized>(
    store: &G,
    text: &str,
    gazetteer: &Gazetteer,
) -> RetrievalResult<Vec<Entity>> {
    let entities = store.all_entities().await.map_err(RetrievalError::store)?;
    let aliases = store.all_aliases().await.map_err(RetrievalError::store)?;

    let matched = match_entities(text, &entities, &aliases);
    if !matched.is_empty() {
        debug!(count = matched.len(), "entities resolved from graph");
        return Ok(matched);
    }

    let mut resolved: Vec<Entity> = Vec::new();
    for (_, entry) in gazetteer.lookup(text) {
        let entity = match store
            .find_entity_by_name(&entry.canonical)
            .await
            .map_err(RetrievalError::store)?
        {
            Some(stored) => stored,
            None => Entity {
                id: format!("{}{}", GAZETTEER_ID_PREFIX, slug(&entry.canonical)),
                name: entry.canonical.clone(),
                kind: entry.kind,
                authority: 0.0,
                mention_count: 0,
            },
        };
        if !resolved.iter().any(|e| e.id == entity.id) {
            resolved.push(entity);
        }
    }
    if !resolved.is_empty() {
        debug!(count = resolved.len(), "entities resolved from gazetteer");
    }
    Ok(resolved)
}
