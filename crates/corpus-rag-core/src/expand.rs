//! Bounded breadth-first expansion over the knowledge graph.
//!
//! Edges are treated as undirected for traversal (an `implements` edge
//! from "Leia Inc" to "lightfield" connects both ways) but are returned
//! with their stored direction. A visited set keyed by entity id makes the
//! walk terminate on cyclic graphs, and seeds never appear in their own
//! expansion.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{RetrievalError, RetrievalResult};
use crate::models::{Edge, Entity, NodeKind};
use crate::store::GraphStore;

/// Result of [`expand`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    /// Newly reached entities in discovery order, seeds excluded.
    pub entities: Vec<Entity>,
    /// Traversed edges, unique by id, ordered by id.
    pub edges: Vec<Edge>,
    /// Connection strength per expanded entity id:
    /// max over discovering edges of `parent_strength × weight`.
    pub reach: HashMap<String, f64>,
    /// True when `max_entities` stopped the walk early.
    pub truncated: bool,
}

impl Expansion {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.edges.is_empty()
    }
}

/// Expand `seeds` by up to `max_hops` hops, collecting at most
/// `max_entities` new entities.
///
/// Only endpoints that are entities present in the store are expanded;
/// document endpoints and dangling ids are not. Each hop's discoveries are
/// admitted strongest first (ties by id) so the cap is deterministic.
pub async fn expand<G: GraphStore + ?Sized>(
    store: &G,
    seeds: &[Entity],
    max_hops: usize,
    max_entities: usize,
) -> RetrievalResult<Expansion> {
    let mut out = Expansion::default();
    if max_hops == 0 || seeds.is_empty() {
        return Ok(out);
    }

    let mut strength: HashMap<String, f64> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier: Vec<String> = Vec::new();
    for seed in seeds {
        if visited.insert(seed.id.clone()) {
            strength.insert(seed.id.clone(), 1.0);
            frontier.push(seed.id.clone());
        }
    }

    let mut edges_by_id: HashMap<String, Edge> = HashMap::new();

    'hops: for hop in 1..=max_hops {
        if frontier.is_empty() {
            break;
        }
        let frontier_set: HashSet<&str> = frontier.iter().map(String::as_str).collect();
        let mut touching = store
            .edges_touching(&frontier)
            .await
            .map_err(RetrievalError::store)?;
        touching.sort_by(|a, b| a.id.cmp(&b.id));

        let mut discovered: HashMap<String, f64> = HashMap::new();
        for edge in &touching {
            for (node, other_id, other_kind) in [
                (&edge.src_id, &edge.dst_id, edge.dst_type),
                (&edge.dst_id, &edge.src_id, edge.src_type),
            ] {
                if !frontier_set.contains(node.as_str())
                    || other_kind != NodeKind::Entity
                    || visited.contains(other_id)
                {
                    continue;
                }
                let parent = strength.get(node).copied().unwrap_or(0.0);
                let s = parent * edge.weight;
                let slot = discovered.entry(other_id.clone()).or_insert(s);
                if s > *slot {
                    *slot = s;
                }
            }
        }
        for edge in touching {
            edges_by_id.entry(edge.id.clone()).or_insert(edge);
        }

        if discovered.is_empty() {
            break;
        }
        let ids: Vec<String> = discovered.keys().cloned().collect();
        let mut found = store
            .get_entities(&ids)
            .await
            .map_err(RetrievalError::store)?;
        found.sort_by(|a, b| {
            let sa = discovered.get(&a.id).copied().unwrap_or(0.0);
            let sb = discovered.get(&b.id).copied().unwrap_or(0.0);
            sb.partial_cmp(&sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut next = Vec::new();
        for entity in found {
            if !visited.insert(entity.id.clone()) {
                continue;
            }
            if out.entities.len() >= max_entities {
                out.truncated = true;
                break 'hops;
            }
            let s = discovered.get(&entity.id).copied().unwrap_or(0.0);
            strength.insert(entity.id.clone(), s);
            out.reach.insert(entity.id.clone(), s);
            next.push(entity.id.clone());
            out.entities.push(entity);
        }
        debug!(hop, discovered = next.len(), "expansion hop");
        frontier = next;
    }

    // Keep only edges whose entity endpoints were all reached, so every
    // returned edge can be named in full.
    let known: HashSet<&str> = seeds
        .iter()
        .map(|e| e.id.as_str())
        .chain(out.entities.iter().map(|e| e.id.as_str()))
        .collect();
    let mut edges: Vec<Edge> = edges_by_id
        .into_values()
        .filter(|edge| edge.entity_endpoints().all(|id| known.contains(id)))
        .collect();
    edges.sort_by(|a, b| a.id.cmp(&b.id));
    out.edges = edges;
    Ok(out)
}
