//! Core data models used throughout corpus-rag.
//!
//! These are the typed records that flow through retrieval. Store
//! backends parse their rows into these types at the boundary; enum
//! columns go through [`FromStr`] and an unknown value is an error rather
//! than a silent default.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of source artifact a [`Document`] was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Patent,
    Paper,
    Article,
    Note,
    Url,
    Book,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patent => "patent",
            Self::Paper => "paper",
            Self::Article => "article",
            Self::Note => "note",
            Self::Url => "url",
            Self::Book => "book",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "patent" => Self::Patent,
            "paper" => Self::Paper,
            "article" => Self::Article,
            "note" => Self::Note,
            "url" => Self::Url,
            "book" => Self::Book,
            other => bail!("unknown document kind: '{}'", other),
        })
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingestion state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => bail!("unknown processing status: '{}'", other),
        })
    }
}

/// Structured bibliographic metadata attached to a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Publication or filing date, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    /// External identifiers such as `doi` or `patent_number`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identifiers: BTreeMap<String, String>,
}

/// A source artifact in the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub source_url: Option<String>,
    pub metadata: DocumentMetadata,
    pub status: ProcessingStatus,
    /// Persona tags used for tag-affinity boosting.
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A contiguous slice of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub token_count: i64,
    /// SHA-256 of `text`, used for idempotent re-ingestion.
    pub hash: String,
    pub page: Option<i64>,
    pub section: Option<String>,
}

/// Kind of a knowledge-graph entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Organization,
    Product,
    Technology,
    Component,
    Document,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Product => "product",
            Self::Technology => "technology",
            Self::Component => "component",
            Self::Document => "document",
        }
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "person" => Self::Person,
            "organization" => Self::Organization,
            "product" => Self::Product,
            "technology" => Self::Technology,
            "component" => Self::Component,
            "document" => Self::Document,
            other => bail!("unknown entity kind: '{}'", other),
        })
    }
}

/// A canonical knowledge-graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    /// Derived centrality measure, higher is more important.
    pub authority: f64,
    pub mention_count: i64,
}

/// An alternate surface form for exactly one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub alias: String,
    pub entity_id: String,
    pub confidence: f64,
}

/// The type of node at either end of an [`Edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Entity,
    Document,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Document => "document",
        }
    }
}

impl FromStr for NodeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "entity" => Self::Entity,
            "document" => Self::Document,
            other => bail!("unknown node kind: '{}'", other),
        })
    }
}

/// Closed vocabulary of edge relation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Implements,
    UsedIn,
    AuthorOf,
    Cites,
    SimilarTo,
    PartOf,
    DevelopedBy,
    BasedOn,
    Enables,
    CompetesWith,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implements => "implements",
            Self::UsedIn => "used_in",
            Self::AuthorOf => "author_of",
            Self::Cites => "cites",
            Self::SimilarTo => "similar_to",
            Self::PartOf => "part_of",
            Self::DevelopedBy => "developed_by",
            Self::BasedOn => "based_on",
            Self::Enables => "enables",
            Self::CompetesWith => "competes_with",
        }
    }
}

impl FromStr for RelationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "implements" => Self::Implements,
            "used_in" => Self::UsedIn,
            "author_of" => Self::AuthorOf,
            "cites" => Self::Cites,
            "similar_to" => Self::SimilarTo,
            "part_of" => Self::PartOf,
            "developed_by" => Self::DevelopedBy,
            "based_on" => Self::BasedOn,
            "enables" => Self::Enables,
            "competes_with" => Self::CompetesWith,
            other => bail!("unknown relation type: '{}'", other),
        })
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, typed relation between two nodes.
///
/// `weight` is a confidence in `[0, 1]`, not a normalized probability;
/// several edges of different types may connect the same pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub src_id: String,
    pub src_type: NodeKind,
    pub dst_id: String,
    pub dst_type: NodeKind,
    pub relation: RelationType,
    pub weight: f64,
    pub evidence: Option<String>,
    pub evidence_doc_id: Option<String>,
}

impl Edge {
    /// The endpoint opposite `node_id`, with its kind, if `node_id` is
    /// one of this edge's endpoints.
    pub fn other_end(&self, node_id: &str) -> Option<(&str, NodeKind)> {
        if self.src_id == node_id {
            Some((&self.dst_id, self.dst_type))
        } else if self.dst_id == node_id {
            Some((&self.src_id, self.src_type))
        } else {
            None
        }
    }

    /// Entity ids at either end of the edge.
    pub fn entity_endpoints(&self) -> impl Iterator<Item = &str> {
        [(&self.src_id, self.src_type), (&self.dst_id, self.dst_type)]
            .into_iter()
            .filter(|(_, kind)| *kind == NodeKind::Entity)
            .map(|(id, _)| id.as_str())
    }
}

/// Ingestion-time link between an entity and a chunk that names it (or
/// the lead chunk of a document tagged with it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub entity_id: String,
    pub document_id: String,
    pub chunk_id: String,
}

/// One independent ranking signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Lexical,
    Vector,
    Graph,
}

impl Tier {
    /// All tiers in fusion visiting order.
    pub const ALL: [Tier; 3] = [Tier::Lexical, Tier::Vector, Tier::Graph];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Vector => "vector",
            Self::Graph => "graph",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier scores carried by a [`SearchResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierScores {
    pub lexical: Option<f64>,
    pub vector: Option<f64>,
    pub graph: Option<f64>,
    pub fused: f64,
    #[serde(rename = "final")]
    pub final_score: f64,
}

/// An edge attached to a result as provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipContext {
    pub edge_id: String,
    pub relation: RelationType,
    /// Name of the endpoint that tied the edge to this result.
    pub matched_entity: String,
    /// Name of the endpoint at the other end of the edge.
    pub related_entity: String,
    pub evidence: Option<String>,
    pub weight: f64,
}

/// A ranked, annotated chunk. Built per query, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub rank: usize,
    /// Stable marker such as `A1` for answer generation to cite.
    pub citation: String,
    pub chunk_id: String,
    pub chunk_index: i64,
    pub document_id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub source_url: Option<String>,
    pub metadata: DocumentMetadata,
    pub page: Option<i64>,
    pub section: Option<String>,
    pub snippet: String,
    pub scores: TierScores,
    pub relationship_context: Vec<RelationshipContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_type_roundtrip_strings() {
        for s in ["implements", "used_in", "author_of", "cites", "similar_to"] {
            let rel: RelationType = s.parse().unwrap();
            assert_eq!(rel.as_str(), s);
        }
    }

    #[test]
    fn test_unknown_enum_values_rejected() {
        assert!("invented".parse::<RelationType>().is_err());
        assert!("pamphlet".parse::<DocumentKind>().is_err());
        assert!("alien".parse::<EntityKind>().is_err());
        assert!("".parse::<NodeKind>().is_err());
    }

    #[test]
    fn test_edge_other_end_is_undirected() {
        let edge = Edge {
            id: "e1".into(),
            src_id: "a".into(),
            src_type: NodeKind::Entity,
            dst_id: "d1".into(),
            dst_type: NodeKind::Document,
            relation: RelationType::Cites,
            weight: 0.5,
            evidence: None,
            evidence_doc_id: None,
        };
        assert_eq!(edge.other_end("a"), Some(("d1", NodeKind::Document)));
        assert_eq!(edge.other_end("d1"), Some(("a", NodeKind::Entity)));
        assert_eq!(edge.other_end("zzz"), None);
        assert_eq!(edge.entity_endpoints().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_relation_serde_snake_case() {
        let json = serde_json::to_string(&RelationType::UsedIn).unwrap();
        assert_eq!(json, "\"used_in\"");
    }
}
