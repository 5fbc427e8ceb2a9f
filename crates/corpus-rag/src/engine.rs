//! Request orchestration for `retrieve`.
//!
//! # Pipeline
//!
//! ```text
//! query ─► resolve ─► expand ─► build_enhanced_query          (sequential, graph_ms)
//!                                   │
//!            ┌──────────────────────┼──────────────────────┐
//!            ▼                      ▼                      ▼
//!     keyword_search        embed ─► vector_search     graph_search   (tokio::join!)
//!        lexical_ms        embedding_ms   vector_ms      graph_ms
//!            └──────────────────────┼──────────────────────┘
//!                                   ▼
//!             fuse ─► load_contexts ─► persona filter ─► boost ─► enrich
//! ```
//!
//! Every tier runs under its own deadline. A tier that times out or fails
//! is recorded in [`RetrievalMetadata::tier_stats`] with a warning, and
//! fusion proceeds with whatever completed. Only when neither the lexical
//! nor the vector tier completed does the request fail with
//! [`RetrievalError::RetrievalFailed`].
//!
//! All tier futures live inside the `retrieve` future, so dropping it
//! (client disconnect, server request timeout) cancels them together.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use corpus_rag_core::boost::{boost, BoostContext};
use corpus_rag_core::embedding::EmbeddingProvider;
use corpus_rag_core::enrich::{enrich, EnrichContext};
use corpus_rag_core::error::{RetrievalError, RetrievalResult};
use corpus_rag_core::expand::{expand, Expansion};
use corpus_rag_core::fusion::fuse;
use corpus_rag_core::graph::graph_search;
use corpus_rag_core::models::{Entity, SearchResult, Tier};
use corpus_rag_core::params::{Persona, RetrievalParams, TierWeights};
use corpus_rag_core::query::build_enhanced_query;
use corpus_rag_core::resolver::{resolve, Gazetteer};
use corpus_rag_core::store::{ChunkCandidate, ChunkContext, ChunkStore, GraphStore};

use crate::config::{Config, TimeoutsConfig};
use crate::db;
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteStore;

/// Per-request options. Every field falls back to the configured default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieveOptions {
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Clamped to `max_hops_limit`.
    #[serde(default)]
    pub max_hops: Option<usize>,
    #[serde(default)]
    pub tier_weights: Option<TierWeights>,
}

/// How a tier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    /// Completed with at least one candidate.
    Ok,
    /// Completed with no candidates.
    Empty,
    TimedOut,
    Failed,
    /// Not configured (vector tier without an embedding provider).
    Disabled,
}

impl TierStatus {
    pub fn completed(&self) -> bool {
        matches!(self, TierStatus::Ok | TierStatus::Empty)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TierStatus::Ok => "ok",
            TierStatus::Empty => "empty",
            TierStatus::TimedOut => "timed_out",
            TierStatus::Failed => "failed",
            TierStatus::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStat {
    pub tier: Tier,
    pub status: TierStatus,
    pub count: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetadata {
    pub query: String,
    pub expanded_query: String,
    /// Names of entities recognized in the query.
    pub entities_recognized: Vec<String>,
    /// Names of entities reached by relationship expansion.
    pub expanded_entities: Vec<String>,
    /// Tiers that completed and contributed at least one candidate.
    pub tiers_used: Vec<Tier>,
    pub tier_stats: Vec<TierStat>,
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub results: Vec<SearchResult>,
    pub metadata: RetrievalMetadata,
}

/// Outcome of a single tier run.
#[derive(Debug)]
enum TierOutcome {
    Completed(Vec<ChunkCandidate>),
    TimedOut(&'static str),
    Failed(String),
    Disabled,
}

impl TierOutcome {
    fn status(&self) -> TierStatus {
        match self {
            TierOutcome::Completed(c) if c.is_empty() => TierStatus::Empty,
            TierOutcome::Completed(_) => TierStatus::Ok,
            TierOutcome::TimedOut(_) => TierStatus::TimedOut,
            TierOutcome::Failed(_) => TierStatus::Failed,
            TierOutcome::Disabled => TierStatus::Disabled,
        }
    }

    fn reason(&self, tier: Tier) -> Option<String> {
        match self {
            TierOutcome::Completed(_) => None,
            TierOutcome::TimedOut(stage) => Some(format!("{} tier timed out during {}", tier, stage)),
            TierOutcome::Failed(msg) => Some(format!("{} tier failed: {}", tier, msg)),
            TierOutcome::Disabled => Some(format!("{} tier disabled", tier)),
        }
    }
}

/// Run `fut` under `budget`, returning its outcome and elapsed milliseconds.
async fn run_tier<F>(budget: Duration, stage: &'static str, fut: F) -> (TierOutcome, u64)
where
    F: Future<Output = TierOutcome>,
{
    let start = Instant::now();
    let outcome = tokio::time::timeout(budget, fut)
        .await
        .unwrap_or(TierOutcome::TimedOut(stage));
    (outcome, start.elapsed().as_millis() as u64)
}

fn completed(result: anyhow::Result<Vec<ChunkCandidate>>) -> TierOutcome {
    match result {
        Ok(candidates) => TierOutcome::Completed(candidates),
        Err(e) => TierOutcome::Failed(format!("{:#}", e)),
    }
}

/// Resolution and expansion results carried into the tiers.
#[derive(Debug, Default)]
struct GraphContext {
    seeds: Vec<Entity>,
    expansion: Expansion,
    /// Set when resolution or expansion did not finish.
    failure: Option<TierOutcome>,
}

/// Hybrid retrieval over injected stores and an embedding provider.
pub struct RetrievalEngine {
    chunks: Arc<dyn ChunkStore>,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: RetrievalParams,
    timeouts: TimeoutsConfig,
    personas: BTreeMap<String, Persona>,
    gazetteer: Gazetteer,
}

impl RetrievalEngine {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: RetrievalParams,
        timeouts: TimeoutsConfig,
    ) -> Self {
        Self {
            chunks,
            graph,
            embedder,
            params,
            timeouts,
            personas: BTreeMap::new(),
            gazetteer: Gazetteer::builtin(),
        }
    }

    /// Build an engine from a validated [`Config`].
    pub fn from_config(
        config: &Config,
        chunks: Arc<dyn ChunkStore>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::new(
            chunks,
            graph,
            embedder,
            config.retrieval.to_params(),
            config.timeouts.clone(),
        )
        .with_personas(config.personas())
        .with_gazetteer(config.gazetteer())
    }

    /// Open the configured database and embedding provider and build an
    /// engine over them.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let pool = db::connect(config).await?;
        let store = Arc::new(SqliteStore::new(pool).with_embedding_model(embedder.model_name()));
        Ok(Self::from_config(config, store.clone(), store, embedder))
    }

    pub fn with_personas(mut self, personas: BTreeMap<String, Persona>) -> Self {
        self.personas = personas;
        self
    }

    pub fn with_gazetteer(mut self, gazetteer: Gazetteer) -> Self {
        self.gazetteer = gazetteer;
        self
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Resolve entities in `text` and expand them by up to `max_hops`
    /// (clamped to `max_hops_limit`).
    pub async fn resolve_and_expand(
        &self,
        text: &str,
        max_hops: usize,
    ) -> RetrievalResult<(Vec<Entity>, Expansion)> {
        let hops = max_hops.min(self.params.max_hops_limit);
        let seeds = resolve(self.graph.as_ref(), text, &self.gazetteer).await?;
        let expansion = expand(
            self.graph.as_ref(),
            &seeds,
            hops,
            self.params.max_expanded_entities,
        )
        .await?;
        Ok((seeds, expansion))
    }

    async fn graph_context(&self, query: &str, max_hops: usize) -> GraphContext {
        match tokio::time::timeout(self.timeouts.graph(), self.resolve_and_expand(query, max_hops))
            .await
        {
            Ok(Ok((seeds, expansion))) => GraphContext {
                seeds,
                expansion,
                failure: None,
            },
            Ok(Err(e)) => GraphContext {
                failure: Some(TierOutcome::Failed(e.to_string())),
                ..Default::default()
            },
            Err(_) => GraphContext {
                failure: Some(TierOutcome::TimedOut("entity resolution")),
                ..Default::default()
            },
        }
    }

    async fn lexical_tier(&self, enhanced: &str) -> TierOutcome {
        completed(
            self.chunks
                .keyword_search(enhanced, self.params.candidate_k_lexical)
                .await,
        )
    }

    async fn vector_tier(&self, query: &str) -> (TierOutcome, u64) {
        let start = Instant::now();
        if !self.embedder.is_enabled() {
            return (TierOutcome::Disabled, 0);
        }
        let embedded =
            tokio::time::timeout(self.timeouts.embedding(), self.embedder.embed(query)).await;
        let query_vec = match embedded {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                let err = RetrievalError::EmbeddingFailure(format!("{:#}", e));
                let elapsed = start.elapsed().as_millis() as u64;
                return (TierOutcome::Failed(err.to_string()), elapsed);
            }
            Err(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                return (TierOutcome::TimedOut("query embedding"), elapsed);
            }
        };
        let (outcome, _) = run_tier(self.timeouts.vector(), "vector search", async {
            completed(
                self.chunks
                    .vector_search(
                        &query_vec,
                        self.params.candidate_k_vector,
                        self.params.vector_min_similarity,
                    )
                    .await,
            )
        })
        .await;
        (outcome, start.elapsed().as_millis() as u64)
    }

    async fn graph_tier(&self, ctx: &GraphContext) -> TierOutcome {
        if let Some(failure) = &ctx.failure {
            return match failure {
                TierOutcome::TimedOut(stage) => TierOutcome::TimedOut(*stage),
                TierOutcome::Failed(msg) => TierOutcome::Failed(msg.clone()),
                _ => TierOutcome::Completed(Vec::new()),
            };
        }
        completed(
            graph_search(
                self.graph.as_ref(),
                &ctx.seeds,
                &ctx.expansion,
                self.params.candidate_k_graph,
            )
            .await,
        )
    }

    fn validate(&self, query: &str, options: &RetrieveOptions) -> RetrievalResult<Option<Persona>> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery("query must not be empty".into()));
        }
        if options.limit == Some(0) {
            return Err(RetrievalError::InvalidQuery("limit must be >= 1".into()));
        }
        if let Some(weights) = &options.tier_weights {
            weights
                .validate()
                .map_err(|e| RetrievalError::InvalidQuery(e.to_string()))?;
        }
        match &options.persona_id {
            None => Ok(None),
            Some(id) => self
                .personas
                .get(id)
                .cloned()
                .map(Some)
                .ok_or_else(|| RetrievalError::InvalidQuery(format!("unknown persona: {}", id))),
        }
    }

    /// Run the full hybrid pipeline for one query.
    #[tracing::instrument(skip_all, fields(query = %query, persona = ?options.persona_id))]
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> RetrievalResult<RetrievalResponse> {
        let started = Instant::now();
        let persona = self.validate(query, options)?;
        let query = query.trim();
        let limit = options.limit.unwrap_or(self.params.final_limit);
        let max_hops = options.max_hops.unwrap_or(self.params.max_hops);
        let weights = options.tier_weights.unwrap_or(self.params.tier_weights);
        let mut warnings: Vec<String> = Vec::new();

        let graph_ctx = self.graph_context(query, max_hops).await;
        if let Some(failure) = &graph_ctx.failure {
            if let Some(reason) = failure.reason(Tier::Graph) {
                tracing::warn!(%reason, "entity resolution degraded");
            }
        }
        if graph_ctx.expansion.truncated {
            warnings.push(format!(
                "relationship expansion stopped at {} entities",
                self.params.max_expanded_entities
            ));
        }
        let expanded_query = build_enhanced_query(
            query,
            &graph_ctx.expansion.entities,
            self.params.min_entity_name_length,
        );
        tracing::debug!(
            seeds = graph_ctx.seeds.len(),
            expanded = graph_ctx.expansion.entities.len(),
            %expanded_query,
            "graph context ready"
        );

        let (lexical, vector, graph) = tokio::join!(
            run_tier(self.timeouts.lexical(), "keyword search", self.lexical_tier(&expanded_query)),
            self.vector_tier(query),
            run_tier(self.timeouts.graph(), "graph search", self.graph_tier(&graph_ctx)),
        );

        let mut lists: BTreeMap<Tier, Vec<ChunkCandidate>> = BTreeMap::new();
        let mut tier_stats = Vec::with_capacity(3);
        let mut tiers_used = Vec::new();
        let mut reasons = Vec::new();
        for (tier, (outcome, elapsed_ms)) in [
            (Tier::Lexical, lexical),
            (Tier::Vector, vector),
            (Tier::Graph, graph),
        ] {
            let status = outcome.status();
            if let Some(reason) = outcome.reason(tier) {
                if status != TierStatus::Disabled {
                    tracing::warn!(%tier, %reason, "tier degraded");
                    warnings.push(reason.clone());
                }
                reasons.push(reason);
            }
            let count = match outcome {
                TierOutcome::Completed(candidates) => {
                    let n = candidates.len();
                    if n > 0 {
                        tiers_used.push(tier);
                    }
                    lists.insert(tier, candidates);
                    n
                }
                _ => 0,
            };
            tracing::debug!(%tier, status = status.as_str(), count, elapsed_ms, "tier finished");
            tier_stats.push(TierStat {
                tier,
                status,
                count,
                elapsed_ms,
            });
        }

        let primary_completed = tier_stats
            .iter()
            .any(|s| matches!(s.tier, Tier::Lexical | Tier::Vector) && s.status.completed());
        if !primary_completed {
            reasons.retain(|r| !r.starts_with("graph"));
            return Err(RetrievalError::RetrievalFailed { reasons });
        }

        let fused = fuse(&lists, &weights, self.params.rrf_k);
        let ids: Vec<String> = fused.iter().map(|c| c.chunk_id.clone()).collect();

        let contexts: HashMap<String, ChunkContext> = if ids.is_empty() {
            HashMap::new()
        } else {
            self.chunks
                .load_contexts(&ids)
                .await
                .map_err(RetrievalError::store)?
                .into_iter()
                .map(|c| (c.chunk.id.clone(), c))
                .collect()
        };

        let fused: Vec<_> = fused
            .into_iter()
            .filter(|c| match contexts.get(&c.chunk_id) {
                Some(ctx) => persona.as_ref().map_or(true, |p| p.allows(ctx.document.kind)),
                None => false,
            })
            .collect();
        let kept: Vec<String> = fused.iter().map(|c| c.chunk_id.clone()).collect();

        let mut chunk_entities: HashMap<String, Vec<String>> = HashMap::new();
        if !kept.is_empty() {
            match self.graph.mentions_for_chunks(&kept).await {
                Ok(mentions) => {
                    for m in mentions {
                        let ids = chunk_entities.entry(m.chunk_id).or_default();
                        if !ids.contains(&m.entity_id) {
                            ids.push(m.entity_id);
                        }
                    }
                    chunk_entities.values_mut().for_each(|ids| ids.sort());
                }
                Err(e) => {
                    let reason = format!("mention lookup failed: {:#}", e);
                    tracing::warn!(%reason, "boost and enrichment degraded");
                    warnings.push(reason);
                }
            }
        }

        let mut entity_names: HashMap<String, String> = HashMap::new();
        for e in graph_ctx.seeds.iter().chain(graph_ctx.expansion.entities.iter()) {
            entity_names.insert(e.id.clone(), e.name.clone());
        }
        let mut mentioned: Vec<String> = chunk_entities.values().flatten().cloned().collect();
        mentioned.sort();
        mentioned.dedup();
        let mut authority: HashMap<String, f64> = HashMap::new();
        if !mentioned.is_empty() {
            match self.graph.get_entities(&mentioned).await {
                Ok(entities) => {
                    for e in entities {
                        authority.insert(e.id.clone(), e.authority);
                        entity_names.entry(e.id).or_insert(e.name);
                    }
                }
                Err(e) => {
                    let reason = format!("entity authority lookup failed: {:#}", e);
                    tracing::warn!(%reason, "boost degraded");
                    warnings.push(reason);
                }
            }
        }

        let persona_tags: Vec<String> = persona.map(|p| p.tags).unwrap_or_default();
        let mut boosted = boost(
            fused,
            &BoostContext {
                contexts: &contexts,
                chunk_entities: &chunk_entities,
                authority: &authority,
                persona_tags: &persona_tags,
                cap: self.params.boost_cap,
            },
        );
        boosted.truncate(limit);

        let results = enrich(
            boosted,
            &EnrichContext {
                contexts: &contexts,
                chunk_entities: &chunk_entities,
                edges: &graph_ctx.expansion.edges,
                entity_names: &entity_names,
                max_context: self.params.max_relationship_context,
            },
        );

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            results = results.len(),
            tiers_used = ?tiers_used,
            warnings = warnings.len(),
            elapsed_ms,
            "retrieve complete"
        );

        Ok(RetrievalResponse {
            results,
            metadata: RetrievalMetadata {
                query: query.to_string(),
                expanded_query,
                entities_recognized: graph_ctx.seeds.iter().map(|e| e.name.clone()).collect(),
                expanded_entities: graph_ctx
                    .expansion
                    .entities
                    .iter()
                    .map(|e| e.name.clone())
                    .collect(),
                tiers_used,
                tier_stats,
                warnings,
                elapsed_ms,
            },
        })
    }
}
