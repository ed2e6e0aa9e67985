//! Evidence Model / Global Evidence Index (§4.2). Owns the one copy of every
//! raw result fetched during a run, de-duplicated by stable fingerprint, plus
//! the goal-id associations needed to answer "what evidence does goal X have".

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use recon_core::model::{ProcessedEvidence, RawResult};
use recon_core::prompt::ModelRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

use crate::invoker::PromptInvoker;

/// Canonicalizes a URL for de-dup purposes: lowercases scheme/host and strips
/// common tracking query parameters. Returns `None` for unparseable URLs.
#[must_use]
pub fn canonicalize_url(raw_url: &str) -> Option<String> {
    let mut url = Url::parse(raw_url).ok()?;
    let _ = url.set_scheme(&url.scheme().to_lowercase());
    if let Some(host) = url.host_str() {
        let host = host.to_lowercase();
        let _ = url.set_host(Some(&host));
    }

    const TRACKING_PARAMS: &[&str] = &[
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_term",
        "utm_content",
        "fbclid",
        "gclid",
        "ref",
    ];

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if retained.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&retained);
    }

    url.set_fragment(None);
    Some(url.as_str().to_string())
}

/// Computes the stable de-dup fingerprint for a candidate raw result (§3.1):
/// canonical URL if present, else `source_id|normalized(title)|hash(content prefix)`.
#[must_use]
pub fn fingerprint(source_id: &str, title: &str, url: Option<&str>, raw_content: &str) -> String {
    if let Some(url) = url.and_then(canonicalize_url) {
        return url;
    }

    const PREFIX_CHARS: usize = 512;
    let prefix: String = raw_content.chars().take(PREFIX_CHARS).collect();
    let normalized_title = title.trim().to_lowercase();
    let hash = xxh3_64(prefix.as_bytes());
    format!("{source_id}|{normalized_title}|{hash:016x}")
}

/// Applies an LLM-backed extractor to a raw result, producing a goal-focused
/// [`ProcessedEvidence`] projection (§4.2, §4.4 `summarization`/`extraction` template).
#[async_trait]
pub trait EvidenceExtractor: Send + Sync {
    /// Extracts facts, entities, dates, and a short summary for `goal_id`.
    async fn extract(&self, goal_id: &str, raw: &RawResult) -> anyhow::Result<ProcessedEvidence>;
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ExtractionResponse {
    summary: String,
    #[serde(default)]
    extracted_facts: Vec<String>,
    #[serde(default)]
    extracted_entities: Vec<String>,
    #[serde(default)]
    extracted_dates: Vec<(String, String)>,
    #[serde(default)]
    relevance_score: f32,
    #[serde(default)]
    relevance_reasoning: String,
}

/// In-scope [`EvidenceExtractor`] backed by the `summarization`/`extraction`
/// template via a [`PromptInvoker`] (§6.2).
pub struct LlmEvidenceExtractor<'a> {
    invoker: &'a PromptInvoker,
    model_alias: &'static str,
}

impl std::fmt::Debug for LlmEvidenceExtractor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmEvidenceExtractor").field("model_alias", &self.model_alias).finish_non_exhaustive()
    }
}

impl<'a> LlmEvidenceExtractor<'a> {
    /// Creates an extractor backed by `invoker`.
    #[must_use]
    pub const fn new(invoker: &'a PromptInvoker) -> Self {
        Self { invoker, model_alias: ModelRole::Summarization.as_str() }
    }
}

#[async_trait]
impl EvidenceExtractor for LlmEvidenceExtractor<'_> {
    async fn extract(&self, goal_id: &str, raw: &RawResult) -> anyhow::Result<ProcessedEvidence> {
        let vars = json!({
            "goal_id": goal_id,
            "title": raw.title,
            "content": raw.raw_content,
            "url": raw.url,
        });
        let (response, _usage) = self
            .invoker
            .invoke::<ExtractionResponse>("summarization", vars, ModelRole::Summarization)
            .await?;
        Ok(ProcessedEvidence {
            raw_result_id: 0,
            extracted_facts: response.extracted_facts,
            extracted_entities: response.extracted_entities,
            extracted_dates: response.extracted_dates,
            relevance_score: response.relevance_score,
            relevance_reasoning: response.relevance_reasoning,
            summary: response.summary,
            goal_id: goal_id.to_string(),
            extracted_by_model: self.model_alias.to_string(),
        })
    }
}

/// Deduplicated store of every raw result fetched this run, with the
/// goal-to-raw association maps needed to answer "what evidence does goal X
/// have" (§4.2, §3.1 `GlobalEvidenceIndex`).
#[derive(Debug, Default)]
pub struct GlobalEvidenceIndex {
    raws: Vec<RawResult>,
    fingerprint_to_id: HashMap<String, u64>,
    goal_to_raws: HashMap<String, HashSet<u64>>,
    raw_to_goals: HashMap<u64, HashSet<String>>,
}

impl GlobalEvidenceIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `raw`, returning its id and whether it was newly inserted
    /// (invariant 1: raws are immutable once inserted; invariant 2 / law L1:
    /// re-inserting the same fingerprint does not grow the index).
    pub fn insert_raw(&mut self, raw: RawResult) -> (u64, bool) {
        let fp = fingerprint(
            &raw.source_id,
            &raw.title,
            raw.url.as_deref(),
            &raw.raw_content,
        );

        if let Some(&existing_id) = self.fingerprint_to_id.get(&fp) {
            return (existing_id, false);
        }

        let id = self.raws.len() as u64;
        self.fingerprint_to_id.insert(fp, id);
        self.raws.push(raw);
        (id, true)
    }

    /// Idempotently records that `goal_id` contributed or consumed `raw_id`
    /// (law L2).
    pub fn associate(&mut self, goal_id: &str, raw_id: u64) {
        self.goal_to_raws
            .entry(goal_id.to_string())
            .or_default()
            .insert(raw_id);
        self.raw_to_goals
            .entry(raw_id)
            .or_default()
            .insert(goal_id.to_string());
    }

    /// Fetches a raw result by id.
    #[must_use]
    pub fn get(&self, raw_id: u64) -> Option<&RawResult> {
        self.raws.get(raw_id as usize)
    }

    /// All raws associated with `goal_id`, in insertion order.
    #[must_use]
    pub fn list_for_goal(&self, goal_id: &str) -> Vec<&RawResult> {
        let Some(ids) = self.goal_to_raws.get(goal_id) else {
            return Vec::new();
        };
        let mut ids: Vec<u64> = ids.iter().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// Raw ids associated with `goal_id`.
    #[must_use]
    pub fn raw_ids_for_goal(&self, goal_id: &str) -> HashSet<u64> {
        self.goal_to_raws.get(goal_id).cloned().unwrap_or_default()
    }

    /// Raws associated with `goal_id` that are not in `prior_raw_ids` — used
    /// to compute "what did this query add?" (§4.2).
    #[must_use]
    pub fn list_new_since(&self, goal_id: &str, prior_raw_ids: &HashSet<u64>) -> Vec<&RawResult> {
        let Some(ids) = self.goal_to_raws.get(goal_id) else {
            return Vec::new();
        };
        let mut new_ids: Vec<u64> = ids
            .iter()
            .copied()
            .filter(|id| !prior_raw_ids.contains(id))
            .collect();
        new_ids.sort_unstable();
        new_ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// Total number of distinct raws in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raws.len()
    }

    /// Whether the index holds no raws yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raws.is_empty()
    }

    /// Goals that have contributed to or consumed `raw_id`.
    #[must_use]
    pub fn goals_for_raw(&self, raw_id: u64) -> HashSet<String> {
        self.raw_to_goals.get(&raw_id).cloned().unwrap_or_default()
    }

    /// Applies `extractor` to each of `raw_ids`, producing goal-focused
    /// projections (§4.2 `project`).
    pub async fn project(
        &self,
        goal_id: &str,
        raw_ids: &[u64],
        extractor: &dyn EvidenceExtractor,
    ) -> anyhow::Result<Vec<ProcessedEvidence>> {
        let mut out = Vec::with_capacity(raw_ids.len());
        for &raw_id in raw_ids {
            let Some(raw) = self.get(raw_id) else {
                continue;
            };
            let mut processed = extractor.extract(goal_id, raw).await?;
            processed.raw_result_id = raw_id;
            out.push(processed);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(source: &str, title: &str, url: Option<&str>, content: &str) -> RawResult {
        RawResult {
            api_response: serde_json::json!({}),
            source_id: source.to_string(),
            query_params: "q".to_string(),
            fetched_at: 0,
            response_time_ms: 0,
            title: title.to_string(),
            url: url.map(str::to_string),
            raw_content: content.to_string(),
            structured_date: None,
            content_dates: Vec::new(),
        }
    }

    #[test]
    fn insert_is_deduplicated_by_fingerprint_i1_l1() {
        let mut index = GlobalEvidenceIndex::new();
        let (id1, inserted1) = index.insert_raw(raw(
            "usaspending",
            "Lockheed wins contract",
            Some("https://example.com/a?utm_source=x"),
            "content",
        ));
        assert!(inserted1);

        let (id2, inserted2) = index.insert_raw(raw(
            "usaspending",
            "Lockheed wins contract (dup)",
            Some("https://EXAMPLE.com/a?utm_source=y"),
            "different content",
        ));

        assert_eq!(id1, id2, "same canonical URL must dedup to the same id");
        assert!(!inserted2);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn insert_without_url_hashes_content_prefix() {
        let mut index = GlobalEvidenceIndex::new();
        let (id1, _) = index.insert_raw(raw("gov", "Title A", None, "alpha content"));
        let (id2, _) = index.insert_raw(raw("gov", "Title B", None, "beta content"));
        assert_ne!(id1, id2);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn associate_is_idempotent_l2() {
        let mut index = GlobalEvidenceIndex::new();
        let (id, _) = index.insert_raw(raw("gov", "t", None, "c"));
        index.associate("goal-1", id);
        index.associate("goal-1", id);
        assert_eq!(index.raw_ids_for_goal("goal-1").len(), 1);
    }

    #[test]
    fn list_new_since_only_returns_unseen_raws() {
        let mut index = GlobalEvidenceIndex::new();
        let (id1, _) = index.insert_raw(raw("gov", "t1", None, "c1"));
        index.associate("goal-1", id1);

        let mut prior = HashSet::new();
        prior.insert(id1);

        let (id2, _) = index.insert_raw(raw("gov", "t2", None, "c2"));
        index.associate("goal-1", id2);

        let new_raws = index.list_new_since("goal-1", &prior);
        assert_eq!(new_raws.len(), 1);
        assert_eq!(new_raws[0].title, "t2");
    }

    #[test]
    fn raw_content_is_never_truncated_i2() {
        let long_content = "x".repeat(10_000);
        let mut index = GlobalEvidenceIndex::new();
        let (id, _) = index.insert_raw(raw("gov", "t", None, &long_content));
        assert_eq!(index.get(id).unwrap().raw_content.len(), long_content.len());
    }
}
