//! PubMed literature search over NCBI E-utilities, as a [`Retriever`].
//!
//! `esearch` resolves the query to PMIDs and `esummary` fetches their
//! citations. Each article becomes one chunk: `document_id` is the PMID,
//! `document_name` the journal and date, `text` the title.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ProviderError, ProviderResult, RetrievedChunk, Retriever};

/// Configuration for the E-utilities client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubMedConfig {
    /// Register `pubmed_search` in the CLI.
    pub enabled: bool,
    /// Base URL of the E-utilities endpoints.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for PubMedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".into(),
            timeout_secs: 15,
        }
    }
}

/// Literature retriever backed by NCBI E-utilities.
#[derive(Debug, Clone)]
pub struct PubMedRetriever {
    config: PubMedConfig,
}

impl PubMedRetriever {
    pub fn new(config: PubMedConfig) -> Self {
        Self { config }
    }

    fn search_blocking(config: &PubMedConfig, query: &str, max_results: usize) -> ProviderResult<Vec<RetrievedChunk>> {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();

        let retmax = max_results.to_string();
        let found = get_json(
            &agent,
            &config.base_url,
            "esearch.fcgi",
            &[("db", "pubmed"), ("term", query), ("retmode", "json"), ("retmax", &retmax)],
        )?;
        let ids = id_list(&found);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let joined = ids.join(",");
        let summary = get_json(
            &agent,
            &config.base_url,
            "esummary.fcgi",
            &[("db", "pubmed"), ("id", &joined), ("retmode", "json")],
        )?;
        Ok(summaries(&summary, &ids))
    }
}

#[async_trait]
impl Retriever for PubMedRetriever {
    async fn search(&self, query: &str, top_k: usize) -> ProviderResult<Vec<RetrievedChunk>> {
        let config = self.config.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || Self::search_blocking(&config, &query, top_k))
            .await
            .map_err(|e| ProviderError::Request {
                message: format!("literature search task failed: {e}"),
            })?
    }
}

fn get_json(agent: &ureq::Agent, base_url: &str, endpoint: &str, params: &[(&str, &str)]) -> ProviderResult<Value> {
    let url = format!("{}/{endpoint}", base_url.trim_end_matches('/'));
    let request = params
        .iter()
        .fold(agent.get(&url), |request, (key, value)| request.query(key, value));
    let resp = request.call().map_err(|e| match e {
        ureq::Error::Transport(t) => {
            tracing::debug!(error = %t, endpoint, "e-utilities transport failure");
            ProviderError::Unavailable {
                url: base_url.to_string(),
            }
        }
        other => ProviderError::Request {
            message: other.to_string(),
        },
    })?;
    resp.into_json::<Value>().map_err(|e| ProviderError::Parse {
        message: format!("{endpoint}: {e}"),
    })
}

/// PMIDs from an `esearch` response, in rank order.
fn id_list(found: &Value) -> Vec<String> {
    found["esearchresult"]["idlist"]
        .as_array()
        .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// One chunk per PMID present in an `esummary` response, keeping `ids` order.
fn summaries(summary: &Value, ids: &[String]) -> Vec<RetrievedChunk> {
    ids.iter()
        .filter(|id| summary["result"][id.as_str()].is_object())
        .enumerate()
        .map(|(rank, id)| {
            let item = &summary["result"][id.as_str()];
            let field = |key: &str| item[key].as_str().unwrap_or_default().trim().to_string();
            let citation = [field("source"), field("pubdate")]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", ");
            RetrievedChunk {
                document_id: id.clone(),
                document_name: citation,
                chunk_index: rank,
                text: field("title"),
                score: 1.0 / (rank + 1) as f32,
            }
        })
        .collect()
}
