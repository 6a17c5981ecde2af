//! PubMed literature search over a literature [`Retriever`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::provider::Retriever;
use crate::tool::{Tool, ToolDescriptor, ToolError, ToolResult};

use super::str_param;

const NAME: &str = "pubmed_search";
const DEFAULT_MAX_RESULTS: usize = 3;

pub struct PubMedSearchTool {
    retriever: Arc<dyn Retriever>,
}

impl PubMedSearchTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for PubMedSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            NAME,
            "Search PubMed for recent medical literature.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search terms"},
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 20, "description": "Number of articles (default 3)"}
                },
                "required": ["query"]
            }),
        )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let query = str_param(&input, "query", NAME)?;
        let max_results = input["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);
        let articles = self
            .retriever
            .search(query, max_results)
            .await
            .map_err(|e| ToolError::execution(NAME, e.to_string()))?;
        let results: Vec<Value> = articles
            .into_iter()
            .map(|a| {
                json!({
                    "id": a.document_id,
                    "title": a.text,
                    "citation": a.document_name,
                    "url": format!("https://pubmed.ncbi.nlm.nih.gov/{}/", a.document_id),
                })
            })
            .collect();
        Ok(json!({ "results": results }))
    }
}
