//! Document search over the configured [`Retriever`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::provider::Retriever;
use crate::tool::{Tool, ToolDescriptor, ToolError, ToolResult};

use super::str_param;

const DEFAULT_TOP_K: usize = 5;

pub struct SearchDocumentsTool {
    retriever: Arc<dyn Retriever>,
}

impl SearchDocumentsTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "search_documents",
            "Search uploaded clinical documents for protocols, guidelines or patient history.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The medical query to search for"},
                    "top_k": {"type": "integer", "minimum": 1, "maximum": 50, "description": "Number of results (default 5)"}
                },
                "required": ["query"]
            }),
        )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let query = str_param(&input, "query", "search_documents")?;
        let top_k = input["top_k"]
            .as_u64()
            .map(|k| k as usize)
            .unwrap_or(DEFAULT_TOP_K);
        let chunks = self
            .retriever
            .search(query, top_k)
            .await
            .map_err(|e| ToolError::execution("search_documents", e.to_string()))?;
        let results: Vec<Value> = chunks
            .into_iter()
            .map(|c| {
                json!({
                    "source": c.document_name,
                    "document_id": c.document_id,
                    "chunk_index": c.chunk_index,
                    "text": c.text,
                    "score": c.score,
                })
            })
            .collect();
        Ok(json!({ "results": results }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderResult, RetrievedChunk};

    struct FixedRetriever;

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, query: &str, top_k: usize) -> ProviderResult<Vec<RetrievedChunk>> {
            Ok((0..top_k.min(2))
                .map(|i| RetrievedChunk {
                    document_id: format!("doc-{i}"),
                    document_name: "guideline.pdf".into(),
                    chunk_index: i,
                    text: format!("{query} chunk {i}"),
                    score: 1.0 - i as f32 * 0.1,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn maps_chunks_with_source() {
        let tool = SearchDocumentsTool::new(Arc::new(FixedRetriever));
        let out = tool.invoke(json!({"query": "sepsis bundle"})).await.unwrap();
        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["source"], "guideline.pdf");
        assert_eq!(results[1]["text"], "sepsis bundle chunk 1");
    }
}
