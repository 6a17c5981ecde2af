//! Built-in clinical tools: scoring calculators, temporal graph search,
//! drug-safety lookup, safety review, document and literature retrieval, and
//! image analysis.

pub mod calculator;
pub mod clinical_eval;
pub mod documents;
pub mod graph_search;
pub mod literature;
pub mod vision;

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;

use crate::graph::TemporalGraph;
use crate::provider::{Retriever, VisionAnalyzer};

use super::{ToolError, ToolRegistry, ToolResult};

pub use calculator::MedicalCalculatorTool;
pub use clinical_eval::ClinicalEvalTool;
pub use documents::SearchDocumentsTool;
pub use graph_search::{DrugInteractionTool, SearchGraphTool};
pub use literature::PubMedSearchTool;
pub use vision::AnalyzeImageTool;

/// External capabilities behind the optional built-in tools.
#[derive(Clone, Default)]
pub struct Capabilities {
    /// Backs `search_documents`.
    pub documents: Option<Arc<dyn Retriever>>,
    /// Backs `pubmed_search`.
    pub literature: Option<Arc<dyn Retriever>>,
    /// Backs `analyze_image`.
    pub vision: Option<Arc<dyn VisionAnalyzer>>,
}

/// Register every built-in tool whose backing capability is available.
///
/// The calculator, graph, drug-interaction and `clinical_eval` tools are
/// always registered. The rest are skipped when their capability is `None`.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    graph: Arc<TemporalGraph>,
    capabilities: Capabilities,
) -> ToolResult<()> {
    registry.register(Arc::new(MedicalCalculatorTool))?;
    registry.register(Arc::new(SearchGraphTool::new(Arc::clone(&graph))))?;
    registry.register(Arc::new(DrugInteractionTool::new(graph)))?;
    registry.register(Arc::new(ClinicalEvalTool))?;
    if let Some(retriever) = capabilities.documents {
        registry.register(Arc::new(SearchDocumentsTool::new(retriever)))?;
    }
    if let Some(retriever) = capabilities.literature {
        registry.register(Arc::new(PubMedSearchTool::new(retriever)))?;
    }
    if let Some(vision) = capabilities.vision {
        registry.register(Arc::new(AnalyzeImageTool::new(vision)))?;
    }
    Ok(())
}

/// Parse an optional ISO date parameter, defaulting to today.
fn date_param(input: &Value, key: &str, tool: &str) -> ToolResult<NaiveDate> {
    match input.get(key).and_then(Value::as_str) {
        None | Some("") => Ok(chrono::Local::now().date_naive()),
        Some(raw) => raw.parse().map_err(|e| ToolError::InvalidInput {
            tool: tool.into(),
            message: format!("{key} must be an ISO date (YYYY-MM-DD), got \"{raw}\": {e}"),
        }),
    }
}

/// Read a required string parameter. Schema validation normally guarantees it.
fn str_param<'a>(input: &'a Value, key: &str, tool: &str) -> ToolResult<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::execution(tool, format!("missing required parameter: {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn core_tools_register_without_capabilities() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, Arc::new(TemporalGraph::new()), Capabilities::default())
            .unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            ["clinical_eval", "drug_interaction", "medical_calculator", "search_graph"]
        );
    }

    #[tokio::test]
    async fn clinical_eval_runs_through_the_registry() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, Arc::new(TemporalGraph::new()), Capabilities::default())
            .unwrap();

        let out = registry
            .invoke(
                "clinical_eval",
                json!({"proposed_answer": "Give 250-500 mg", "source_context": "Give 500 mg"}),
            )
            .await
            .unwrap()
            .output;
        assert_eq!(out["status"], "rejected");
        assert_eq!(out["flags"], json!(["unsupported figure: 250 mg"]));

        let err = registry.invoke("clinical_eval", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[test]
    fn literature_capability_adds_pubmed_search() {
        let mut registry = ToolRegistry::new();
        let literature: Arc<dyn Retriever> =
            Arc::new(crate::provider::PubMedRetriever::new(Default::default()));
        register_builtin_tools(
            &mut registry,
            Arc::new(TemporalGraph::new()),
            Capabilities {
                literature: Some(literature),
                ..Capabilities::default()
            },
        )
        .unwrap();
        assert!(registry.contains("pubmed_search"));
        assert!(!registry.contains("search_documents"));
    }
}
