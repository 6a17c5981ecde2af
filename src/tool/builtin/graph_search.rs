//! Temporal graph tools: point-in-time entity search and drug-safety lookup.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::graph::TemporalGraph;
use crate::tool::{Tool, ToolDescriptor, ToolResult};

use super::{date_param, str_param};

/// Relation types the drug-safety lookup reports.
pub const DRUG_SAFETY_RELATIONS: [&str; 3] =
    ["INTERACTS_WITH", "CONTRAINDICATED_WITH", "ADVERSE_EVENT"];

/// Relations of an entity active on a date.
pub struct SearchGraphTool {
    graph: Arc<TemporalGraph>,
}

impl SearchGraphTool {
    pub fn new(graph: Arc<TemporalGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Tool for SearchGraphTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "search_graph",
            "Search the temporal knowledge graph for an entity's relationships \
             (treatments, conditions, drug interactions) active on a specific date.",
            json!({
                "type": "object",
                "properties": {
                    "entity": {"type": "string", "description": "Entity id, e.g. 'patient-1' or 'lisinopril'"},
                    "target_date": {"type": "string", "description": "ISO date (YYYY-MM-DD). Defaults to today."}
                },
                "required": ["entity"]
            }),
        )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let entity = str_param(&input, "entity", "search_graph")?;
        let date = date_param(&input, "target_date", "search_graph")?;
        let relations = self.graph.describe_active_at(entity, date);
        let label = self.graph.entity(entity).map(|e| e.label);
        Ok(json!({
            "entity": entity,
            "label": label,
            "date": date,
            "relations": relations,
        }))
    }
}

/// Interactions, contraindications and adverse events recorded for a drug.
pub struct DrugInteractionTool {
    graph: Arc<TemporalGraph>,
}

impl DrugInteractionTool {
    pub fn new(graph: Arc<TemporalGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Tool for DrugInteractionTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "drug_interaction",
            "Check recorded interactions, contraindications and adverse events for a drug.",
            json!({
                "type": "object",
                "properties": {
                    "drug_name": {"type": "string", "description": "Drug entity id"},
                    "target_date": {"type": "string", "description": "ISO date (YYYY-MM-DD). Defaults to today."}
                },
                "required": ["drug_name"]
            }),
        )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let drug = str_param(&input, "drug_name", "drug_interaction")?;
        let date = date_param(&input, "target_date", "drug_interaction")?;
        let findings: Vec<_> = self
            .graph
            .describe_active_at(drug, date)
            .into_iter()
            .filter(|r| DRUG_SAFETY_RELATIONS.contains(&r.relation_type.as_str()))
            .collect();
        let known = self.graph.entity(drug).is_some();
        Ok(json!({
            "drug": drug,
            "known": known,
            "date": date,
            "findings": findings,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Properties, RelationDirection};
    use crate::tool::ToolError;

    fn date(s: &str) -> chrono::NaiveDate {
        s.parse().unwrap()
    }

    fn graph() -> Arc<TemporalGraph> {
        let g = TemporalGraph::new();
        for (id, label) in [("warfarin", "Drug"), ("aspirin", "Drug"), ("patient-1", "Patient")] {
            g.add_entity(id, label, Properties::new());
        }
        g.add_relation("warfarin", "aspirin", "INTERACTS_WITH", date("2000-01-01"), None)
            .unwrap();
        g.add_relation("patient-1", "warfarin", "TOOK", date("2022-01-01"), Some(date("2022-06-01")))
            .unwrap();
        Arc::new(g)
    }

    #[tokio::test]
    async fn search_graph_respects_date() {
        let tool = SearchGraphTool::new(graph());
        let out = tool
            .invoke(json!({"entity": "patient-1", "target_date": "2022-03-01"}))
            .await
            .unwrap();
        assert_eq!(out["relations"].as_array().unwrap().len(), 1);
        assert_eq!(out["label"], "Patient");

        let out = tool
            .invoke(json!({"entity": "patient-1", "target_date": "2023-01-01"}))
            .await
            .unwrap();
        assert!(out["relations"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_entity_is_empty_not_error() {
        let tool = SearchGraphTool::new(graph());
        let out = tool.invoke(json!({"entity": "nobody"})).await.unwrap();
        assert!(out["relations"].as_array().unwrap().is_empty());
        assert!(out["label"].is_null());
    }

    #[tokio::test]
    async fn bad_date_is_invalid_input() {
        let tool = SearchGraphTool::new(graph());
        let err = tool
            .invoke(json!({"entity": "patient-1", "target_date": "March 1st"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn drug_interaction_filters_safety_relations() {
        let tool = DrugInteractionTool::new(graph());
        let out = tool
            .invoke(json!({"drug_name": "warfarin", "target_date": "2022-03-01"}))
            .await
            .unwrap();
        let findings: Vec<crate::graph::ActiveRelation> =
            serde_json::from_value(out["findings"].clone()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].relation_type, "INTERACTS_WITH");
        assert_eq!(findings[0].counterpart_id, "aspirin");
        assert_eq!(findings[0].direction, RelationDirection::Outgoing);
        assert_eq!(out["known"], true);
    }
}
