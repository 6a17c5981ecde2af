//! Deterministic safety review of a proposed answer.
//!
//! Runs the adjudicator's numeric-grounding check: every dosage or
//! measurement in the answer must also appear in the source context. This is
//! the cheap half of review; the full gate still runs after synthesis.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::adjudicator::unsupported_figures;
use crate::tool::{Tool, ToolDescriptor, ToolResult};

use super::str_param;

const NAME: &str = "clinical_eval";

pub struct ClinicalEvalTool;

#[async_trait]
impl Tool for ClinicalEvalTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            NAME,
            "Check a proposed clinical answer for dosages or measurements that the source \
             context does not support.",
            json!({
                "type": "object",
                "properties": {
                    "proposed_answer": {"type": "string", "description": "The drafted answer to evaluate"},
                    "source_context": {"type": "string", "description": "The evidence the answer was built from"}
                },
                "required": ["proposed_answer"]
            }),
        )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let answer = str_param(&input, "proposed_answer", NAME)?;
        let context = input["source_context"].as_str().unwrap_or_default();
        let flags = unsupported_figures(answer, context);
        let status = if flags.is_empty() { "approved" } else { "rejected" };
        Ok(json!({
            "status": status,
            "grounded": flags.is_empty(),
            "flags": flags,
        }))
    }
}
