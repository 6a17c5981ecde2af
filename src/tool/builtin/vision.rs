//! Image analysis through the configured [`VisionAnalyzer`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::provider::VisionAnalyzer;
use crate::tool::{Tool, ToolDescriptor, ToolError, ToolResult};

use super::str_param;

pub struct AnalyzeImageTool {
    vision: Arc<dyn VisionAnalyzer>,
}

impl AnalyzeImageTool {
    pub fn new(vision: Arc<dyn VisionAnalyzer>) -> Self {
        Self { vision }
    }
}

#[async_trait]
impl Tool for AnalyzeImageTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "analyze_image",
            "Analyze a previously uploaded medical image.",
            json!({
                "type": "object",
                "properties": {
                    "image_id": {"type": "string", "description": "Identifier of the stored image"},
                    "question": {"type": "string", "description": "Specific question about the image"}
                },
                "required": ["image_id"]
            }),
        )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let image_id = str_param(&input, "image_id", "analyze_image")?;
        let question = input["question"].as_str().filter(|q| !q.is_empty());
        let report = self
            .vision
            .analyze(image_id, question)
            .await
            .map_err(|e| ToolError::execution("analyze_image", e.to_string()))?;
        serde_json::to_value(report)
            .map_err(|e| ToolError::execution("analyze_image", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, ProviderResult, VisionReport};

    struct StubVision {
        fail: bool,
    }

    #[async_trait]
    impl VisionAnalyzer for StubVision {
        async fn analyze(&self, image_ref: &str, context: Option<&str>) -> ProviderResult<VisionReport> {
            if self.fail {
                return Err(ProviderError::Request {
                    message: "vision backend down".into(),
                });
            }
            Ok(VisionReport {
                summary: format!("{image_ref}: {}", context.unwrap_or("general review")),
                findings: vec!["right lower lobe opacity".into()],
                ..VisionReport::default()
            })
        }
    }

    #[tokio::test]
    async fn forwards_question_as_context() {
        let tool = AnalyzeImageTool::new(Arc::new(StubVision { fail: false }));
        let out = tool
            .invoke(json!({"image_id": "cxr-7", "question": "pneumonia?"}))
            .await
            .unwrap();
        assert_eq!(out["summary"], "cxr-7: pneumonia?");
        assert_eq!(out["findings"][0], "right lower lobe opacity");
    }

    #[tokio::test]
    async fn backend_failure_is_execution_error() {
        let tool = AnalyzeImageTool::new(Arc::new(StubVision { fail: true }));
        assert!(matches!(
            tool.invoke(json!({"image_id": "cxr-7"})).await,
            Err(ToolError::Execution { .. })
        ));
    }
}
