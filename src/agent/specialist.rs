//! Specialist agents: reasoning loops with a role, a tool subset and a
//! typed output contract.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ReactConfig;
use crate::tool::ToolRegistry;

use super::context::RunContext;
use super::error::{AgentError, AgentResult};
use super::extract_json_object;
use super::react::{FinishReason, ReactEngine};

/// The closed set of specialists the supervisor can delegate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialist {
    DataExtraction,
    Pharmacovigilance,
    Diagnostics,
}

impl Specialist {
    pub fn name(self) -> &'static str {
        match self {
            Self::DataExtraction => "data_extraction",
            Self::Pharmacovigilance => "pharmacovigilance",
            Self::Diagnostics => "diagnostics",
        }
    }

    /// Tools this specialist may call. Unregistered ones are skipped.
    pub fn tools(self) -> &'static [&'static str] {
        match self {
            Self::DataExtraction => &[],
            Self::Pharmacovigilance => &["search_graph", "drug_interaction"],
            Self::Diagnostics => &[
                "search_documents",
                "pubmed_search",
                "search_graph",
                "medical_calculator",
                "analyze_image",
            ],
        }
    }

    fn role(self) -> &'static str {
        match self {
            Self::DataExtraction => {
                "You are a clinical data extraction specialist. Extract structured facts \
                 from the supplied text only. Do not infer anything that is not written."
            }
            Self::Pharmacovigilance => {
                "You are a pharmacovigilance specialist. Identify every drug involved, check \
                 each one for interactions, contraindications and adverse events with your \
                 tools, and grade each finding's severity."
            }
            Self::Diagnostics => {
                "You are a diagnostic reasoning specialist. Gather evidence with your tools \
                 and produce a ranked differential diagnosis with probabilities."
            }
        }
    }

    fn contract(self) -> &'static str {
        match self {
            Self::DataExtraction => {
                r#"{"vitals": {"<name>": <value>}, "medications": ["..."], "conditions": ["..."], "history": ["..."]}"#
            }
            Self::Pharmacovigilance => {
                r#"{"drugs": ["..."], "interactions": [{"drugs": ["...", "..."], "severity": "minor" | "moderate" | "major" | "contraindicated", "description": "..."}], "warnings": ["..."]}"#
            }
            Self::Diagnostics => {
                r#"{"differentials": [{"condition": "...", "probability": <0..1>, "rationale": "..."}]}"#
            }
        }
    }

    fn preamble(self) -> String {
        format!(
            "{}\n\nWhen you give your final_answer it must be a JSON object of this exact shape:\n{}",
            self.role(),
            self.contract()
        )
    }

    /// Run this specialist's loop on `query`, with upstream findings as context.
    pub async fn run(
        self,
        ctx: &RunContext,
        config: &ReactConfig,
        tools: &ToolRegistry,
        query: &str,
        upstream: &[SpecialistReport],
    ) -> AgentResult<SpecialistReport> {
        let subset = tools.subset(self.tools());
        let mut task = format!("Clinical question:\n{query}");
        if !upstream.is_empty() {
            task.push_str("\n\nFindings from other specialists:\n");
            for report in upstream {
                task.push_str(&format!("[{}] {}\n", report.specialist().name(), report.to_json()));
            }
        }

        let outcome = ReactEngine::new(config, &subset)
            .with_agent(self.name())
            .with_preamble(self.preamble())
            .run(ctx, &task)
            .await?;

        if outcome.finish != FinishReason::Answered {
            return Err(self.output_error(format!(
                "no final answer ({})",
                match outcome.finish {
                    FinishReason::IterationLimit => "iteration limit reached",
                    _ => "reasoning step failed",
                }
            )));
        }
        self.parse(&outcome.answer)
    }

    fn output_error(self, message: impl Into<String>) -> AgentError {
        AgentError::SpecialistOutput {
            specialist: self.name().into(),
            message: message.into(),
        }
    }

    /// Parse a final answer against this specialist's contract.
    pub fn parse(self, answer: &str) -> AgentResult<SpecialistReport> {
        let object = extract_json_object(answer)
            .ok_or_else(|| self.output_error("final answer is not a JSON object"))?;
        let contract_err = |e: serde_json::Error| self.output_error(format!("contract violation: {e}"));
        match self {
            Self::DataExtraction => {
                let report: ExtractionReport = serde_json::from_str(object).map_err(contract_err)?;
                Ok(SpecialistReport::DataExtraction(report))
            }
            Self::Pharmacovigilance => {
                let report: PharmacovigilanceReport =
                    serde_json::from_str(object).map_err(contract_err)?;
                if let Some(bad) = report.interactions.iter().find(|i| i.drugs.is_empty()) {
                    return Err(self.output_error(format!(
                        "interaction \"{}\" names no drugs",
                        bad.description
                    )));
                }
                Ok(SpecialistReport::Pharmacovigilance(report))
            }
            Self::Diagnostics => {
                let report: DiagnosticsReport = serde_json::from_str(object).map_err(contract_err)?;
                if report.differentials.is_empty() {
                    return Err(self.output_error("differentials must not be empty"));
                }
                if let Some(d) = report
                    .differentials
                    .iter()
                    .find(|d| !(0.0..=1.0).contains(&d.probability))
                {
                    return Err(self.output_error(format!(
                        "probability {} for {} is outside [0, 1]",
                        d.probability, d.condition
                    )));
                }
                Ok(SpecialistReport::Diagnostics(report))
            }
        }
    }
}

impl fmt::Display for Specialist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Output contracts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractionReport {
    #[serde(default)]
    pub vitals: BTreeMap<String, Value>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub history: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
    Contraindicated,
}

impl Severity {
    /// Severe enough to override other findings.
    pub fn is_serious(self) -> bool {
        self >= Self::Major
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Major => "major",
            Self::Contraindicated => "contraindicated",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub drugs: Vec<String>,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PharmacovigilanceReport {
    #[serde(default)]
    pub drugs: Vec<String>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Differential {
    pub condition: String,
    pub probability: f64,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub differentials: Vec<Differential>,
}

/// A specialist's parsed findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "specialist", rename_all = "snake_case")]
pub enum SpecialistReport {
    DataExtraction(ExtractionReport),
    Pharmacovigilance(PharmacovigilanceReport),
    Diagnostics(DiagnosticsReport),
}

impl SpecialistReport {
    pub fn specialist(&self) -> Specialist {
        match self {
            Self::DataExtraction(_) => Specialist::DataExtraction,
            Self::Pharmacovigilance(_) => Specialist::Pharmacovigilance,
            Self::Diagnostics(_) => Specialist::Diagnostics,
        }
    }

    /// Compact JSON of the findings alone.
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::DataExtraction(r) => serde_json::to_value(r),
            Self::Pharmacovigilance(r) => serde_json::to_value(r),
            Self::Diagnostics(r) => serde_json::to_value(r),
        };
        value.map(|v| v.to_string()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallLimits;
    use crate::provider::ScriptedGenerator;
    use std::sync::Arc;

    #[test]
    fn extraction_contract() {
        let report = Specialist::DataExtraction
            .parse(r#"{"vitals": {"bp": "150/90"}, "medications": ["warfarin"]}"#)
            .unwrap();
        match report {
            SpecialistReport::DataExtraction(r) => {
                assert_eq!(r.medications, ["warfarin"]);
                assert!(r.conditions.is_empty());
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[test]
    fn pharmacovigilance_rejects_unknown_severity() {
        let err = Specialist::Pharmacovigilance
            .parse(r#"{"drugs": ["a"], "interactions": [{"drugs": ["a", "b"], "severity": "scary", "description": ""}]}"#)
            .unwrap_err();
        assert!(matches!(err, AgentError::SpecialistOutput { specialist, .. } if specialist == "pharmacovigilance"));
    }

    #[test]
    fn diagnostics_requires_differentials_in_range() {
        assert!(Specialist::Diagnostics.parse(r#"{"differentials": []}"#).is_err());
        assert!(Specialist::Diagnostics
            .parse(r#"{"differentials": [{"condition": "ACS", "probability": 1.4, "rationale": ""}]}"#)
            .is_err());
        assert!(Specialist::Diagnostics
            .parse(r#"{"differentials": [{"condition": "ACS", "probability": 0.6, "rationale": "ECG"}]}"#)
            .is_ok());
        assert!(Specialist::Diagnostics.parse("probably ACS").is_err());
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Contraindicated.is_serious());
        assert!(Severity::Major.is_serious());
        assert!(!Severity::Moderate.is_serious());
    }

    #[test]
    fn literature_search_is_a_diagnostics_tool() {
        assert!(Specialist::Diagnostics.tools().contains(&"pubmed_search"));
        assert!(!Specialist::Pharmacovigilance.tools().contains(&"pubmed_search"));
        assert!(Specialist::DataExtraction.tools().is_empty());
    }

    #[tokio::test]
    async fn run_labels_steps_and_restricts_tools() {
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"thought": "read it", "final_answer": {"vitals": {}, "medications": ["metformin"], "conditions": ["t2dm"], "history": []}}"#,
        ]));
        let (ctx, _rx) = RunContext::standalone("q", generator.clone(), CallLimits::default(), 64).unwrap();
        let tools = ToolRegistry::new();

        let report = Specialist::DataExtraction
            .run(&ctx, &ReactConfig::default(), &tools, "diabetic on metformin", &[])
            .await
            .unwrap();
        assert_eq!(report.specialist(), Specialist::DataExtraction);
        assert_eq!(ctx.session_snapshot().steps[0].agent.as_deref(), Some("data_extraction"));
        assert!(generator.prompts()[0].contains("(none: answer from the task text only)"));
    }

    #[tokio::test]
    async fn unanswered_run_is_output_error() {
        let generator = Arc::new(ScriptedGenerator::new(["garbage", "more garbage"]));
        let (ctx, _rx) = RunContext::standalone("q", generator, CallLimits::default(), 64).unwrap();
        let err = Specialist::Diagnostics
            .run(&ctx, &ReactConfig::default(), &ToolRegistry::new(), "q", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SpecialistOutput { .. }));
    }
}
