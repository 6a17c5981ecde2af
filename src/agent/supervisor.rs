//! Supervisor: classify the task, delegate to specialists, synthesize a draft
//! and gate it through the adjudicator.
//!
//! Delegations form a [`DelegationPlan`] with explicit dependency edges. The
//! plan is executed stage by stage: specialists in one stage run
//! concurrently, and a stage only starts once every earlier stage finished.
//! A failing specialist is dropped from synthesis without stopping the others.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::config::ReactConfig;
use crate::provider::GenerationRequest;
use crate::tool::ToolRegistry;
use crate::workflow::event::WorkflowEvent;
use crate::workflow::session::{StepStatus, WorkflowType};

use super::adjudicator::{Adjudicator, VerificationVerdict};
use super::context::RunContext;
use super::error::{AgentError, AgentResult};
use super::react::ReactEngine;
use super::specialist::{Severity, Specialist, SpecialistReport};

/// Flag on the verdict when no draft could be produced.
pub const DRAFT_SYNTHESIS_FAILED: &str = "draft synthesis failed";

const SUPERVISOR: &str = "supervisor";

// ---------------------------------------------------------------------------
// Delegation plan
// ---------------------------------------------------------------------------

/// One specialist to run, and the specialists whose findings it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub specialist: Specialist,
    #[serde(default)]
    pub depends_on: Vec<Specialist>,
}

impl Delegation {
    pub fn independent(specialist: Specialist) -> Self {
        Self {
            specialist,
            depends_on: Vec::new(),
        }
    }

    pub fn after(specialist: Specialist, depends_on: &[Specialist]) -> Self {
        Self {
            specialist,
            depends_on: depends_on.to_vec(),
        }
    }
}

/// Validated set of delegations.
///
/// Each specialist appears at most once and every dependency is listed
/// before its dependent, so the plan is acyclic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationPlan {
    delegations: Vec<Delegation>,
}

impl DelegationPlan {
    pub fn new(delegations: Vec<Delegation>) -> AgentResult<Self> {
        let mut seen = BTreeSet::new();
        for d in &delegations {
            if let Some(dep) = d.depends_on.iter().find(|dep| !seen.contains(*dep)) {
                return Err(AgentError::InvalidPlan {
                    message: format!("{} depends on {dep}, which is not planned before it", d.specialist),
                });
            }
            if !seen.insert(d.specialist) {
                return Err(AgentError::InvalidPlan {
                    message: format!("{} is planned twice", d.specialist),
                });
            }
        }
        Ok(Self { delegations })
    }

    /// The default plan for a workflow type, validated like any other plan.
    /// General and research questions are answered directly, without
    /// delegation.
    pub fn for_workflow(workflow_type: WorkflowType) -> AgentResult<Self> {
        use Specialist::*;
        let delegations = match workflow_type {
            WorkflowType::Diagnosis => vec![
                Delegation::independent(DataExtraction),
                Delegation::after(Diagnostics, &[DataExtraction]),
            ],
            WorkflowType::Treatment => vec![
                Delegation::independent(DataExtraction),
                Delegation::after(Pharmacovigilance, &[DataExtraction]),
                Delegation::after(Diagnostics, &[DataExtraction]),
            ],
            WorkflowType::Medication => vec![
                Delegation::independent(Pharmacovigilance),
                Delegation::independent(Diagnostics),
            ],
            WorkflowType::General | WorkflowType::Research => Vec::new(),
        };
        Self::new(delegations)
    }

    pub fn delegations(&self) -> &[Delegation] {
        &self.delegations
    }

    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }

    /// Group delegations into stages: a delegation's stage is one past the
    /// latest stage of its dependencies.
    pub fn stages(&self) -> Vec<Vec<&Delegation>> {
        let mut level: BTreeMap<Specialist, usize> = BTreeMap::new();
        let mut stages: Vec<Vec<&Delegation>> = Vec::new();
        for d in &self.delegations {
            let stage = d
                .depends_on
                .iter()
                .filter_map(|dep| level.get(dep))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(d.specialist, stage);
            if stages.len() <= stage {
                stages.resize_with(stage + 1, Vec::new);
            }
            stages[stage].push(d);
        }
        stages
    }
}

// ---------------------------------------------------------------------------
// Evidence and drafts
// ---------------------------------------------------------------------------

/// One piece of evidence a draft may rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub source: String,
    pub content: String,
}

/// A medication recorded for the patient that drug-safety review flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub medication: String,
    pub severity: Severity,
    pub interacting_drugs: Vec<String>,
    pub description: String,
}

impl fmt::Display for Contradiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "data_extraction lists {} as a current medication, but pharmacovigilance reports a \
             {} interaction ({}): {}",
            self.medication,
            self.severity,
            self.interacting_drugs.join(" + "),
            self.description
        )
    }
}

/// Everything a draft was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceContext {
    pub items: Vec<EvidenceItem>,
    pub contradictions: Vec<Contradiction>,
}

impl EvidenceContext {
    pub fn push(&mut self, source: impl Into<String>, content: impl Into<String>) {
        self.items.push(EvidenceItem {
            source: source.into(),
            content: content.into(),
        });
    }

    /// Evidence from the query and specialist findings, with contradictions detected.
    pub fn from_findings(query: &str, findings: &[SpecialistReport]) -> Self {
        let mut evidence = Self::default();
        evidence.push("query", query);
        for report in findings {
            evidence.push(report.specialist().name(), report.to_json());
        }
        evidence.contradictions = find_contradictions(findings);
        evidence
    }

    /// Plain-text rendering used in prompts and for numeric grounding.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            out.push_str(&format!("[{}] {}\n", item.source, item.content));
        }
        if !self.contradictions.is_empty() {
            out.push_str("\nCONTRADICTIONS (drug-safety findings take precedence):\n");
            for c in &self.contradictions {
                out.push_str(&format!("- {c}\n"));
            }
        }
        out
    }
}

/// Medications from extraction that pharmacovigilance flags as major or
/// contraindicated.
pub fn find_contradictions(findings: &[SpecialistReport]) -> Vec<Contradiction> {
    let medications: Vec<&String> = findings
        .iter()
        .filter_map(|r| match r {
            SpecialistReport::DataExtraction(e) => Some(&e.medications),
            _ => None,
        })
        .flatten()
        .collect();
    let interactions = findings.iter().filter_map(|r| match r {
        SpecialistReport::Pharmacovigilance(p) => Some(&p.interactions),
        _ => None,
    });

    let mut found: Vec<Contradiction> = Vec::new();
    for interaction in interactions.flatten().filter(|i| i.severity.is_serious()) {
        for med in &medications {
            let involved = interaction
                .drugs
                .iter()
                .any(|d| d.trim().eq_ignore_ascii_case(med.trim()));
            let duplicate = found
                .iter()
                .any(|c| c.medication == **med && c.description == interaction.description);
            if involved && !duplicate {
                found.push(Contradiction {
                    medication: (*med).clone(),
                    severity: interaction.severity,
                    interacting_drugs: interaction.drugs.clone(),
                    description: interaction.description.clone(),
                });
            }
        }
    }
    found
}

/// A synthesized answer awaiting review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    pub evidence: EvidenceContext,
}

/// Result of a supervised run.
#[derive(Debug, Clone)]
pub struct SupervisorOutcome {
    pub workflow_type: WorkflowType,
    pub findings: Vec<SpecialistReport>,
    pub draft: Option<Draft>,
    pub verdict: VerificationVerdict,
    /// The approved draft, or a refusal listing the verdict's flags.
    pub answer: String,
}

/// Fixed-shape refusal released instead of a rejected draft.
pub fn refusal(flags: &[String]) -> String {
    let mut text = String::from(
        "I can't provide a verified answer to this question. An independent safety review \
         withheld the drafted answer for the following reasons:\n",
    );
    for flag in flags {
        text.push_str(&format!("- {flag}\n"));
    }
    text.push_str("Please consult a qualified clinician or provide additional source material.");
    text
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor<'a> {
    config: &'a ReactConfig,
    tools: &'a ToolRegistry,
    adjudicator: Adjudicator,
}

impl<'a> Supervisor<'a> {
    pub fn new(config: &'a ReactConfig, tools: &'a ToolRegistry) -> Self {
        Self {
            config,
            tools,
            adjudicator: Adjudicator::new(),
        }
    }

    /// Answer `query`, classifying it first unless a type was requested.
    pub async fn run(
        &self,
        ctx: &RunContext,
        query: &str,
        requested: Option<WorkflowType>,
    ) -> AgentResult<SupervisorOutcome> {
        let workflow_type = match requested {
            Some(t) => t,
            None => self.classify(ctx, query).await?,
        };
        ctx.set_workflow_type(workflow_type)?;

        let plan = DelegationPlan::for_workflow(workflow_type)?;
        let findings = if plan.is_empty() {
            Vec::new()
        } else {
            self.execute_plan(ctx, &plan, query).await?
        };

        let (evidence, preliminary) = if findings.is_empty() {
            if !plan.is_empty() {
                tracing::warn!(%workflow_type, "every specialist failed, answering directly");
            }
            self.direct_run(ctx, query).await?
        } else {
            (EvidenceContext::from_findings(query, &findings), None)
        };

        let draft = self
            .synthesize_draft(ctx, query, evidence, preliminary.as_deref())
            .await?;
        let verdict = match &draft {
            Some(d) => self.adjudicator.review(ctx, d).await?,
            None => VerificationVerdict::rejected(0.0, vec![DRAFT_SYNTHESIS_FAILED.into()]),
        };
        ctx.emit(WorkflowEvent::Verification {
            status: verdict.status(),
            flags: verdict.flags().to_vec(),
            confidence: verdict.confidence(),
        })
        .await;

        let answer = match &draft {
            Some(d) if verdict.is_approved() => d.text.clone(),
            _ => refusal(verdict.flags()),
        };
        Ok(SupervisorOutcome {
            workflow_type,
            findings,
            draft,
            verdict,
            answer,
        })
    }

    /// One generation call; any failure degrades to `general`.
    pub async fn classify(&self, ctx: &RunContext, query: &str) -> AgentResult<WorkflowType> {
        let step = ctx
            .begin_step("Classifying task", "Choosing a workflow", Some(SUPERVISOR))
            .await?;
        let prompt = format!(
            "Classify this clinical request into exactly one workflow type.\n\
             - diagnosis: working out what condition explains the findings\n\
             - treatment: choosing or adjusting a treatment plan\n\
             - medication: drug safety, interactions, dosing\n\
             - research: literature or guideline questions\n\
             - general: anything else\n\n\
             Request:\n{query}\n\n\
             Reply with the single word for the type."
        );
        let classified = match ctx.generate(GenerationRequest::new(prompt)).await? {
            Ok(text) => parse_workflow_type(&text),
            Err(e) => {
                tracing::warn!(error = %e, "classification call failed");
                None
            }
        };
        let (workflow_type, note) = match classified {
            Some(t) => (t, format!("Classified as {t}")),
            None => (
                WorkflowType::General,
                "Classification failed, defaulting to general".to_string(),
            ),
        };
        ctx.finish_step(step, StepStatus::Done, Some(note)).await?;
        Ok(workflow_type)
    }

    /// Run the plan stage by stage and return the surviving findings in plan order.
    pub async fn execute_plan(
        &self,
        ctx: &RunContext,
        plan: &DelegationPlan,
        query: &str,
    ) -> AgentResult<Vec<SpecialistReport>> {
        let mut done: BTreeMap<Specialist, SpecialistReport> = BTreeMap::new();
        for stage in plan.stages() {
            let runs = stage.iter().map(|d| {
                let upstream: Vec<SpecialistReport> = d
                    .depends_on
                    .iter()
                    .filter_map(|dep| done.get(dep).cloned())
                    .collect();
                self.delegate(ctx, d.specialist, query, upstream)
            });
            let results = join_all(runs).await;
            for (delegation, result) in stage.iter().zip(results) {
                match result {
                    Ok(report) => {
                        done.insert(delegation.specialist, report);
                    }
                    Err(e @ AgentError::SpecialistOutput { .. }) => {
                        tracing::warn!(specialist = %delegation.specialist, error = %e, "specialist dropped");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(plan
            .delegations()
            .iter()
            .filter_map(|d| done.remove(&d.specialist))
            .collect())
    }

    async fn delegate(
        &self,
        ctx: &RunContext,
        specialist: Specialist,
        query: &str,
        upstream: Vec<SpecialistReport>,
    ) -> AgentResult<SpecialistReport> {
        let step = ctx
            .begin_step(
                format!("Delegating to {specialist}"),
                format!("{specialist} started with {} upstream findings", upstream.len()),
                Some(specialist.name()),
            )
            .await?;
        match specialist
            .run(ctx, self.config, self.tools, query, &upstream)
            .await
        {
            Ok(report) => {
                ctx.finish_step(step, StepStatus::Done, Some(format!("{specialist} finished")))
                    .await?;
                Ok(report)
            }
            Err(e @ AgentError::SpecialistOutput { .. }) => {
                ctx.finish_step(step, StepStatus::Failed, Some(e.to_string()))
                    .await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Answer with one reasoning loop over the full registry.
    async fn direct_run(
        &self,
        ctx: &RunContext,
        query: &str,
    ) -> AgentResult<(EvidenceContext, Option<String>)> {
        let outcome = ReactEngine::new(self.config, self.tools)
            .with_agent(SUPERVISOR)
            .run(ctx, query)
            .await?;
        let mut evidence = EvidenceContext::default();
        evidence.push("query", query);
        for ex in &outcome.exchanges {
            evidence.push(format!("tool:{}", ex.tool), ex.observation.clone());
        }
        Ok((evidence, Some(outcome.answer)))
    }

    /// One generation call turning evidence into a draft. `None` when the
    /// call failed or produced nothing.
    pub async fn synthesize_draft(
        &self,
        ctx: &RunContext,
        query: &str,
        evidence: EvidenceContext,
        preliminary: Option<&str>,
    ) -> AgentResult<Option<Draft>> {
        let step = ctx
            .begin_step(
                "Synthesizing draft",
                format!(
                    "Combining {} evidence items, {} contradictions",
                    evidence.items.len(),
                    evidence.contradictions.len()
                ),
                Some(SUPERVISOR),
            )
            .await?;

        let mut prompt = format!(
            "Answer the clinical question using only the evidence below. Do not state any \
             dosage or measurement that is absent from the evidence.\n\n\
             Question:\n{query}\n\nEvidence:\n{}",
            evidence.render()
        );
        if !evidence.contradictions.is_empty() {
            prompt.push_str(
                "\nThe evidence contains contradictions. State both conflicting findings \
                 explicitly and give the drug-safety warning precedence.\n",
            );
        }
        if let Some(p) = preliminary {
            prompt.push_str(&format!("\nPreliminary analysis:\n{p}\n"));
        }
        prompt.push_str("\nWrite the answer as plain text.");

        let text = match ctx.generate(GenerationRequest::new(prompt)).await? {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("synthesis returned empty text");
                ctx.finish_step(step, StepStatus::Failed, Some("empty draft".into()))
                    .await?;
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(error = %e, "synthesis call failed");
                ctx.finish_step(step, StepStatus::Failed, Some(format!("{DRAFT_SYNTHESIS_FAILED}: {e}")))
                    .await?;
                return Ok(None);
            }
        };
        ctx.finish_step(step, StepStatus::Done, None).await?;
        Ok(Some(Draft { text, evidence }))
    }
}

/// First workflow type named in a classification reply.
fn parse_workflow_type(text: &str) -> Option<WorkflowType> {
    text.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .find_map(|w| w.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::specialist::{ExtractionReport, Interaction, PharmacovigilanceReport};
    use crate::config::CallLimits;
    use crate::provider::ScriptedGenerator;
    use std::sync::Arc;

    #[test]
    fn default_plans_stage_correctly() {
        let plan = DelegationPlan::for_workflow(WorkflowType::Treatment).unwrap();
        let stages = plan.stages();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0][0].specialist, Specialist::DataExtraction);
        assert_eq!(stages[1].len(), 2);

        let plan = DelegationPlan::for_workflow(WorkflowType::Medication).unwrap();
        assert_eq!(plan.stages().len(), 1);
        assert!(DelegationPlan::for_workflow(WorkflowType::General).unwrap().is_empty());
    }

    #[test]
    fn every_default_plan_passes_validation() {
        for workflow_type in WorkflowType::ALL {
            let plan = DelegationPlan::for_workflow(workflow_type).unwrap();
            let rebuilt = DelegationPlan::new(plan.delegations().to_vec()).unwrap();
            assert_eq!(plan, rebuilt, "{workflow_type}");
        }
    }

    #[test]
    fn invalid_plans_rejected() {
        let dup = DelegationPlan::new(vec![
            Delegation::independent(Specialist::Diagnostics),
            Delegation::independent(Specialist::Diagnostics),
        ]);
        assert!(matches!(dup, Err(AgentError::InvalidPlan { .. })));

        let forward = DelegationPlan::new(vec![
            Delegation::after(Specialist::Diagnostics, &[Specialist::DataExtraction]),
            Delegation::independent(Specialist::DataExtraction),
        ]);
        assert!(matches!(forward, Err(AgentError::InvalidPlan { .. })));
    }

    #[test]
    fn contradiction_detected_for_serious_interactions_only() {
        let findings = vec![
            SpecialistReport::DataExtraction(ExtractionReport {
                medications: vec!["Warfarin".into(), "metformin".into()],
                ..ExtractionReport::default()
            }),
            SpecialistReport::Pharmacovigilance(PharmacovigilanceReport {
                drugs: vec!["warfarin".into(), "aspirin".into()],
                interactions: vec![
                    Interaction {
                        drugs: vec!["warfarin".into(), "aspirin".into()],
                        severity: Severity::Major,
                        description: "bleeding risk".into(),
                    },
                    Interaction {
                        drugs: vec!["metformin".into(), "contrast".into()],
                        severity: Severity::Moderate,
                        description: "lactic acidosis".into(),
                    },
                ],
                warnings: vec![],
            }),
        ];
        let found = find_contradictions(&findings);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].medication, "Warfarin");

        let evidence = EvidenceContext::from_findings("q", &findings);
        assert!(evidence.render().contains("drug-safety findings take precedence"));
    }

    #[test]
    fn classification_reply_parsing() {
        assert_eq!(parse_workflow_type("Medication."), Some(WorkflowType::Medication));
        assert_eq!(parse_workflow_type("type: diagnosis"), Some(WorkflowType::Diagnosis));
        assert_eq!(parse_workflow_type("no idea"), None);
    }

    #[test]
    fn refusal_lists_flags() {
        let text = refusal(&["unsupported figure: 500 mg".into()]);
        assert!(text.contains("- unsupported figure: 500 mg"));
    }

    #[tokio::test]
    async fn failed_classification_defaults_to_general() {
        let generator = Arc::new(ScriptedGenerator::new(["¯\\_(ツ)_/¯"]));
        let (ctx, _rx) = RunContext::standalone("q", generator, CallLimits::default(), 64).unwrap();
        let tools = ToolRegistry::new();
        let config = ReactConfig::default();
        let supervisor = Supervisor::new(&config, &tools);
        assert_eq!(supervisor.classify(&ctx, "q").await.unwrap(), WorkflowType::General);
    }

    #[tokio::test]
    async fn synthesis_failure_fails_closed() {
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"thought": "simple", "final_answer": "Rest and fluids."}"#,
        ]));
        generator.push_failure("model crashed");
        let (ctx, _rx) = RunContext::standalone("q", generator.clone(), CallLimits::default(), 64).unwrap();
        let tools = ToolRegistry::new();
        let config = ReactConfig::default();

        let outcome = Supervisor::new(&config, &tools)
            .run(&ctx, "common cold?", Some(WorkflowType::General))
            .await
            .unwrap();
        assert!(!outcome.verdict.is_approved());
        assert_eq!(outcome.verdict.flags(), [DRAFT_SYNTHESIS_FAILED]);
        assert!(outcome.draft.is_none());
        // No adjudication call was made.
        assert_eq!(generator.prompts().len(), 2);
        assert!(outcome.answer.contains(DRAFT_SYNTHESIS_FAILED));
    }
}
