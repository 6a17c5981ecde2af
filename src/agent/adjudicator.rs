//! Independent review of a draft answer before release.
//!
//! Two checks run on every draft:
//!
//! 1. A deterministic numeric-grounding pass: every measurement or dosage
//!    figure (value + unit) in the draft must also occur in the evidence.
//! 2. An adversarial generation call that looks for untraceable claims and
//!    unsafe recommendations, answering `{status, confidence, flags}`.
//!
//! Review fails closed: a failed or malformed adjudication is a rejection.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::provider::GenerationRequest;
use crate::workflow::session::StepStatus;

use super::context::RunContext;
use super::error::{AgentError, AgentResult};
use super::extract_json_object;
use super::supervisor::Draft;

/// Flag used when the review itself could not be completed.
pub const ADJUDICATION_FAILED: &str = "adjudication failed";

/// Flag added when a verdict is rejected without any stated reason.
const UNSPECIFIED_REJECTION: &str = "rejected without a stated reason";

/// Units recognised as measurements or dosages, lowercase.
const UNITS: &[&str] = &[
    "mg", "mcg", "µg", "ug", "g", "kg", "ml", "l", "mg/kg", "mg/dl", "mg/l", "mmol/l",
    "mmol", "meq", "meq/l", "iu", "unit", "units", "mmhg", "bpm", "%", "ml/min", "ml/h",
    "mg/day", "mg/kg/day", "mcg/kg/min", "cm", "mm", "hours", "hrs", "h", "days",
];

/// A value (or `low-high` range) followed by a unit token. Values may carry
/// thousands separators (`2,000`).
static FIGURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<low>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)
        (?:\s?[-–]\s?(?P<high>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?))?
        \s?(?P<unit>[A-Za-zµ%][A-Za-zµ%/]*)",
    )
    .expect("figure regex is valid")
});

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Approved,
    Rejected,
}

/// Outcome of a review.
///
/// Invariant: `flags` is empty exactly when the status is `approved`. Every
/// constructor (and deserialization) enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawVerdict")]
pub struct VerificationVerdict {
    status: VerdictStatus,
    confidence: f64,
    flags: Vec<String>,
}

#[derive(Deserialize)]
struct RawVerdict {
    status: VerdictStatus,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    flags: Vec<String>,
}

impl From<RawVerdict> for VerificationVerdict {
    fn from(raw: RawVerdict) -> Self {
        Self::from_parts(raw.status, raw.confidence, raw.flags)
    }
}

impl VerificationVerdict {
    pub fn approved(confidence: f64) -> Self {
        Self {
            status: VerdictStatus::Approved,
            confidence: clamp_confidence(confidence),
            flags: Vec::new(),
        }
    }

    pub fn rejected(confidence: f64, flags: Vec<String>) -> Self {
        let mut flags: Vec<String> = flags
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if flags.is_empty() {
            flags.push(UNSPECIFIED_REJECTION.into());
        }
        Self {
            status: VerdictStatus::Rejected,
            confidence: clamp_confidence(confidence),
            flags,
        }
    }

    /// Normalize an arbitrary (status, flags) pair: approval with flags is a rejection.
    pub fn from_parts(status: VerdictStatus, confidence: f64, flags: Vec<String>) -> Self {
        let has_flags = flags.iter().any(|f| !f.trim().is_empty());
        match status {
            VerdictStatus::Approved if !has_flags => Self::approved(confidence),
            _ => Self::rejected(confidence, flags),
        }
    }

    /// Fail-closed rejection for a review that could not be completed.
    pub fn review_failed() -> Self {
        Self::rejected(0.0, vec![ADJUDICATION_FAILED.into()])
    }

    pub fn status(&self) -> VerdictStatus {
        self.status
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn is_approved(&self) -> bool {
        self.status == VerdictStatus::Approved
    }

    /// Add flags, turning an approval into a rejection.
    pub fn with_extra_flags(self, extra: Vec<String>) -> Self {
        if extra.is_empty() {
            return self;
        }
        let mut flags = self.flags;
        for flag in extra {
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
        Self::rejected(self.confidence, flags)
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Parse adjudicator output into a verdict.
pub fn parse_verdict(text: &str) -> AgentResult<VerificationVerdict> {
    let object = extract_json_object(text).ok_or_else(|| AgentError::AdjudicationParse {
        message: "no JSON object in adjudicator output".into(),
    })?;
    let mut value: serde_json::Value =
        serde_json::from_str(object).map_err(|e| AgentError::AdjudicationParse {
            message: e.to_string(),
        })?;
    // Models often shout the status.
    if let Some(status) = value.get_mut("status") {
        if let Some(s) = status.as_str() {
            *status = serde_json::Value::String(s.trim().to_lowercase());
        }
    }
    let raw: RawVerdict = serde_json::from_value(value).map_err(|e| AgentError::AdjudicationParse {
        message: e.to_string(),
    })?;
    Ok(raw.into())
}

// ---------------------------------------------------------------------------
// Numeric grounding
// ---------------------------------------------------------------------------

/// Every (normalized value, unit, as written) figure in `text`. Both ends of
/// a range are reported with the shared unit.
fn figures(text: &str) -> Vec<(String, String, String)> {
    let mut found = Vec::new();
    for cap in FIGURE.captures_iter(text) {
        let raw_unit = &cap["unit"];
        let Some(unit) = recognised_unit(raw_unit) else {
            continue;
        };
        let shown_unit = display_unit(raw_unit, &unit);
        for value in [cap.name("low"), cap.name("high")].into_iter().flatten() {
            let written = value.as_str();
            let Ok(parsed) = written.replace(',', "").parse::<f64>() else {
                continue;
            };
            found.push((parsed.to_string(), unit.clone(), format!("{written} {shown_unit}")));
        }
    }
    found
}

/// Map a unit token to a known unit, trying the part before a `/` when the
/// whole token is unknown (`mg/dose` → `mg`).
fn recognised_unit(token: &str) -> Option<String> {
    let lower = token.to_lowercase();
    let lower = lower.trim_end_matches('/');
    if UNITS.contains(&lower) {
        return Some(lower.to_string());
    }
    let head = lower.split('/').next()?;
    UNITS.contains(&head).then(|| head.to_string())
}

fn display_unit<'a>(raw: &'a str, unit: &str) -> &'a str {
    raw.get(..unit.len()).unwrap_or(raw)
}

/// Figures in `draft` that do not occur in `evidence`, as flags.
pub fn unsupported_figures(draft: &str, evidence: &str) -> Vec<String> {
    let grounded: BTreeSet<(String, String)> = figures(evidence)
        .into_iter()
        .map(|(value, unit, _)| (value, unit))
        .collect();
    let mut seen = BTreeSet::new();
    figures(draft)
        .into_iter()
        .filter(|(value, unit, _)| !grounded.contains(&(value.clone(), unit.clone())))
        .filter_map(|(value, unit, shown)| {
            seen.insert((value, unit))
                .then(|| format!("unsupported figure: {shown}"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Reviewer
// ---------------------------------------------------------------------------

/// Adversarial reviewer.
#[derive(Debug, Default)]
pub struct Adjudicator;

impl Adjudicator {
    pub fn new() -> Self {
        Self
    }

    /// Review `draft` against the evidence it was built from.
    ///
    /// Only cancellation is returned as an error; every other failure
    /// becomes a rejected verdict.
    pub async fn review(&self, ctx: &RunContext, draft: &Draft) -> AgentResult<VerificationVerdict> {
        let step = ctx
            .begin_step(
                "Verifying draft",
                "Independent review of the draft against the evidence",
                Some("adjudicator"),
            )
            .await?;

        let evidence = draft.evidence.render();
        let grounding_flags = unsupported_figures(&draft.text, &evidence);

        let request = GenerationRequest::new(review_prompt(&draft.text, &evidence));
        let verdict = match ctx.generate(request).await? {
            Ok(text) => parse_verdict(&text).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "adjudicator output unusable, rejecting");
                VerificationVerdict::review_failed()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "adjudication call failed, rejecting");
                VerificationVerdict::review_failed()
            }
        }
        .with_extra_flags(grounding_flags);

        tracing::info!(
            status = ?verdict.status(),
            confidence = verdict.confidence(),
            flags = verdict.flags().len(),
            "draft adjudicated"
        );
        let summary = if verdict.is_approved() {
            format!("Approved (confidence {:.2})", verdict.confidence())
        } else {
            format!("Rejected: {}", verdict.flags().join("; "))
        };
        ctx.finish_step(step, StepStatus::Done, Some(summary)).await?;
        Ok(verdict)
    }
}

fn review_prompt(draft: &str, evidence: &str) -> String {
    format!(
        "You are an independent clinical safety reviewer. Your job is to find reasons NOT to \
         release the draft below.\n\n\
         Reject the draft if any of these hold:\n\
         - a clinical claim cannot be traced to the evidence\n\
         - a recommendation is unsafe or contraindicated given the evidence\n\
         - a dosage or numeric value does not appear in the evidence\n\n\
         Evidence:\n{evidence}\n\n\
         Draft:\n{draft}\n\n\
         Respond with exactly one JSON object:\n\
         {{\"status\": \"approved\" | \"rejected\", \"confidence\": <0..1>, \"flags\": [\"<problem>\", ...]}}\n\
         Use an empty flags list only when approving."
    )
}
