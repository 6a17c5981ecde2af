//! Agent layer: bounded reasoning loops, specialists, supervision and review.
//!
//! - **Run context** ([`RunContext`]): the session, event channel, cancellation
//!   token and call limits shared by everything working on one run
//! - **Reasoning loop** ([`ReactEngine`]): THINK → ACT → OBSERVE until a final
//!   answer or the iteration bound
//! - **Specialists** ([`Specialist`]): loops with a role, a tool subset and a
//!   typed output contract
//! - **Supervisor** ([`Supervisor`]): classifies, delegates, synthesizes a draft
//! - **Adjudicator** ([`Adjudicator`]): independent review gating the draft

pub mod adjudicator;
pub mod context;
pub mod error;
pub mod react;
pub mod specialist;
pub mod supervisor;

pub use adjudicator::{Adjudicator, VerdictStatus, VerificationVerdict};
pub use context::RunContext;
pub use error::{AgentError, AgentResult};
pub use react::{Exchange, FinishReason, ReactEngine, ReactOutcome};
pub use specialist::{Specialist, SpecialistReport};
pub use supervisor::{
    Contradiction, Delegation, DelegationPlan, Draft, EvidenceContext, EvidenceItem, Supervisor,
    SupervisorOutcome,
};

/// Pull the JSON object out of model output.
///
/// Tolerates markdown code fences and prose around the object: everything
/// from the first `{` to the last `}` is returned.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Truncate to at most `max` characters, marking the cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("…");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_inside_fences() {
        let text = "Here you go:\n```json\n{\"a\": {\"b\": 1}}\n```\n";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("no object"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn truncation_marks_cut() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc…");
    }
}
