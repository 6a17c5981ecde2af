//! Reasoning loop: THINK → ACT → OBSERVE, repeated until FINISH.
//!
//! Each iteration is one step in the session trace. THINK asks the generator
//! for a JSON decision; ACT runs the chosen tool; OBSERVE records the result
//! and closes the step. The loop finishes on an explicit final answer, on an
//! unrecoverable THINK failure, or when `max_iterations` is reached (a forced
//! finish that still returns what was gathered).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ReactConfig;
use crate::provider::GenerationRequest;
use crate::tool::ToolRegistry;
use crate::workflow::session::StepStatus;

use super::context::RunContext;
use super::error::AgentResult;
use super::{extract_json_object, truncate_chars};

/// Longest observation rendered back into a prompt.
const OBSERVATION_PROMPT_CHARS: usize = 2_000;

// ---------------------------------------------------------------------------
// Loop types
// ---------------------------------------------------------------------------

/// What THINK decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Act {
        thought: String,
        tool: String,
        input: Value,
    },
    Finish {
        thought: String,
        answer: String,
    },
}

#[derive(Deserialize)]
struct RawDecision {
    #[serde(default)]
    thought: String,
    action: Option<RawAction>,
    final_answer: Option<Value>,
}

#[derive(Deserialize)]
struct RawAction {
    tool: String,
    #[serde(default)]
    input: Option<Value>,
}

impl Decision {
    /// Parse generator output. Code fences and surrounding prose are tolerated.
    pub fn parse(text: &str) -> Result<Self, String> {
        let object = extract_json_object(text).ok_or("no JSON object found")?;
        let raw: RawDecision =
            serde_json::from_str(object).map_err(|e| format!("malformed decision: {e}"))?;
        match (raw.final_answer, raw.action) {
            (Some(answer), _) => {
                let answer = match answer {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok(Self::Finish {
                    thought: raw.thought,
                    answer,
                })
            }
            (None, Some(action)) if !action.tool.trim().is_empty() => Ok(Self::Act {
                thought: raw.thought,
                tool: action.tool,
                input: action.input.unwrap_or_else(|| Value::Object(Default::default())),
            }),
            _ => Err("decision has neither an action nor a final_answer".into()),
        }
    }
}

/// One completed (thought, action, observation) tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub thought: String,
    pub tool: String,
    pub input: Value,
    pub observation: String,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Answered,
    IterationLimit,
    StepFailed,
}

/// Result of one loop run.
#[derive(Debug, Clone)]
pub struct ReactOutcome {
    pub answer: String,
    pub finish: FinishReason,
    pub exchanges: Vec<Exchange>,
    /// Ordinals of the steps this run appended to the session.
    pub steps: Vec<usize>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A bounded reasoning loop over a fixed tool set.
pub struct ReactEngine<'a> {
    config: &'a ReactConfig,
    tools: &'a ToolRegistry,
    agent: Option<&'a str>,
    preamble: String,
}

impl<'a> ReactEngine<'a> {
    pub fn new(config: &'a ReactConfig, tools: &'a ToolRegistry) -> Self {
        Self {
            config,
            tools,
            agent: None,
            preamble: "You are a careful clinical reasoning assistant. Use tools to gather \
                       evidence before answering, and never invent figures."
                .into(),
        }
    }

    /// Label the steps this loop produces with an agent name.
    pub fn with_agent(mut self, agent: &'a str) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Replace the role preamble that opens every prompt.
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    /// Run the loop on `task` until FINISH.
    pub async fn run(&self, ctx: &RunContext, task: &str) -> AgentResult<ReactOutcome> {
        let mut exchanges: Vec<Exchange> = Vec::new();
        let mut steps = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            // ── Think ──
            let step = ctx
                .begin_step(
                    format!("Reasoning step {iteration}"),
                    "Deciding the next action",
                    self.agent,
                )
                .await?;
            steps.push(step);

            let decision = match self.think(ctx, task, &exchanges).await? {
                Ok(decision) => decision,
                Err(reason) => {
                    tracing::warn!(agent = ?self.agent, iteration, %reason, "reasoning step failed");
                    ctx.finish_step(step, StepStatus::Failed, Some(reason)).await?;
                    return Ok(ReactOutcome {
                        answer: partial_answer(&exchanges, "a reasoning step failed"),
                        finish: FinishReason::StepFailed,
                        exchanges,
                        steps,
                    });
                }
            };

            match decision {
                Decision::Finish { thought, answer } => {
                    ctx.finish_step(step, StepStatus::Done, Some(non_empty(thought, "Final answer")))
                        .await?;
                    tracing::debug!(agent = ?self.agent, iteration, "reasoning loop answered");
                    return Ok(ReactOutcome {
                        answer,
                        finish: FinishReason::Answered,
                        exchanges,
                        steps,
                    });
                }
                Decision::Act {
                    thought,
                    tool,
                    input,
                } => {
                    // ── Act ──
                    let observation = ctx
                        .call_tool_for_step(step, self.tools, &tool, input.clone())
                        .await?;

                    // ── Observe ──
                    ctx.finish_step(
                        step,
                        StepStatus::Done,
                        Some(non_empty(thought.clone(), &format!("Called {tool}"))),
                    )
                    .await?;
                    exchanges.push(Exchange {
                        thought,
                        tool,
                        input,
                        observation,
                    });
                }
            }
        }

        tracing::info!(
            agent = ?self.agent,
            max_iterations = self.config.max_iterations,
            "reasoning loop hit iteration limit"
        );
        Ok(ReactOutcome {
            answer: partial_answer(&exchanges, "the iteration limit was reached"),
            finish: FinishReason::IterationLimit,
            exchanges,
            steps,
        })
    }

    /// THINK with corrective retries. The inner error is the failure reason.
    async fn think(
        &self,
        ctx: &RunContext,
        task: &str,
        exchanges: &[Exchange],
    ) -> AgentResult<Result<Decision, String>> {
        let base = self.render_prompt(task, exchanges);
        let mut prompt = base.clone();
        let mut last_error = String::new();

        for attempt in 0..=self.config.corrective_retries {
            if attempt > 0 {
                prompt = format!(
                    "{base}\n\nYour previous reply could not be used ({last_error}). \
                     Reply with exactly one JSON object in the format above and nothing else."
                );
            }
            let request = GenerationRequest::new(prompt.clone()).with_tools(self.tools.list());
            match ctx.generate(request).await? {
                Ok(text) => match Decision::parse(&text) {
                    Ok(decision) => return Ok(Ok(decision)),
                    Err(e) => last_error = e,
                },
                Err(e) => last_error = format!("generation failed: {e}"),
            }
            tracing::debug!(agent = ?self.agent, attempt, error = %last_error, "unusable THINK output");
        }
        Ok(Err(last_error))
    }

    fn render_prompt(&self, task: &str, exchanges: &[Exchange]) -> String {
        let mut prompt = format!("{}\n\nTask:\n{task}\n\nAvailable tools:\n", self.preamble);
        let tools = self.tools.list();
        if tools.is_empty() {
            prompt.push_str("(none: answer from the task text only)\n");
        }
        for t in &tools {
            prompt.push_str(&format!(
                "- {}: {} Input schema: {}\n",
                t.name, t.description, t.parameter_schema
            ));
        }

        if !exchanges.is_empty() {
            prompt.push_str("\nPrevious steps:\n");
            let keep = self.config.history_limit.min(exchanges.len());
            let omitted = exchanges.len() - keep;
            if omitted > 0 {
                prompt.push_str(&format!("({omitted} earlier steps omitted)\n"));
            }
            for ex in &exchanges[omitted..] {
                prompt.push_str(&format!(
                    "Thought: {}\nAction: {}({})\nObservation: {}\n",
                    ex.thought,
                    ex.tool,
                    ex.input,
                    truncate_chars(&ex.observation, OBSERVATION_PROMPT_CHARS)
                ));
            }
        }

        prompt.push_str(
            "\nRespond with exactly one JSON object, either\n\
             {\"thought\": \"...\", \"action\": {\"tool\": \"<tool name>\", \"input\": {...}}}\n\
             or\n\
             {\"thought\": \"...\", \"final_answer\": ...}\n",
        );
        prompt
    }
}

fn non_empty(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

/// Best-effort answer assembled from observations after a forced finish.
fn partial_answer(exchanges: &[Exchange], why: &str) -> String {
    if exchanges.is_empty() {
        return format!("No final answer: {why} before any evidence was gathered.");
    }
    let mut answer = format!("No final answer: {why}. Evidence gathered so far:\n");
    for ex in exchanges {
        answer.push_str(&format!(
            "- {}: {}\n",
            ex.tool,
            truncate_chars(&ex.observation, 500)
        ));
    }
    answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallLimits;
    use crate::provider::ScriptedGenerator;
    use crate::tool::tests::EchoTool;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool)).unwrap();
        tools
    }

    #[test]
    fn parse_action_and_answer() {
        let d = Decision::parse(
            "```json\n{\"thought\": \"check\", \"action\": {\"tool\": \"echo\", \"input\": {\"x\": 1}}}\n```",
        )
        .unwrap();
        assert_eq!(
            d,
            Decision::Act {
                thought: "check".into(),
                tool: "echo".into(),
                input: json!({"x": 1})
            }
        );

        let d = Decision::parse(r#"{"thought": "done", "final_answer": {"differentials": []}}"#).unwrap();
        assert!(matches!(d, Decision::Finish { answer, .. } if answer == r#"{"differentials":[]}"#));

        assert!(Decision::parse("I think the answer is 42").is_err());
        assert!(Decision::parse(r#"{"thought": "hmm"}"#).is_err());
    }

    #[tokio::test]
    async fn act_then_finish() {
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"thought": "echo it", "action": {"tool": "echo", "input": {"x": 1}}}"#,
            r#"{"thought": "got it", "final_answer": "The echoed value is 1"}"#,
        ]));
        let (ctx, _rx) = RunContext::standalone("q", generator.clone(), CallLimits::default(), 64).unwrap();
        let config = ReactConfig::default();
        let tools = registry();

        let outcome = ReactEngine::new(&config, &tools).run(&ctx, "echo x").await.unwrap();
        assert_eq!(outcome.finish, FinishReason::Answered);
        assert_eq!(outcome.answer, "The echoed value is 1");
        assert_eq!(outcome.exchanges.len(), 1);
        assert_eq!(outcome.exchanges[0].observation, r#"{"x":1}"#);
        assert_eq!(outcome.steps, [0, 1]);
        // The second THINK saw the observation.
        assert!(generator.prompts()[1].contains(r#"Observation: {"x":1}"#));
    }

    #[tokio::test]
    async fn tool_failure_becomes_observation() {
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"thought": "try", "action": {"tool": "missing", "input": {}}}"#,
            r#"{"thought": "adapt", "final_answer": "done"}"#,
        ]));
        let (ctx, _rx) = RunContext::standalone("q", generator, CallLimits::default(), 64).unwrap();
        let config = ReactConfig::default();
        let tools = registry();

        let outcome = ReactEngine::new(&config, &tools).run(&ctx, "t").await.unwrap();
        assert_eq!(outcome.finish, FinishReason::Answered);
        assert!(outcome.exchanges[0].observation.starts_with("error: unknown tool"));
    }

    #[tokio::test]
    async fn corrective_retry_then_step_failure() {
        let generator = Arc::new(ScriptedGenerator::new(["not json", "still not json"]));
        let (ctx, _rx) = RunContext::standalone("q", generator.clone(), CallLimits::default(), 64).unwrap();
        let config = ReactConfig::default();
        let tools = registry();

        let outcome = ReactEngine::new(&config, &tools).run(&ctx, "t").await.unwrap();
        assert_eq!(outcome.finish, FinishReason::StepFailed);
        assert!(generator.prompts()[1].contains("could not be used"));
        assert_eq!(ctx.session_snapshot().steps[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn corrective_retry_recovers() {
        let generator = Arc::new(ScriptedGenerator::new([
            "oops",
            r#"{"thought": "", "final_answer": "ok"}"#,
        ]));
        let (ctx, _rx) = RunContext::standalone("q", generator, CallLimits::default(), 64).unwrap();
        let config = ReactConfig::default();
        let tools = registry();

        let outcome = ReactEngine::new(&config, &tools).run(&ctx, "t").await.unwrap();
        assert_eq!(outcome.finish, FinishReason::Answered);
        assert_eq!(outcome.steps.len(), 1);
    }

    #[tokio::test]
    async fn iteration_limit_forces_partial_answer() {
        let act = r#"{"thought": "again", "action": {"tool": "echo", "input": {"x": 7}}}"#;
        let generator = Arc::new(ScriptedGenerator::new([act, act, act]));
        let (ctx, _rx) = RunContext::standalone("q", generator, CallLimits::default(), 64).unwrap();
        let config = ReactConfig {
            max_iterations: 3,
            ..ReactConfig::default()
        };
        let tools = registry();

        let outcome = ReactEngine::new(&config, &tools).run(&ctx, "t").await.unwrap();
        assert_eq!(outcome.finish, FinishReason::IterationLimit);
        assert_eq!(outcome.exchanges.len(), 3);
        assert!(outcome.answer.contains("iteration limit"));
        assert!(outcome.answer.contains(r#"{"x":7}"#));
    }

    #[test]
    fn history_is_bounded() {
        let config = ReactConfig {
            history_limit: 2,
            ..ReactConfig::default()
        };
        let tools = registry();
        let engine = ReactEngine::new(&config, &tools);
        let exchanges: Vec<_> = (0..5)
            .map(|i| Exchange {
                thought: format!("thought {i}"),
                tool: "echo".into(),
                input: json!({"x": i}),
                observation: format!("obs {i}"),
            })
            .collect();
        let prompt = engine.render_prompt("t", &exchanges);
        assert!(prompt.contains("(3 earlier steps omitted)"));
        assert!(!prompt.contains("thought 2"));
        assert!(prompt.contains("thought 3"));
        assert!(prompt.contains("thought 4"));
    }
}
