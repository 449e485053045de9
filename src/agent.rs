use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::index::MetadataIndex;
use crate::models::ExecutionStep;
use crate::parser::{parse_reasoner_output, Directive};
use crate::prompts::{format_column_context, render_transcript, system_prompt};
use crate::reasoner::Reasoner;
use crate::tools::{ToolName, ToolSet};

/// Observations longer than this are cut before they enter the
/// transcript, so one verbose tool result cannot blow up the prompt.
const OBSERVATION_LIMIT_CHARS: usize = 500;

/// Terminal result of one agent run. A failed run still carries the full
/// trace so the caller can see how the budget was spent.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: String,
    pub success: bool,
    pub iterations: usize,
    /// The retrieved context block that reached the prompt, truncated
    /// like an observation. None when the run went in degraded mode.
    pub rag_context_used: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<ExecutionStep>,
}

/// The loop's control states. Retrieving happens once; Reasoning and
/// Dispatching alternate until a terminal state is reached.
enum LoopState {
    Retrieving,
    Reasoning,
    Dispatching {
        thought: String,
        tool: ToolName,
        input: Value,
    },
    Done {
        answer: String,
    },
    Failed,
}

/// Bounded reason-act state machine over one sheet. Each pass through
/// Reasoning is one model completion and consumes one iteration;
/// malformed completions and recoverable tool errors are quoted back as
/// observations and count like any other iteration.
pub struct AgentLoop<'a> {
    reasoner: Arc<dyn Reasoner>,
    tools: ToolSet,
    index: &'a MetadataIndex,
    dataset_id: &'a str,
    sheet_name: &'a str,
    retrieval_k: usize,
    max_iterations: usize,
}

impl<'a> AgentLoop<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        tools: ToolSet,
        index: &'a MetadataIndex,
        dataset_id: &'a str,
        sheet_name: &'a str,
        retrieval_k: usize,
        max_iterations: usize,
    ) -> Self {
        Self {
            reasoner,
            tools,
            index,
            dataset_id,
            sheet_name,
            retrieval_k,
            max_iterations,
        }
    }

    pub async fn run(&self, question: &str) -> Result<AgentOutcome, AgentError> {
        let mut state = LoopState::Retrieving;
        let mut iterations = 0usize;
        let mut steps: Vec<ExecutionStep> = Vec::new();
        let mut system = String::new();
        let mut rag_context_used: Option<String> = None;

        loop {
            state = match state {
                LoopState::Retrieving => {
                    let context = match self
                        .index
                        .retrieve(self.dataset_id, self.sheet_name, question, self.retrieval_k)
                        .await
                    {
                        Ok(documents) => format_column_context(&documents),
                        Err(AgentError::RetrievalUnavailable { message }) => {
                            warn!(
                                "Retrieval degraded for dataset {}: {}",
                                self.dataset_id, message
                            );
                            String::new()
                        }
                        Err(other) => return Err(other),
                    };
                    if !context.is_empty() {
                        rag_context_used = Some(truncate_observation(&context));
                    }
                    system = system_prompt(&context);
                    LoopState::Reasoning
                }

                LoopState::Reasoning => {
                    if iterations >= self.max_iterations {
                        LoopState::Failed
                    } else {
                        iterations += 1;
                        let transcript = render_transcript(question, &steps);
                        match self.reasoner.complete(&system, &transcript).await {
                            Ok(completion) => match parse_reasoner_output(&completion) {
                                Ok(step) => match step.directive {
                                    Directive::FinalAnswer(answer) => LoopState::Done { answer },
                                    Directive::Action { tool, input } => LoopState::Dispatching {
                                        thought: step.thought,
                                        tool,
                                        input,
                                    },
                                },
                                Err(err) => {
                                    warn!(
                                        "Iteration {} unparseable completion: {}",
                                        iterations, err
                                    );
                                    steps.push(error_step(iterations, &err));
                                    LoopState::Reasoning
                                }
                            },
                            Err(err) if err.is_recoverable() => {
                                warn!("Iteration {} reasoner error: {}", iterations, err);
                                steps.push(error_step(iterations, &err));
                                LoopState::Reasoning
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }

                LoopState::Dispatching {
                    thought,
                    tool,
                    input,
                } => {
                    let observation = match self.tools.dispatch(tool.as_str(), &input) {
                        Ok(result) => serde_json::to_string_pretty(&result)
                            .unwrap_or_else(|e| format!("Error: could not serialize result: {}", e)),
                        Err(err) if err.is_recoverable() => {
                            warn!("Iteration {} tool error: {}", iterations, err);
                            format!("Error: {}", err)
                        }
                        Err(err) => return Err(err),
                    };
                    info!(
                        "Iteration {}: {} -> {} chars",
                        iterations,
                        tool,
                        observation.len()
                    );
                    steps.push(ExecutionStep {
                        step: iterations,
                        thought,
                        action: Some(tool.as_str().to_string()),
                        action_input: Some(input),
                        observation: truncate_observation(&observation),
                    });
                    LoopState::Reasoning
                }

                LoopState::Done { answer } => {
                    info!("Final answer after {} iterations", iterations);
                    return Ok(AgentOutcome {
                        answer,
                        success: true,
                        iterations,
                        rag_context_used,
                        error: None,
                        steps,
                    });
                }

                LoopState::Failed => {
                    let err = AgentError::MaxIterationsExceeded {
                        max_iterations: self.max_iterations,
                    };
                    warn!("{}", err);
                    return Ok(AgentOutcome {
                        answer: format!(
                            "I was unable to complete the analysis within the {}-step budget. \
Partial findings are recorded in the execution steps.",
                            self.max_iterations
                        ),
                        success: false,
                        iterations,
                        rag_context_used,
                        error: Some(err.to_string()),
                        steps,
                    });
                }
            };
        }
    }
}

fn error_step(iteration: usize, err: &AgentError) -> ExecutionStep {
    ExecutionStep {
        step: iteration,
        thought: String::new(),
        action: None,
        action_input: None,
        observation: truncate_observation(&format!("Error: {}", err)),
    }
}

fn truncate_observation(observation: &str) -> String {
    if observation.chars().count() <= OBSERVATION_LIMIT_CHARS {
        return observation.to_string();
    }
    let cut: String = observation.chars().take(OBSERVATION_LIMIT_CHARS).collect();
    format!("{}... [truncated]", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::HashingEmbedder;
    use crate::ingest::{CsvParser, SpreadsheetParser};
    use crate::reasoner::ScriptedReasoner;
    use crate::table::Sheet;

    fn sales_sheet() -> Arc<Sheet> {
        let csv = b"region,sales\nNorth,100\nSouth,200\nNorth,50\n";
        Arc::new(CsvParser.parse("sales.csv", csv).unwrap().remove(0).1)
    }

    /// Times out on the first call, then delegates to the script.
    struct TimeoutOnceReasoner {
        timed_out: std::sync::Mutex<bool>,
        inner: ScriptedReasoner,
    }

    #[async_trait::async_trait]
    impl Reasoner for TimeoutOnceReasoner {
        async fn complete(&self, system: &str, transcript: &str) -> Result<String, AgentError> {
            {
                let mut timed_out = self.timed_out.lock().unwrap();
                if !*timed_out {
                    *timed_out = true;
                    return Err(AgentError::ReasonerTimeout { seconds: 30 });
                }
            }
            self.inner.complete(system, transcript).await
        }
    }

    async fn run(
        reasoner: Arc<dyn Reasoner>,
        sheet: Arc<Sheet>,
        max_iterations: usize,
        question: &str,
    ) -> Result<AgentOutcome, AgentError> {
        let index = MetadataIndex::new(Arc::new(HashingEmbedder));
        index.index(&sheet, "ds_test", "Sheet1").await.unwrap();
        let agent = AgentLoop::new(
            reasoner,
            ToolSet::new(sheet),
            &index,
            "ds_test",
            "Sheet1",
            5,
            max_iterations,
        );
        agent.run(question).await
    }

    async fn run_scripted(
        responses: &[&str],
        max_iterations: usize,
        question: &str,
    ) -> Result<AgentOutcome, AgentError> {
        run(
            Arc::new(ScriptedReasoner::new(responses.iter().copied())),
            sales_sheet(),
            max_iterations,
            question,
        )
        .await
    }

    #[tokio::test]
    async fn tool_call_then_final_answer_succeeds() {
        // Given a reasoner that sums northern sales and then answers
        let responses = [
            "Thought: sum northern sales\nAction: aggregate_data\nAction Input: {\"column\": \"sales\", \"op\": \"sum\", \"filter\": \"region == 'North'\"}",
            "Thought: done\nFinal Answer: Northern sales total 150.",
        ];

        // When the loop runs
        let outcome = run_scripted(&responses, 10, "What are northern sales?")
            .await
            .unwrap();

        // Then the answer is grounded in one recorded step
        assert!(outcome.success);
        let context = outcome.rag_context_used.as_deref().unwrap();
        assert!(context.contains("Column Name: sales"));
        assert_eq!(outcome.answer, "Northern sales total 150.");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].action.as_deref(), Some("aggregate_data"));
        assert!(outcome.steps[0].observation.contains("150"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn retrieved_context_travels_with_the_outcome() {
        // Given an indexed sheet
        let responses = ["Final Answer: done"];

        // When the loop runs
        let outcome = run_scripted(&responses, 10, "sales by region")
            .await
            .unwrap();

        // Then the context block the prompt saw is returned, capped like
        // an observation
        let context = outcome.rag_context_used.as_deref().unwrap();
        assert!(context.contains("Column Name:"));
        assert!(context.chars().count() <= OBSERVATION_LIMIT_CHARS + "... [truncated]".len());
    }

    #[tokio::test]
    async fn degraded_retrieval_returns_no_context_block() {
        // Given an index whose embedder is down
        let index = MetadataIndex::new(Arc::new(crate::index::FailingEmbedder));
        let agent = AgentLoop::new(
            Arc::new(ScriptedReasoner::new(["Final Answer: done"])),
            ToolSet::new(sales_sheet()),
            &index,
            "ds_test",
            "Sheet1",
            5,
            10,
        );

        // When the loop runs
        let outcome = agent.run("Total sales?").await.unwrap();

        // Then the run still succeeds, with no context block attached
        assert!(outcome.success);
        assert!(outcome.rag_context_used.is_none());
    }

    #[tokio::test]
    async fn malformed_completion_becomes_an_error_observation() {
        // Given a first completion with no directive at all
        let responses = [
            "Thought: let me ponder this for a while.",
            "Thought: answering now\nFinal Answer: 350.",
        ];

        // When the loop runs
        let outcome = run_scripted(&responses, 10, "Total sales?").await.unwrap();

        // Then the parse failure consumed an iteration and was quoted back
        assert!(outcome.success);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.steps.len(), 1);
        assert!(outcome.steps[0].observation.starts_with("Error:"));
    }

    #[tokio::test]
    async fn recoverable_tool_error_is_quoted_back_and_recovered_from() {
        // Given a first call against a column that does not exist
        let responses = [
            "Action: aggregate_data\nAction Input: {\"column\": \"revenue\", \"op\": \"sum\"}",
            "Action: aggregate_data\nAction Input: {\"column\": \"sales\", \"op\": \"sum\"}",
            "Final Answer: Total sales are 350.",
        ];

        // When the loop runs
        let outcome = run_scripted(&responses, 10, "Total sales?").await.unwrap();

        // Then the unknown column surfaced as an observation, not a crash
        assert!(outcome.success);
        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.steps[0].observation.contains("Error:"));
        assert!(outcome.steps[0].observation.contains("revenue"));
        assert!(outcome.steps[1].observation.contains("350"));
    }

    #[tokio::test]
    async fn iteration_budget_exhaustion_fails_with_partial_trace() {
        // Given a reasoner that never produces a valid directive
        let responses = ["gibberish with no markers"; 3];

        // When the loop runs
        let outcome = run_scripted(&responses, 3, "Total sales?").await.unwrap();

        // Then the run fails with every iteration accounted for
        assert!(!outcome.success);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.steps.len(), 3);
        assert!(outcome.answer.contains("3-step budget"));
        assert!(outcome
            .error
            .as_deref()
            .unwrap()
            .contains("Maximum iterations (3)"));
    }

    #[tokio::test]
    async fn reasoner_timeout_consumes_an_iteration_then_the_loop_retries() {
        // Given a reasoner whose first call times out
        let reasoner = Arc::new(TimeoutOnceReasoner {
            timed_out: std::sync::Mutex::new(false),
            inner: ScriptedReasoner::new(["Final Answer: Total sales are 350."]),
        });

        // When the loop runs
        let outcome = run(reasoner, sales_sheet(), 10, "Total sales?")
            .await
            .unwrap();

        // Then the timeout burned one iteration as an observation and the
        // retry answered
        assert!(outcome.success);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.steps.len(), 1);
        assert!(outcome.steps[0].observation.starts_with("Error:"));
        assert!(outcome.steps[0].observation.contains("timed out"));
    }

    #[tokio::test]
    async fn reasoner_outage_aborts_the_run() {
        // Given a reasoner with no responses left
        let reasoner = Arc::new(ScriptedReasoner::new(Vec::<String>::new()));

        // When the loop runs
        let err = run(reasoner, sales_sheet(), 5, "Total sales?")
            .await
            .unwrap_err();

        // Then the outage propagates instead of burning the budget
        assert!(matches!(err, AgentError::ReasonerUnavailable { .. }));
    }

    #[tokio::test]
    async fn long_observations_are_truncated() {
        // Given a sheet wide enough to overflow the observation limit
        let mut csv = String::from("x\n");
        for i in 0..60 {
            csv.push_str(&format!("{}\n", i));
        }
        let sheet = Arc::new(
            CsvParser
                .parse("data.csv", csv.as_bytes())
                .unwrap()
                .remove(0)
                .1,
        );
        let reasoner = Arc::new(ScriptedReasoner::new([
            "Action: sample_rows\nAction Input: {\"n\": 50}",
            "Final Answer: done",
        ]));

        // When a verbose tool result comes back
        let outcome = run(reasoner, sheet, 10, "Show me the data").await.unwrap();

        // Then the stored observation is capped
        let observation = &outcome.steps[0].observation;
        assert!(observation.ends_with("... [truncated]"));
        assert!(observation.chars().count() <= OBSERVATION_LIMIT_CHARS + "... [truncated]".len());
    }

    #[tokio::test]
    async fn transcript_carries_prior_observations_forward() {
        // Given two tool calls before the answer
        let reasoner = Arc::new(ScriptedReasoner::new([
            "Action: list_columns\nAction Input: {}",
            "Action: aggregate_data\nAction Input: {\"column\": \"sales\", \"op\": \"sum\"}",
            "Final Answer: 350",
        ]));

        // When the loop runs
        run(reasoner.clone(), sales_sheet(), 10, "Total sales?")
            .await
            .unwrap();

        // Then the final transcript replays both observations
        let transcripts = reasoner.seen_transcripts();
        assert_eq!(transcripts.len(), 3);
        assert!(transcripts[2].contains("Action: list_columns"));
        assert!(transcripts[2].contains("Action: aggregate_data"));
    }

    #[test]
    fn truncation_is_character_safe() {
        let long = "é".repeat(OBSERVATION_LIMIT_CHARS + 10);
        let cut = truncate_observation(&long);
        assert!(cut.ends_with("... [truncated]"));
    }

    #[test]
    fn short_observations_pass_through() {
        assert_eq!(truncate_observation("ok"), "ok");
    }
}
