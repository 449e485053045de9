use serde_json::Value;

use crate::error::AgentError;
use crate::tools::{parse_tool_input, ToolName};

/// What the reasoner asked for in one completion: either a tool call or
/// the final answer, never both.
#[derive(Debug, Clone)]
pub enum Directive {
    Action { tool: ToolName, input: Value },
    FinalAnswer(String),
}

/// One parsed reasoner completion.
#[derive(Debug, Clone)]
pub struct ReasoningStep {
    pub thought: String,
    pub directive: Directive,
}

/// Parse one raw reasoner completion into a step.
///
/// The expected shape is line-oriented:
///
/// ```text
/// Thought: <free text>
/// Action: <tool name>
/// Action Input: <JSON object>
/// ```
///
/// or
///
/// ```text
/// Thought: <free text>
/// Final Answer: <free text>
/// ```
///
/// Markers are matched case-insensitively and code fences are stripped
/// first, since models habitually wrap JSON in them. Every violation is a
/// recoverable `ParseError` so the loop can quote it back as an
/// observation.
pub fn parse_reasoner_output(raw: &str) -> Result<ReasoningStep, AgentError> {
    let text = strip_code_fences(raw);

    let mut thought_lines: Vec<&str> = Vec::new();
    let mut action: Option<String> = None;
    let mut input_lines: Vec<&str> = Vec::new();
    let mut final_lines: Vec<&str> = Vec::new();

    #[derive(PartialEq)]
    enum Section {
        Preamble,
        Thought,
        ActionInput,
        FinalAnswer,
    }
    let mut section = Section::Preamble;

    for line in text.lines() {
        if let Some(rest) = marker(line, "thought:") {
            thought_lines.push(rest);
            section = Section::Thought;
        } else if let Some(rest) = marker(line, "action input:") {
            input_lines.push(rest);
            section = Section::ActionInput;
        } else if let Some(rest) = marker(line, "action:") {
            if action.is_some() {
                return Err(AgentError::ParseError {
                    message: "response contains more than one Action".to_string(),
                });
            }
            action = Some(rest.trim().to_string());
            section = Section::Preamble;
        } else if let Some(rest) = marker(line, "final answer:") {
            final_lines.push(rest);
            section = Section::FinalAnswer;
        } else {
            match section {
                Section::Thought => thought_lines.push(line),
                Section::ActionInput => input_lines.push(line),
                Section::FinalAnswer => final_lines.push(line),
                Section::Preamble => {}
            }
        }
    }

    let thought = thought_lines.join("\n").trim().to_string();
    let has_final = !final_lines.is_empty();

    match (action, has_final) {
        (Some(_), true) => Err(AgentError::ParseError {
            message: "response contains both an Action and a Final Answer; produce exactly one"
                .to_string(),
        }),
        (None, true) => Ok(ReasoningStep {
            thought,
            directive: Directive::FinalAnswer(final_lines.join("\n").trim().to_string()),
        }),
        (Some(name), false) => {
            let tool = ToolName::from_name(&name).ok_or_else(|| AgentError::ParseError {
                message: format!(
                    "unknown tool '{}'. Valid tools: {}",
                    name,
                    ToolName::ALL
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })?;

            let raw_input = input_lines.join("\n").trim().to_string();
            if raw_input.is_empty() {
                return Err(AgentError::ParseError {
                    message: format!(
                        "Action '{}' is missing its Action Input. Expected schema: {}",
                        tool,
                        tool.input_schema()
                    ),
                });
            }
            let input: Value =
                serde_json::from_str(&raw_input).map_err(|e| AgentError::ParseError {
                    message: format!(
                        "Action Input for '{}' is not valid JSON: {}. Expected schema: {}",
                        tool,
                        e,
                        tool.input_schema()
                    ),
                })?;
            if !input.is_object() {
                return Err(AgentError::ParseError {
                    message: format!(
                        "Action Input for '{}' must be a JSON object. Expected schema: {}",
                        tool,
                        tool.input_schema()
                    ),
                });
            }
            // Schema violations surface here, before anything executes.
            parse_tool_input(tool, &input)?;

            Ok(ReasoningStep {
                thought,
                directive: Directive::Action { tool, input },
            })
        }
        (None, false) => Err(AgentError::ParseError {
            message: "response contains neither an Action nor a Final Answer".to_string(),
        }),
    }
}

fn marker<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let trimmed = line.trim_start();
    let head = trimmed.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&trimmed[prefix.len()..])
    } else {
        None
    }
}

fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}
