use crate::models::ExecutionStep;
use crate::tools::ToolName;

/// System prompt for one reasoning session: role, tool roster, response
/// format and the retrieved column context.
pub fn system_prompt(column_context: &str) -> String {
    let mut prompt = String::from(
        "You are a data analyst answering questions about a spreadsheet. \
You cannot see the data directly; you interact with it only through the tools below. \
Tool results are exact and authoritative. Base every number in your answer on tool observations, never on guesses.\n\n\
Available tools:\n",
    );

    for tool in ToolName::ALL {
        prompt.push_str(&format!(
            "- {}: {}. Input schema: {}\n",
            tool,
            tool.description(),
            tool.input_schema()
        ));
    }

    prompt.push_str(
        "\nFilter expressions use the form: column == value, column != value, \
column > value, column >= value, column < value, column <= value, or column in [v1, v2]. \
Combine comparisons with 'and'. Quote text values in single quotes.\n\n\
Respond in exactly this format:\n\
Thought: your reasoning about what to do next\n\
Action: one tool name\n\
Action Input: a JSON object matching the tool's schema\n\n\
After each action you will receive an Observation with the result. \
When you can answer the question, respond with:\n\
Thought: your final reasoning\n\
Final Answer: the answer to the user's question\n\n\
Never produce both an Action and a Final Answer in the same response.\n",
    );

    if column_context.trim().is_empty() {
        prompt.push_str(
            "\nNo column context could be retrieved for this question. \
Use list_columns and describe_column to discover the schema before analyzing.\n",
        );
    } else {
        prompt.push_str("\nRelevant columns for this question:\n\n");
        prompt.push_str(column_context);
        prompt.push('\n');
    }

    prompt
}

/// The conversation so far, rendered back to the reasoner: the question
/// plus every prior thought, action and observation.
pub fn render_transcript(question: &str, steps: &[ExecutionStep]) -> String {
    let mut transcript = format!("Question: {}\n", question);
    for step in steps {
        transcript.push('\n');
        if !step.thought.is_empty() {
            transcript.push_str(&format!("Thought: {}\n", step.thought));
        }
        if let Some(action) = &step.action {
            transcript.push_str(&format!("Action: {}\n", action));
            if let Some(input) = &step.action_input {
                transcript.push_str(&format!("Action Input: {}\n", input));
            }
        }
        transcript.push_str(&format!("Observation: {}\n", step.observation));
    }
    transcript
}

/// Join retrieved metadata documents into the context block the system
/// prompt embeds.
pub fn format_column_context(documents: &[crate::metadata::MetadataDocument]) -> String {
    documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_prompt_lists_every_tool() {
        let prompt = system_prompt("Column Name: sales");
        for tool in ToolName::ALL {
            assert!(prompt.contains(tool.as_str()));
        }
        assert!(prompt.contains("Column Name: sales"));
    }

    #[test]
    fn empty_context_falls_back_to_schema_discovery_hint() {
        let prompt = system_prompt("");
        assert!(prompt.contains("No column context could be retrieved"));
    }

    #[test]
    fn transcript_replays_prior_steps_in_order() {
        let steps = vec![
            ExecutionStep {
                step: 1,
                thought: "sum sales".to_string(),
                action: Some("aggregate_data".to_string()),
                action_input: Some(json!({"column": "sales", "op": "sum"})),
                observation: "{\"result\": 350.0}".to_string(),
            },
            ExecutionStep {
                step: 2,
                thought: String::new(),
                action: None,
                action_input: None,
                observation: "Error: unknown tool 'foo'".to_string(),
            },
        ];
        let transcript = render_transcript("What are total sales?", &steps);
        assert!(transcript.starts_with("Question: What are total sales?"));
        let action_pos = transcript.find("Action: aggregate_data").unwrap();
        let error_pos = transcript.find("Error: unknown tool").unwrap();
        assert!(action_pos < error_pos);
    }
}
