use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::debug;

use crate::db::SqlBackend;
use crate::groq::GroqClient;

/// Reasoning steps before the run is abandoned.
const MAX_STEPS: usize = 8;

/// Data rows shown to the model per query.
const MAX_RESULT_ROWS: usize = 25;

/// Longest observation fed back into the prompt.
const MAX_OBSERVATION_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "\
You are an agent that answers questions about a SQL database.

You have access to the following tools:

list_tables: List the tables in the database. The input is ignored.
describe_tables: Show the column layout of tables. Input: comma-separated table names.
run_sql: Execute a single SQL query and return the resulting rows. Input: the SQL statement, with no markdown fences.

Use exactly this format:

Question: the question to answer
Thought: what to do next
Action: the tool to use, one of [list_tables, describe_tables, run_sql]
Action Input: the input to the tool
Observation: the tool result
... (Thought/Action/Action Input/Observation can repeat)
Thought: I now know the final answer
Final Answer: the answer to the question

Look at the tables before querying; never assume a column exists without checking.";

/// Progress pushed from a running agent to the UI. One-directional: the
/// UI cannot cancel or slow the run.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A token of model output, as generated.
    Token(String),
    /// The agent chose a tool.
    Action { tool: String, input: String },
    /// What the tool returned, truncated for display.
    Observation(String),
    /// The run produced a final answer.
    Finished(String),
    /// The run died (transport error, step limit, ...).
    Failed(String),
}

/// Build the prompt handed to the agent: a schema hint followed by the
/// user's question, verbatim.
pub fn format_question(question: &str, tables: &[String]) -> String {
    format!(
        "Database schema includes tables: {}. Please provide a detailed, \
         formatted answer, including the relevant data in a human-readable way.\n\
         Answer the question: {}",
        tables.join(", "),
        question
    )
}

/// What the model asked for in one reasoning step.
#[derive(Debug, PartialEq, Eq)]
enum AgentStep {
    Act { tool: String, input: String },
    Finish(String),
    Unparseable,
}

/// Parse one block of model output into a step.
///
/// A final answer wins over a stray action mention. Anything that fits
/// neither shape is `Unparseable`; the caller feeds that back instead of
/// aborting, mirroring how the model is told to recover.
fn parse_step(output: &str) -> AgentStep {
    if let Some(idx) = output.find("Final Answer:") {
        let answer = output[idx + "Final Answer:".len()..].trim();
        return AgentStep::Finish(answer.to_string());
    }

    let Some(action_idx) = output.find("Action:") else {
        return AgentStep::Unparseable;
    };
    let after_action = &output[action_idx + "Action:".len()..];
    let Some(input_idx) = after_action.find("Action Input:") else {
        return AgentStep::Unparseable;
    };

    let tool = after_action[..input_idx].trim();
    let input = after_action[input_idx + "Action Input:".len()..].trim();
    if tool.is_empty() {
        return AgentStep::Unparseable;
    }

    AgentStep::Act {
        tool: tool.to_string(),
        input: clean_tool_input(input),
    }
}

/// Strip the markdown fences and quotes models like to wrap SQL in.
fn clean_tool_input(input: &str) -> String {
    let mut text = input.trim();
    if let Some(stripped) = text.strip_prefix("```") {
        text = stripped.strip_prefix("sql").unwrap_or(stripped);
        if let Some(end) = text.rfind("```") {
            text = &text[..end];
        }
    }
    text.trim().trim_matches('"').trim().to_string()
}

fn truncate_observation(text: &str) -> String {
    if text.chars().count() <= MAX_OBSERVATION_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_OBSERVATION_CHARS).collect();
    format!("{kept}\n... (truncated)")
}

/// Question-answering agent bound to one database handle and one model.
///
/// Runs a Thought/Action/Observation loop until the model produces a
/// final answer, streaming everything it does over the event channel.
pub struct SqlAgent {
    client: GroqClient,
    model: String,
    db: Arc<dyn SqlBackend>,
}

impl SqlAgent {
    pub fn new(client: GroqClient, model: &str, db: Arc<dyn SqlBackend>) -> Self {
        Self {
            client,
            model: model.to_string(),
            db,
        }
    }

    /// Drive the loop to completion. Transport failures end the run;
    /// malformed model output does not.
    pub async fn run(
        &self,
        prompt: &str,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<String> {
        let mut scratchpad = format!("Question: {prompt}\nThought: ");

        for step in 0..MAX_STEPS {
            let token_tx = events.clone();
            let output = self
                .client
                .query_streaming(
                    &self.model,
                    SYSTEM_PROMPT,
                    &scratchpad,
                    Some(vec!["Observation:".to_string()]),
                    |token| {
                        let _ = token_tx.send(AgentEvent::Token(token.to_string()));
                    },
                )
                .await?;

            debug!(step, output = output.len(), "agent step complete");
            scratchpad.push_str(&output);
            if !scratchpad.ends_with('\n') {
                scratchpad.push('\n');
            }

            match parse_step(&output) {
                AgentStep::Finish(answer) => return Ok(answer),
                AgentStep::Act { tool, input } => {
                    let _ = events.send(AgentEvent::Action {
                        tool: tool.clone(),
                        input: input.clone(),
                    });
                    let observation = truncate_observation(&self.run_tool(&tool, &input).await);
                    let _ = events.send(AgentEvent::Observation(observation.clone()));
                    scratchpad.push_str(&format!("Observation: {observation}\nThought: "));
                }
                AgentStep::Unparseable => {
                    scratchpad.push_str(
                        "Observation: That reply did not follow the format. Reply with an \
                         Action and Action Input pair, or a Final Answer.\nThought: ",
                    );
                }
            }
        }

        Err(anyhow!("no final answer after {MAX_STEPS} steps"))
    }

    /// Dispatch one tool call. Tool failures become observations so the
    /// model can correct itself.
    async fn run_tool(&self, tool: &str, input: &str) -> String {
        let result = match tool {
            "list_tables" => self.db.list_tables().await.map(|tables| {
                if tables.is_empty() {
                    "(no tables)".to_string()
                } else {
                    tables.join(", ")
                }
            }),
            "describe_tables" => {
                let names: Vec<String> = input
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                self.db.describe_tables(&names).await
            }
            "run_sql" => self
                .db
                .run_query(input)
                .await
                .map(|output| output.to_text_table(MAX_RESULT_ROWS)),
            other => {
                return format!(
                    "Unknown tool '{other}'. Available tools: list_tables, describe_tables, run_sql."
                )
            }
        };

        match result {
            Ok(text) if text.trim().is_empty() => "(empty result)".to_string(),
            Ok(text) => text,
            Err(e) => format!("Error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbError, QueryOutput};

    #[test]
    fn formatted_prompt_contains_question_and_tables() {
        let tables = vec!["albums".to_string(), "artists".to_string()];
        let question = "who sold the most records?";
        let prompt = format_question(question, &tables);

        assert!(prompt.contains(question));
        assert!(prompt.contains("albums, artists"));
        assert!(prompt.contains("Database schema includes tables:"));
        assert!(prompt.contains("Answer the question:"));
    }

    #[test]
    fn formatted_prompt_with_no_tables_keeps_template() {
        let prompt = format_question("anything there?", &[]);
        assert!(prompt.contains("Database schema includes tables: ."));
        assert!(prompt.contains("anything there?"));
    }

    #[test]
    fn parses_an_action_with_multiline_input() {
        let output = "Thought: I should count the users.\n\
                      Action: run_sql\n\
                      Action Input: SELECT COUNT(*)\nFROM users";
        assert_eq!(
            parse_step(output),
            AgentStep::Act {
                tool: "run_sql".to_string(),
                input: "SELECT COUNT(*)\nFROM users".to_string(),
            }
        );
    }

    #[test]
    fn parses_a_final_answer() {
        let output = "Thought: I now know the final answer\nFinal Answer: There are 42 users.";
        assert_eq!(
            parse_step(output),
            AgentStep::Finish("There are 42 users.".to_string())
        );
    }

    #[test]
    fn final_answer_wins_over_action_text() {
        let output = "Action: run_sql\nAction Input: SELECT 1\nFinal Answer: done";
        assert_eq!(parse_step(output), AgentStep::Finish("done".to_string()));
    }

    #[test]
    fn malformed_output_is_unparseable() {
        assert_eq!(parse_step("I have no idea."), AgentStep::Unparseable);
        assert_eq!(parse_step("Action: run_sql"), AgentStep::Unparseable);
        assert_eq!(parse_step("Action: \nAction Input: x"), AgentStep::Unparseable);
    }

    #[test]
    fn fenced_sql_is_unwrapped() {
        assert_eq!(
            clean_tool_input("```sql\nSELECT 1;\n```"),
            "SELECT 1;".to_string()
        );
        assert_eq!(clean_tool_input("\"SELECT 2\""), "SELECT 2".to_string());
        assert_eq!(clean_tool_input("  SELECT 3  "), "SELECT 3".to_string());
    }

    #[test]
    fn long_observations_are_truncated() {
        let long = "x".repeat(MAX_OBSERVATION_CHARS + 10);
        let shown = truncate_observation(&long);
        assert!(shown.ends_with("... (truncated)"));
        assert!(shown.chars().count() < long.chars().count() + 20);

        assert_eq!(truncate_observation("short"), "short");
    }

    struct FakeBackend;

    #[async_trait::async_trait]
    impl crate::db::SqlBackend for FakeBackend {
        async fn list_tables(&self) -> Result<Vec<String>, DbError> {
            Ok(vec!["users".to_string()])
        }

        async fn describe_tables(&self, tables: &[String]) -> Result<String, DbError> {
            Ok(format!("described: {}", tables.join("+")))
        }

        async fn run_query(&self, sql: &str) -> Result<QueryOutput, DbError> {
            if sql.contains("boom") {
                return Err(DbError::Query("syntax error".to_string()));
            }
            Ok(QueryOutput {
                columns: vec!["n".to_string()],
                rows: vec![vec!["1".to_string()]],
            })
        }
    }

    fn fake_agent() -> SqlAgent {
        SqlAgent::new(GroqClient::new("test-key"), "test-model", Arc::new(FakeBackend))
    }

    #[tokio::test]
    async fn tools_dispatch_to_the_backend() {
        let agent = fake_agent();
        assert_eq!(agent.run_tool("list_tables", "").await, "users");
        assert_eq!(
            agent.run_tool("describe_tables", "users, orders").await,
            "described: users+orders"
        );
        assert_eq!(agent.run_tool("run_sql", "SELECT 1").await, "n\n1");
    }

    #[tokio::test]
    async fn tool_errors_become_observations() {
        let agent = fake_agent();
        let observation = agent.run_tool("run_sql", "boom").await;
        assert!(observation.starts_with("Error:"));
        assert!(observation.contains("syntax error"));

        let unknown = agent.run_tool("drop_database", "").await;
        assert!(unknown.contains("Unknown tool"));
    }
}
