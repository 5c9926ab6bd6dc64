//! Planner — one up-front model call producing a task plan.
//!
//! The planner asks the model for four labeled sections (summary, plan,
//! relevant tools, estimated steps) and parses them by scanning for the
//! section headers. Any section it cannot find falls back to a conservative
//! default; any model failure falls back entirely. Planning can never abort
//! a run.

use std::collections::BTreeMap;
use std::sync::Arc;

use taskforge_core::message::{Conversation, Message};
use taskforge_core::provider::{Provider, ProviderRequest, ToolDefinition};

/// Estimated step counts are clamped into this range. The estimate only
/// informs sizing; it never hard-stops the loop.
const MIN_ESTIMATED_STEPS: u32 = 1;
const MAX_ESTIMATED_STEPS: u32 = 20;

const FALLBACK_ESTIMATED_STEPS: u32 = 3;
const FALLBACK_TOOL_COUNT: usize = 5;

/// The planner's output for one run.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    /// One-line restatement of the task.
    pub summary: String,

    /// Ordered plan steps.
    pub steps: Vec<String>,

    /// Subset of the catalog the planner deems relevant.
    pub relevant_tools: Vec<String>,

    /// Estimated number of agent-loop steps, clamped to a sane range.
    pub estimated_steps: u32,
}

impl TaskPlan {
    /// The conservative default used when planning fails or a section is
    /// missing from the model's reply.
    pub fn fallback(query: &str, catalog: &[ToolDefinition]) -> Self {
        Self {
            summary: format!("Complete the task: {query}"),
            steps: vec![
                "Understand what the task requires".into(),
                "Use the available tools to carry it out".into(),
                "Confirm the result answers the original request".into(),
            ],
            relevant_tools: catalog
                .iter()
                .take(FALLBACK_TOOL_COUNT)
                .map(|t| t.name.clone())
                .collect(),
            estimated_steps: FALLBACK_ESTIMATED_STEPS,
        }
    }

    /// Render the plan as a system-message instruction for the agent loop.
    pub fn as_system_message(&self) -> String {
        let mut text = format!("Task: {}\n\nPlan:\n", self.summary);
        for (i, step) in self.steps.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", i + 1, step));
        }
        if !self.relevant_tools.is_empty() {
            text.push_str(&format!(
                "\nMost relevant tools: {}\n",
                self.relevant_tools.join(", ")
            ));
        }
        text.push_str("\nWork through the plan step by step, calling tools as needed.");
        text
    }
}

pub struct Planner {
    provider: Arc<dyn Provider>,
    model: String,
    history_window: usize,
}

impl Planner {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, history_window: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            history_window,
        }
    }

    /// Produce a plan for the query. Infallible: model errors and
    /// unparseable replies degrade to [`TaskPlan::fallback`].
    pub async fn plan(
        &self,
        query: &str,
        catalog: &[ToolDefinition],
        conversation: &Conversation,
    ) -> TaskPlan {
        let prompt = build_prompt(query, catalog, conversation, self.history_window);
        let request = ProviderRequest::text(&self.model, vec![Message::user(prompt)], 0.3);

        match self.provider.complete(request).await {
            Ok(response) => parse_plan(&response.message.content, query, catalog),
            Err(err) => {
                tracing::warn!(error = %err, "planning call failed, using fallback plan");
                TaskPlan::fallback(query, catalog)
            }
        }
    }
}

fn build_prompt(
    query: &str,
    catalog: &[ToolDefinition],
    conversation: &Conversation,
    history_window: usize,
) -> String {
    let mut prompt = String::from(
        "You are planning how to complete a task with tools. \
         Reply with exactly four labeled sections:\n\
         SUMMARY: one line restating the task\n\
         PLAN: a numbered list of steps\n\
         RELEVANT TOOLS: comma-separated tool names from the catalog\n\
         ESTIMATED STEPS: a single integer\n\n",
    );

    prompt.push_str("Tool catalog:\n");
    for (category, tools) in group_by_category(catalog) {
        prompt.push_str(&format!("[{category}]\n"));
        for tool in tools {
            prompt.push_str(&format!("  {} - {}\n", tool.name, tool.description));
        }
    }

    let recent = conversation.recent(history_window);
    if !recent.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for msg in recent {
            let role = match msg.role {
                taskforge_core::message::Role::User => "user",
                taskforge_core::message::Role::Assistant => "assistant",
                taskforge_core::message::Role::System => "system",
                taskforge_core::message::Role::Tool => "tool",
            };
            prompt.push_str(&format!("{role}: {}\n", first_line(&msg.content)));
        }
    }

    prompt.push_str(&format!("\nTask: {query}\n"));
    prompt
}

/// Group the catalog by the naming-convention category: everything before
/// the first underscore ("file_read" -> "file").
fn group_by_category(catalog: &[ToolDefinition]) -> BTreeMap<String, Vec<&ToolDefinition>> {
    let mut groups: BTreeMap<String, Vec<&ToolDefinition>> = BTreeMap::new();
    for tool in catalog {
        let category = tool
            .name
            .split_once('_')
            .map(|(prefix, _)| prefix)
            .unwrap_or("general")
            .to_string();
        groups.entry(category).or_default().push(tool);
    }
    groups
}

/// Parse the four labeled sections out of the model's reply. Sections scan
/// case-insensitively; each missing section takes its fallback value.
fn parse_plan(text: &str, query: &str, catalog: &[ToolDefinition]) -> TaskPlan {
    let fallback = TaskPlan::fallback(query, catalog);

    let summary = section(text, "SUMMARY")
        .map(|s| first_line(&s).to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback.summary);

    let steps = section(text, "PLAN")
        .map(|s| {
            s.lines()
                .map(strip_list_marker)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .filter(|steps| !steps.is_empty())
        .unwrap_or(fallback.steps);

    let relevant_tools = section(text, "RELEVANT TOOLS")
        .map(|s| {
            s.split([',', '\n'])
                .map(|t| strip_list_marker(t).to_string())
                .filter(|t| catalog.iter().any(|d| d.name == *t))
                .collect::<Vec<_>>()
        })
        .filter(|tools| !tools.is_empty())
        .unwrap_or(fallback.relevant_tools);

    let estimated_steps = section(text, "ESTIMATED STEPS")
        .and_then(|s| first_integer(&s))
        .map(|n| n.clamp(MIN_ESTIMATED_STEPS, MAX_ESTIMATED_STEPS))
        .unwrap_or(fallback.estimated_steps);

    TaskPlan {
        summary,
        steps,
        relevant_tools,
        estimated_steps,
    }
}

/// Extract the text between `header:` and the next known section header.
fn section(text: &str, header: &str) -> Option<String> {
    const HEADERS: [&str; 4] = ["SUMMARY", "PLAN", "RELEVANT TOOLS", "ESTIMATED STEPS"];

    // ASCII-only folding: the headers are ASCII, and unlike full Unicode
    // uppercasing it preserves byte offsets into the original text.
    let upper = text.to_ascii_uppercase();
    let needle = format!("{header}:");
    let start = upper.find(&needle)? + needle.len();

    let end = HEADERS
        .iter()
        .filter(|h| **h != header)
        .filter_map(|h| upper[start..].find(&format!("{h}:")))
        .min()
        .map(|offset| start + offset)
        .unwrap_or(text.len());

    Some(text[start..end].trim().to_string())
}

fn strip_list_marker(line: &str) -> &str {
    line.trim()
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-')
        .trim()
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn first_integer(text: &str) -> Option<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
