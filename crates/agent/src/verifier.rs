//! Completion verifier — asks the model whether the task is actually done.
//!
//! After the agent loop halts, the verifier assembles an evidence document
//! from the execution ledger and the attempt log, then asks the model (low
//! temperature, JSON output) for a [`CompletionVerdict`]. Malformed model
//! output degrades to a conservative fallback verdict; verification never
//! fails a run.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use taskforge_core::message::Message;
use taskforge_core::provider::{Provider, ProviderRequest};

use crate::context::ExecutionAttempt;
use crate::ledger::RunLedger;

/// Fallback confidence when the verdict JSON cannot be parsed.
const FALLBACK_CONFIDENCE: u8 = 60;

/// Completion status as judged by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Complete,
    Partial,
    Incomplete,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Incomplete => "incomplete",
        }
    }
}

/// A component of the task the model judges finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletedComponent {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub confidence: u8,
}

/// A component the model judges still missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissingComponent {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub tools_needed: Vec<String>,
    #[serde(default)]
    pub blocking_factors: Vec<String>,
}

/// A concrete action the model proposes to finish the task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextAction {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub tools_needed: Vec<String>,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Summary of the evidence the model drew on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceSummary {
    #[serde(default)]
    pub files_created: Vec<String>,
    #[serde(default)]
    pub data_retrieved: Vec<String>,
    #[serde(default)]
    pub operations_performed: Vec<String>,
    #[serde(default)]
    pub verification_notes: String,
}

/// The model's judgment of whether the task is complete. Produced fresh
/// each verification pass; never mutated, only superseded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionVerdict {
    pub status: VerdictStatus,

    /// 0-100 confidence score.
    pub confidence: u8,

    #[serde(default)]
    pub completed: Vec<CompletedComponent>,

    #[serde(default)]
    pub missing: Vec<MissingComponent>,

    #[serde(default)]
    pub next_actions: Vec<NextAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceSummary>,
}

impl CompletionVerdict {
    /// Verdict substituted when the model's JSON cannot be parsed.
    pub fn fallback() -> Self {
        Self {
            status: VerdictStatus::Partial,
            confidence: FALLBACK_CONFIDENCE,
            completed: Vec::new(),
            missing: Vec::new(),
            next_actions: Vec::new(),
            evidence: None,
        }
    }

    /// Whether this verdict ends the verification loop.
    pub fn is_final(&self, confidence_threshold: u8) -> bool {
        self.status == VerdictStatus::Complete || self.confidence >= confidence_threshold
    }
}

pub struct Verifier {
    provider: Arc<dyn Provider>,
    model: String,
}

impl Verifier {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Ask the model for a completion verdict. Infallible: any error or
    /// parse failure produces [`CompletionVerdict::fallback`].
    pub async fn assess(
        &self,
        query: &str,
        ledger: &RunLedger,
        attempts: &[ExecutionAttempt],
    ) -> CompletionVerdict {
        let evidence = build_evidence(query, ledger, attempts);
        let request = ProviderRequest::text(&self.model, vec![Message::user(evidence)], 0.1);

        match self.provider.complete(request).await {
            Ok(response) => parse_verdict(&response.message.content),
            Err(err) => {
                tracing::warn!(error = %err, "verification call failed, using fallback verdict");
                CompletionVerdict::fallback()
            }
        }
    }
}

/// Assemble the evidence document the model judges against.
fn build_evidence(query: &str, ledger: &RunLedger, attempts: &[ExecutionAttempt]) -> String {
    let mut doc = format!(
        "Judge whether this task has been fully completed.\n\nOriginal task: {query}\n\nExecution record:\n"
    );

    for step in &ledger.steps {
        let tag = match step.verification_pass {
            Some(pass) => format!("step {} (verification pass {pass})", step.step),
            None => format!("step {}", step.step),
        };
        doc.push_str(&format!("- {tag}: {}\n", step.digest));
        for call in &step.tool_calls {
            doc.push_str(&format!("    requested tool: {}\n", call.name));
        }
    }

    if !attempts.is_empty() {
        doc.push_str("\nTool executions:\n");
        for attempt in attempts {
            match &attempt.error {
                Some(error) => doc.push_str(&format!(
                    "- {} attempt {}: failed ({error})\n",
                    attempt.tool_name, attempt.attempt
                )),
                None => doc.push_str(&format!(
                    "- {} attempt {}: succeeded\n",
                    attempt.tool_name, attempt.attempt
                )),
            }
        }
    }

    doc.push_str(
        "\nReply with ONLY a JSON object:\n\
        {\n\
          \"status\": \"complete\" | \"partial\" | \"incomplete\",\n\
          \"confidence\": 0-100,\n\
          \"completed\": [{\"description\": \"...\", \"status\": \"...\", \"evidence\": [\"...\"], \"confidence\": 0-100}],\n\
          \"missing\": [{\"description\": \"...\", \"priority\": \"...\", \"tools_needed\": [\"...\"], \"blocking_factors\": [\"...\"]}],\n\
          \"next_actions\": [{\"action\": \"...\", \"tools_needed\": [\"...\"], \"expected_output\": \"...\", \"dependencies\": [\"...\"]}],\n\
          \"evidence\": {\"files_created\": [], \"data_retrieved\": [], \"operations_performed\": [], \"verification_notes\": \"...\"}\n\
        }\n",
    );
    doc
}

/// Parse the verdict out of the model's reply, tolerating code fences and
/// surrounding prose. Anything unparseable becomes the fallback verdict.
fn parse_verdict(text: &str) -> CompletionVerdict {
    let Some(json) = extract_json_object(text) else {
        tracing::debug!("no JSON object found in verification reply, using fallback");
        return CompletionVerdict::fallback();
    };

    match serde_json::from_str::<CompletionVerdict>(json) {
        Ok(mut verdict) => {
            verdict.confidence = verdict.confidence.min(100);
            verdict
        }
        Err(err) => {
            tracing::debug!(error = %err, "verification reply did not parse, using fallback");
            CompletionVerdict::fallback()
        }
    }
}

/// Slice out the outermost `{...}` from a reply that may carry code fences
/// or prose around the JSON.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}
