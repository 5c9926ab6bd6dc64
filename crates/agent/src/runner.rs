//! The agent loop — plan, step, dispatch, verify.
//!
//! One [`AgentRunner::run`] call is one run: optional planning, a bounded
//! sequence of STEP transitions (model call, tool-call aggregation, retry
//! dispatch, tool replies), then an evidence-based verification loop that
//! may re-enter the step sequence. The step budget is unified: initial
//! execution and all verification continuations draw from the same counter.

use std::sync::Arc;
use std::time::Duration;

use taskforge_config::AppConfig;
use taskforge_core::cancel::StopToken;
use taskforge_core::error::{Error, Result};
use taskforge_core::event::{EventBus, RunEvent};
use taskforge_core::message::{Conversation, Message};
use taskforge_core::provider::{Provider, ProviderRequest, Usage};
use taskforge_core::tool::{ContentBlock, ToolRegistry};

use crate::aggregator::{AggregateError, AggregatedResponse, StreamAggregator};
use crate::context::RunContext;
use crate::dispatcher::RetryDispatcher;
use crate::ledger::{ExecutionStep, LedgerStore, RunLedger};
use crate::planner::Planner;
use crate::verifier::{CompletionVerdict, Verifier};

/// Verification continuations only start when at least this many steps of
/// budget remain.
const SAFETY_MARGIN: u32 = 2;

/// Continuations may take this many steps beyond the number of outstanding
/// next actions.
const CONTINUATION_BUFFER: u32 = 2;

/// Tunables for one runner, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_steps: u32,
    pub max_tool_retries: u32,
    pub retry_delay: Duration,
    pub max_verification_passes: u32,
    pub planning_enabled: bool,
    pub history_window: usize,
    pub verification_confidence_threshold: u8,
}

impl AgentOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            max_steps: config.agent.max_steps,
            max_tool_retries: config.agent.max_tool_retries,
            retry_delay: Duration::from_millis(config.agent.retry_delay_ms),
            max_verification_passes: config.agent.max_verification_passes,
            planning_enabled: config.agent.planning_enabled,
            history_window: config.agent.history_window,
            verification_confidence_threshold: config.agent.verification_confidence_threshold,
        }
    }
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model finished on its own.
    Completed,
    /// The stop token was set; partial results returned.
    Stopped,
    /// The step budget ran out; partial results returned.
    MaxSteps,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::MaxSteps => "max_steps",
        }
    }
}

/// The outward result of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub message: Message,
    pub outcome: RunOutcome,
    pub steps_used: u32,
    pub tools_used: Vec<String>,
    pub usage: Usage,
    pub artifacts: Vec<ContentBlock>,
    pub verdict: Option<CompletionVerdict>,
}

enum LoopExit {
    Done,
    Stopped,
    Budget,
}

struct DriveOutcome {
    exit: LoopExit,
    final_text: String,
    tool_turns: u32,
}

pub struct AgentRunner {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    ledger: Arc<dyn LedgerStore>,
    events: Arc<EventBus>,
    options: AgentOptions,
}

impl AgentRunner {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        ledger: Arc<dyn LedgerStore>,
        events: Arc<EventBus>,
        options: AgentOptions,
    ) -> Self {
        Self {
            provider,
            registry,
            ledger,
            events,
            options,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Execute one run. Always returns a report once past the first model
    /// call; only total transport unavailability at the very first call
    /// surfaces as an error.
    pub async fn run(
        &self,
        query: &str,
        conversation: &mut Conversation,
        stop: StopToken,
    ) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut ctx = RunContext::new(&run_id, query, self.options.max_steps);

        tracing::info!(run_id = %run_id, "starting run");
        conversation.push(Message::user(query));

        if self.options.planning_enabled {
            let planner = Planner::new(
                Arc::clone(&self.provider),
                &self.options.model,
                self.options.history_window,
            );
            let plan = planner
                .plan(query, &self.registry.definitions(), conversation)
                .await;
            conversation.push(Message::system(plan.as_system_message()));
            ctx.plan = Some(plan);
        }

        let drive = self.drive(conversation, &mut ctx, &stop, None, None).await;
        let drive = match drive {
            Ok(outcome) => outcome,
            Err(err) if ctx.current_step <= 1 && ctx.attempts.is_empty() => {
                self.ledger.clear(&ctx.run_id);
                return Err(err);
            }
            Err(err) => {
                self.events.publish(RunEvent::ErrorOccurred {
                    run_id: run_id.clone(),
                    context: "agent loop".into(),
                    error_message: err.to_string(),
                });
                DriveOutcome {
                    exit: LoopExit::Done,
                    final_text: format!("The run ended early after a provider error: {err}"),
                    tool_turns: 0,
                }
            }
        };

        let mut outcome = match drive.exit {
            LoopExit::Done => RunOutcome::Completed,
            LoopExit::Stopped => RunOutcome::Stopped,
            LoopExit::Budget => RunOutcome::MaxSteps,
        };
        let mut final_text = drive.final_text;

        let mut verdict = None;
        if !ctx.attempts.is_empty() && outcome != RunOutcome::Stopped {
            (verdict, outcome, final_text) = self
                .verify(conversation, &mut ctx, &stop, outcome, final_text)
                .await;
        }

        match &verdict {
            Some(v) => self
                .ledger
                .finalize(&ctx.run_id, v.status.as_str(), v.confidence),
            None => self.ledger.finalize(&ctx.run_id, outcome.as_str(), 0),
        }
        self.ledger.clear(&ctx.run_id);

        let message = self.final_message(&ctx, outcome, final_text);

        self.events.publish(RunEvent::Finished {
            run_id: run_id.clone(),
            outcome: outcome.as_str().into(),
            steps_used: ctx.current_step,
            timestamp: chrono::Utc::now(),
        });
        tracing::info!(
            run_id = %run_id,
            outcome = outcome.as_str(),
            steps = ctx.current_step,
            "run finished"
        );

        Ok(RunReport {
            run_id,
            message,
            outcome,
            steps_used: ctx.current_step,
            tools_used: ctx.tools_used.clone(),
            usage: ctx.usage.clone(),
            artifacts: ctx.artifacts.clone(),
            verdict,
        })
    }

    /// The verification loop: assess, and while incomplete with budget and
    /// actions remaining, continue executing and re-assess.
    async fn verify(
        &self,
        conversation: &mut Conversation,
        ctx: &mut RunContext,
        stop: &StopToken,
        mut outcome: RunOutcome,
        mut final_text: String,
    ) -> (Option<CompletionVerdict>, RunOutcome, String) {
        let verifier = Verifier::new(Arc::clone(&self.provider), &self.options.model);
        let mut verdict = None;

        for pass in 1..=self.options.max_verification_passes {
            self.events.publish(RunEvent::VerificationStarted {
                run_id: ctx.run_id.clone(),
                pass,
            });

            let ledger = self
                .ledger
                .snapshot(&ctx.run_id)
                .unwrap_or_else(|| RunLedger::new(&ctx.run_id));
            let assessed = verifier.assess(&ctx.query, &ledger, &ctx.attempts).await;

            self.events.publish(RunEvent::VerdictReached {
                run_id: ctx.run_id.clone(),
                pass,
                status: assessed.status.as_str().into(),
                confidence: assessed.confidence,
            });

            let is_final = assessed.is_final(self.options.verification_confidence_threshold);
            let next_actions = assessed.next_actions.clone();
            verdict = Some(assessed);

            if is_final || next_actions.is_empty() {
                break;
            }
            if ctx.remaining_steps() <= SAFETY_MARGIN {
                tracing::debug!(run_id = %ctx.run_id, "no budget left for continuation");
                break;
            }

            let cap = ctx
                .remaining_steps()
                .min(next_actions.len() as u32 + CONTINUATION_BUFFER);
            let mut instruction =
                String::from("The task is not complete yet. Carry out these remaining actions:\n");
            for (i, action) in next_actions.iter().enumerate() {
                instruction.push_str(&format!("{}. {}", i + 1, action.action));
                if !action.tools_needed.is_empty() {
                    instruction.push_str(&format!(" (tools: {})", action.tools_needed.join(", ")));
                }
                instruction.push('\n');
            }
            conversation.push(Message::system(instruction));

            match self
                .drive(conversation, ctx, stop, Some(pass), Some(cap))
                .await
            {
                Ok(cont) => {
                    if !cont.final_text.is_empty() {
                        final_text = cont.final_text;
                    }
                    match cont.exit {
                        LoopExit::Stopped => {
                            outcome = RunOutcome::Stopped;
                            break;
                        }
                        LoopExit::Budget if ctx.budget_exhausted() => {
                            outcome = RunOutcome::MaxSteps;
                        }
                        _ => {}
                    }
                    // Nothing left to execute: re-verifying cannot change
                    // the evidence.
                    if cont.tool_turns == 0 {
                        break;
                    }
                }
                Err(err) => {
                    self.events.publish(RunEvent::ErrorOccurred {
                        run_id: ctx.run_id.clone(),
                        context: "verification continuation".into(),
                        error_message: err.to_string(),
                    });
                    break;
                }
            }
        }

        (verdict, outcome, final_text)
    }

    /// Run STEP transitions until the model stops calling tools, the budget
    /// runs out, the optional local cap is hit, or the stop token trips.
    async fn drive(
        &self,
        conversation: &mut Conversation,
        ctx: &mut RunContext,
        stop: &StopToken,
        verification_pass: Option<u32>,
        step_cap: Option<u32>,
    ) -> Result<DriveOutcome> {
        let dispatcher = RetryDispatcher::new(
            Arc::clone(&self.registry),
            self.options.max_tool_retries,
            self.options.retry_delay,
        );

        let mut local_steps = 0u32;
        let mut final_text = String::new();
        let mut tool_turns = 0u32;

        loop {
            if stop.is_stopped() {
                tracing::info!(run_id = %ctx.run_id, "stop requested, halting loop");
                return Ok(DriveOutcome {
                    exit: LoopExit::Stopped,
                    final_text,
                    tool_turns,
                });
            }
            if ctx.budget_exhausted() || step_cap.is_some_and(|cap| local_steps >= cap) {
                return Ok(DriveOutcome {
                    exit: LoopExit::Budget,
                    final_text,
                    tool_turns,
                });
            }

            let step = ctx.begin_step();
            local_steps += 1;
            self.events.publish(RunEvent::StepStarted {
                run_id: ctx.run_id.clone(),
                step,
            });

            let response = self.call_model(conversation, ctx).await?;
            if let Some(usage) = &response.usage {
                ctx.usage.add(usage);
            }

            if response.tool_calls.is_empty() {
                if !response.content.is_empty() {
                    conversation.push(Message::assistant(&response.content));
                }
                let mut entry = ExecutionStep::new(step, &response.content, Vec::new());
                if let Some(pass) = verification_pass {
                    entry = entry.during_verification(pass);
                }
                self.ledger.append(&ctx.run_id, entry);

                return Ok(DriveOutcome {
                    exit: LoopExit::Done,
                    final_text: response.content,
                    tool_turns,
                });
            }

            let mut assistant = Message::assistant(&response.content);
            assistant.tool_calls = response.tool_calls.clone();
            conversation.push(assistant);

            let mut entry =
                ExecutionStep::new(step, &response.content, response.tool_calls.clone());
            if let Some(pass) = verification_pass {
                entry = entry.during_verification(pass);
            }
            ctx.progress.push(entry.digest.clone());
            self.ledger.append(&ctx.run_id, entry);

            tool_turns += 1;
            let results = dispatcher
                .dispatch(&response.tool_calls, ctx, &self.events)
                .await;

            // Exactly one tool reply per originating call id, synthesizing
            // a failure reply for any call the dispatcher left unresolved.
            for call in &response.tool_calls {
                match results.iter().find(|r| r.call_id == call.id) {
                    Some(result) => {
                        ctx.artifacts.extend(result.blocks.iter().cloned());
                        conversation.push(Message::tool_reply(&call.id, &result.output));
                    }
                    None => {
                        conversation.push(Message::tool_reply(
                            &call.id,
                            format!("Tool '{}' produced no result.", call.name),
                        ));
                    }
                }
            }

            if !response.content.is_empty() {
                final_text = response.content.clone();
            }
        }
    }

    /// One model call: streaming when the transport supports it with tools,
    /// falling back to a blocking call when the aggregator asks for one.
    async fn call_model(
        &self,
        conversation: &Conversation,
        ctx: &RunContext,
    ) -> Result<AggregatedResponse> {
        let tools = self.registry.definitions();
        let request = ProviderRequest {
            model: self.options.model.clone(),
            messages: conversation.messages.clone(),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            top_p: None,
            tools: tools.clone(),
            stream: true,
            stop: Vec::new(),
        };

        let can_stream = tools.is_empty() || self.provider.supports_streaming_with_tools();
        if can_stream {
            match self.provider.stream(request.clone()).await {
                Ok(rx) => {
                    let aggregator = StreamAggregator::new(!tools.is_empty());
                    let run_id = ctx.run_id.clone();
                    let events = Arc::clone(&self.events);
                    match aggregator
                        .aggregate(rx, |text| {
                            events.publish(RunEvent::Chunk {
                                run_id: run_id.clone(),
                                content: text.to_string(),
                            });
                        })
                        .await
                    {
                        Ok(response) => return Ok(response),
                        Err(AggregateError::RetryBlocking) => {
                            tracing::info!(run_id = %ctx.run_id, "retrying turn as a blocking call");
                        }
                        Err(AggregateError::Stream(err)) => return Err(Error::Provider(err)),
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "stream setup failed, falling back to blocking call");
                }
            }
        }

        let mut request = request;
        request.stream = false;
        let response = self.provider.complete(request).await?;
        Ok(AggregatedResponse {
            content: response.message.content,
            tool_calls: response.message.tool_calls,
            finish_reason: None,
            usage: response.usage,
        })
    }

    fn final_message(
        &self,
        ctx: &RunContext,
        outcome: RunOutcome,
        final_text: String,
    ) -> Message {
        let content = match outcome {
            RunOutcome::Completed => final_text,
            RunOutcome::Stopped => {
                if final_text.is_empty() {
                    "Run stopped by user.".into()
                } else {
                    format!("{final_text}\n\n[Run stopped by user; results are partial.]")
                }
            }
            RunOutcome::MaxSteps => {
                if final_text.is_empty() {
                    "Step budget reached before the task finished.".into()
                } else {
                    format!("{final_text}\n\n[Step budget reached; results may be partial.]")
                }
            }
        };

        let mut message = Message::assistant(content);
        message
            .metadata
            .insert("run_id".into(), ctx.run_id.clone().into());
        message
            .metadata
            .insert("outcome".into(), outcome.as_str().into());
        message
            .metadata
            .insert("steps_used".into(), ctx.current_step.into());
        message.metadata.insert(
            "tools_used".into(),
            serde_json::Value::Array(
                ctx.tools_used
                    .iter()
                    .map(|t| serde_json::Value::String(t.clone()))
                    .collect(),
            ),
        );
        message
    }
}
