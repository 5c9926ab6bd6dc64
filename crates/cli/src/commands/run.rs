//! `taskforge run` — Execute one agent run for a task.

use std::sync::Arc;

use taskforge_agent::{AgentOptions, AgentRunner, InMemoryLedgerStore};
use taskforge_config::AppConfig;
use taskforge_core::cancel::StopToken;
use taskforge_core::event::{EventBus, RunEvent};
use taskforge_core::message::Conversation;
use taskforge_tools::{default_registry, ToolPolicy};

pub async fn run(
    task: String,
    model: Option<String>,
    max_steps: Option<u32>,
    no_plan: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config.validate()?;

    if config.api_key.is_none() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    TASKFORGE_API_KEY   (generic)");
        eprintln!("    OPENROUTER_API_KEY  (for OpenRouter)");
        eprintln!("    OPENAI_API_KEY      (for OpenAI direct)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = taskforge_providers::provider_from_config(&config)?;

    let policy = ToolPolicy {
        allowed_roots: config.tools.allowed_roots.clone(),
        forbidden_paths: config.tools.forbidden_paths.clone(),
    };
    let registry = Arc::new(default_registry(&policy)?);

    let mut options = AgentOptions::from_config(&config);
    if let Some(model) = model {
        options.model = model;
    }
    if let Some(max_steps) = max_steps {
        options.max_steps = max_steps;
    }
    if no_plan {
        options.planning_enabled = false;
    }

    let events = Arc::new(EventBus::default());
    let runner = AgentRunner::new(
        provider,
        registry,
        Arc::new(InMemoryLedgerStore::new()),
        Arc::clone(&events),
        options,
    );

    // Ctrl+C trips the stop token; the loop halts at its next step check.
    let stop = StopToken::new();
    let ctrlc_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Stop requested, finishing the current step...");
            ctrlc_stop.stop();
        }
    });

    // Progress display, fed from the event bus.
    let mut rx = events.subscribe();
    let progress = tokio::spawn(async move {
        use std::io::Write;
        while let Ok(event) = rx.recv().await {
            match event.as_ref() {
                RunEvent::StepStarted { step, .. } => {
                    eprintln!("  [step {step}]");
                }
                RunEvent::Chunk { content, .. } => {
                    eprint!("{content}");
                    let _ = std::io::stderr().flush();
                }
                RunEvent::ToolCallIssued { name, .. } => {
                    eprintln!("\n  -> {name}");
                }
                RunEvent::ToolCompleted {
                    name,
                    success,
                    attempts,
                    ..
                } => {
                    let mark = if *success { "ok" } else { "failed" };
                    eprintln!("  <- {name}: {mark} ({attempts} attempt(s))");
                }
                RunEvent::VerificationStarted { pass, .. } => {
                    eprintln!("  [verification pass {pass}]");
                }
                RunEvent::VerdictReached {
                    status, confidence, ..
                } => {
                    eprintln!("  verdict: {status} ({confidence}% confident)");
                }
                RunEvent::Finished { .. } => break,
                RunEvent::ErrorOccurred { error_message, .. } => {
                    eprintln!("  [error] {error_message}");
                }
            }
        }
    });

    let mut conversation = Conversation::new();
    let report = runner.run(&task, &mut conversation, stop).await?;
    let _ = progress.await;

    println!("\n{}\n", report.message.content);
    println!("  outcome:    {}", report.outcome.as_str());
    println!("  steps:      {}", report.steps_used);
    if !report.tools_used.is_empty() {
        println!("  tools used: {}", report.tools_used.join(", "));
    }
    if report.usage.total_tokens > 0 {
        println!(
            "  tokens:     {} prompt + {} completion",
            report.usage.prompt_tokens, report.usage.completion_tokens
        );
    }
    if let Some(verdict) = &report.verdict {
        println!(
            "  verified:   {} ({}% confident)",
            verdict.status.as_str(),
            verdict.confidence
        );
    }

    Ok(())
}
