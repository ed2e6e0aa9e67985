//! Command-line harness for running the recon research agent end to end.
//!
//! Defaults to a network-free demo mode (schema-filled mock responses, no
//! API key required) so the orchestrator can be exercised without any setup.
//! Pass `--live` to call a real OpenAI-compatible model instead.

mod llm;
mod output;
mod template;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use recon_agent::classify::ClassifierConfig;
use recon_agent::config::RunConfig;
use recon_agent::demo::SchemaFillLlmClient;
use recon_agent::event_sink::JsonlEventSink;
use recon_agent::invoker::PromptInvoker;
use recon_agent::orchestrator;
use recon_agent::registry::SourceRegistry;
use recon_core::model::GoalContext;
use recon_core::prompt::LlmClient;
use tracing_subscriber::EnvFilter;

use crate::llm::OpenAiCompatibleClient;
use crate::template::FileTemplateRenderer;

/// Runs an autonomous research session and prints the resulting goal tree.
#[derive(Parser, Debug)]
#[command(name = "recon", version, about)]
struct Args {
    /// Research question to investigate.
    question: String,

    /// Path to a TOML run configuration. Falls back to built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the `<template_name>.md` prompt files.
    #[arg(long, default_value = "cli/templates")]
    templates: PathBuf,

    /// Path to append the JSONL event log to.
    #[arg(long, default_value = "recon-events.jsonl")]
    events: PathBuf,

    /// Call a real OpenAI-compatible model instead of the built-in
    /// network-free demo client.
    #[arg(long)]
    live: bool,

    /// Base URL of an OpenAI-compatible chat-completions API. Only used with `--live`.
    #[arg(long, default_value = "https://api.openai.com/v1")]
    base_url: String,

    /// Model id to use for every role. Only used with `--live`.
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Environment variable holding the API key. Only used with `--live`.
    #[arg(long, default_value = "RECON_API_KEY")]
    api_key_env: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config from {}", path.display()))?;
            RunConfig::from_toml(&text).with_context(|| "failed to parse run configuration")?
        }
        None => RunConfig::default(),
    };

    let llm: Arc<dyn LlmClient> = if args.live {
        let api_key = std::env::var(&args.api_key_env)
            .with_context(|| format!("set {} in your environment", args.api_key_env))?;
        Arc::new(OpenAiCompatibleClient::new(args.base_url.clone(), api_key, args.model.clone()))
    } else {
        Arc::new(SchemaFillLlmClient)
    };
    let renderer = Arc::new(FileTemplateRenderer::new(args.templates.clone()));
    let current_date = today()?;
    let invoker = PromptInvoker::new(renderer, llm, current_date);

    let registry = SourceRegistry::new();
    let context = GoalContext::new(args.question.clone(), registry.enabled_sources(), config.constraints.clone());

    let event_sink = Arc::new(
        JsonlEventSink::open(&args.events)
            .with_context(|| format!("failed to open event log at {}", args.events.display()))?,
    );

    println!("recon: {}", args.question);
    println!("events: {}", args.events.display());

    let bundle = orchestrator::run_with_event_counting(
        &args.question,
        registry,
        context,
        event_sink,
        invoker,
        ClassifierConfig::from(config.error_handling.clone()),
        HashMap::new(),
        &config,
    )
    .await;

    let json = output::bundle_to_json(&bundle);
    println!("{}", serde_json::to_string_pretty(&json)?);

    Ok(())
}

fn today() -> Result<String> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    Ok(time::OffsetDateTime::now_utc().format(&format)?)
}
