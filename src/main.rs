// ABOUTME: Main entry point for the headless-coder relay and one-shot prompt runner
// ABOUTME: Initializes logging and config, then serves the relay or runs a single prompt

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coder_agent::{AdapterRegistry, CancelSignal, RunOpts, StartOpts, StreamEvent};
use headless_coder::{config::Config, relay};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "headless-coder", version, about = "Drive headless coding agents")]
struct Cli {
    /// Config file (defaults to ./headless-coder.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the session relay (default)
    Serve,
    /// Run one prompt and print its events as NDJSON
    Prompt {
        /// Adapter to use (claude, codex, gemini)
        #[arg(long)]
        provider: String,
        /// Resume an existing thread instead of starting one
        #[arg(long)]
        resume: Option<String>,
        /// JSON Schema file the final answer must match
        #[arg(long)]
        schema: Option<PathBuf>,
        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Working directory for the agent
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Emit incremental message deltas
        #[arg(long)]
        partial: bool,
        text: String,
    },
    /// List configured adapters
    Agents,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so prompt output on stdout stays clean NDJSON
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let registry = AdapterRegistry::builtin(&config.adapters);

    tracing::debug!(
        relay = %config.bind_addr(),
        agents = ?registry.names(),
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => relay::serve(&config, registry).await,
        Command::Agents => {
            for name in registry.names() {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Prompt {
            provider,
            resume,
            schema,
            timeout_secs,
            cwd,
            partial,
            text,
        } => {
            let success = run_prompt(
                &registry,
                PromptArgs {
                    provider,
                    resume,
                    schema,
                    timeout_secs,
                    cwd,
                    partial,
                    text,
                },
            )
            .await?;
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

struct PromptArgs {
    provider: String,
    resume: Option<String>,
    schema: Option<PathBuf>,
    timeout_secs: Option<u64>,
    cwd: Option<PathBuf>,
    partial: bool,
    text: String,
}

/// Stream one run to stdout; returns whether it finished with `done`
async fn run_prompt(registry: &AdapterRegistry, args: PromptArgs) -> Result<bool> {
    let coder = registry.create_coder(&args.provider, StartOpts::default())?;
    let opts = StartOpts {
        working_directory: args.cwd,
        ..Default::default()
    };
    let thread = match &args.resume {
        Some(id) => coder.resume_thread(id, opts).await?,
        None => coder.start_thread(opts).await?,
    };

    let signal = CancelSignal::new();
    let mut run_opts = RunOpts::default().with_signal(signal.clone());
    if let Some(path) = &args.schema {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
        let schema: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("Schema file is not valid JSON: {}", path.display()))?;
        run_opts = run_opts.with_output_schema(schema);
    }
    if args.partial {
        run_opts = run_opts.with_partial_messages();
    }
    if let Some(secs) = args.timeout_secs {
        signal.cancel_after(Duration::from_secs(secs), "timeout");
    }

    let ctrl_c_signal = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_signal.cancel("interrupted by user");
        }
    });

    let mut stream = coder.run_streamed(&thread, args.text.as_str(), run_opts);
    let mut stdout = std::io::stdout().lock();
    let mut success = false;
    while let Some(event) = stream.recv().await {
        serde_json::to_writer(&mut stdout, &event)?;
        writeln!(stdout)?;
        stdout.flush()?;
        success = matches!(event, StreamEvent::Done { .. });
    }

    tracing::info!(
        provider = %args.provider,
        thread_id = ?coder.get_thread_id(&thread),
        success,
        "Prompt finished"
    );
    Ok(success)
}
