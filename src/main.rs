//! # Codeloom CLI (`loom`)
//!
//! ## Usage
//!
//! ```bash
//! loom --config ./loom.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `loom tools` | List the registered tools |
//! | `loom call <tool> --param k=v` | Run one tool against the project |
//! | `loom ask "<prompt>"` | Run the orchestration loop and print the answer |
//! | `loom serve` | Start the HTTP server |
//!
//! A missing config file is not an error: every section has defaults, and
//! only `ask` needs a `[providers.primary]` section.
//!
//! ## Examples
//!
//! ```bash
//! loom call find_symbol --param query=App --param kind=class
//! loom call get_diagnostics --param path=src/app.ts --param severity=error
//! loom ask "Where is the session refreshed?" --current-file src/auth.ts --stream
//! loom --root ../web serve
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use codeloom::config::{self, Config};
use codeloom::fs_store::FsProjectStore;
use codeloom::observer::StdoutSink;
use codeloom::orchestrator::{Orchestrator, RunRequest};
use codeloom::retry::{with_retry, RetryPolicy};
use codeloom::server::{self, with_current_file};
use codeloom::telemetry;
use codeloom::tools::params_from_pairs;
use codeloom::traits::{ToolContext, ToolRegistry};

/// Codeloom: code intelligence tools and a tool-calling assistant loop
/// for a TypeScript/JavaScript project.
#[derive(Parser)]
#[command(name = "loom", version, about = "Code intelligence tools and assistant loop")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./loom.toml")]
    config: PathBuf,

    /// Project root, overriding `[project].root`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered tools and their parameters.
    Tools {
        /// Print the full list as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Call one tool and print its output.
    Call {
        /// Tool name, e.g. `find_symbol`.
        tool: String,

        /// Tool parameter as KEY=VALUE (repeatable).
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Ask the assistant about the project.
    Ask {
        prompt: String,

        /// Print text as it is generated.
        #[arg(long)]
        stream: bool,

        /// File the user is looking at.
        #[arg(long)]
        current_file: Option<String>,

        /// Override `[orchestrator].max_steps`.
        #[arg(long)]
        max_steps: Option<usize>,

        /// Print the full run outcome, history included, as JSON.
        #[arg(long, conflicts_with = "stream")]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::minimal()
    };
    if let Some(root) = &cli.root {
        cfg.project.root = root.clone();
    }
    Ok(cfg)
}

fn tool_context(cfg: &Config) -> anyhow::Result<ToolContext> {
    let store = Arc::new(FsProjectStore::from_config(&cfg.project)?);
    Ok(ToolContext::new(store, cfg.project.id.clone()).with_settings(cfg.compiler.clone()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = resolve_config(&cli)?;
    telemetry::init(&cfg.logging.filter);

    match cli.command {
        Commands::Tools { json } => {
            let tools = ToolRegistry::with_builtins();
            if json {
                println!("{}", serde_json::to_string_pretty(&tools.infos())?);
            } else {
                println!("{} tools:", tools.len());
                for info in tools.infos() {
                    let params: Vec<&str> = info.parameters["properties"]
                        .as_object()
                        .map(|p| p.keys().map(String::as_str).collect())
                        .unwrap_or_default();
                    println!("  {} ({})", info.name, params.join(", "));
                    println!("      {}", info.description);
                }
            }
        }
        Commands::Call { tool, params } => {
            let tools = ToolRegistry::with_builtins();
            let Some(found) = tools.find(&tool) else {
                bail!(
                    "Unknown tool '{}'. Available tools: {}",
                    tool,
                    tools.names().join(", ")
                );
            };
            let params = params_from_pairs(&found.parameters_schema(), &params)?;
            let ctx = tool_context(&cfg)?;
            let out = tools.dispatch(&tool, params, &ctx).await?;
            println!("{}", out);
        }
        Commands::Ask {
            prompt,
            stream,
            current_file,
            max_steps,
            json,
        } => {
            let prompt = match current_file {
                Some(file) => with_current_file(&prompt, &file),
                None => prompt,
            };
            let mut request = RunRequest::prompt(prompt);
            request.max_steps = max_steps;

            let tools = Arc::new(ToolRegistry::with_builtins());
            let orchestrator = Orchestrator::from_config(&cfg, tools, tool_context(&cfg)?)?;
            let policy = RetryPolicy::from_config(&cfg.retry);

            let outcome = if stream {
                let sink = StdoutSink::new();
                let outcome = with_retry(&policy, |_| orchestrator.run_streaming(request.clone(), &sink))
                    .await
                    .context("assistant run failed")?;
                println!();
                outcome
            } else {
                with_retry(&policy, |_| orchestrator.run(request.clone()))
                    .await
                    .context("assistant run failed")?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                if !stream {
                    println!("{}", outcome.text);
                }
                eprintln!(
                    "[{} {} · {} step(s){}]",
                    outcome.provider,
                    outcome.model,
                    outcome.steps,
                    if outcome.used_fallback { " · fallback" } else { "" }
                );
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
