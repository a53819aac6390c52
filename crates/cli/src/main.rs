// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use foreman::command;
use foreman::config::Config;

#[derive(Parser)]
#[command(name = "foreman", version, about = "Prompt-to-session dispatcher for AI coding agents.")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Submit a prompt to the queue.
    Submit(command::SubmitArgs),
    /// Show one prompt.
    Get(command::IdArgs),
    /// Cancel a prompt (immediate if pending, interrupt if running).
    Cancel(command::IdArgs),
    /// Requeue a failed prompt.
    Retry(command::IdArgs),
    /// List prompts.
    List(command::ListArgs),
    /// List sessions.
    Sessions(command::SessionsArgs),
    /// Register a session backed by a tmux session of the same name.
    Register(command::RegisterArgs),
    /// Remove a session (refuses while it holds a prompt).
    Deregister(command::NameArgs),
    /// List active directory locks.
    Locks,
    /// Show the assignment log.
    History(command::HistoryArgs),
    /// Queue and session counts.
    Stats,
    /// Remove terminal prompts and log rows past the retention window.
    Cleanup,
}

fn run_subcommand(config: &Config, subcommand: &Commands) -> anyhow::Result<()> {
    match subcommand {
        Commands::Submit(args) => command::submit(config, args),
        Commands::Get(args) => command::get(config, args),
        Commands::Cancel(args) => command::cancel(config, args),
        Commands::Retry(args) => command::retry(config, args),
        Commands::List(args) => command::list(config, args),
        Commands::Sessions(args) => command::sessions(config, args),
        Commands::Register(args) => command::register(config, args),
        Commands::Deregister(args) => command::deregister(config, args),
        Commands::Locks => command::locks(config),
        Commands::History(args) => command::history(config, args),
        Commands::Stats => command::stats(config),
        Commands::Cleanup => command::cleanup(config),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.subcommand {
        Some(ref subcommand) => {
            if let Err(e) = run_subcommand(&cli.config, subcommand) {
                eprintln!("error: {e:#}");
                std::process::exit(1);
            }
        }
        None => {
            let config = cli.config;

            if let Err(e) = config.validate() {
                eprintln!("error: {e}");
                std::process::exit(2);
            }

            if let Err(e) = foreman::run::run(config).await {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
    }
}
