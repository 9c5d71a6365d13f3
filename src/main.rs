//! Mibuntu - lesson planning assistant
//!
//! CLI entry point for planning sessions, saved history and usage.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use mibuntu::backend::{ConversationStore, JsonConversationStore, JsonProfileStore, ProfileStore};
use mibuntu::cli::{Cli, Command, HistoryCommand, OutputFormat, get_log_path};
use mibuntu::config::Config;
use mibuntu::domain::Sender;
use mibuntu::repl;
use mibuntu::session::{SessionController, UsagePolicy};

fn setup_logging(level: tracing::Level) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to the log file, never stdout/stderr; the REPL owns the terminal
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

/// CLI flag beats verbose, verbose beats the config file
fn resolve_log_level(cli: &Cli, config: &Config) -> tracing::Level {
    let named = cli
        .log_level
        .as_deref()
        .or(if cli.verbose { Some("debug") } else { None })
        .or(config.log_level.as_deref());
    named.and_then(|s| s.parse().ok()).unwrap_or(tracing::Level::INFO)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(resolve_log_level(&cli, &config)).context("Failed to setup logging")?;

    info!(
        "Mibuntu loaded config: provider={}, model={}",
        config.llm.provider, config.llm.model
    );

    // Dispatch command
    match cli.command {
        Some(Command::Plan {
            modules,
            cycle,
            wishes,
            files,
        }) => repl::run_plan(&config, modules, cycle, wishes, files).await,
        Some(Command::History { command }) => match command {
            HistoryCommand::List { format } => cmd_history_list(&config, format).await,
            HistoryCommand::Show { id } => cmd_history_show(&config, &id).await,
            HistoryCommand::Delete { id } => cmd_history_delete(&config, &id).await,
            HistoryCommand::Resume { id } => repl::run_resume(&config, &id).await,
        },
        Some(Command::Usage { format }) => cmd_usage(&config, format).await,
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn conversation_store(config: &Config) -> Arc<JsonConversationStore> {
    Arc::new(JsonConversationStore::new(config.storage.conversations_dir()))
}

async fn cmd_history_list(config: &Config, format: OutputFormat) -> Result<()> {
    let controller = SessionController::new(repl::local_collaborators(config)?, &config.session);
    let groups = controller.list_history().await.context("Failed to list conversations")?;

    match format {
        OutputFormat::Json => {
            let json: Vec<_> = groups
                .iter()
                .map(|(bucket, items)| serde_json::json!({ "group": bucket.to_string(), "conversations": items }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if groups.is_empty() {
                println!("No saved conversations.");
            }
            for (bucket, items) in groups {
                println!("{}", bucket.to_string().bright_cyan().bold());
                for summary in items {
                    println!(
                        "  {}  {} {}",
                        summary.id.dimmed(),
                        summary.title,
                        format!("({} turns)", summary.turn_count).dimmed()
                    );
                }
            }
        }
    }
    Ok(())
}

async fn cmd_history_show(config: &Config, id: &str) -> Result<()> {
    let conversation = conversation_store(config)
        .load(id)
        .await
        .context("Failed to load conversation")?
        .filter(|c| c.user_id == config.user.id)
        .ok_or_else(|| eyre::eyre!("Conversation not found: {}", id))?;

    println!("{}", conversation.title.bright_cyan().bold());
    println!(
        "{} {}  {} {}",
        "Zyklus:".dimmed(),
        conversation.context.cycle,
        "Module:".dimmed(),
        conversation
            .context
            .selected_module_ids
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    for turn in &conversation.turns {
        match turn.sender {
            Sender::User => println!("{} {}", ">".bright_green(), turn.text),
            Sender::Assistant => println!("{}\n", turn.text),
        }
    }
    Ok(())
}

async fn cmd_history_delete(config: &Config, id: &str) -> Result<()> {
    let controller = SessionController::new(repl::local_collaborators(config)?, &config.session);
    controller
        .delete_conversation(id)
        .await
        .context(format!("Failed to delete conversation {}", id))?;
    println!("Deleted {}", id);
    Ok(())
}

async fn cmd_usage(config: &Config, format: OutputFormat) -> Result<()> {
    let usage = JsonProfileStore::new(config.storage.profile_path())
        .get_usage(&config.user.id)
        .await
        .context("Failed to read usage")?;
    let remaining = UsagePolicy::new(config.session.free_limit).remaining(&usage);

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "userId": config.user.id,
                "subscriptionTier": usage.subscription_tier,
                "interactionCount": usage.interaction_count,
                "remaining": remaining,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("Tier:         {}", usage.subscription_tier);
            println!("Interactions: {}", usage.interaction_count);
            match remaining {
                Some(0) => println!("Remaining:    {}", "0 (upgrade to premium to continue)".bright_magenta()),
                Some(n) => println!("Remaining:    {}", n),
                None => println!("Remaining:    unlimited"),
            }
        }
    }
    Ok(())
}
