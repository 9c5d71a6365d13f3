//! Interactive terminal shell for planning sessions
//!
//! Drives a `SessionController` with plain input sent as messages and
//! slash commands for context editing, artifacts and history.

mod session;

pub use session::ReplSession;

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use eyre::{Context, Result};
use tracing::{info, warn};

use crate::backend::{
    CommandExtractor, DirCurriculum, DirExporter, JsonConversationStore, JsonProfileStore, StaticIdentity,
};
use crate::config::Config;
use crate::llm::create_client;
use crate::session::{Collaborators, RawFile, SessionController};

/// Collaborators backed by the local filesystem and the configured AI provider
pub fn local_collaborators(config: &Config) -> Result<Collaborators> {
    let storage = &config.storage;
    let llm = create_client(&config.llm).map_err(|e| eyre::eyre!("Failed to create LLM client: {}", e))?;

    let extractor = match storage.pdf_command.split_first() {
        Some((program, args)) => CommandExtractor::new(program.clone(), args.to_vec()),
        None => CommandExtractor::pdftotext(),
    };

    Ok(Collaborators {
        identity: Arc::new(StaticIdentity::signed_in(config.user.identity())),
        profile: Arc::new(JsonProfileStore::new(storage.profile_path())),
        extractor: Arc::new(extractor),
        curriculum: Arc::new(DirCurriculum::new(storage.curriculum_dir())),
        llm,
        exporter: Arc::new(DirExporter::new(storage.export_dir())),
        conversations: Arc::new(JsonConversationStore::new(storage.conversations_dir())),
    })
}

/// Warn once if AI turns cannot work
fn warn_if_unconfigured(config: &Config) {
    if let Err(e) = config.validate() {
        warn!(error = %e, "Configuration incomplete");
        println!("{} {}", "!".yellow(), e);
        println!("{}", "Context editing works, AI answers will fail until the key is set.".dimmed());
    }
}

/// Run `mibuntu plan`: set up a new session and enter the shell
pub async fn run_plan(
    config: &Config,
    modules: Vec<String>,
    cycle: String,
    wishes: Option<String>,
    files: Vec<PathBuf>,
) -> Result<()> {
    warn_if_unconfigured(config);
    let controller = Arc::new(SessionController::new(local_collaborators(config)?, &config.session));
    let mut repl = ReplSession::new(controller.clone());
    repl.print_welcome();

    // With files, the wishes wait until the files are applied
    let opening = if files.is_empty() {
        wishes.clone().unwrap_or_default()
    } else {
        String::new()
    };
    let outcome = controller.start_setup(modules, cycle, opening).await?;
    repl.print_setup_outcome(&outcome).await;

    if !files.is_empty() {
        let report = controller.upload_files(read_files(&files)?).await?;
        repl.print_upload_report(&report);
        let summary = controller.apply_changes().await?;
        repl.print_turn(&summary);
        if let Some(wishes) = wishes.filter(|w| !w.trim().is_empty()) {
            info!("run_plan: sending wishes after applying files");
            repl.print_user_echo(&wishes);
            repl.send(&wishes).await?;
        }
    }
    repl.run().await
}

/// Run `mibuntu history resume`: restore a saved session and enter the shell
pub async fn run_resume(config: &Config, conversation_id: &str) -> Result<()> {
    warn_if_unconfigured(config);
    let controller = Arc::new(SessionController::new(local_collaborators(config)?, &config.session));
    controller
        .resume(conversation_id)
        .await
        .context(format!("Failed to resume conversation {}", conversation_id))?;

    let mut repl = ReplSession::new(controller.clone());
    repl.print_welcome();
    for turn in controller.turns().await {
        repl.print_turn(&turn);
    }
    repl.run().await
}

/// Load files from disk for upload
pub fn read_files(paths: &[PathBuf]) -> Result<Vec<RawFile>> {
    paths
        .iter()
        .map(|p| RawFile::from_path(p).context(format!("Failed to read {}", p.display())))
        .collect()
}
