//! REPL session management

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use crate::domain::{ArtifactKind, ConversationTurn, Sender};
use crate::session::{RawFile, SessionController, SessionError, SessionPhase, SetupOutcome, TurnOutcome, UploadReport};

/// Characters of a file shown in `/files`
const PREVIEW_CHARS: usize = 60;

/// Interactive planning session in the terminal
pub struct ReplSession {
    controller: Arc<SessionController>,
    last_setup: Option<(Vec<String>, String)>,
}

impl ReplSession {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self {
            controller,
            last_setup: None,
        }
    }

    /// Run the REPL main loop
    pub async fn run(&mut self) -> Result<()> {
        let context = self.controller.active_context().await;
        self.last_setup = Some((context.selected_module_ids.into_iter().collect(), context.cycle));

        // Create readline editor for proper line editing
        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let prompt = if self.controller.has_unapplied_changes().await {
                format!("{} ", "*>".bright_yellow())
            } else {
                format!("{} ", ">".bright_green())
            };

            match rl.readline(&prompt) {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }

                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash_command(input).await {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                        }
                    } else {
                        self.send(input).await?;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C - just show new prompt
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        println!("Auf Wiedersehen!");
        Ok(())
    }

    pub fn print_welcome(&self) {
        println!();
        println!("{}", "Mibuntu Lektionsplanung".bright_cyan().bold());
        println!("Type {} for help, {} to quit", "/help".yellow(), "/quit".yellow());
        println!(
            "{}",
            "A prompt of '*>' means draft changes are waiting for /apply.".dimmed()
        );
        println!();
    }

    pub async fn print_setup_outcome(&self, outcome: &SetupOutcome) {
        match outcome {
            SetupOutcome::Welcomed(turn) => self.print_turn(turn),
            SetupOutcome::Opened(outcome) => {
                if let Some(first) = self.controller.turns().await.into_iter().find(|t| t.is_user()) {
                    self.print_user_echo(&first.text);
                }
                self.print_outcome(outcome);
            }
        }
    }

    pub fn print_user_echo(&self, text: &str) {
        println!("{} {}", ">".bright_green(), text);
    }

    pub fn print_turn(&self, turn: &ConversationTurn) {
        match turn.sender {
            Sender::User => self.print_user_echo(&turn.text),
            Sender::Assistant if turn.is_generated() => {
                println!();
                println!("{}", turn.text);
                if turn.thought.is_some() {
                    println!("{}", "(Überlegungen vorhanden, /thought zeigt sie)".dimmed());
                }
                println!();
            }
            Sender::Assistant => println!("{} {}", "Mibuntu:".bright_blue(), turn.text),
        }
    }

    pub fn print_upload_report(&self, report: &UploadReport) {
        for name in &report.added {
            println!("{} {}", "+".bright_green(), name);
        }
        for skipped in &report.skipped {
            println!("{} {} ({})", "-".red(), skipped.name, skipped.reason.dimmed());
        }
    }

    fn print_outcome(&self, outcome: &TurnOutcome) {
        match outcome {
            TurnOutcome::Ignored => {}
            TurnOutcome::Blocked { count, limit } => {
                println!();
                println!(
                    "{} Du hast {} von {} kostenlosen Anfragen verbraucht.",
                    "Limit erreicht:".bright_magenta().bold(),
                    count,
                    limit
                );
                println!("Mit einem Premium-Abo planst du ohne Begrenzung weiter.");
                println!();
            }
            TurnOutcome::Completed(turn) => self.print_turn(turn),
            TurnOutcome::Failed { turn, retryable } => {
                self.print_turn(turn);
                if *retryable {
                    println!("{}", "Vorübergehender Fehler: sende die Nachricht später noch einmal.".dimmed());
                }
            }
        }
    }

    /// Send one message and print the outcome; refusals are printed, not returned
    pub async fn send(&self, text: &str) -> Result<()> {
        println!("{}", "Mibuntu denkt nach...".dimmed());
        match self.controller.send_message(text).await {
            Ok(outcome) => self.print_outcome(&outcome),
            Err(e @ (SessionError::Busy(_) | SessionError::NotActive)) => {
                println!("{} {}", "!".yellow(), e);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Handle slash commands
    async fn handle_slash_command(&mut self, input: &str) -> SlashResult {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let cmd = parts.first().copied().unwrap_or("");
        let args = &parts[1.min(parts.len())..];
        debug!(%cmd, args = args.len(), "handle_slash_command: called");

        let result = match cmd {
            "/help" | "/h" => {
                self.print_help();
                Ok(())
            }
            "/quit" | "/q" | "/exit" => return SlashResult::Quit,
            "/modules" => self.cmd_modules().await,
            "/toggle" => self.cmd_toggle(args).await,
            "/upload" => self.cmd_upload(args).await,
            "/files" => self.cmd_files().await,
            "/remove" => self.cmd_remove(args).await,
            "/activate" => self.cmd_activate(args).await,
            "/apply" => self.cmd_apply().await,
            "/artifact" => self.cmd_artifact(args).await,
            "/thought" => self.cmd_thought().await,
            "/save" => self.cmd_save().await,
            "/usage" => self.cmd_usage().await,
            "/reset" => self.cmd_reset().await,
            "/setup" => self.cmd_setup(args).await,
            _ => {
                println!("{} Unknown command: {}", "?".yellow(), cmd);
                println!("Type {} for available commands", "/help".yellow());
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("{} {}", "Error:".red(), e);
        }
        SlashResult::Continue
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Context (draft until /apply):".bright_cyan());
        println!("  {:22} Show active and draft modules", "/modules".yellow());
        println!("  {:22} Add or remove a curriculum module", "/toggle <ID>".yellow());
        println!("  {:22} Upload reference files", "/upload <PATH>...".yellow());
        println!("  {:22} List uploaded files", "/files".yellow());
        println!("  {:22} Remove file number N", "/remove <N>".yellow());
        println!("  {:22} Switch file N on or off", "/activate <N>".yellow());
        println!("  {:22} Apply draft changes", "/apply".yellow());
        println!();
        println!("{}", "Session:".bright_cyan());
        println!("  {:22} Export dossier, handout or presentation", "/artifact <KIND>".yellow());
        println!("  {:22} Show the reasoning of the last answer", "/thought".yellow());
        println!("  {:22} Save the conversation", "/save".yellow());
        println!("  {:22} Show remaining requests", "/usage".yellow());
        println!("  {:22} Clear the session", "/reset".yellow());
        println!("  {:22} Start again after /reset", "/setup <CYCLE> <ID>...".yellow());
        println!("  {:22} Show this help", "/help".yellow());
        println!("  {:22} Exit", "/quit".yellow());
        println!();
    }

    async fn cmd_modules(&self) -> Result<(), SessionError> {
        let active = self.controller.active_context().await;
        let draft = self.controller.draft_context().await;
        println!("{} {}", "Zyklus:".bright_cyan(), active.cycle);
        for id in draft.selected_module_ids.union(&active.selected_module_ids) {
            let marker = match (active.selected_module_ids.contains(id), draft.selected_module_ids.contains(id)) {
                (true, true) => " ".normal(),
                (false, true) => "+".bright_green(),
                (true, false) => "-".red(),
                (false, false) => continue,
            };
            println!("  {} {}", marker, id);
        }
        Ok(())
    }

    async fn cmd_toggle(&self, args: &[&str]) -> Result<(), SessionError> {
        if args.is_empty() {
            println!("Usage: /toggle <MODULE_ID>...");
            return Ok(());
        }
        for id in args {
            self.controller.toggle_module(id).await?;
        }
        self.cmd_modules().await
    }

    async fn cmd_upload(&self, args: &[&str]) -> Result<(), SessionError> {
        if args.is_empty() {
            println!("Usage: /upload <PATH>...");
            return Ok(());
        }
        let mut files = Vec::new();
        for path in args {
            match RawFile::from_path(&PathBuf::from(path)) {
                Ok(file) => files.push(file),
                Err(e) => println!("{} {} ({})", "-".red(), path, e),
            }
        }
        let report = self.controller.upload_files(files).await?;
        self.print_upload_report(&report);
        Ok(())
    }

    async fn cmd_files(&self) -> Result<(), SessionError> {
        let draft = self.controller.draft_context().await;
        if draft.uploaded_files.is_empty() {
            println!("{}", "No files uploaded.".dimmed());
            return Ok(());
        }
        for (i, file) in draft.uploaded_files.iter().enumerate() {
            let state = if file.is_active { "on ".bright_green() } else { "off".dimmed() };
            println!(
                "  {:>2}. [{}] {} {}",
                i + 1,
                state,
                file.name,
                preview(&file.extracted_text).dimmed()
            );
        }
        Ok(())
    }

    async fn cmd_remove(&self, args: &[&str]) -> Result<(), SessionError> {
        let Some(index) = parse_index(args.first().copied()) else {
            println!("Usage: /remove <N> (see /files)");
            return Ok(());
        };
        match self.controller.remove_file(index).await? {
            Some(file) => println!("{} {}", "removed".dimmed(), file.name),
            None => println!("{} No file number {}", "?".yellow(), index + 1),
        }
        Ok(())
    }

    async fn cmd_activate(&self, args: &[&str]) -> Result<(), SessionError> {
        let Some(index) = parse_index(args.first().copied()) else {
            println!("Usage: /activate <N> (see /files)");
            return Ok(());
        };
        match self.controller.toggle_file_active(index).await? {
            Some(true) => println!("File {} is active", index + 1),
            Some(false) => println!("File {} is inactive", index + 1),
            None => println!("{} No file number {}", "?".yellow(), index + 1),
        }
        Ok(())
    }

    async fn cmd_apply(&self) -> Result<(), SessionError> {
        if !self.controller.has_unapplied_changes().await {
            println!("{}", "Nothing to apply.".dimmed());
            return Ok(());
        }
        let turn = self.controller.apply_changes().await?;
        self.print_turn(&turn);
        Ok(())
    }

    async fn cmd_artifact(&self, args: &[&str]) -> Result<(), SessionError> {
        let Some(kind) = args.first().and_then(|a| ArtifactKind::parse(a)) else {
            println!("Usage: /artifact <dossier|handout|presentation>");
            return Ok(());
        };
        println!("{}", format!("Erstelle {}...", kind).dimmed());
        let (artifact, location) = self.controller.export_artifact(kind).await?;
        println!("{} {} ({} chars)", "Saved".bright_green(), location, artifact.content.chars().count());
        Ok(())
    }

    async fn cmd_thought(&self) -> Result<(), SessionError> {
        let thought = self
            .controller
            .turns()
            .await
            .into_iter()
            .rev()
            .find(|t| t.is_generated())
            .and_then(|t| t.thought);
        match thought {
            Some(thought) => println!("{}", thought.dimmed()),
            None => println!("{}", "The last answer has no reasoning block.".dimmed()),
        }
        Ok(())
    }

    async fn cmd_save(&self) -> Result<(), SessionError> {
        let summary = self.controller.save_conversation().await?;
        println!("{} {} ({})", "Saved".bright_green(), summary.title, summary.id.dimmed());
        Ok(())
    }

    async fn cmd_usage(&self) -> Result<(), SessionError> {
        let usage = self.controller.refresh_usage().await?;
        match self.controller.remaining_turns().await {
            Some(left) => println!(
                "{} tier, {} requests used, {} left",
                usage.subscription_tier, usage.interaction_count, left
            ),
            None => println!("{} tier, {} requests used", usage.subscription_tier, usage.interaction_count),
        }
        Ok(())
    }

    async fn cmd_reset(&self) -> Result<(), SessionError> {
        self.controller.reset().await?;
        let hint = match &self.last_setup {
            Some((modules, cycle)) => format!("/setup {} {}", cycle, modules.join(" ")),
            None => "/setup <CYCLE> <MODULE_ID>...".to_string(),
        };
        println!("Session cleared. Start again with {}", hint.yellow());
        Ok(())
    }

    async fn cmd_setup(&mut self, args: &[&str]) -> Result<(), SessionError> {
        if self.controller.phase().await == SessionPhase::Active {
            println!("{} A session is active; use /reset first", "?".yellow());
            return Ok(());
        }
        let Some((cycle, modules)) = args.split_first() else {
            println!("Usage: /setup <CYCLE> <MODULE_ID>...");
            return Ok(());
        };
        let modules: Vec<String> = modules.iter().map(|m| m.to_string()).collect();
        let outcome = self.controller.start_setup(modules.clone(), *cycle, "").await?;
        self.last_setup = Some((modules, cycle.to_string()));
        self.print_setup_outcome(&outcome).await;
        Ok(())
    }
}

/// One-based file number to zero-based index
fn parse_index(arg: Option<&str>) -> Option<usize> {
    arg?.parse::<usize>().ok()?.checked_sub(1)
}

fn preview(text: &str) -> String {
    let line: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut preview: String = line.chars().take(PREVIEW_CHARS).collect();
    if line.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

/// Result of handling a slash command
enum SlashResult {
    Continue,
    Quit,
}
