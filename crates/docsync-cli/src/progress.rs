//! Live action output for push and pull

use anyhow::{Context, Result};
use console::style;
use docsync_sync::report::{Action, ActionLog, ActionRecord};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Spinner shown while an engine runs, `None` in quiet mode
pub fn spinner(quiet: bool, message: &'static str) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(template);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Stop the spinner with a final message
pub fn finish(spinner: Option<ProgressBar>, message: &'static str) {
    if let Some(pb) = spinner {
        pb.finish_with_message(message);
    }
}

/// Prints action rows as the engine records them
pub struct ActionPrinter {
    handle: JoinHandle<Result<usize>>,
}

impl ActionPrinter {
    /// Start printing; returns the log to hand to the engine
    ///
    /// Rows go to stdout above the spinner unless `silent`, and are appended to
    /// `action_log` when one is configured.
    pub fn spawn(
        spinner: Option<ProgressBar>,
        silent: bool,
        action_log: Option<PathBuf>,
    ) -> (ActionLog, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(print_rows(receiver, spinner, silent, action_log));
        (ActionLog::with_sender(sender), Self { handle })
    }

    /// Wait until every record has been printed
    pub async fn finish(self) -> Result<usize> {
        self.handle.await.context("Action printer panicked")?
    }
}

async fn print_rows(
    mut receiver: mpsc::UnboundedReceiver<ActionRecord>,
    spinner: Option<ProgressBar>,
    silent: bool,
    action_log: Option<PathBuf>,
) -> Result<usize> {
    let mut file = match &action_log {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("Cannot open action log {}", path.display()))?,
        ),
        None => None,
    };

    let mut printed = 0;
    while let Some(record) = receiver.recv().await {
        let row = record.row();
        if let Some(file) = file.as_mut() {
            file.write_all(format!("{}\n", row).as_bytes()).await?;
        }
        if !silent {
            let line = styled(record.action, &row);
            match &spinner {
                Some(pb) => pb.println(line),
                None => println!("{}", line),
            }
        }
        printed += 1;
    }

    if let Some(file) = file.as_mut() {
        file.flush().await?;
    }
    Ok(printed)
}

fn styled(action: Action, row: &str) -> String {
    match action {
        Action::New => style(row).green().to_string(),
        Action::Update => style(row).cyan().to_string(),
        Action::Error => style(row).red().bold().to_string(),
        Action::Unchanged | Action::SameHash => style(row).dim().to_string(),
    }
}
