// UI layer: terminal prompts via `dialoguer`, the polling spinner via
// `indicatif`, and coloured status lines via `crossterm`. Nothing here
// talks to the network; `app` decides what to show and when.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use crossterm::style::{Color, Stylize};
use dialoguer::{Confirm, Password};
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::RemoteStatus;
use crate::config::{mask_token, Config};
use crate::task::{BatchReport, Outcome, RemoteId};

pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

/// Colours `text` when stdout is a terminal.
pub fn paint(text: &str, color: Color) -> String {
    if io::stdout().is_terminal() {
        text.with(color).to_string()
    } else {
        text.to_string()
    }
}

pub fn bold(text: &str) -> String {
    if io::stdout().is_terminal() {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

/// Asks for a token with hidden input and returns the updated config.
/// `Ok(None)` when the user entered nothing.
pub fn prompt_for_token(current: &Config) -> Result<Option<Config>> {
    println!("{}", bold("MinerU API Configuration"));
    println!();
    println!(
        "Please enter your API token from: {}",
        paint("https://mineru.net", Color::Blue)
    );
    println!();
    let raw: String = Password::new()
        .with_prompt("Enter API token")
        .allow_empty_password(true)
        .interact()?;
    match current.with_token(&raw) {
        Ok(config) => Ok(Some(config)),
        Err(_) => {
            println!("No token provided.");
            Ok(None)
        }
    }
}

/// After an authentication failure: offer to replace the token.
pub fn confirm_token_update(message: &str) -> Result<bool> {
    println!();
    println!("{} {}", paint("Authorization Error:", Color::Red), message);
    println!("Your token may have expired or is invalid.");
    let answer = Confirm::new()
        .with_prompt("Do you want to update your token now?")
        .default(true)
        .interact()?;
    Ok(answer)
}

pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn state_label(state: &str) -> (String, Color) {
    let (label, color) = match state {
        "waiting-file" => ("Waiting", Color::DarkGrey),
        "pending" => ("Queued", Color::Yellow),
        "running" => ("Processing", Color::Blue),
        "converting" => ("Converting", Color::Cyan),
        "done" => ("Completed", Color::Green),
        "failed" => ("Failed", Color::Red),
        other => (other, Color::DarkGrey),
    };
    (label.to_string(), color)
}

pub fn print_status(id: &RemoteId, statuses: &[RemoteStatus]) {
    match id {
        RemoteId::Task(task_id) => {
            println!("Task ID: {task_id}");
            if let Some(status) = statuses.first() {
                let (label, color) = state_label(&status.state);
                println!("Status:  {}", paint(&label, color));
                print_details(status, "");
            }
        }
        RemoteId::Batch(batch_id) => {
            println!("Batch ID: {batch_id}");
            println!("Files:    {}", statuses.len());
            println!();
            for status in statuses {
                let (label, color) = state_label(&status.state);
                let name = status.file_name.as_deref().unwrap_or("Unknown");
                println!("  {}: {}", name, paint(&label, color));
                print_details(status, "    ");
            }
        }
    }
}

fn print_details(status: &RemoteStatus, indent: &str) {
    match status.state.as_str() {
        "running" => {
            if let Some(progress) = &status.extract_progress {
                if progress.total_pages > 0 {
                    println!(
                        "{indent}Progress: {}/{} pages",
                        progress.extracted_pages, progress.total_pages
                    );
                }
                if let Some(start) = progress.start_time.as_deref().filter(|s| !s.is_empty()) {
                    println!("{indent}Started:  {start}");
                }
            }
        }
        "done" => {
            if let Some(url) = status.zip_url() {
                println!("{indent}Download: {url}");
            }
        }
        "failed" => println!("{indent}Error:   {}", status.error_message()),
        _ => {}
    }
}

pub fn print_submitted(label: &str, id: &RemoteId) {
    let kind = match id {
        RemoteId::Task(_) => "Task ID:",
        RemoteId::Batch(_) => "Batch ID:",
    };
    println!("{} {} {}", bold(label), paint(kind, Color::Cyan), id);
}

pub fn print_report(report: &BatchReport) {
    println!();
    println!("{}", bold("Summary:"));
    for entry in &report.entries {
        let color = match entry.outcome {
            Outcome::Done { .. } => Color::Green,
            Outcome::Failed(_) => Color::Red,
            Outcome::TimedOut | Outcome::Interrupted | Outcome::NotSubmitted => Color::Yellow,
            Outcome::Submitted => Color::Cyan,
        };
        println!("  {}", paint(&entry.to_string(), color));
    }
    let ids = report.resumable();
    if !ids.is_empty() {
        println!();
        for id in ids {
            println!(
                "Use '{}' to check progress.",
                paint(&format!("mineru status {id}"), Color::Cyan)
            );
        }
    }
}

pub fn print_config(config: Option<&Config>, token: Option<&str>, path: &Path) {
    match token {
        Some(token) => {
            println!("Token: {}", mask_token(token));
            println!("Config file: {}", path.display());
        }
        None => println!("No token configured."),
    }
    if let Some(config) = config {
        if let Some(dir) = &config.output_dir {
            println!("Output dir: {}", dir.display());
        }
        if let Some(model) = &config.model {
            println!("Model: {model}");
        }
        if let Some(lang) = &config.language {
            println!("Language: {lang}");
        }
    }
}
