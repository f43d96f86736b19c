// Turning command-line inputs into sources and submitting them.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use crate::api::ParseService;
use crate::error::ApiError;
use crate::shutdown::ShutdownFlag;
use crate::task::{BatchReport, Outcome, ParseOptions, ParseTask, RemoteId, ReportEntry, Source};

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "ppt", "pptx", "png", "jpg", "jpeg", "html",
];

lazy_static! {
    static ref URL_PATTERN: Regex =
        Regex::new(r#"https?://[^\s<>"'{}|\\^`\[\]]+"#).expect("valid URL pattern");
    static ref DOMAIN_PATTERN: Regex =
        Regex::new(r"(?:www\.)?[a-zA-Z0-9][-a-zA-Z0-9]*\.[a-zA-Z]{2,}[^\s]*")
            .expect("valid domain pattern");
}

pub fn is_url(input: &str) -> bool {
    reqwest::Url::parse(input)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Pulls the first URL out of free text; bare domains get `https://`.
pub fn extract_url(text: &str) -> Option<String> {
    if let Some(m) = URL_PATTERN.find(text) {
        return Some(m.as_str().to_string());
    }
    DOMAIN_PATTERN
        .find(text)
        .map(|m| format!("https://{}", m.as_str()))
}

/// Classifies a single-parse argument.
pub fn classify(input: &str) -> Source {
    if is_url(input) {
        return Source::Url(input.to_string());
    }
    let path = expand_home(input);
    if path.exists() {
        return Source::File(absolute(path));
    }
    // `report.pdf` is a missing file, not the domain report.pdf.
    if !input.contains(char::is_whitespace) && has_supported_extension(&path) {
        return Source::File(path);
    }
    match extract_url(input) {
        Some(url) => Source::Url(url),
        None => Source::File(path),
    }
}

/// Expands batch arguments: URLs pass through, glob patterns that are not
/// literal paths are expanded in sorted order. A pattern matching nothing
/// stays as a single (missing) file so it shows up in the report.
pub fn expand_inputs(inputs: &[String]) -> Vec<Source> {
    let mut sources = Vec::new();
    for input in inputs {
        if is_url(input) {
            sources.push(Source::Url(input.clone()));
            continue;
        }
        let path = expand_home(input);
        if !path.exists() && input.contains(['*', '?', '[']) {
            let mut matches: Vec<PathBuf> = match glob::glob(&path.to_string_lossy()) {
                Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
                Err(e) => {
                    warn!(pattern = %input, error = %e, "Invalid glob pattern");
                    Vec::new()
                }
            };
            matches.sort();
            if matches.is_empty() {
                sources.push(Source::File(path));
            } else {
                sources.extend(matches.into_iter().map(|p| Source::File(absolute(p))));
            }
            continue;
        }
        sources.push(Source::File(absolute(path)));
    }
    sources
}

/// Checks a local file before any network traffic.
pub fn validate_file(path: &Path) -> Result<(), String> {
    if !path.is_file() {
        return Err(format!("file not found: {}", path.display()));
    }
    if !has_supported_extension(path) {
        return Err(format!(
            "unsupported format '.{}' (supported: {})",
            extension(path),
            SUPPORTED_EXTENSIONS.join(", ")
        ));
    }
    Ok(())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

fn has_supported_extension(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension(path).as_str())
}

/// Result of submitting one input.
#[derive(Debug)]
pub enum Submission {
    Accepted(ParseTask),
    Rejected { source: Source, reason: String },
    /// Never sent because the user pressed Ctrl+C first.
    Unsent(Source),
}

impl Submission {
    pub fn source(&self) -> &Source {
        match self {
            Submission::Accepted(task) => task.source(),
            Submission::Rejected { source, .. } | Submission::Unsent(source) => source,
        }
    }
}

/// Report for `--no-wait`: accepted inputs are listed with their ids.
pub fn report_without_waiting(submissions: Vec<Submission>) -> BatchReport {
    BatchReport::new(
        submissions
            .into_iter()
            .map(|s| match s {
                Submission::Accepted(task) => ReportEntry {
                    label: task.source().label(),
                    remote_id: Some(task.remote_id().clone()),
                    outcome: Outcome::Submitted,
                },
                Submission::Rejected { source, reason } => ReportEntry {
                    label: source.label(),
                    remote_id: None,
                    outcome: Outcome::Failed(reason),
                },
                Submission::Unsent(source) => ReportEntry {
                    label: source.label(),
                    remote_id: None,
                    outcome: Outcome::NotSubmitted,
                },
            })
            .collect(),
    )
}

/// Submits one source and returns its remote id.
pub fn submit_one(
    service: &dyn ParseService,
    source: &Source,
    options: &ParseOptions,
) -> Result<RemoteId, ApiError> {
    match source {
        Source::Url(url) => service.submit_url(url, options).map(RemoteId::Task),
        Source::File(path) => service.submit_file(path, options).map(RemoteId::Batch),
    }
}

/// Submits every source in order. A failure for one input is recorded
/// against it and the rest still go out; only an authentication failure
/// stops the run, since every later call would fail the same way. Once
/// `shutdown` is requested the remaining inputs are kept as unsent.
pub fn submit_all(
    service: &dyn ParseService,
    sources: Vec<Source>,
    options: &ParseOptions,
    shutdown: &ShutdownFlag,
) -> Result<Vec<Submission>, ApiError> {
    let mut submissions = Vec::with_capacity(sources.len());
    for source in sources {
        if shutdown.is_requested() {
            submissions.push(Submission::Unsent(source));
            continue;
        }
        if let Source::File(path) = &source {
            if let Err(reason) = validate_file(path) {
                warn!(input = %source.label(), %reason, "Skipping input");
                submissions.push(Submission::Rejected { source, reason });
                continue;
            }
        }
        match submit_one(service, &source, options) {
            Ok(id) => {
                info!(input = %source.label(), id = %id, "Submitted");
                submissions.push(Submission::Accepted(ParseTask::submitted(source, id)));
            }
            Err(e @ ApiError::Auth(_)) => return Err(e),
            Err(e) => {
                warn!(input = %source.label(), error = %e, "Submission failed");
                submissions.push(Submission::Rejected {
                    source,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(submissions)
}

fn expand_home(input: &str) -> PathBuf {
    match input.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| PathBuf::from(input)),
        None => PathBuf::from(input),
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    path.canonicalize().unwrap_or(path)
}
