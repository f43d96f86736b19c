use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// What the user asked to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(String),
    File(PathBuf),
}

impl Source {
    /// Name shown in reports: the file name for local files, the URL otherwise.
    pub fn label(&self) -> String {
        match self {
            Source::Url(url) => url.clone(),
            Source::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }

    /// Base name used for output folders.
    pub fn stem(&self) -> String {
        let stem = match self {
            Source::Url(url) => reqwest::Url::parse(url)
                .ok()
                .and_then(|u| {
                    u.path_segments()
                        .and_then(|mut s| s.next_back().map(str::to_string))
                })
                .filter(|s| !s.is_empty())
                .map(|name| file_stem(Path::new(&name))),
            Source::File(path) => Some(file_stem(path)),
        };
        stem.filter(|s| !s.is_empty())
            .unwrap_or_else(|| "download".to_string())
    }

    pub fn local_parent(&self) -> Option<&Path> {
        match self {
            Source::File(path) => path.parent(),
            Source::Url(_) => None,
        }
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Recognition options sent with every submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseOptions {
    pub model_version: String,
    pub is_ocr: bool,
    pub enable_formula: bool,
    pub enable_table: bool,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_ranges: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_formats: Vec<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            model_version: "vlm".into(),
            is_ocr: false,
            enable_formula: true,
            enable_table: true,
            language: "ch".into(),
            page_ranges: None,
            extra_formats: Vec::new(),
        }
    }
}

/// Splits a `--format docx,html` value.
pub fn parse_format_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Identifier handed back by the service. URL jobs get a task id; uploaded
/// files are tracked through a one-file upload batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteId {
    Task(String),
    Batch(String),
}

impl RemoteId {
    pub fn as_str(&self) -> &str {
        match self {
            RemoteId::Task(id) | RemoteId::Batch(id) => id,
        }
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskState {
    /// Maps the service's state strings. Unknown states count as running so
    /// polling keeps going until the deadline.
    pub fn from_remote(state: &str) -> TaskState {
        match state {
            "waiting-file" | "pending" => TaskState::Pending,
            "running" | "converting" => TaskState::Running,
            "done" => TaskState::Done,
            "failed" => TaskState::Failed,
            _ => TaskState::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Done | TaskState::Failed => 2,
        }
    }
}

/// One submitted remote job. The remote id is fixed at construction and
/// the state only moves forward.
#[derive(Debug, Clone)]
pub struct ParseTask {
    source: Source,
    remote_id: RemoteId,
    state: TaskState,
    result_url: Option<String>,
}

impl ParseTask {
    pub fn submitted(source: Source, remote_id: RemoteId) -> Self {
        Self {
            source,
            remote_id,
            state: TaskState::Pending,
            result_url: None,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn result_url(&self) -> Option<&str> {
        self.result_url.as_deref()
    }

    /// Applies an observed state. Returns false (and changes nothing) when
    /// the observation would move the task backwards or out of a terminal
    /// state.
    pub fn advance(&mut self, next: TaskState) -> bool {
        if self.state.is_terminal() || next.rank() < self.state.rank() {
            return false;
        }
        self.state = next;
        true
    }

    pub fn set_result_url(&mut self, url: Option<String>) {
        if self.result_url.is_none() {
            self.result_url = url.filter(|u| !u.is_empty());
        }
    }
}

/// How one input ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done { output: PathBuf },
    Failed(String),
    TimedOut,
    Submitted,
    Interrupted,
    /// Ctrl+C arrived before this input was sent.
    NotSubmitted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub label: String,
    pub remote_id: Option<RemoteId>,
    pub outcome: Outcome,
}

impl ReportEntry {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Done { .. } | Outcome::Submitted)
    }
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self
            .remote_id
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".into());
        match &self.outcome {
            Outcome::Done { output } => write!(f, "{}: done -> {}", self.label, output.display()),
            Outcome::Failed(reason) => write!(f, "{}: failed: {}", self.label, reason),
            Outcome::TimedOut => write!(f, "{}: timed out ({})", self.label, id),
            Outcome::Submitted => write!(f, "{}: submitted ({})", self.label, id),
            Outcome::Interrupted => write!(f, "{}: interrupted ({})", self.label, id),
            Outcome::NotSubmitted => write!(f, "{}: not submitted (interrupted)", self.label),
        }
    }
}

/// Final per-input summary of one invocation, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub entries: Vec<ReportEntry>,
}

impl BatchReport {
    pub fn new(entries: Vec<ReportEntry>) -> Self {
        Self { entries }
    }

    pub fn all_succeeded(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(ReportEntry::is_success)
    }

    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    /// Remote ids worth checking later with `mineru status`.
    pub fn resumable(&self) -> Vec<&RemoteId> {
        self.entries
            .iter()
            .filter(|e| {
                matches!(
                    e.outcome,
                    Outcome::TimedOut | Outcome::Interrupted | Outcome::Submitted
                )
            })
            .filter_map(|e| e.remote_id.as_ref())
            .collect()
    }
}
