use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::task::{parse_format_list, ParseOptions};

/// MinerU cloud OCR: parse documents and URLs into markdown/JSON.
#[derive(Parser, Debug)]
#[command(name = "mineru")]
#[command(version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Increase log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Local file or URL to parse
    pub input: Option<String>,

    #[command(flatten)]
    pub parse: ParseArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse several files or URLs (glob patterns are expanded)
    Batch {
        #[arg(required = true)]
        inputs: Vec<String>,

        #[command(flatten)]
        parse: ParseArgs,
    },

    /// Show a task or batch status and download finished results
    Status(StatusArgs),

    /// Configure the API token
    Config(ConfigArgs),

    /// Set the API token directly (prompts when no value is given)
    Token { value: Option<String> },

    /// Check configuration, connectivity and the token
    Diagnose,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Model {
    Vlm,
    Pipeline,
}

impl Model {
    fn as_str(self) -> &'static str {
        match self {
            Model::Vlm => "vlm",
            Model::Pipeline => "pipeline",
        }
    }
}

#[derive(Args, Debug, Default, Clone)]
pub struct ParseArgs {
    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Model version [default: vlm]
    #[arg(short, long, value_enum)]
    pub model: Option<Model>,

    /// Enable OCR mode
    #[arg(long)]
    pub ocr: bool,

    /// Disable formula recognition
    #[arg(long)]
    pub no_formula: bool,

    /// Disable table recognition
    #[arg(long)]
    pub no_table: bool,

    /// Document language: ch, en, japan, korean, ... [default: ch]
    #[arg(short, long)]
    pub lang: Option<String>,

    /// Page range, e.g. 1-10 or 2,4-6
    #[arg(long)]
    pub pages: Option<String>,

    /// Extra output formats, comma separated: docx,html,latex
    #[arg(long)]
    pub format: Option<String>,

    /// Submit only; print task ids instead of waiting
    #[arg(long)]
    pub no_wait: bool,

    /// Maximum seconds to wait for results
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds between status polls
    #[arg(long)]
    pub interval: Option<u64>,
}

impl ParseArgs {
    /// Flags win over the configured model and language defaults.
    pub fn options(&self, default_model: &str, default_language: &str) -> ParseOptions {
        ParseOptions {
            model_version: self
                .model
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| default_model.to_string()),
            is_ocr: self.ocr,
            enable_formula: !self.no_formula,
            enable_table: !self.no_table,
            language: self.lang.clone().unwrap_or_else(|| default_language.to_string()),
            page_ranges: self.pages.clone(),
            extra_formats: self.format.as_deref().map(parse_format_list).unwrap_or_default(),
        }
    }
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Task id or batch id
    pub id: String,

    /// Where finished results are extracted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only show the status
    #[arg(long)]
    pub no_download: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show the current configuration
    #[arg(long)]
    pub show: bool,

    /// Save this token without prompting
    #[arg(long, conflicts_with = "show")]
    pub token: Option<String>,
}
