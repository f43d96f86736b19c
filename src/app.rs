// Command dispatch. Loads the config once, resolves settings, and runs the
// submit → poll → fetch workflow for the chosen command.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Local};
use clap::CommandFactory;
use crossterm::style::Color;
use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::api::{ApiClient, ParseService, RemoteStatus};
use crate::cli::{Cli, Commands, ConfigArgs, ParseArgs, StatusArgs};
use crate::config::{Config, ConfigStore, Settings};
use crate::error::{ApiError, ConfigError};
use crate::fetch::{timestamped_dir_name, unique_names, OutputLayout, ResultFetcher};
use crate::poll::{status_of, PollSettings, Poller};
use crate::shutdown::ShutdownFlag;
use crate::submit::{self, report_without_waiting, submit_all};
use crate::task::{file_stem, BatchReport, Outcome, ParseOptions, RemoteId, ReportEntry, Source};
use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Single,
    Batch,
}

/// Everything one parse invocation needs.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub sources: Vec<Source>,
    pub options: ParseOptions,
    pub layout: OutputLayout,
    pub poll: PollSettings,
    pub wait: bool,
}

struct Context {
    store: ConfigStore,
    config: Config,
    settings: Settings,
}

impl Context {
    fn load() -> Result<Self> {
        let store = ConfigStore::default_location()?;
        let config = match store.load() {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable config");
                eprintln!("{} {e}", ui::paint("Warning:", Color::Yellow));
                Config::default()
            }
        };
        let settings = Settings::from_process_env(&config);
        Ok(Self {
            store,
            config,
            settings,
        })
    }

    fn save_token(&mut self, config: Config) -> Result<()> {
        self.store
            .save(&config)
            .with_context(|| format!("saving {}", self.store.path().display()))?;
        self.settings.token = config.token().map(str::to_string);
        self.config = config;
        Ok(())
    }

    /// The configured token; interactive sessions are prompted for one.
    fn require_token(&mut self) -> Result<String> {
        if let Some(token) = &self.settings.token {
            return Ok(token.clone());
        }
        if ui::is_interactive() {
            println!("{}", ui::paint("No API token found.", Color::Yellow));
            if let Some(config) = ui::prompt_for_token(&self.config)? {
                self.save_token(config)?;
                println!("{}", ui::paint("Token saved successfully.", Color::Green));
            }
        }
        self.settings
            .token
            .clone()
            .ok_or_else(|| ConfigError::MissingToken.into())
    }

    /// Runs `op` with an authenticated client. On an auth failure in an
    /// interactive session the user may replace the token and `op` is run
    /// again.
    fn with_client<T>(
        &mut self,
        mut op: impl FnMut(&ApiClient, &Settings) -> Result<T, ApiError>,
    ) -> Result<T> {
        loop {
            let token = self.require_token()?;
            let client = ApiClient::new(&self.settings.base_url, &token)?;
            match op(&client, &self.settings) {
                Ok(value) => return Ok(value),
                Err(ApiError::Auth(message)) if ui::is_interactive() => {
                    if ui::confirm_token_update(&message)? {
                        if let Some(config) = ui::prompt_for_token(&self.config)? {
                            self.save_token(config)?;
                            println!("Token updated. Retrying...");
                            continue;
                        }
                    }
                    return Err(ApiError::Auth(message).into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

pub fn run(cli: Cli, shutdown: ShutdownFlag) -> Result<ExitCode> {
    let mut ctx = Context::load()?;
    match cli.command {
        Some(Commands::Config(args)) => config_command(&mut ctx, args),
        Some(Commands::Token { value }) => token_command(&mut ctx, value),
        Some(Commands::Status(args)) => status_command(&mut ctx, args),
        Some(Commands::Diagnose) => diagnose_command(&ctx),
        Some(Commands::Batch { inputs, parse }) => {
            let sources = submit::expand_inputs(&inputs);
            parse_command(&mut ctx, sources, parse, Mode::Batch, shutdown)
        }
        None => match cli.input {
            Some(input) => {
                let sources = vec![submit::classify(&input)];
                parse_command(&mut ctx, sources, cli.parse, Mode::Single, shutdown)
            }
            None => {
                Cli::command().print_help()?;
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}

/// True when the user should be pointed at `mineru config`.
pub fn needs_reconfigure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(cause.downcast_ref::<ApiError>(), Some(ApiError::Auth(_)))
            || matches!(
                cause.downcast_ref::<ConfigError>(),
                Some(ConfigError::MissingToken)
            )
    })
}

fn config_command(ctx: &mut Context, args: ConfigArgs) -> Result<ExitCode> {
    if args.show {
        ui::print_config(
            Some(&ctx.config),
            ctx.settings.token.as_deref(),
            ctx.store.path(),
        );
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(token) = args.token {
        let config = ctx.config.with_token(&token)?;
        ctx.save_token(config)?;
        println!("{}", ui::paint("Token saved successfully.", Color::Green));
        return Ok(ExitCode::SUCCESS);
    }
    prompt_and_save(ctx)
}

fn token_command(ctx: &mut Context, value: Option<String>) -> Result<ExitCode> {
    match value {
        Some(token) => {
            let config = ctx.config.with_token(&token)?;
            ctx.save_token(config)?;
            println!("{}", ui::paint("Token updated successfully.", Color::Green));
            Ok(ExitCode::SUCCESS)
        }
        None => prompt_and_save(ctx),
    }
}

fn prompt_and_save(ctx: &mut Context) -> Result<ExitCode> {
    if !ui::is_interactive() {
        anyhow::bail!("No terminal to prompt on; use `mineru token <value>` instead");
    }
    match ui::prompt_for_token(&ctx.config)? {
        Some(config) => {
            ctx.save_token(config)?;
            println!("{}", ui::paint("\nToken saved successfully.", Color::Green));
            println!("Config file: {}", ctx.store.path().display());
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::FAILURE),
    }
}

fn parse_command(
    ctx: &mut Context,
    sources: Vec<Source>,
    args: ParseArgs,
    mode: Mode,
    shutdown: ShutdownFlag,
) -> Result<ExitCode> {
    if sources.is_empty() {
        anyhow::bail!("No inputs provided");
    }
    let cwd = std::env::current_dir().context("reading current directory")?;
    let plan = JobPlan {
        options: args.options(&ctx.settings.model, &ctx.settings.language),
        layout: plan_layout(mode, args.output.clone(), &sources, &cwd, Local::now()),
        poll: poll_settings(&args, &ctx.settings),
        wait: !args.no_wait,
        sources,
    };
    if plan.wait {
        println!("{} {}", ui::bold("Output:"), plan.layout.root().display());
    }

    let report = ctx.with_client(|client, _| {
        let progress = if plan.wait {
            ui::spinner("Waiting for completion...")
        } else {
            ProgressBar::hidden()
        };
        let result = run_jobs(client, plan.clone(), progress.clone(), shutdown.clone());
        progress.finish_and_clear();
        result
    })?;

    ui::print_report(&report);
    Ok(exit_code(report.all_succeeded()))
}

fn poll_settings(args: &ParseArgs, settings: &Settings) -> PollSettings {
    PollSettings {
        interval: args
            .interval
            .map(std::time::Duration::from_secs)
            .unwrap_or(settings.poll_interval),
        max_wait: args
            .timeout
            .map(std::time::Duration::from_secs)
            .unwrap_or(settings.max_wait),
    }
}

/// Output directory for a parse run. Without `-o`, results go next to the
/// (first) source file, or the working directory for URLs, in a fresh
/// timestamped folder.
pub fn plan_layout(
    mode: Mode,
    output: Option<PathBuf>,
    sources: &[Source],
    cwd: &Path,
    now: DateTime<Local>,
) -> OutputLayout {
    let base = || {
        sources
            .iter()
            .find_map(Source::local_parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.to_path_buf())
    };
    match mode {
        Mode::Single => OutputLayout::Flat(output.unwrap_or_else(|| {
            let stem = sources
                .first()
                .map(Source::stem)
                .unwrap_or_else(|| "download".into());
            base().join(timestamped_dir_name(&stem, now))
        })),
        Mode::Batch => OutputLayout::PerTask(
            output.unwrap_or_else(|| base().join(timestamped_dir_name("batch", now))),
        ),
    }
}

/// Submits every source, then (unless `wait` is off) polls them to the end.
pub fn run_jobs(
    service: &dyn ParseService,
    plan: JobPlan,
    progress: ProgressBar,
    shutdown: ShutdownFlag,
) -> Result<BatchReport, ApiError> {
    let submissions = submit_all(service, plan.sources, &plan.options, &shutdown)?;
    for submission in &submissions {
        if let submit::Submission::Accepted(task) = submission {
            progress.suspend(|| ui::print_submitted(&task.source().label(), task.remote_id()));
        }
    }
    if !plan.wait {
        return Ok(report_without_waiting(submissions));
    }

    let fetcher = ResultFetcher::new(plan.layout);
    Poller::new(service, &fetcher, plan.poll)
        .with_progress(progress)
        .with_shutdown(shutdown)
        .wait_all(submissions)
}

fn status_command(ctx: &mut Context, args: StatusArgs) -> Result<ExitCode> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| ctx.settings.output_dir.clone());
    let fetcher = ResultFetcher::new(OutputLayout::PerTask(output));

    let entries = ctx.with_client(|client, _| {
        let (id, statuses) = lookup(client, &args.id)?;
        ui::print_status(&id, &statuses);
        if args.no_download {
            return Ok(Vec::new());
        }
        Ok(download_finished(client, &id, &statuses, &fetcher))
    })?;

    for entry in &entries {
        println!("  {entry}");
    }
    let ok = entries
        .iter()
        .all(|e| matches!(e.outcome, Outcome::Done { .. }));
    Ok(exit_code(ok))
}

/// Resolves an id the user typed: batch ids first, then task ids.
pub fn lookup(service: &dyn ParseService, id: &str) -> Result<(RemoteId, Vec<RemoteStatus>), ApiError> {
    match service.batch_status(id) {
        Ok(results) => Ok((RemoteId::Batch(id.to_string()), results)),
        Err(ApiError::Service { .. }) | Err(ApiError::InvalidResponse(_)) => {
            let task = RemoteId::Task(id.to_string());
            let status = status_of(service, &task)?;
            Ok((task, vec![status]))
        }
        Err(e) => Err(e),
    }
}

/// Downloads every finished result of an already-submitted job.
pub fn download_finished(
    service: &dyn ParseService,
    id: &RemoteId,
    statuses: &[RemoteStatus],
    fetcher: &ResultFetcher,
) -> Vec<ReportEntry> {
    let finished: Vec<&RemoteStatus> = statuses.iter().filter(|s| s.state == "done").collect();
    let names = unique_names(
        finished
            .iter()
            .map(|status| match (id, status.file_name.as_deref()) {
                (RemoteId::Batch(_), Some(file)) => file_stem(Path::new(file)),
                _ => id.to_string(),
            })
            .collect(),
    );
    finished
        .into_iter()
        .zip(names)
        .map(|(status, name)| {
            let outcome = match status.zip_url() {
                Some(url) => match fetcher.fetch(service, &name, url) {
                    Ok(output) => Outcome::Done { output },
                    Err(e) => Outcome::Failed(e.to_string()),
                },
                None => Outcome::Failed("completed without a result archive".into()),
            };
            info!(task = %name, ?outcome, "Status download");
            ReportEntry {
                label: status.file_name.clone().unwrap_or(name),
                remote_id: Some(id.clone()),
                outcome,
            }
        })
        .collect()
}

fn diagnose_command(ctx: &Context) -> Result<ExitCode> {
    println!("{}", ui::bold("MinerU Service Diagnostics"));
    println!();

    println!("1. Configuration:");
    match &ctx.settings.token {
        Some(_) => println!("   {} configured", ui::paint("Token:", Color::Green)),
        None => println!("   {} not configured", ui::paint("Token:", Color::Red)),
    }
    println!("   Config file: {}", ctx.store.path().display());
    println!("   Output dir: {}", ctx.settings.output_dir.display());

    println!("\n2. Network Connectivity:");
    let client = ApiClient::new(
        &ctx.settings.base_url,
        ctx.settings.token.as_deref().unwrap_or_default(),
    )?;
    match client.ping() {
        Ok(status) => println!(
            "   {} {} reachable ({status})",
            ui::paint("API Base:", Color::Green),
            client.base_url()
        ),
        Err(e) => println!(
            "   {} {} unreachable ({e})",
            ui::paint("API Base:", Color::Red),
            client.base_url()
        ),
    }

    if ctx.settings.token.is_some() {
        println!("\n3. API Authentication:");
        match client.task_status("test-invalid-id") {
            Err(ApiError::Auth(_)) => {
                println!("   {} invalid token", ui::paint("Authentication:", Color::Red))
            }
            Err(ApiError::Service { .. }) | Ok(_) => {
                println!("   {} valid", ui::paint("Authentication:", Color::Green))
            }
            Err(e) => println!("   {} {e}", ui::paint("Authentication:", Color::Yellow)),
        }
    }

    println!("\n4. Environment Variables:");
    for var in [
        "MINERU_API_TOKEN",
        "MINERU_API_KEY",
        "MINERU_OUTPUT_DIR",
        "MINERU_API_BASE",
    ] {
        let state = if std::env::var_os(var).is_some() {
            "set"
        } else {
            "not set"
        };
        println!("   {var}: {state}");
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
