//! followback - find accounts that don't follow you back
//!
//! Main entry point for the followback command-line tool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;

use followback::chunked::ChunkScheduler;
use followback::cli::{
    AnalyzeArgs, Cli, Commands, ConfigArgs, OutputFormat, ShowArgs, ShowList, SyncArgs,
    WhitelistCommand,
};
use followback::config::Config;
use followback::logging::{OperationGuard, init_cli_logging};
use followback::present::{paginate, present_cooperative};
use followback::{
    Account, CONTENT_DIVIDER_WIDTH, Engine, FollowbackError, RunOutcome, Stats, SyncOutcome, Tier,
    WhitelistPayload, WhitelistRemote, WhitelistStore, archive, csv_escape_text,
    format_account_since, format_bytes, format_error, format_number_usize,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load();
    let quiet = cli.quiet || config.output.quiet;

    if !config.output.colors {
        colored::control::set_override(false);
    }
    init_cli_logging(quiet, cli.verbose, config.output.colors);

    let app = App::new(&cli, config, quiet);
    match run(&cli, &app).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render_error(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, app: &App) -> Result<()> {
    match &cli.command {
        Commands::Analyze(args) => cmd_analyze(app, args).await,
        Commands::Show(args) => cmd_show(app, args).await,
        Commands::Whitelist(command) => cmd_whitelist(app, command).await,
        Commands::Reset => cmd_reset(app),
        Commands::Config(args) => cmd_config(app, args),
        Commands::Completions(args) => {
            generate(args.shell, &mut Cli::command(), "followback", &mut io::stdout());
            Ok(())
        }
    }
}

/// Settings every command needs, resolved from CLI flags over config.
struct App {
    config: Config,
    db_path: PathBuf,
    format: OutputFormat,
    quiet: bool,
}

impl App {
    fn new(cli: &Cli, config: Config, quiet: bool) -> Self {
        let db_path = cli.db.clone().unwrap_or_else(|| config.db_path());
        let format = cli
            .format
            .or_else(|| OutputFormat::from_config(&config.output.format))
            .unwrap_or_default();
        Self {
            config,
            db_path,
            format,
            quiet,
        }
    }

    fn open_engine(&self) -> Engine {
        debug!(db = %self.db_path.display(), "Opening engine");
        Engine::open(
            &self.db_path,
            self.config.storage.quota_bytes,
            self.config.engine_options(),
        )
    }

    const fn is_text(&self) -> bool {
        matches!(self.format, OutputFormat::Text)
    }

    fn warn(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", "!".yellow().bold(), message.yellow());
        }
    }

    fn report_storage(&self, engine: &Engine) {
        if let Some(warning) = engine.storage_warning() {
            self.warn(&warning.to_string());
        }
    }
}

fn render_error(error: &anyhow::Error) -> String {
    let suggestions = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<FollowbackError>())
        .map_or(&[][..], FollowbackError::suggestions);
    let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    format_error(&error.to_string(), &causes.join(": "), suggestions)
}

fn print_json<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    let json = if matches!(format, OutputFormat::JsonPretty) {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

// =============================================================================
// analyze
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOutput<'a> {
    run: u64,
    documents: usize,
    storage_tier: Tier,
    stats: &'a Stats,
    not_following_back: &'a [Account],
    warnings: Vec<String>,
}

async fn cmd_analyze(app: &App, args: &AnalyzeArgs) -> Result<()> {
    let spinner = (app.is_text() && !app.quiet).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });
    let set_message = |msg: String| {
        if let Some(pb) = &spinner {
            pb.set_message(msg);
        }
    };

    set_message(format!("Reading {}", args.archive_path.display()));
    let path = args.archive_path.clone();
    let guard = OperationGuard::new(format!("read {}", args.archive_path.display()));
    let documents = match tokio::task::spawn_blocking(move || archive::read_archive(&path))
        .await
        .context("Archive reader task failed")?
    {
        Ok(documents) => {
            guard.complete();
            documents
        }
        Err(e) => {
            guard.fail(&e);
            if let Some(pb) = &spinner {
                pb.finish_and_clear();
            }
            return Err(e.into());
        }
    };

    set_message(format!("Analyzing {} documents", documents.len()));
    let engine = app.open_engine();
    let outcome = engine.run(async move { documents }).await;

    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }

    let report = match outcome {
        RunOutcome::Accepted(report) => report,
        RunOutcome::Empty { warnings, .. } => {
            for warning in &warnings {
                app.warn(&warning.to_string());
            }
            anyhow::bail!(
                "No followers or following accounts found in {}",
                args.archive_path.display()
            );
        }
        RunOutcome::Stale { run, current } => {
            anyhow::bail!("Analysis run {run} was superseded by run {current}");
        }
    };

    if !app.is_text() {
        return print_json(
            app.format,
            &AnalyzeOutput {
                run: report.run.get(),
                documents: report.documents,
                storage_tier: engine.tier(),
                stats: &report.result.stats,
                not_following_back: &report.result.not_following_back,
                warnings: report.warnings.iter().map(ToString::to_string).collect(),
            },
        );
    }

    for warning in &report.warnings {
        app.warn(&warning.to_string());
    }
    println!("{}", "Analysis complete".bold().green());
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    print_stats(&report.result.stats);
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    println!(
        "  Read {} documents, stored in {} storage.",
        format_number_usize(report.documents),
        engine.tier().to_string().cyan()
    );
    println!();
    println!("Run {} to browse the list.", "followback show".bold());
    Ok(())
}

fn print_stats(stats: &Stats) {
    println!(
        "  {:<22} {:>10}",
        "Followers:",
        format_number_usize(stats.followers_count)
    );
    println!(
        "  {:<22} {:>10}",
        "Following:",
        format_number_usize(stats.following_count)
    );
    println!(
        "  {:<22} {:>10}",
        "Mutual:",
        format_number_usize(stats.mutual_count)
    );
    println!(
        "  {:<22} {:>10}",
        "Not following back:",
        format_number_usize(stats.not_following_back_count)
            .yellow()
            .bold()
    );
    println!("  {:<22} {:>10}", "Following ratio:", stats.ratio_display());
}

// =============================================================================
// show
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShownAccount<'a> {
    username: &'a str,
    profile_url: &'a str,
    timestamp: &'a str,
    whitelisted: bool,
}

async fn cmd_show(app: &App, args: &ShowArgs) -> Result<()> {
    let engine = app.open_engine();
    let Some(result) = engine.cached_result() else {
        anyhow::bail!(
            "No cached analysis found. Run 'followback analyze <ARCHIVE>' first.\n\
             Expected database at: {}",
            app.db_path.display()
        );
    };

    let sort = args.sort.into();
    let presented = match args.list {
        ShowList::NotFollowingBack => engine.present_cooperative(sort, &args.search).await,
        ShowList::Followers | ShowList::Following => {
            let accounts = if args.list == ShowList::Followers {
                &result.followers
            } else {
                &result.following
            };
            let mut scheduler = ChunkScheduler::new(engine.options().chunk_size);
            present_cooperative(accounts, &HashSet::new(), sort, &args.search, &mut scheduler)
                .await
        }
    };
    let total = presented.len();
    let page = paginate(&presented, args.offset, args.limit);
    let whitelist = engine.whitelist();

    match app.format {
        OutputFormat::Json | OutputFormat::JsonPretty => {
            let rows: Vec<ShownAccount<'_>> = page
                .iter()
                .map(|a| ShownAccount {
                    username: &a.username,
                    profile_url: &a.profile_url,
                    timestamp: &a.timestamp,
                    whitelisted: whitelist.is_whitelisted(&a.username),
                })
                .collect();
            print_json(app.format, &rows)?;
        }
        OutputFormat::Csv => {
            println!("username,profile_url,timestamp,whitelisted");
            for a in page {
                println!(
                    "\"{}\",\"{}\",\"{}\",{}",
                    csv_escape_text(&a.username),
                    csv_escape_text(&a.profile_url),
                    csv_escape_text(&a.timestamp),
                    whitelist.is_whitelisted(&a.username)
                );
            }
        }
        OutputFormat::Text => {
            if page.is_empty() {
                println!("{}", "No accounts match.".yellow());
                return Ok(());
            }
            println!(
                "{} of {} accounts:\n",
                page.len().to_string().cyan(),
                format_number_usize(total)
            );
            let width = (args.offset + page.len()).to_string().len();
            for (i, a) in page.iter().enumerate() {
                let badge = if whitelist.is_whitelisted(&a.username) {
                    " WHITELISTED ".on_blue().to_string()
                } else {
                    String::new()
                };
                println!(
                    "{:>width$}. {} {} {}",
                    (args.offset + i + 1).to_string().dimmed(),
                    a.username.bold(),
                    format_account_since(&a.timestamp).dimmed(),
                    badge
                );
                println!("{:>width$}  {}", "", a.profile_url.dimmed());
            }
        }
    }
    Ok(())
}

// =============================================================================
// whitelist
// =============================================================================

/// Remote whitelist store backed by a JSON file.
///
/// Accepts either a bare array of usernames or `{"whitelist": [...]}`, and
/// always writes the latter.
struct FileRemote {
    path: PathBuf,
}

#[async_trait(?Send)]
impl WhitelistRemote for FileRemote {
    async fn fetch(&self) -> followback::Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| FollowbackError::remote(format!("{}: {e}", self.path.display())))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| FollowbackError::remote(format!("{}: {e}", self.path.display())))?;
        let list = value.get("whitelist").unwrap_or(&value);
        serde_json::from_value(list.clone())
            .map_err(|e| FollowbackError::remote(format!("{}: {e}", self.path.display())))
    }

    async fn replace(&self, payload: &WhitelistPayload) -> followback::Result<()> {
        let json = serde_json::to_string_pretty(payload)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| FollowbackError::path_error("write", &self.path, e))
    }
}

async fn cmd_whitelist(app: &App, command: &WhitelistCommand) -> Result<()> {
    let engine = app.open_engine();
    let whitelist = engine.whitelist();

    match command {
        WhitelistCommand::List => print_whitelist(app, &whitelist.all())?,
        WhitelistCommand::Toggle { usernames } => {
            let mut changes = Vec::with_capacity(usernames.len());
            for username in usernames {
                let member = whitelist.toggle(username);
                changes.push(serde_json::json!({ "username": username, "whitelisted": member }));
                if app.is_text() {
                    if member {
                        println!("{} {} whitelisted", "✓".green(), username.bold());
                    } else {
                        println!("{} {} removed from whitelist", "✗".red(), username.bold());
                    }
                }
            }
            if !app.is_text() {
                print_json(app.format, &changes)?;
            }
        }
        WhitelistCommand::Clear => {
            let removed = whitelist.len();
            whitelist.clear();
            if app.is_text() {
                println!(
                    "{} Removed {} whitelisted accounts",
                    "✓".green(),
                    format_number_usize(removed)
                );
            } else {
                print_json(app.format, &serde_json::json!({ "removed": removed }))?;
            }
        }
        WhitelistCommand::Sync(args) => cmd_sync(app, whitelist, args).await?,
    }

    app.report_storage(&engine);
    Ok(())
}

fn print_whitelist(app: &App, entries: &[String]) -> Result<()> {
    match app.format {
        OutputFormat::Json | OutputFormat::JsonPretty => print_json(
            app.format,
            &WhitelistPayload {
                whitelist: entries.to_vec(),
            },
        )?,
        OutputFormat::Csv => {
            println!("username");
            for name in entries {
                println!("\"{}\"", csv_escape_text(name));
            }
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("{}", "The whitelist is empty.".yellow());
            } else {
                println!("{} whitelisted accounts:\n", entries.len().to_string().cyan());
                for name in entries {
                    println!("  {name}");
                }
            }
        }
    }
    Ok(())
}

async fn cmd_sync(app: &App, whitelist: &WhitelistStore, args: &SyncArgs) -> Result<()> {
    let remote = FileRemote {
        path: args.remote.clone(),
    };
    match whitelist.sync_with_remote(&remote, args.authenticated).await {
        SyncOutcome::Skipped => {
            app.warn("Not authenticated; pass --authenticated to sync the whitelist.");
        }
        SyncOutcome::Synced {
            whitelist,
            dropped_remote,
        } => {
            if app.is_text() {
                println!(
                    "{} Pushed {} entries to {}",
                    "✓".green(),
                    format_number_usize(whitelist.len()),
                    args.remote.display()
                );
                if !dropped_remote.is_empty() {
                    println!(
                        "  Dropped {} remote-only entries: {}",
                        dropped_remote.len(),
                        dropped_remote.join(", ").dimmed()
                    );
                }
            } else {
                print_json(
                    app.format,
                    &serde_json::json!({
                        "whitelist": whitelist,
                        "droppedRemote": dropped_remote,
                    }),
                )?;
            }
        }
        SyncOutcome::Failed { reason } => {
            anyhow::bail!("Whitelist sync failed: {reason}");
        }
    }
    Ok(())
}

// =============================================================================
// reset / config
// =============================================================================

fn cmd_reset(app: &App) -> Result<()> {
    let engine = app.open_engine();
    engine.reset();
    app.report_storage(&engine);
    if app.is_text() {
        println!(
            "{} Cached analysis cleared ({} whitelisted accounts kept)",
            "✓".green(),
            format_number_usize(engine.whitelist().len())
        );
    } else {
        print_json(app.format, &serde_json::json!({ "reset": true }))?;
    }
    Ok(())
}

fn cmd_config(app: &App, args: &ConfigArgs) -> Result<()> {
    let config_path = Config::user_config_path();

    if args.init {
        let path = config_path
            .clone()
            .context("Could not determine config directory")?;
        if path.exists() {
            app.warn(&format!("Config file already exists: {}", path.display()));
        } else {
            Config::default()
                .save()
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} Wrote {}", "✓".green(), path.display());
        }
    }

    if let Some(path) = config_path.as_deref() {
        Config::load_from_file(path)?;
    }

    if args.show {
        let content = toml::to_string_pretty(&app.config).context("Failed to render config")?;
        println!("{content}");
        return Ok(());
    }

    if !args.init {
        println!("{}", "Configuration".bold().cyan());
        println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
        println!(
            "  {:<14} {}",
            "Config file:",
            config_path.map_or_else(|| "unavailable".to_string(), |p| p.display().to_string())
        );
        println!("  {:<14} {}", "Database:", app.db_path.display());
        println!(
            "  {:<14} {}",
            "Quota:",
            app.config
                .storage
                .quota_bytes
                .map_or_else(|| "unbounded".to_string(), format_bytes)
        );
        println!();
        println!("Run {} to see every setting.", "followback config --show".bold());
    }
    Ok(())
}
