//! docsync - mirror a local text tree onto a remote page store
//!
//! Pushes markdown and source files as pages, pulls remote edits into a
//! staging area and merges them back line by line.

mod display;
mod progress;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::Confirm;
use docsync_config::{Config, ConfigLoader, LogFormat};
use docsync_sync::context::open_file_store;
use docsync_sync::{
    status, ControlLayout, DiffPuller, MergeEngine, PullOptions, PushOptions, SyncContext,
    SyncIndex, TreeSynchronizer,
};
use std::path::{Path, PathBuf};
use tracing::info;

/// docsync - two-way sync between a folder and a page store
#[derive(Parser)]
#[command(
    name = "docsync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Two-way sync between a local text tree and a remote page store",
    long_about = "docsync mirrors a folder of markdown and source files onto a tree of remote\n\
                  pages. Pushes only send what changed; pulls stage remote edits and merge\n\
                  them back with conflict markers where both sides diverged."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind a folder to a remote root
    Init {
        /// Working-tree folder
        folder: PathBuf,
        /// Url of an existing remote root node
        #[arg(long)]
        root_url: Option<String>,
        /// Title of the root node to create when no url is given
        #[arg(long)]
        title: Option<String>,
        /// Overwrite an existing configuration without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Push local changes to the remote tree
    Push {
        /// Working-tree folder
        folder: PathBuf,
        /// Push every file, not only changed ones
        #[arg(long)]
        force_all: bool,
        /// Dry run - show what would be done
        #[arg(long)]
        dry_run: bool,
        /// Do not rewrite directory pages with child links
        #[arg(long)]
        no_dir_update: bool,
        /// Do not archive duplicate sibling pages
        #[arg(long)]
        no_dedup: bool,
    },
    /// Pull remote changes into staging and merge them
    Pull {
        /// Working-tree folder
        folder: PathBuf,
        /// Only look for pages the index does not know
        #[arg(long, conflicts_with = "existing_only")]
        new_only: bool,
        /// Only refresh pages the index knows
        #[arg(long)]
        existing_only: bool,
        /// Dry run - show what would be staged
        #[arg(long)]
        dry_run: bool,
        /// Keep the previous staging area under pull/history
        #[arg(long)]
        snapshot: bool,
        /// Stage only, do not merge into the working tree
        #[arg(long)]
        no_apply: bool,
    },
    /// Merge the staging area into the working tree
    Merge {
        /// Working-tree folder
        folder: PathBuf,
    },
    /// Show index summary, staged files and conflicts
    Status {
        /// Working-tree folder
        folder: PathBuf,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
        /// Working-tree folder whose configuration to show
        #[arg(long, default_value = ".")]
        folder: PathBuf,
    },
}

impl Commands {
    fn folder(&self) -> &Path {
        match self {
            Self::Init { folder, .. }
            | Self::Push { folder, .. }
            | Self::Pull { folder, .. }
            | Self::Merge { folder }
            | Self::Status { folder }
            | Self::Config { folder, .. } => folder,
        }
    }
}

/// Output switches shared by all commands
#[derive(Debug, Clone)]
struct Output {
    quiet: bool,
    json: bool,
    action_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let folder = cli.command.folder().to_path_buf();
    let config = ConfigLoader::load(&folder, cli.config.as_deref())
        .with_context(|| format!("Failed to load configuration for {}", folder.display()))?;

    init_logging(cli.debug, cli.quiet, cli.verbose, &config)?;
    info!("docsync v{} starting", env!("CARGO_PKG_VERSION"));

    let output = Output {
        quiet: cli.quiet,
        json: cli.json,
        action_log: config.logging.action_log.clone(),
    };

    match cli.command {
        Commands::Init {
            folder,
            root_url,
            title,
            yes,
        } => init_command(folder, config, root_url, title, yes, &output).await?,
        Commands::Push {
            folder,
            force_all,
            dry_run,
            no_dir_update,
            no_dedup,
        } => {
            let mut options = PushOptions::from_settings(&config.sync);
            options.changed_only = !force_all;
            options.dry_run = dry_run;
            options.update_dir_index &= !no_dir_update;
            options.dedup &= !no_dedup;
            push_command(folder, config, options, &output).await?;
        }
        Commands::Pull {
            folder,
            new_only,
            existing_only,
            dry_run,
            snapshot,
            no_apply,
        } => {
            let options = PullOptions {
                new_only,
                existing_only,
                dry_run,
                snapshot,
                discovery_depth: None,
            };
            pull_command(folder, config, options, !no_apply && !dry_run, &output).await?;
        }
        Commands::Merge { folder } => merge_command(folder, config, &output).await?,
        Commands::Status { folder } => status_command(folder, config, &output).await?,
        Commands::Config { default, folder } => config_command(default, &folder, &config)?,
    }

    Ok(())
}

fn init_logging(debug: bool, quiet: bool, verbose: bool, config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        config.logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }

    Ok(())
}

async fn init_command(
    folder: PathBuf,
    mut config: Config,
    root_url: Option<String>,
    title: Option<String>,
    yes: bool,
    output: &Output,
) -> Result<()> {
    let layout = ControlLayout::new(&folder);
    let config_path = ConfigLoader::tree_config_path(&folder);

    if config_path.exists() && config.remote.root_url.is_some() && !yes {
        let overwrite = Confirm::new()
            .with_prompt(format!(
                "{} is already bound to {}. Rebind?",
                folder.display(),
                config.remote.root_url.as_deref().unwrap_or_default()
            ))
            .default(false)
            .interact()?;
        if !overwrite {
            bail!("Aborted, configuration left unchanged");
        }
    }

    let url = match root_url {
        Some(url) => url,
        None => {
            let title = title.unwrap_or_else(|| {
                folder
                    .canonicalize()
                    .ok()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                    .unwrap_or_else(|| "docsync".to_string())
            });
            let store = open_file_store(&layout, &config).await?;
            let root = store.create_root(&title).await?;
            info!("Created root node {} in {}", root.id, store.path().display());
            root.url
        }
    };

    config.remote.root_url = Some(url.clone());
    ConfigLoader::save_to_file(&config, &config_path)?;

    if !output.quiet {
        println!(
            "{} Bound {} to {}",
            style("✓").green().bold(),
            style(folder.display()).cyan(),
            style(&url).cyan()
        );
        println!("  Configuration: {}", style(config_path.display()).dim());
    }
    Ok(())
}

async fn push_command(
    folder: PathBuf,
    config: Config,
    options: PushOptions,
    output: &Output,
) -> Result<()> {
    info!("Starting push of {}", folder.display());
    if !output.quiet && !output.json {
        println!(
            "{} Pushing {}",
            style("→").green().bold(),
            style(folder.display()).cyan()
        );
        if options.dry_run {
            println!(
                "{} Dry run mode - no changes will be made",
                style("ℹ").yellow()
            );
        }
    }

    let ctx = SyncContext::open(&folder, config).await?;
    let spinner = progress::spinner(output.quiet || output.json, "Pushing changes...");
    let (log, printer) =
        progress::ActionPrinter::spawn(spinner.clone(), output.json, output.action_log.clone());

    let report = TreeSynchronizer::new(&ctx)
        .with_action_log(log)
        .push(options)
        .await;
    printer.finish().await?;
    progress::finish(spinner, "Push completed");
    let report = report?;

    if output.json {
        display::print_json(&report)?;
    } else if !output.quiet {
        display::print_push_report(&report);
    }
    Ok(())
}

async fn pull_command(
    folder: PathBuf,
    config: Config,
    options: PullOptions,
    apply: bool,
    output: &Output,
) -> Result<()> {
    info!("Starting pull into {}", folder.display());
    if !output.quiet && !output.json {
        println!(
            "{} Pulling into {}",
            style("←").green().bold(),
            style(folder.display()).cyan()
        );
        if options.dry_run {
            println!(
                "{} Dry run mode - nothing will be staged",
                style("ℹ").yellow()
            );
        }
    }

    let ctx = SyncContext::open(&folder, config).await?;
    let spinner = progress::spinner(output.quiet || output.json, "Checking remote changes...");
    let (log, printer) =
        progress::ActionPrinter::spawn(spinner.clone(), output.json, output.action_log.clone());

    let report = DiffPuller::new(&ctx)
        .with_action_log(log)
        .pull(&options)
        .await;
    printer.finish().await?;
    progress::finish(spinner, "Pull completed");
    let report = report?;

    let merge = if apply {
        let mut index = SyncIndex::load(&ctx.layout().control_dir).await?;
        Some(MergeEngine::new(&ctx).apply_staged(&mut index).await?)
    } else {
        None
    };

    if output.json {
        display::print_json(&serde_json::json!({ "pull": report, "merge": merge }))?;
    } else if !output.quiet {
        display::print_pull_report(&report);
        if let Some(merge) = &merge {
            display::print_merge_report(merge);
        } else if !report.dry_run && !report.staged.is_empty() {
            println!(
                "{} Staged files left in {}; run `docsync merge` to apply",
                style("ℹ").yellow(),
                style(report.staging.display()).cyan()
            );
        }
    }
    Ok(())
}

async fn merge_command(folder: PathBuf, config: Config, output: &Output) -> Result<()> {
    let ctx = SyncContext::open(&folder, config).await?;
    let mut index = SyncIndex::load(&ctx.layout().control_dir).await?;
    let report = MergeEngine::new(&ctx).apply_staged(&mut index).await?;

    if output.json {
        display::print_json(&report)?;
    } else if !output.quiet {
        display::print_merge_report(&report);
    }
    Ok(())
}

async fn status_command(folder: PathBuf, config: Config, output: &Output) -> Result<()> {
    let ctx = SyncContext::open(&folder, config).await?;
    let report = status(&ctx).await?;

    if output.json {
        display::print_json(&report)?;
    } else {
        display::print_status(&folder, &report);
    }
    Ok(())
}

fn config_command(default: bool, folder: &Path, config: &Config) -> Result<()> {
    if default {
        println!("{} Default configuration:", style("⚙").blue().bold());
        print!("{}", serde_yaml::to_string(&Config::default())?);
    } else {
        println!("{} Current configuration:", style("⚙").blue().bold());
        match ConfigLoader::find_config(folder) {
            Some(path) => println!("  Loaded from {}", style(path.display()).dim()),
            None => println!("  No configuration file found, using defaults"),
        }
        print!("{}", serde_yaml::to_string(config)?);
    }
    Ok(())
}
