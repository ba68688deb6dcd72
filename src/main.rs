use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use notion_sync::{
    comments,
    config::{self, Config},
    convert::{self, DirectoryOptions},
    deploy::{memory::MemoryStore, notion},
    progress::{BatchPhase, create_reporter},
    state::{ConversionLog, PLANNING_DIR, StateStore},
    store::Client as _,
    sync::{self, LOG_FILE, SyncOptions, SyncReport},
};
use tracing::error;

#[derive(Parser)]
#[clap(version, about = "Mirror a .planning directory into Notion pages")]
struct Opts {
    /// Project directory containing `.planning`.
    #[clap(long, global = true, default_value = ".")]
    cwd: PathBuf,
    #[clap(short, long, global = true, env = "NOTION_SYNC_CONFIG")]
    config: Option<PathBuf>,
    #[clap(long, global = true, env = "NOTION_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update a page for every changed document
    Sync {
        /// Preview what would be written without touching Notion or the state file
        #[clap(long)]
        dry_run: bool,
        #[clap(long)]
        project: Option<String>,
        /// Page the project's root page is created under
        #[clap(long)]
        parent: Option<String>,
        #[clap(long)]
        json: bool,
    },
    /// Convert markdown files to blocks and report the result
    Convert {
        #[clap(long)]
        dry_run: bool,
        /// Directory to convert, `.planning` by default
        #[clap(long)]
        dir: Option<PathBuf>,
    },
    /// Fetch review comments from every synced page
    Comments {
        #[clap(long)]
        project: Option<String>,
        #[clap(long)]
        json: bool,
    },
    /// Check that the API key is valid
    AuthCheck,
}

struct App {
    cwd: PathBuf,
    config: Config,
    api_key: Option<String>,
}

impl App {
    fn client(&self) -> anyhow::Result<notion::Client> {
        let token = self
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("no API key; set NOTION_API_KEY or notion.api_key"))?;
        let client = match &self.config.notion.base_url {
            Some(base_url) => notion::Client::with_base_url(token, base_url),
            None => notion::Client::new(token),
        };
        client.context("build Notion client")
    }
}

fn print_sync_report(report: &SyncReport, dry_run: bool) {
    if dry_run {
        println!("Dry run, nothing was written.");
        for preview in &report.previews {
            println!(
                "  {:?} {}: {} blocks in {} requests, {} warnings",
                preview.action, preview.file, preview.blocks, preview.chunks, preview.warnings
            );
        }
    }
    for image in &report.image_details {
        println!("  image {}: {:?}", image.path, image.status);
    }
    for failure in &report.error_details {
        println!("  failed {}: {}", failure.file, failure.error);
    }
    println!(
        "{} documents: {} created, {} updated, {} unchanged, {} errors",
        report.total, report.created, report.updated, report.skipped, report.errors
    );
    println!(
        "images: {} uploaded, {} cached, {} failed",
        report.images_uploaded, report.images_cached, report.images_failed
    );
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let config_path = opts
        .config
        .clone()
        .unwrap_or_else(|| config::default_path(&opts.cwd));
    let config = Config::load(&config_path).await.context("load config")?;
    config.validate().map_err(|msg| anyhow!("{msg}"))?;
    let app = App {
        cwd: opts.cwd,
        api_key: opts.api_key.or_else(|| config.notion.api_key.clone()),
        config,
    };

    match opts.command {
        Command::Sync {
            dry_run,
            project,
            parent,
            json,
        } => {
            let options = SyncOptions {
                cwd: app.cwd.clone(),
                project: project.or_else(|| app.config.notion.project.clone()),
                parent_page_id: parent.or_else(|| app.config.notion.parent_page_id.clone()),
                dry_run,
                chunk: Default::default(),
            };
            let reporter = create_reporter();
            let report = if dry_run {
                sync::sync_project(&MemoryStore::new(), &options, reporter.as_ref()).await
            } else {
                sync::sync_project(&app.client()?, &options, reporter.as_ref()).await
            }
            .inspect_err(|error| reporter.set_phase(BatchPhase::Failed(error.to_string())))
            .context("sync")?;
            reporter.finish();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_sync_report(&report, dry_run);
            }
        }
        Command::Convert { dry_run, dir } => {
            let planning = app.cwd.join(PLANNING_DIR);
            let dir = dir.unwrap_or_else(|| planning.clone());
            let stats = ConversionLog::for_cwd(&app.cwd);
            let options = DirectoryOptions {
                dry_run,
                log_path: Some(planning.join(LOG_FILE)),
                stats_path: Some(stats.path().to_owned()),
                ..Default::default()
            };
            let reporter = create_reporter();
            let result = convert::convert_directory(&dir, &options, reporter.as_ref()).await;
            reporter.finish();
            for file in &result.files {
                println!(
                    "{}: {} blocks in {} requests, {} warnings",
                    file.file_name,
                    file.block_count(),
                    file.chunks.len(),
                    file.warnings.len()
                );
            }
            println!(
                "{} files, {} blocks, {} warnings",
                result.files.len(),
                result.total_blocks,
                result.total_warnings
            );
            if !dry_run {
                let recorded = stats.load().await.context("load conversion stats")?;
                println!("{} conversions recorded in {}", recorded.len(), stats.path().display());
            }
        }
        Command::Comments { project, json } => {
            let requested = project.or_else(|| app.config.notion.project.clone());
            let location = sync::resolve_project(&app.cwd, requested.as_deref()).await;
            let state = StateStore::for_cwd(&app.cwd)
                .read_only(true)
                .load()
                .await
                .context("load sync state")?;
            let client = app.client()?;
            let reporter = create_reporter();
            let report = comments::retrieve_comments(
                &client,
                &state,
                &location.slug,
                app.config.comment_concurrency(),
                reporter.as_ref(),
            )
            .await;
            reporter.finish();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for comment in &report.comments {
                    println!(
                        "[{}] {} ({}): {}",
                        comment.file_path,
                        comment.page_title.as_deref().unwrap_or("untitled"),
                        comment.comment.created_time,
                        comment.comment.text
                    );
                }
                for issue in &report.errors {
                    println!("  skipped {}: {}", issue.file_path, issue.reason);
                }
                println!(
                    "{} comments from {} pages, {} skipped",
                    report.comments.len(),
                    report.pages,
                    report.skipped
                );
            }
        }
        Command::AuthCheck => {
            let user = app.client()?.me().await.context("authenticate")?;
            println!(
                "Authenticated as {} ({})",
                user.name.as_deref().unwrap_or("unnamed integration"),
                user.id
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(?e, "critical error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
