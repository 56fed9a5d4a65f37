use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use manga_mirrors::auth::{MasterTokens, TokenStore};
use manga_mirrors::config::{load_config, Config};
use manga_mirrors::models::{Emission, Operation};
use manga_mirrors::scheduler::{Scheduler, SchedulerError};
use manga_mirrors::session::{Caller, ChannelEmitter, SessionTarget};
use manga_mirrors::sources::ChapterOptions;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Correlation id of the single operation a CLI run performs
const CLI_REQUEST: u64 = 1;

/// Manga Mirrors - Search manga and fetch chapters from mirror sites
#[derive(Parser, Debug)]
#[command(name = "manga-mirrors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search manga and fetch chapters from mirror sites", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error logging
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pretty-print emitted JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered sources
    Sources {
        /// Print full descriptors as JSON
        #[arg(long)]
        detailed: bool,
    },

    /// Search manga by title
    #[command(alias = "s")]
    Search {
        query: String,

        /// Source slug, or "all" to search every enabled source
        #[arg(long, short, default_value = "all")]
        source: String,
    },

    /// Show a manga with its chapter list
    Manga {
        /// Absolute manga page URL
        url: String,

        #[arg(long, short)]
        lang: Option<String>,
    },

    /// Download the pages of a chapter
    Chapter {
        /// Absolute chapter page URL
        url: String,

        #[arg(long, short)]
        lang: Option<String>,

        /// Only fetch the page at this index
        #[arg(long)]
        retry_index: Option<usize>,
    },

    /// Show recommendations
    Recommend {
        /// Source slug, or "all"
        #[arg(long, short, default_value = "all")]
        source: String,
    },

    /// Find the manga a manga or chapter URL belongs to
    Resolve {
        url: String,

        #[arg(long, short)]
        lang: Option<String>,
    },

    /// Print the effective configuration
    Config,

    /// Issue a refresh and access token pair
    Token,
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("manga_mirrors={}", level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_emission(emission: &Emission, pretty: bool) -> Result<()> {
    let line = if pretty {
        serde_json::to_string_pretty(emission)?
    } else {
        serde_json::to_string(emission)?
    };
    println!("{}", line);
    Ok(())
}

/// Run one operation for an external caller, printing emissions as JSON
/// lines until the operation is over. Ctrl-C raises the operation's stop event.
async fn stream<F, Fut>(operation: Operation, pretty: bool, start: F) -> Result<()>
where
    F: FnOnce(SessionTarget) -> Fut,
    Fut: Future<Output = Result<(), SchedulerError>>,
{
    let (emitter, mut subscription) = ChannelEmitter::new();
    let caller = Caller::new(Arc::new(emitter));

    let weak = Arc::downgrade(&caller);
    let stopper = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Some(caller) = weak.upgrade() {
                tracing::info!("Interrupted, raising {}", operation.stop_event());
                caller.stop(operation);
            }
        }
    });

    // the subscription ends once the target and its listeners are gone
    let target = SessionTarget::external(&caller);
    drop(caller);

    let printer = async move {
        while let Some(emission) = subscription.recv().await {
            print_emission(&emission, pretty)?;
        }
        Ok::<(), anyhow::Error>(())
    };

    let (outcome, printed) = tokio::join!(start(target), printer);
    stopper.abort();

    outcome?;
    printed
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&cli, &config);

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        Commands::Token => {
            let path = config.auth.token_path();
            let mut store = TokenStore::open(&path, MasterTokens::generate())
                .with_context(|| format!("Failed to open token store {}", path.display()))?;
            let refresh = store.generate_refresh(false)?;
            let access = store.generate_access(&refresh, false)?;
            let pair = serde_json::json!({ "refresh": refresh, "access": access });
            println!("{}", serde_json::to_string_pretty(&pair)?);
            return Ok(());
        }
        _ => {}
    }

    let scheduler = Scheduler::from_config(&config)?;
    let pretty = cli.pretty;

    match cli.command {
        Commands::Sources { detailed } => {
            let infos = scheduler.source_infos();
            if detailed {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                for info in infos {
                    println!("{:<16} {:<24} {}", info.name, info.display_name, info.host);
                }
            }
        }

        Commands::Search { query, source } => {
            stream(Operation::Search, pretty, |target| async move {
                if source == "all" {
                    scheduler.search_all(&query, &target, CLI_REQUEST).await;
                    Ok(())
                } else {
                    scheduler.search(&source, &query, &target, CLI_REQUEST).await
                }
            })
            .await?;
        }

        Commands::Manga { url, lang } => {
            let source = scheduler.source_for_url(&url)?;
            let lang = lang.unwrap_or_else(|| source.descriptor().default_lang().to_string());
            stream(Operation::Manga, pretty, |target| async move {
                scheduler
                    .manga(source.id(), &url, &lang, &target, CLI_REQUEST)
                    .await
            })
            .await?;
        }

        Commands::Chapter {
            url,
            lang,
            retry_index,
        } => {
            let source = scheduler.source_for_url(&url)?;
            let lang = lang.unwrap_or_else(|| source.descriptor().default_lang().to_string());
            let options = ChapterOptions {
                on_page_count: Some(Box::new(|count: usize| {
                    tracing::info!("Chapter has {} page(s)", count);
                })),
                retry_index,
            };
            stream(Operation::Chapter, pretty, |target| async move {
                scheduler
                    .chapter(source.id(), &url, &lang, &target, CLI_REQUEST, options)
                    .await
            })
            .await?;
        }

        Commands::Recommend { source } => {
            stream(Operation::Recommend, pretty, |target| async move {
                if source == "all" {
                    scheduler.recommend_all(&target, CLI_REQUEST).await;
                    Ok(())
                } else {
                    scheduler.recommend(&source, &target, CLI_REQUEST).await
                }
            })
            .await?;
        }

        Commands::Resolve { url, lang } => {
            stream(Operation::MangaFromChapterUrl, pretty, |target| async move {
                scheduler
                    .resolve(&url, lang.as_deref(), &target, CLI_REQUEST)
                    .await
            })
            .await?;
        }

        Commands::Config | Commands::Token => {}
    }

    Ok(())
}
