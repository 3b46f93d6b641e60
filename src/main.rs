//! listing-etl main entry point
//!
//! This is the command-line interface for the car-listing scrape and ETL pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use listing_etl::config::load_config_with_hash;
use listing_etl::invoke::{
    self, handle_detail_event, handle_link_scan, handle_page_event, handle_page_requests,
    DrainTarget, QueueEvent,
};
use listing_etl::output::{
    load_statistics, print_batch_report, print_fan_out, print_resume_summary, print_statistics,
};
use listing_etl::pipeline::chunks::list_chunks;
use listing_etl::pipeline::{
    extract_links, fan_out, fetch_chunk_details, flatten_details, list_pages, read_table,
    run_resumable, write_table, ChunkSink, CsvChunkSink, PickOrder, Pipeline, QueueSink,
};
use listing_etl::runner::BatchRunner;
use listing_etl::storage::{open_ledger, Ledger, RunCounts, RunStatus, SqliteLedger, Stage};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// listing-etl: scrape car listings and flatten them into a table
///
/// Lists search-result pages, extracts listing links, fans them out into chunk files or
/// queue messages, fetches every listing detail, and flattens the details into one CSV
/// table that can be loaded into SQLite.
#[derive(Parser, Debug)]
#[command(name = "listing-etl")]
#[command(version = "1.0.0")]
#[command(about = "Car listing scrape and ETL pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "PATH", default_value = "listing-etl.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and store every search-result page in the range
    Pages {
        #[arg(long)]
        first: Option<u32>,
        #[arg(long)]
        last: Option<u32>,
    },

    /// Extract links from stored pages and write them as chunk files
    Links {
        /// Send the links to the queue instead of writing chunk files
        #[arg(long)]
        queue: bool,
    },

    /// List chunk files, or fetch the details of one chunk file
    Details {
        /// Chunk file name, e.g. car_links_3.csv
        chunk: Option<String>,
    },

    /// Process every unprocessed chunk file, one at a time
    Resume {
        /// Take chunks in chunk-number order instead of at random
        #[arg(long)]
        ordered: bool,

        /// Forget every processed chunk before starting
        #[arg(long)]
        fresh: bool,
    },

    /// Flatten every stored detail into the CSV table
    Flatten,

    /// Replace the database cars table with the CSV table
    Load,

    /// Enqueue one page request per page in the range
    EnqueuePages {
        #[arg(long)]
        first: Option<u32>,
        #[arg(long)]
        last: Option<u32>,
    },

    /// Run one handler on an event file and print its response
    Invoke {
        handler: HandlerArg,

        /// JSON event file with a `Records` array; an empty event when omitted
        event: Option<PathBuf>,
    },

    /// Feed the local queue into a handler until it is empty
    Drain { target: DrainArg },

    /// Show statistics from the ledger and exit
    Stats,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HandlerArg {
    Page,
    Links,
    Detail,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DrainArg {
    Page,
    Detail,
}

impl From<DrainArg> for DrainTarget {
    fn from(arg: DrainArg) -> Self {
        match arg {
            DrainArg::Page => DrainTarget::Page,
            DrainArg::Detail => DrainTarget::Detail,
        }
    }
}

impl Command {
    /// Stage recorded in the ledger, if the command is a recorded run
    fn stage(&self) -> Option<Stage> {
        match self {
            Self::Pages { .. } => Some(Stage::Pages),
            Self::Links { .. } => Some(Stage::Links),
            Self::Details { chunk: Some(_) } => Some(Stage::Details),
            Self::Resume { .. } => Some(Stage::Resume),
            Self::Flatten => Some(Stage::Flatten),
            Self::Load => Some(Stage::Load),
            Self::EnqueuePages { .. } => Some(Stage::EnqueuePages),
            Self::Drain { .. } => Some(Stage::Drain),
            Self::Details { chunk: None } | Self::Invoke { .. } | Self::Stats => None,
        }
    }
}

/// Counts and cancellation flag a recorded stage finishes with
struct StageOutcome {
    counts: RunCounts,
    cancelled: bool,
}

impl StageOutcome {
    fn completed(counts: RunCounts) -> Self {
        Self {
            counts,
            cancelled: false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Command::Pages { first, last } | Command::EnqueuePages { first, last } = &cli.command
    {
        config.pages.first = first.unwrap_or(config.pages.first);
        config.pages.last = last.unwrap_or(config.pages.last);
        anyhow::ensure!(
            config.pages.first <= config.pages.last,
            "page range {}..={} is empty",
            config.pages.first,
            config.pages.last
        );
    }

    let database_path = PathBuf::from(&config.output.database_path);
    let mut ledger = open_ledger(&database_path)
        .with_context(|| format!("failed to open ledger {}", database_path.display()))?;

    if let Command::Stats = cli.command {
        println!("Database: {}\n", database_path.display());
        let stats = load_statistics(&ledger)?;
        print_statistics(&stats);
        return Ok(());
    }

    let runner = BatchRunner::new(&config.runner);
    watch_for_interrupt(&runner);
    let pipeline = Pipeline::from_config(config)?;

    let Some(stage) = cli.command.stage() else {
        return run_unrecorded(&cli.command, &pipeline, &runner, &ledger).await;
    };

    let run_id = ledger.begin_run(stage, &config_hash)?;
    tracing::info!("Started {} run #{}", stage, run_id);

    let result = run_stage(&cli.command, &pipeline, &runner, &mut ledger, run_id).await;
    match result {
        Ok(outcome) => {
            let status = if outcome.cancelled || runner.is_cancelled() {
                RunStatus::Interrupted
            } else {
                RunStatus::Completed
            };
            ledger.finish_run(run_id, status, outcome.counts)?;
            tracing::info!("{} run #{} {}", stage, run_id, status.to_db_string());
            Ok(())
        }
        Err(e) => {
            tracing::error!("{} run #{} failed: {:#}", stage, run_id, e);
            ledger.finish_run(run_id, RunStatus::Failed, RunCounts::default())?;
            Err(e)
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_etl=info,warn"),
            1 => EnvFilter::new("listing_etl=debug,info"),
            2 => EnvFilter::new("listing_etl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Cancels the runner on Ctrl+C; in-flight units finish, nothing new starts
fn watch_for_interrupt(runner: &BatchRunner) {
    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing in-flight work");
            cancel.cancel();
        }
    });
}

async fn run_stage(
    command: &Command,
    pipeline: &Pipeline,
    runner: &BatchRunner,
    ledger: &mut SqliteLedger,
    run_id: i64,
) -> Result<StageOutcome> {
    match command {
        Command::Pages { .. } => {
            let range = pipeline.config.pages.first..=pipeline.config.pages.last;
            let report = list_pages(pipeline, runner, range).await?;
            print_batch_report(&report);
            Ok(StageOutcome {
                counts: report.counts(),
                cancelled: report.cancelled,
            })
        }

        Command::Links { queue } => {
            let location = pipeline.config.pages_location()?;
            let extraction = extract_links(pipeline.store.as_ref(), &location).await?;
            for failure in &extraction.failed {
                println!("  skipped {}: {}", failure.id, failure.message);
            }
            let links = extraction.links();

            let (sink, chunk_size): (Box<dyn ChunkSink>, usize) = if *queue {
                (
                    Box::new(QueueSink::new(pipeline.queue()?)),
                    pipeline.config.queue.batch_size,
                )
            } else {
                (
                    Box::new(CsvChunkSink::new(
                        pipeline.store.clone(),
                        pipeline.config.chunks_location()?,
                    )),
                    pipeline.config.chunks.size,
                )
            };

            let report = fan_out(&links, chunk_size, sink.as_ref()).await?;
            print_fan_out(links.len(), &report);
            Ok(StageOutcome::completed(RunCounts {
                submitted: links.len() as u64,
                succeeded: report.sent,
                failed: report.failed,
            }))
        }

        Command::Details { chunk: Some(name) } => {
            let report = fetch_chunk_details(pipeline, runner, name).await?;
            print_batch_report(&report);
            if !report.cancelled {
                let key = pipeline.config.chunks_location()?.key(name);
                ledger.mark_chunk_processed(&key, run_id)?;
            }
            Ok(StageOutcome {
                counts: report.counts(),
                cancelled: report.cancelled,
            })
        }

        Command::Resume { ordered, fresh } => {
            if *fresh {
                let cleared = ledger.clear_processed_chunks()?;
                tracing::info!("Forgot {} processed chunk files", cleared);
            }
            let order = if *ordered {
                PickOrder::Ordered
            } else {
                PickOrder::Random
            };
            let mut rng = rand::rng();
            let summary = run_resumable(pipeline, runner, ledger, run_id, order, &mut rng).await?;
            print_resume_summary(&summary);
            Ok(StageOutcome {
                counts: summary.counts,
                cancelled: summary.cancelled,
            })
        }

        Command::Flatten => {
            let report = flatten_details(pipeline, runner).await?;
            print_batch_report(&report);

            let outcome = StageOutcome {
                counts: report.counts(),
                cancelled: report.cancelled,
            };

            let mut rows = report.successes;
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            let rows: Vec<_> = rows.into_iter().map(|(_, row)| row).collect();

            let path = Path::new(&pipeline.config.output.csv_path);
            let written = write_table(path, &rows)?;
            println!("Wrote {} rows to {}", written, path.display());
            Ok(outcome)
        }

        Command::Load => {
            let path = Path::new(&pipeline.config.output.csv_path);
            let rows =
                read_table(path).with_context(|| format!("failed to read {}", path.display()))?;
            let loaded = ledger.replace_cars(&rows)?;
            println!("Loaded {} rows into the cars table", loaded);
            Ok(StageOutcome::completed(RunCounts {
                submitted: rows.len() as u64,
                succeeded: loaded as u64,
                failed: 0,
            }))
        }

        Command::EnqueuePages { .. } => {
            let range = pipeline.config.pages.first..=pipeline.config.pages.last;
            let body = handle_page_requests(pipeline, range).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(StageOutcome::completed(RunCounts {
                submitted: body["total_pages"].as_u64().unwrap_or(0),
                succeeded: body["sent_messages"].as_u64().unwrap_or(0),
                failed: body["failed_messages"].as_u64().unwrap_or(0),
            }))
        }

        Command::Drain { target } => {
            let report = invoke::drain(pipeline, runner, (*target).into()).await?;
            println!(
                "Drained {} messages in {} batches ({} failed invocations)",
                report.messages, report.batches, report.failed_invocations
            );
            Ok(StageOutcome {
                counts: RunCounts {
                    submitted: report.batches as u64,
                    succeeded: (report.batches - report.failed_invocations) as u64,
                    failed: report.failed_invocations as u64,
                },
                cancelled: report.cancelled,
            })
        }

        Command::Details { chunk: None } | Command::Invoke { .. } | Command::Stats => {
            anyhow::bail!("{:?} is not a recorded stage", command)
        }
    }
}

/// Commands that leave no run in the ledger
async fn run_unrecorded(
    command: &Command,
    pipeline: &Pipeline,
    runner: &BatchRunner,
    ledger: &SqliteLedger,
) -> Result<()> {
    match command {
        Command::Details { chunk: None } => {
            let location = pipeline.config.chunks_location()?;
            let names = list_chunks(pipeline.store.as_ref(), &location).await?;
            let processed = ledger.processed_chunks()?;

            println!("Chunk files in {} ({}):", location, names.len());
            for name in &names {
                let mark = if processed.contains(&location.key(name)) {
                    "x"
                } else {
                    " "
                };
                println!("  [{}] {}", mark, name);
            }
            Ok(())
        }

        Command::Invoke { handler, event } => {
            let event = match event {
                Some(path) => read_event(path)?,
                None => QueueEvent::default(),
            };

            let result = match handler {
                HandlerArg::Page => handle_page_event(pipeline, runner, &event).await,
                HandlerArg::Links => handle_link_scan(pipeline).await,
                HandlerArg::Detail => handle_detail_event(pipeline, runner, &event).await,
            };
            let response = invoke::respond(result);
            println!("{}", serde_json::to_string_pretty(&response)?);

            anyhow::ensure!(
                response.is_success(),
                "handler answered with status {}",
                response.status_code
            );
            Ok(())
        }

        _ => anyhow::bail!("{:?} is a recorded stage", command),
    }
}

fn read_event(path: &Path) -> Result<QueueEvent> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read event {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("malformed event {}", path.display()))
}
