use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use job_status::config::{AppConfig, CliConfig, FileConfig, DEFAULT_BUSY_TIMEOUT_MS};
use job_status::status_store::JobOptions;
use job_status::{
    generate_uuid, JobStatus, KillRegistry, PageRange, SqliteStatusStore, StatusFields,
    StatusRecord, StatusStore, StatusUpdate,
};
use std::path::PathBuf;
use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_options(s: &str) -> Result<JobOptions> {
    serde_json::from_str(s).context("Options must be a JSON object")
}

#[derive(Parser, Debug)]
#[command(about = "Inspect and manage job status records")]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite status database.
    #[clap(long, value_parser = parse_path)]
    pub db: Option<PathBuf>,

    /// Expire statuses older than this many seconds whenever one is created.
    #[clap(long)]
    pub expire_in: Option<u64>,

    /// How long to wait for another process holding the database lock.
    #[clap(long, default_value_t = DEFAULT_BUSY_TIMEOUT_MS)]
    pub busy_timeout_ms: u64,

    /// Log level, overridden by the LOG_LEVEL environment variable.
    #[clap(long, default_value = "warn")]
    pub logging_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ClearFilter {
    Completed,
    Failed,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a queued status. A uuid is generated when none is given.
    Create {
        uuid: Option<String>,
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        message: Option<String>,
        /// Job options as a JSON object.
        #[clap(long, value_parser = parse_options)]
        options: Option<JobOptions>,
    },

    /// Shows one or more statuses.
    Get { uuids: Vec<String> },

    /// Merges fields into a status, creating it if needed.
    Set {
        uuid: String,
        #[clap(long)]
        status: Option<String>,
        #[clap(long)]
        num: Option<i64>,
        #[clap(long)]
        total: Option<i64>,
        #[clap(long)]
        message: Option<String>,
    },

    /// Removes a status and prints it.
    Remove { uuid: String },

    /// Prints the number of stored statuses.
    Count,

    /// Lists statuses, most recent first.
    List {
        #[clap(long)]
        start: Option<usize>,
        #[clap(long)]
        end: Option<usize>,
        /// Print only the uuids.
        #[clap(long)]
        ids: bool,
    },

    /// Removes the statuses in the given window (all of them without a window).
    Clear {
        #[clap(long)]
        start: Option<usize>,
        #[clap(long)]
        end: Option<usize>,
        #[clap(long, value_enum)]
        only: Option<ClearFilter>,
    },

    /// Asks a job to stop at its next checkpoint.
    Kill { uuid: String },

    /// Withdraws a kill request.
    Killed { uuid: String },

    /// Lists uuids with a pending kill request.
    KillIds,

    /// Asks every job in the window to stop.
    Killall {
        #[clap(long)]
        start: Option<usize>,
        #[clap(long)]
        end: Option<usize>,
    },

    /// Prints whether a job has a pending kill request.
    ShouldKill { uuid: String },
}

fn print_record(record: &StatusRecord) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&record.snapshot())?);
    Ok(())
}

fn run(store: &SqliteStatusStore, command: Command) -> Result<()> {
    match command {
        Command::Create {
            uuid,
            name,
            message,
            options,
        } => {
            let uuid = uuid.unwrap_or_else(generate_uuid);
            let fields = StatusFields {
                name,
                message,
                options,
                ..Default::default()
            };
            let uuid = store.create(&uuid, &[StatusUpdate::Fields(fields)])?;
            println!("{}", uuid);
        }
        Command::Get { uuids } => {
            let ids: Vec<&str> = uuids.iter().map(String::as_str).collect();
            for (uuid, record) in ids.iter().zip(store.mget(&ids)?) {
                match record {
                    Some(record) => print_record(&record)?,
                    None => eprintln!("No status for {}", uuid),
                }
            }
        }
        Command::Set {
            uuid,
            status,
            num,
            total,
            message,
        } => {
            let status = status
                .map(|s| {
                    JobStatus::parse(&s).with_context(|| format!("Unknown status '{}'", s))
                })
                .transpose()?;
            let fields = StatusFields {
                status,
                num,
                total,
                message,
                ..Default::default()
            };
            let record = store.set(&uuid, &[StatusUpdate::Fields(fields)])?;
            print_record(&record)?;
        }
        Command::Remove { uuid } => match store.remove(&uuid)? {
            Some(record) => print_record(&record)?,
            None => eprintln!("No status for {}", uuid),
        },
        Command::Count => println!("{}", store.count()?),
        Command::List { start, end, ids } => {
            let range = PageRange { start, end };
            if ids {
                for uuid in store.status_ids(range)? {
                    println!("{}", uuid);
                }
            } else {
                for record in store.statuses(range)? {
                    print_record(&record)?;
                }
            }
        }
        Command::Clear { start, end, only } => {
            let range = PageRange { start, end };
            let removed = match only {
                None => store.clear(range)?,
                Some(ClearFilter::Completed) => store.clear_completed(range)?,
                Some(ClearFilter::Failed) => store.clear_failed(range)?,
            };
            println!("Removed {} statuses", removed);
        }
        Command::Kill { uuid } => {
            if !store.kill(&uuid)? {
                eprintln!("No status for {}", uuid);
            }
        }
        Command::Killed { uuid } => {
            if !store.killed(&uuid)? {
                eprintln!("No status for {}", uuid);
            }
        }
        Command::KillIds => {
            for uuid in store.kill_ids()? {
                println!("{}", uuid);
            }
        }
        Command::Killall { start, end } => {
            let flagged = store.killall(PageRange { start, end })?;
            println!("Requested kill for {} jobs", flagged);
        }
        Command::ShouldKill { uuid } => println!("{}", store.should_kill(&uuid)?),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_path: cli_args.db.clone(),
        expire_in_secs: cli_args.expire_in,
        busy_timeout_ms: cli_args.busy_timeout_ms,
        logging_level: cli_args.logging_level,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(config.logging_level.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    debug!("Opening status database at {:?}", config.db_path);
    let store = SqliteStatusStore::new(&config.db_path, config.store.clone())?;
    run(&store, cli_args.command)
}
