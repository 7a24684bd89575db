//! rewind - Replay or roll back a window of MySQL binary logs
//!
//! # Usage
//!
//! ```bash
//! # Forward replay of one file, statements to stdout
//! rewind --user root --start-file mysql-bin.000012
//!
//! # Rollback script for a time window of one database
//! rewind --user root --database shop \
//!     --start-file mysql-bin.000012 \
//!     --start-time "2024-03-01 10:00:00" --stop-time "2024-03-01 10:05:00" \
//!     --flashback --output undo.sql
//! ```
//!
//! Logs go to stderr; stdout carries only statements (and the `--json`
//! summary).
//!
//! # Exit codes
//!
//! | code | cause                                   |
//! |------|-----------------------------------------|
//! | 0    | success, including an early stop bound  |
//! | 1    | other failure                           |
//! | 2    | invalid options or binlog boundaries    |
//! | 3    | MySQL connection or catalog query       |
//! | 4    | table metadata                          |
//! | 5    | binlog decoding                         |
//! | 6    | local file or output                    |

use anyhow::{Context, Result};
use clap::Parser;
use rewind_binlog::common::{parse_local_time, split_list};
use rewind_binlog::mysql::{BinlogFileOpener, ConnectionOptions, MySqlCatalog};
use rewind_binlog::{FlashbackConfig, FlashbackError, FlashbackPipeline, OutputTarget, SqlType};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rewind")]
#[command(version, about = "Replay or flash back MySQL binary logs as SQL")]
struct Cli {
    /// MySQL host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// MySQL port
    #[arg(short = 'P', long, default_value = "3306")]
    port: u16,

    /// MySQL user
    #[arg(short, long, default_value = "root")]
    user: String,

    /// MySQL password
    #[arg(short, long, env = "REWIND_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Only events of this database
    #[arg(short, long)]
    database: Option<String>,

    /// First binlog file (optionally with its directory)
    #[arg(long)]
    start_file: String,

    /// Offset in the start file
    #[arg(long, default_value = "0")]
    start_pos: u64,

    /// Skip events before this local time (YYYY-MM-DD HH:MM:SS)
    #[arg(long)]
    start_time: Option<String>,

    /// Last binlog file to read
    #[arg(long)]
    stop_file: Option<String>,

    /// Stop once an event ends past this offset of the stop file
    #[arg(long, default_value = "0")]
    stop_pos: u64,

    /// Stop at the first event after this local time (YYYY-MM-DD HH:MM:SS)
    #[arg(long)]
    stop_time: Option<String>,

    /// Only GTID markers matching this regex
    #[arg(long)]
    gtid_regex: Option<String>,

    /// Comma-separated table allow-list (`table` or `schema.table`, globs allowed)
    #[arg(long)]
    only_tables: Option<String>,

    /// Comma-separated SQL types to keep (insert, update, delete)
    #[arg(long, default_value = "insert,update,delete")]
    only_sql_type: String,

    /// Also emit schema changes (forward mode only)
    #[arg(long)]
    include_ddl: bool,

    /// Omit GTID/BEGIN/COMMIT marker lines
    #[arg(long)]
    no_tx_markers: bool,

    /// Output file, or `stdout`
    #[arg(short, long, default_value = "stdout")]
    output: String,

    /// Emit the rollback script instead of a forward replay
    #[arg(long)]
    flashback: bool,

    /// Directory holding the binlog files (default: from the server)
    #[arg(long)]
    binlog_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn flashback_config(&self) -> Result<FlashbackConfig> {
        let mut config = FlashbackConfig::new(&self.start_file)
            .with_start_position(self.start_pos)
            .with_only_dml(!self.include_ddl)
            .with_no_transaction_markers(self.no_tx_markers)
            .with_rollback(self.flashback);

        if let Some(start) = &self.start_time {
            let epoch = parse_local_time(start).context("Invalid --start-time")?;
            config = config.with_start_time(epoch);
        }
        if let Some(stop) = &self.stop_time {
            let epoch = parse_local_time(stop).context("Invalid --stop-time")?;
            config = config.with_stop_time(epoch);
        }
        if let Some(stop_file) = &self.stop_file {
            config = config.with_stop(stop_file, self.stop_pos);
        } else if self.stop_pos > 0 {
            anyhow::bail!("--stop-pos requires --stop-file");
        }
        if let Some(pattern) = &self.gtid_regex {
            config = config.with_gtid_pattern(pattern);
        }
        if let Some(database) = &self.database {
            config = config.with_database(database);
        }
        if let Some(tables) = &self.only_tables {
            for table in split_list(tables) {
                config = config.include_table(table);
            }
        }
        if let Some(dir) = &self.binlog_dir {
            config = config.with_binlog_dir(dir);
        }

        let sql_types = split_list(&self.only_sql_type)
            .iter()
            .map(|t| t.parse::<SqlType>())
            .collect::<rewind_binlog::Result<Vec<_>>>()
            .context("Invalid --only-sql-type")?;
        let output: OutputTarget = self.output.parse().context("Invalid --output")?;

        let config = config.with_sql_types(sql_types).with_output(output);
        config.validate().context("Invalid options")?;
        Ok(config)
    }

    fn connection_options(&self) -> ConnectionOptions {
        let mut options = ConnectionOptions::new(&self.host, &self.user).with_port(self.port);
        if let Some(password) = &self.password {
            options = options.with_password(password);
        }
        options
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

/// Exit code for a failed run, from the category of the underlying error.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<FlashbackError>())
    {
        Some(cause) => {
            error!(
                error_code = cause.error_code(),
                category = ?cause.category(),
                "Run failed"
            );
            i32::from(cause.category().exit_code())
        }
        None => 1,
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = cli.flashback_config()?;
    let catalog = MySqlCatalog::connect(cli.connection_options())
        .await
        .with_context(|| format!("Failed to connect to MySQL at {}:{}", cli.host, cli.port))?;
    let catalog = Arc::new(catalog);

    let pipeline = FlashbackPipeline::new(config, catalog.clone(), Arc::new(BinlogFileOpener));
    let result = pipeline.run().await;
    drop(pipeline);

    if let Ok(catalog) = Arc::try_unwrap(catalog) {
        if let Err(e) = catalog.disconnect().await {
            warn!("Failed to close MySQL connections: {}", e);
        }
    }

    let summary = result.context("Flashback run failed")?;
    if let Some(file) = &summary.output {
        info!("Statements written to {}", file.display());
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}
