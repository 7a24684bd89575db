//! Output sequencing
//!
//! Statements are written by a dedicated consumer task fed through a bounded
//! channel. The producer waits when the channel is full, so no statement is
//! ever dropped. [`OutputSequencer::finish`] closes the channel and waits for
//! the consumer to drain, flush and (in rollback mode) reverse the staged
//! file; output is durable only once it returns.
//!
//! In rollback mode output always goes through a staged file. With a file
//! target the statements are staged in `<target>.staged`, reversed there and
//! only then renamed onto the target, so a failed run never touches an
//! existing target. With a console target the statements are mirrored to
//! stdout in arrival order while a `rollback_<unix>.sql` file is staged and
//! reversed.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter, Stdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::common::{reverse_lines, FlashbackError, OutputTarget, Result, Statement};

/// Default channel capacity between producer and writer.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 2048;

/// Output sequencer settings.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub target: OutputTarget,
    pub rollback: bool,
    /// Bounded queue size
    pub capacity: usize,
    /// Directory for the staged file of console rollback runs
    pub staging_dir: Option<PathBuf>,
}

impl OutputConfig {
    pub fn new(target: OutputTarget, rollback: bool) -> Self {
        Self {
            target,
            rollback,
            capacity: DEFAULT_OUTPUT_CAPACITY,
            staging_dir: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// File that receives the forward-order statements in rollback mode.
    fn staged_path(&self) -> Option<PathBuf> {
        if !self.rollback {
            return None;
        }
        match &self.target {
            OutputTarget::File(path) => {
                let mut name = path.as_os_str().to_os_string();
                name.push(".staged");
                Some(PathBuf::from(name))
            }
            OutputTarget::Console => {
                let name = format!("rollback_{}.sql", chrono::Local::now().timestamp());
                Some(match &self.staging_dir {
                    Some(dir) => dir.join(name),
                    None => PathBuf::from(name),
                })
            }
        }
    }
}

/// What the writer did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutputSummary {
    /// Statements written
    pub statements: u64,
    /// Final file holding the output, if any
    pub file: Option<PathBuf>,
    /// Lines reordered by the reversal pass
    pub reversed_lines: Option<u64>,
    /// The producer failed; output is partial and was not reversed
    pub aborted: bool,
    /// Unreversed staged file left behind by an aborted rollback run
    pub partial: Option<PathBuf>,
}

enum OutputCommand {
    Statement(Statement),
    Abort,
}

enum Sink {
    Console(BufWriter<Stdout>),
    File(BufWriter<File>),
    Mirrored {
        file: BufWriter<File>,
        console: BufWriter<Stdout>,
    },
}

impl Sink {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        match self {
            Sink::Console(out) => write_line(out, line).await,
            Sink::File(out) => write_line(out, line).await,
            Sink::Mirrored { file, console } => {
                write_line(file, line).await?;
                write_line(console, line).await
            }
        }
    }

    async fn close(self) -> Result<()> {
        match self {
            Sink::Console(mut out) => Ok(out.flush().await?),
            Sink::File(out) => close_file(out).await,
            Sink::Mirrored { file, mut console } => {
                console.flush().await?;
                close_file(file).await
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, line: &str) -> Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    Ok(())
}

async fn close_file(mut out: BufWriter<File>) -> Result<()> {
    out.flush().await?;
    out.into_inner().sync_all().await?;
    Ok(())
}

async fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| FlashbackError::output(format!("cannot open {}: {}", path.display(), e)))?;
    Ok(BufWriter::new(file))
}

/// Producer side of the output pipeline plus the writer task handle.
pub struct OutputSequencer {
    tx: mpsc::Sender<OutputCommand>,
    handle: JoinHandle<Result<OutputSummary>>,
}

impl OutputSequencer {
    /// Open the sink and start the writer task.
    pub async fn spawn(config: OutputConfig) -> Result<Self> {
        let staged = config.staged_path();
        let sink = match (&config.target, &staged) {
            (OutputTarget::Console, None) => Sink::Console(BufWriter::new(tokio::io::stdout())),
            (OutputTarget::File(path), None) => Sink::File(create_file(path).await?),
            (OutputTarget::File(_), Some(staged)) => Sink::File(create_file(staged).await?),
            (OutputTarget::Console, Some(staged)) => Sink::Mirrored {
                file: create_file(staged).await?,
                console: BufWriter::new(tokio::io::stdout()),
            },
        };
        let final_file = match (&config.target, &staged) {
            (OutputTarget::File(path), _) => Some(path.clone()),
            (OutputTarget::Console, staged) => staged.clone(),
        };
        if let Some(staged) = &staged {
            info!("Staging rollback statements in {}", staged.display());
        }

        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let handle = tokio::spawn(run_writer(rx, sink, staged, final_file));
        Ok(Self { tx, handle })
    }

    /// Queue a statement, waiting while the queue is full.
    pub async fn send(&self, statement: Statement) -> Result<()> {
        self.tx
            .send(OutputCommand::Statement(statement))
            .await
            .map_err(|_| FlashbackError::output("output writer stopped"))
    }

    /// Close the queue and wait for the writer to finish.
    pub async fn finish(self) -> Result<OutputSummary> {
        let Self { tx, handle } = self;
        drop(tx);
        join_writer(handle).await
    }

    /// Tell the writer the run failed: flush what was written, skip reversal.
    pub async fn abort(self) -> Result<OutputSummary> {
        let Self { tx, handle } = self;
        // A stopped writer reports its own error through the handle
        let _ = tx.send(OutputCommand::Abort).await;
        drop(tx);
        join_writer(handle).await
    }
}

async fn join_writer(handle: JoinHandle<Result<OutputSummary>>) -> Result<OutputSummary> {
    handle
        .await
        .map_err(|e| FlashbackError::output(format!("output writer task failed: {}", e)))?
}

async fn run_writer(
    mut rx: mpsc::Receiver<OutputCommand>,
    mut sink: Sink,
    staged: Option<PathBuf>,
    file: Option<PathBuf>,
) -> Result<OutputSummary> {
    let mut summary = OutputSummary {
        file,
        ..Default::default()
    };

    while let Some(command) = rx.recv().await {
        match command {
            OutputCommand::Statement(statement) => {
                sink.write_line(&statement.render()).await?;
                summary.statements += 1;
            }
            OutputCommand::Abort => {
                summary.aborted = true;
                break;
            }
        }
    }
    rx.close();
    sink.close().await?;
    debug!("Output writer drained {} statements", summary.statements);

    let Some(staged) = staged else {
        return Ok(summary);
    };
    if summary.aborted {
        warn!(
            "Run failed; unreversed partial output left in {}",
            staged.display()
        );
        summary.file = None;
        summary.partial = Some(staged);
        return Ok(summary);
    }

    summary.reversed_lines = Some(reverse_lines(&staged).await?);
    if let Some(target) = summary.file.as_ref().filter(|target| **target != staged) {
        fs::rename(&staged, target).await.map_err(|e| {
            FlashbackError::output(format!(
                "cannot move {} to {}: {}",
                staged.display(),
                target.display(),
                e
            ))
        })?;
        debug!("Moved reversed output to {}", target.display());
    }
    Ok(summary)
}
