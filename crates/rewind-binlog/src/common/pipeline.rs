//! Flashback run driver
//!
//! Wires the collaborators together for one run:
//!
//! ```text
//! source -> tracker -> filter -> resolver/synthesizer -> output sequencer
//! ```
//!
//! Files are walked in listing order from the start file. A `Stop` decision
//! ends the run successfully; any error aborts the writer (no reversal) and
//! is returned to the caller.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::common::{
    EventFilter, EventPayload, EventSourceOpener, FilterDecision, FlashbackConfig, FlashbackError,
    LogFileList, OutputConfig, OutputSequencer, Result, SchemaCatalog, SqlSynthesizer,
    TableMetadataResolver, TransactionMarkerKind, TransactionPositionTracker,
    BINLOG_FIRST_EVENT_OFFSET, DEFAULT_OUTPUT_CAPACITY,
};

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub files_scanned: u64,
    pub events_read: u64,
    pub events_kept: u64,
    pub events_dropped: u64,
    pub statements_emitted: u64,
    /// A stop bound ended the run
    pub stopped_early: bool,
    pub rollback: bool,
    /// File holding the output (`None` for console-only runs)
    pub output: Option<PathBuf>,
    pub reversed_lines: Option<u64>,
    pub elapsed_ms: u64,
}

/// Runs a flashback over the configured binlog window.
pub struct FlashbackPipeline {
    config: Arc<FlashbackConfig>,
    catalog: Arc<dyn SchemaCatalog>,
    opener: Arc<dyn EventSourceOpener>,
    output_capacity: usize,
    staging_dir: Option<PathBuf>,
}

/// Per-file driving state, owned by a single run.
struct RunState<'a> {
    filter: EventFilter,
    resolver: TableMetadataResolver,
    tracker: TransactionPositionTracker,
    synth: SqlSynthesizer,
    output: &'a OutputSequencer,
    summary: RunSummary,
}

impl FlashbackPipeline {
    pub fn new(
        config: FlashbackConfig,
        catalog: Arc<dyn SchemaCatalog>,
        opener: Arc<dyn EventSourceOpener>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog,
            opener,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            staging_dir: None,
        }
    }

    /// Bounded queue size between the pipeline and the writer.
    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Where console rollback runs stage their file (default: working dir).
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &FlashbackConfig {
        &self.config
    }

    /// Execute the run.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let config = &self.config;
        config.validate()?;

        let gtid_enabled = self.catalog.gtid_enabled().await?;
        let files = Arc::new(self.load_files().await?);
        files.validate_boundaries(config)?;
        info!(
            "Reading {} from {}:{} (gtid_mode={}, rollback={})",
            config
                .stop_file_name()
                .map(|f| format!("up to {}:{}", f, config.stop_position))
                .unwrap_or_else(|| "to the last binlog".to_string()),
            config.start_file_name(),
            config.effective_start_position(),
            gtid_enabled,
            config.rollback
        );

        let filter = EventFilter::new(Arc::clone(config), Arc::clone(&files))?;
        let mut output_config = OutputConfig::new(config.output.clone(), config.rollback)
            .with_capacity(self.output_capacity);
        if let Some(dir) = &self.staging_dir {
            output_config = output_config.with_staging_dir(dir);
        }
        let output = OutputSequencer::spawn(output_config).await?;

        let mut state = RunState {
            filter,
            resolver: TableMetadataResolver::new(Arc::clone(&self.catalog)),
            tracker: TransactionPositionTracker::new(TransactionMarkerKind::from_gtid_mode(
                gtid_enabled,
            )),
            synth: SqlSynthesizer::new(config.rollback, config.suppress_transaction_markers()),
            output: &output,
            summary: RunSummary {
                rollback: config.rollback,
                ..Default::default()
            },
        };

        let driven = self.drive(&files, &mut state).await;
        let mut summary = state.summary;
        match driven {
            Ok(stopped) => {
                summary.stopped_early = stopped;
                let written = output.finish().await?;
                summary.output = written.file;
                summary.reversed_lines = written.reversed_lines;
            }
            Err(e) => {
                return Err(match output.abort().await {
                    // The writer's own failure explains a closed queue better
                    Err(writer_err) if matches!(e, FlashbackError::Output(_)) => writer_err,
                    Err(writer_err) => {
                        warn!("Output writer also failed: {}", writer_err);
                        e
                    }
                    Ok(_) => e,
                });
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Run complete: {} events read, {} kept, {} statements emitted{}",
            summary.events_read,
            summary.events_kept,
            summary.statements_emitted,
            if summary.stopped_early {
                " (stop bound reached)"
            } else {
                ""
            }
        );
        Ok(summary)
    }

    async fn load_files(&self) -> Result<LogFileList> {
        let dir = match (self.config.start_file_dir(), &self.config.binlog_dir) {
            (Some(dir), _) => dir.to_path_buf(),
            (None, Some(dir)) => dir.clone(),
            (None, None) => self.catalog.binlog_directory().await?,
        };
        let entries = self.catalog.list_log_files().await?;
        debug!("Source lists {} binlog files in {}", entries.len(), dir.display());
        Ok(LogFileList::new(dir, entries))
    }

    /// Walk the files; returns whether a stop bound ended the walk.
    async fn drive(&self, files: &LogFileList, state: &mut RunState<'_>) -> Result<bool> {
        let config = &self.config;
        let start_name = config.start_file_name();
        let stop_index = config.stop_file_name().and_then(|f| files.index_of(f));

        for file in files.from_start(start_name)? {
            if matches!(stop_index, Some(stop) if file.index > stop) {
                return Ok(true);
            }
            let offset = if file.name == start_name {
                config.effective_start_position()
            } else {
                BINLOG_FIRST_EVENT_OFFSET
            };
            debug!("Scanning {} from offset {}", file.name, offset);
            state.summary.files_scanned += 1;
            state.tracker.reset();

            let mut source = self.opener.open(file, offset).await?;
            while let Some(event) = source.next_event().await? {
                state.summary.events_read += 1;
                state.tracker.observe(&event);

                match state.filter.evaluate(&file.name, &event, &state.resolver) {
                    FilterDecision::Drop => {
                        state.summary.events_dropped += 1;
                        continue;
                    }
                    FilterDecision::Stop => {
                        info!("Stop bound reached at {}:{}", file.name, event.log_position);
                        return Ok(true);
                    }
                    FilterDecision::Keep => state.summary.events_kept += 1,
                }

                if let EventPayload::TableDefinition {
                    table_id,
                    schema,
                    table,
                } = &event.payload
                {
                    state.resolver.define(*table_id, schema, table).await?;
                }

                let row_start = state.tracker.row_start_position(&event);
                let statements =
                    state
                        .synth
                        .synthesize(&file.name, &event, row_start, &state.resolver)?;
                for statement in statements {
                    state.output.send(statement).await?;
                    state.summary.statements_emitted += 1;
                }
            }
        }
        Ok(false)
    }
}
