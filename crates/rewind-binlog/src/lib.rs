//! # rewind-binlog - Replay and flashback SQL from MySQL binary logs
//!
//! Reads a window of row-based binlog events and writes either a forward
//! replay script or a rollback ("flashback") script that undoes the window,
//! newest change first.
//!
//! ## Features
//!
//! - `mysql` (default) - binlog file decoder and a live `mysql_async` schema catalog
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ binlog files │   │ SchemaCatalog│   │ FlashbackCfg │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        ▼                  ▼                  ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                  FlashbackPipeline                   │
//! │ filter → tracker → synthesizer → output sequencer    │
//! └──────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//!           forward script / reversed rollback script
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "mysql")]
//! # async fn example() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use rewind_binlog::mysql::{BinlogFileOpener, ConnectionOptions, MySqlCatalog};
//! use rewind_binlog::{FlashbackConfig, FlashbackPipeline, OutputTarget};
//!
//! let catalog = MySqlCatalog::connect(
//!     ConnectionOptions::new("127.0.0.1", "root").with_password("secret"),
//! )
//! .await?;
//! let config = FlashbackConfig::new("mysql-bin.000012")
//!     .with_database("shop")
//!     .with_rollback(true)
//!     .with_output(OutputTarget::file("undo.sql"));
//!
//! let summary = FlashbackPipeline::new(config, Arc::new(catalog), Arc::new(BinlogFileOpener))
//!     .run()
//!     .await?;
//! println!("{} statements", summary.statements_emitted);
//! # Ok(())
//! # }
//! ```

pub mod common;

pub use common::{
    // Error handling
    ErrorCategory,
    FlashbackError,
    Result,
    // Events and statements
    DecodedEvent,
    EventKind,
    EventPayload,
    RowImage,
    RowValue,
    RowsPayload,
    SqlType,
    Statement,
    StatementKind,
    // Configuration
    FlashbackConfig,
    OutputTarget,
    // Run
    FlashbackPipeline,
    RunSummary,
    // Collaborators
    EventSource,
    EventSourceOpener,
    SchemaCatalog,
    StaticCatalog,
};

// MySQL binlog decoding and catalog - feature-gated
#[cfg(feature = "mysql")]
pub mod mysql;
