//! # Common Flashback Types and Traits
//!
//! Database-agnostic core of a flashback run:
//!
//! - [`DecodedEvent`] - Decoded replication event
//! - [`Statement`] - Rendered output line with provenance
//! - [`FlashbackConfig`] - Immutable run configuration
//! - [`LogFileList`] - Ordered binlog files of the source
//! - [`TableMetadataResolver`] - Table id to column name resolution
//! - [`EventFilter`] - Keep/drop/stop decisions
//! - [`TransactionPositionTracker`] - Transaction start offsets
//! - [`SqlSynthesizer`] - Forward and rollback SQL
//! - [`OutputSequencer`] - Bounded writer task and rollback reversal
//! - [`FlashbackPipeline`] - Run driver
//!
//! ## Architecture
//!
//! ```text
//! EventSource ──▶ Tracker ──▶ EventFilter ──▶ SqlSynthesizer ──▶ OutputSequencer
//!                                 │                 │                   │
//!                                 └──── Resolver ───┘            reverse_lines
//!                                          │                  (rollback mode)
//!                                    SchemaCatalog
//! ```

mod catalog;
mod config;
mod error;
mod event;
mod files;
mod filter;
mod metadata;
mod output;
mod pipeline;
mod reverse;
mod synth;
mod traits;
mod transaction;

pub use catalog::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use files::*;
pub use filter::*;
pub use metadata::*;
pub use output::*;
pub use pipeline::*;
pub use reverse::*;
pub use synth::*;
pub use traits::*;
pub use transaction::*;
