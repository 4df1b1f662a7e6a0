//! Transactional writer for the result documents of an updating query.
//!
//! A query engine announces each result document through
//! [`ResultDocumentHandler::resolve`]; [`TransactionManager`] stages it in a
//! temporary file beside the destination. [`TransactionManager::complete`]
//! installs every staged document (keeping `.bak` backups of replaced files),
//! and dropping the manager without completing undoes everything.
//!
//! ```no_run
//! use resdoc::{ResultDocumentHandler, SerializationSettings, TransactionManager};
//! use std::io::Write;
//!
//! # fn main() -> resdoc::Result<()> {
//! let mut tx = TransactionManager::default();
//! if let Some(mut sink) = tx.resolve("file:///tmp/a.xml", SerializationSettings::default())? {
//!     sink.write_all(b"<a/>")?;
//!     sink.close()?;
//! }
//! tx.complete()?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod destination;
pub mod engine;
pub mod error;
pub mod events;
pub mod input;
pub mod manifest_engine;
pub mod model;
pub mod options;
pub mod reporter;
pub mod sink;
pub mod transaction;
pub mod write;

pub use destination::Refusal;
pub use engine::{UpdateEngine, UpdateMode, UpdateReport, perform_update};
pub use error::{Error, Result};
pub use manifest_engine::ManifestEngine;
pub use model::Manifest;
pub use options::TransactionOptions;
pub use sink::{ResultSink, SerializationSettings};
pub use transaction::{
    CommitSummary, InstallKind, InstalledDocument, PendingWrite, ResultDocumentHandler,
    RollbackSummary, TransactionManager, TransactionState,
};
pub use write::{NameGenerator, RandomNames};
