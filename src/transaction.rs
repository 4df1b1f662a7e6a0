//! The result-document transaction manager.
//!
//! Every result document is first written to a temporary file next to its
//! destination. Nothing touches a destination until `complete()`. Each
//! filesystem side effect appends an entry to an undo log; if the manager is
//! dropped (or `rollback()` is called) before a successful `complete()`, the
//! undo log is replayed in append order and the filesystem returns to its
//! pre-transaction state.
//!
//! `complete()` is atomic per file, not across files: if installing the k-th
//! document fails, the first k-1 stay installed until the rollback that
//! follows restores them.

use crate::destination::{self, Refusal};
use crate::error::{Error, Result};
use crate::options::TransactionOptions;
use crate::sink::{self, ResultSink, SerializationSettings, SharedHandle, SinkState};
use crate::write::{self, NameGenerator, RandomNames};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, warn};

/// Receives result documents produced while an updating query is evaluated.
pub trait ResultDocumentHandler {
    /// Returns a sink for the document at `uri`, or `Ok(None)` if the
    /// document cannot be produced by this handler.
    fn resolve(&mut self, uri: &str, settings: SerializationSettings) -> Result<Option<ResultSink>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    Completing,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Open => "open",
            TransactionState::Completing => "completing",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// A result document staged in a temporary file.
#[derive(Debug)]
pub struct PendingWrite {
    uri: String,
    destination: PathBuf,
    temp: TempPath,
    handle: SharedHandle,
}

impl PendingWrite {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Flush and close the sink's file so the staged bytes can be read back.
    pub fn close(&self) -> io::Result<()> {
        sink::close_handle(&self.handle)
    }
}

#[derive(Debug)]
enum CommitAction {
    Install(PendingWrite),
}

#[derive(Debug)]
enum UndoAction {
    DiscardTemp { temp: PathBuf, handle: SharedHandle },
    RemoveCreated { destination: PathBuf },
    RestoreBackup { destination: PathBuf, backup: PathBuf },
}

impl UndoAction {
    fn path(&self) -> &Path {
        match self {
            UndoAction::DiscardTemp { temp, .. } => temp,
            UndoAction::RemoveCreated { destination } => destination,
            UndoAction::RestoreBackup { destination, .. } => destination,
        }
    }

    fn run(self) -> io::Result<()> {
        match self {
            UndoAction::DiscardTemp { temp, handle } => {
                sink::discard_handle(&handle);
                write::remove_if_exists(&temp).map(drop)
            }
            UndoAction::RemoveCreated { destination } => write::remove_if_exists(&destination).map(drop),
            UndoAction::RestoreBackup {
                destination,
                backup,
            } => write::restore_backup(&backup, &destination),
        }
    }
}

/// How a committed document reached its destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "install", rename_all = "snake_case")]
pub enum InstallKind {
    /// The destination did not exist; the temporary file was moved there.
    Created,
    /// The destination was replaced and its old contents kept at `backup`.
    Replaced { backup: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledDocument {
    pub uri: String,
    pub destination: PathBuf,
    #[serde(flatten)]
    pub kind: InstallKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub documents: Vec<InstalledDocument>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    /// Undo actions executed.
    pub actions: usize,
    /// Undo actions that failed and were skipped.
    pub failures: usize,
}

pub struct TransactionManager {
    options: TransactionOptions,
    names: Box<dyn NameGenerator>,
    state: TransactionState,
    undo_log: Vec<UndoAction>,
    commit_log: Vec<CommitAction>,
    /// Destinations installed so far in this commit and how the first
    /// install reached each of them.
    installed: HashMap<PathBuf, InstallKind>,
    refusals: Vec<Refusal>,
}

impl TransactionManager {
    /// Create a manager, rejecting options that could damage a destination
    /// (for example an empty backup suffix).
    pub fn new(options: TransactionOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(options))
    }

    fn build(options: TransactionOptions) -> Self {
        let names = RandomNames::new(options.temp_prefix.clone(), options.temp_suffix.clone());
        Self {
            options,
            names: Box::new(names),
            state: TransactionState::Open,
            undo_log: Vec::new(),
            commit_log: Vec::new(),
            installed: HashMap::new(),
            refusals: Vec::new(),
        }
    }

    /// Replace the temporary file name source.
    pub fn with_name_generator(mut self, names: impl NameGenerator + 'static) -> Self {
        self.names = Box::new(names);
        self
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Documents refused so far, in request order.
    pub fn refusals(&self) -> &[Refusal] {
        &self.refusals
    }

    /// Staged documents awaiting commit, in request order.
    pub fn pending_writes(&self) -> impl Iterator<Item = &PendingWrite> {
        self.commit_log.iter().map(|action| match action {
            CommitAction::Install(pending) => pending,
        })
    }

    /// Install every staged document at its destination, in request order.
    pub fn complete(&mut self) -> Result<CommitSummary> {
        self.ensure_open()?;
        self.state = TransactionState::Completing;

        let actions = mem::take(&mut self.commit_log);
        let total = actions.len();
        let mut summary = CommitSummary::default();

        for action in actions {
            let CommitAction::Install(pending) = &action;
            let destination = pending.destination.clone();
            match self.apply(action) {
                Ok(doc) => summary.documents.push(doc),
                Err(e) => {
                    let committed = summary.documents.len();
                    warn!(committed, total, "commit failed: {}", e);
                    if committed == 0 {
                        return Err(e);
                    }
                    return Err(Error::PartialCommit {
                        committed,
                        total,
                        destination,
                        source: Box::new(e),
                    });
                }
            }
        }

        self.undo_log.clear();
        self.installed.clear();
        self.state = TransactionState::Committed;
        debug!(documents = total, "transaction committed");
        Ok(summary)
    }

    /// Undo every side effect recorded so far. Safe to call repeatedly; does
    /// nothing once the transaction is committed or rolled back.
    pub fn rollback(&mut self) -> RollbackSummary {
        if matches!(
            self.state,
            TransactionState::Committed | TransactionState::RolledBack
        ) {
            return RollbackSummary::default();
        }

        let actions = mem::take(&mut self.undo_log);
        let mut summary = RollbackSummary {
            actions: actions.len(),
            failures: 0,
        };
        for action in actions {
            let path = action.path().to_path_buf();
            if let Err(e) = action.run() {
                warn!("rollback step failed for {}: {}", path.display(), e);
                summary.failures += 1;
            }
        }

        self.commit_log.clear();
        self.installed.clear();
        self.state = TransactionState::RolledBack;
        debug!(actions = summary.actions, failures = summary.failures, "transaction rolled back");
        summary
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            TransactionState::Open => Ok(()),
            state => Err(Error::Closed { state }),
        }
    }

    fn apply(&mut self, action: CommitAction) -> Result<InstalledDocument> {
        let CommitAction::Install(PendingWrite {
            uri,
            destination,
            temp,
            handle,
        }) = action;

        let kind = self
            .install(&destination, temp, &handle)
            .map_err(|source| Error::Install {
                destination: destination.clone(),
                source,
            })?;
        debug!(uri = %uri, destination = %destination.display(), ?kind, "installed result document");

        Ok(InstalledDocument {
            uri,
            destination,
            kind,
        })
    }

    fn install(&mut self, destination: &Path, temp: TempPath, handle: &SharedHandle) -> io::Result<InstallKind> {
        sink::close_handle(handle)?;
        if self.options.sync {
            write::sync_file(&temp)?;
        }

        // A destination written twice keeps the undo entry and backup of
        // its first install; later installs only replace the bytes.
        if let Some(kind) = self.installed.get(destination) {
            let kind = kind.clone();
            write::copy_permissions(destination, &temp)?;
            write::replace(temp, destination)?;
            return Ok(kind);
        }

        let kind = if destination.try_exists()? {
            let backup = self.options.backup_path(destination);
            write::copy_permissions(destination, &temp)?;
            write::make_backup(destination, &backup)?;
            self.undo_log.push(UndoAction::RestoreBackup {
                destination: destination.to_path_buf(),
                backup: backup.clone(),
            });
            write::replace(temp, destination)?;
            InstallKind::Replaced { backup }
        } else {
            write::move_new(temp, destination)?;
            self.undo_log.push(UndoAction::RemoveCreated {
                destination: destination.to_path_buf(),
            });
            InstallKind::Created
        };
        self.installed.insert(destination.to_path_buf(), kind.clone());
        Ok(kind)
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::build(TransactionOptions::default())
    }
}

impl ResultDocumentHandler for TransactionManager {
    fn resolve(&mut self, uri: &str, mut settings: SerializationSettings) -> Result<Option<ResultSink>> {
        self.ensure_open()?;

        let destination = match destination::local_path(uri) {
            Ok(path) => path,
            Err(refusal) => {
                warn!("{}", refusal);
                self.refusals.push(refusal);
                return Ok(None);
            }
        };

        let dir = write::parent_dir(&destination);
        let (file, temp) = write::create_temp_in(
            &dir,
            self.names.as_mut(),
            self.options.max_collision_retries,
        )?;
        debug!(uri, temp = %temp.display(), destination = %destination.display(), "staged result document");

        let handle = SinkState::open(file);
        self.undo_log.push(UndoAction::DiscardTemp {
            temp: temp.clone(),
            handle: Arc::clone(&handle),
        });
        self.commit_log.push(CommitAction::Install(PendingWrite {
            uri: uri.to_string(),
            destination,
            temp: TempPath::from_path(temp.clone()),
            handle: Arc::clone(&handle),
        }));

        settings.close_output = true;
        Ok(Some(ResultSink::new(handle, settings, temp)))
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        if matches!(
            self.state,
            TransactionState::Open | TransactionState::Completing
        ) {
            let summary = self.rollback();
            if summary.actions > 0 {
                debug!(actions = summary.actions, "uncompleted transaction discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn uri(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn resolve_stages_without_touching_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.xml");
        let mut tx = TransactionManager::default();

        let mut sink = tx.resolve(&uri(&dest), SerializationSettings::default()).unwrap().unwrap();
        sink.write_all(b"<a/>").unwrap();

        assert!(!dest.exists());
        assert!(sink.settings().close_output);
        assert_eq!(sink.temp_path().parent(), Some(dir.path()));
        let pending: Vec<_> = tx.pending_writes().map(|p| p.destination().to_path_buf()).collect();
        assert_eq!(pending, vec![dest]);
    }

    #[test]
    fn complete_moves_state_to_committed() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.xml");
        let mut tx = TransactionManager::default();
        let mut sink = tx.resolve(&uri(&dest), SerializationSettings::default()).unwrap().unwrap();
        sink.write_all(b"<a/>").unwrap();
        drop(sink);

        let summary = tx.complete().unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(summary.documents.len(), 1);
        assert_eq!(summary.documents[0].kind, InstallKind::Created);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "<a/>");
    }

    #[test]
    fn complete_flushes_sinks_still_held_by_the_engine() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.xml");
        let mut tx = TransactionManager::default();
        let mut sink = tx.resolve(&uri(&dest), SerializationSettings::default()).unwrap().unwrap();
        sink.write_all(b"buffered").unwrap();

        tx.complete().unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "buffered");
        assert!(sink.write_all(b"more").is_err());
    }

    #[test]
    fn operations_after_commit_are_rejected() {
        let mut tx = TransactionManager::default();
        tx.complete().unwrap();

        let err = tx.complete().unwrap_err();
        assert!(matches!(err, Error::Closed { state: TransactionState::Committed }));
        let err = tx.resolve("x.xml", SerializationSettings::default()).unwrap_err();
        assert!(err.to_string().contains("committed"));
        assert_eq!(tx.rollback(), RollbackSummary::default());
    }

    #[test]
    fn rollback_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut tx = TransactionManager::default();
        let sink = tx.resolve(&uri(&dir.path().join("a.xml")), SerializationSettings::default()).unwrap().unwrap();
        let temp = sink.temp_path().to_path_buf();
        drop(sink);

        let first = tx.rollback();
        assert_eq!(first.actions, 1);
        assert_eq!(first.failures, 0);
        assert!(!temp.exists());
        assert_eq!(tx.state(), TransactionState::RolledBack);

        assert_eq!(tx.rollback(), RollbackSummary::default());
        assert!(tx.complete().is_err());
    }

    #[test]
    fn refusal_is_recorded_and_not_fatal() {
        let mut tx = TransactionManager::default();
        let sink = tx.resolve("http://example.com/a.xml", SerializationSettings::default()).unwrap();
        assert!(sink.is_none());
        assert_eq!(tx.state(), TransactionState::Open);
        assert_eq!(tx.refusals().len(), 1);
        assert_eq!(tx.refusals()[0].uri, "http://example.com/a.xml");
        assert_eq!(tx.pending_writes().count(), 0);
    }

    #[test]
    fn drop_without_complete_discards_temps() {
        let dir = tempdir().unwrap();
        let temp = {
            let mut tx = TransactionManager::default();
            let mut sink = tx.resolve(&uri(&dir.path().join("a.xml")), SerializationSettings::default()).unwrap().unwrap();
            sink.write_all(b"x").unwrap();
            sink.temp_path().to_path_buf()
        };
        assert!(!temp.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_commit_leaves_state_completing_until_rollback() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.xml");
        let b = dir.path().join("b.xml");
        fs::write(&a, "OLD").unwrap();

        let mut tx = TransactionManager::default();
        for (path, body) in [(&a, "NEW-A"), (&b, "NEW-B")] {
            let mut sink = tx.resolve(&uri(path), SerializationSettings::default()).unwrap().unwrap();
            sink.write_all(body.as_bytes()).unwrap();
        }
        // A non-empty directory at b.xml cannot be backed up or replaced.
        fs::create_dir(&b).unwrap();
        fs::write(b.join("inner"), "keep").unwrap();

        let err = tx.complete().unwrap_err();
        match err {
            Error::PartialCommit {
                committed,
                total,
                ref destination,
                ..
            } => {
                assert_eq!((committed, total), (1, 2));
                assert_eq!(destination, &b);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tx.state(), TransactionState::Completing);
        assert_eq!(fs::read_to_string(&a).unwrap(), "NEW-A");

        let summary = tx.rollback();
        assert_eq!(summary.failures, 0);
        assert_eq!(fs::read_to_string(&a).unwrap(), "OLD");
        assert!(!dir.path().join("a.xml.bak").exists());
        assert_eq!(fs::read_to_string(b.join("inner")).unwrap(), "keep");
    }

    #[test]
    fn empty_backup_suffix_is_rejected_by_constructor() {
        let options = TransactionOptions {
            backup_suffix: String::new(),
            ..Default::default()
        };
        assert!(matches!(TransactionManager::new(options), Err(Error::Validation(_))));
    }

    #[test]
    fn flush_failure_after_close_blocks_install() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.xml");
        let mut tx = TransactionManager::default();
        let sink = tx.resolve(&uri(&dest), SerializationSettings::default()).unwrap().unwrap();
        drop(sink);

        // Stands in for a flush that failed while the sink was dropped.
        let pending = tx.pending_writes().next().unwrap();
        *pending.handle.lock().unwrap() = SinkState::Failed(io::Error::other("disk full"));

        let err = tx.complete().unwrap_err();
        assert!(matches!(err, Error::Install { .. }));
        assert!(err.to_string().contains(&dest.display().to_string()));
        assert!(!dest.exists());

        tx.rollback();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn created_document_is_removed_when_a_later_install_fails() {
        let dir = tempdir().unwrap();
        let b = dir.path().join("b.xml");
        let c = dir.path().join("c.xml");

        let mut tx = TransactionManager::default();
        for (path, body) in [(&b, "NEW-B"), (&c, "NEW-C")] {
            let mut sink = tx.resolve(&uri(path), SerializationSettings::default()).unwrap().unwrap();
            sink.write_all(body.as_bytes()).unwrap();
        }
        fs::create_dir(&c).unwrap();
        fs::write(c.join("inner"), "keep").unwrap();

        assert!(matches!(tx.complete(), Err(Error::PartialCommit { committed: 1, .. })));
        assert_eq!(fs::read_to_string(&b).unwrap(), "NEW-B");

        let summary = tx.rollback();
        assert_eq!(summary.failures, 0);
        assert!(!b.exists());
        assert_eq!(fs::read_to_string(c.join("inner")).unwrap(), "keep");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn repeated_destination_rolls_back_to_original() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.xml");
        let c = dir.path().join("c.xml");
        fs::write(&a, "OLD").unwrap();

        let mut tx = TransactionManager::default();
        for (path, body) in [(&a, "FIRST"), (&a, "SECOND"), (&c, "NEW-C")] {
            let mut sink = tx.resolve(&uri(path), SerializationSettings::default()).unwrap().unwrap();
            sink.write_all(body.as_bytes()).unwrap();
        }
        fs::create_dir(&c).unwrap();
        fs::write(c.join("inner"), "keep").unwrap();

        assert!(matches!(tx.complete(), Err(Error::PartialCommit { committed: 2, total: 3, .. })));
        assert_eq!(fs::read_to_string(&a).unwrap(), "SECOND");
        assert_eq!(fs::read_to_string(dir.path().join("a.xml.bak")).unwrap(), "OLD");

        let summary = tx.rollback();
        assert_eq!(summary.failures, 0);
        assert_eq!(fs::read_to_string(&a).unwrap(), "OLD");
        assert!(!dir.path().join("a.xml.bak").exists());
    }

    #[test]
    fn repeated_new_destination_stays_created() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.xml");

        let mut tx = TransactionManager::default();
        for body in ["FIRST", "SECOND"] {
            let mut sink = tx.resolve(&uri(&a), SerializationSettings::default()).unwrap().unwrap();
            sink.write_all(body.as_bytes()).unwrap();
        }

        let summary = tx.complete().unwrap();
        let kinds: Vec<_> = summary.documents.iter().map(|d| d.kind.clone()).collect();
        assert_eq!(kinds, vec![InstallKind::Created, InstallKind::Created]);
        assert_eq!(fs::read_to_string(&a).unwrap(), "SECOND");
        assert!(!dir.path().join("a.xml.bak").exists());
    }
}
