use crate::destination::Refusal;
use crate::error::Result;
use crate::options::TransactionOptions;
use crate::transaction::{
    InstalledDocument, PendingWrite, ResultDocumentHandler, RollbackSummary, TransactionManager,
};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;

/// An evaluator of updating queries that produces result documents.
pub trait UpdateEngine {
    /// Evaluate the update, requesting one sink from `handler` per result
    /// document. An error means the update failed and nothing may be committed.
    fn evaluate_update(&mut self, handler: &mut dyn ResultDocumentHandler) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    #[default]
    Commit,
    /// Stage every document and report diffs, then roll back.
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedDocument {
    pub uri: String,
    pub destination: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    pub dry_run: bool,
    pub staged: Vec<StagedDocument>,
    pub installed: Vec<InstalledDocument>,
    pub refused: Vec<Refusal>,
    pub committed: bool,
    pub rollback: Option<RollbackSummary>,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
    pub duration_ms: u64,
}

impl UpdateReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Run one update inside a transaction: evaluate, then commit, rolling back
/// on any failure. Errors from the update itself are recorded in the report;
/// only invalid options are returned as `Err`.
pub fn perform_update(
    engine: &mut dyn UpdateEngine,
    options: TransactionOptions,
    mode: UpdateMode,
) -> Result<UpdateReport> {
    let start = Instant::now();
    let dry_run = mode == UpdateMode::DryRun;
    let mut report = UpdateReport {
        dry_run,
        ..Default::default()
    };

    let mut tx = TransactionManager::new(options)?;
    let evaluated = engine.evaluate_update(&mut tx);

    report.refused = tx.refusals().to_vec();
    let staged: Result<Vec<StagedDocument>> = tx
        .pending_writes()
        .map(|pending| stage_entry(pending, dry_run))
        .collect();

    let outcome = match staged {
        Ok(staged) => {
            report.staged = staged;
            evaluated.and_then(|()| finish(&mut tx, &mut report))
        }
        Err(e) => evaluated.and(Err(e)),
    };

    if let Err(e) = outcome {
        debug!(code = e.code(), "update failed, rolling back");
        report.error = Some(e.to_string());
        report.error_code = Some(e.code());
        report.rollback = Some(tx.rollback());
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    Ok(report)
}

fn finish(tx: &mut TransactionManager, report: &mut UpdateReport) -> Result<()> {
    if report.dry_run {
        report.rollback = Some(tx.rollback());
        return Ok(());
    }
    let summary = tx.complete()?;
    report.installed = summary.documents;
    report.committed = true;
    Ok(())
}

fn stage_entry(pending: &PendingWrite, with_diff: bool) -> Result<StagedDocument> {
    let diff = if with_diff {
        pending.close()?;
        let new = fs::read(pending.temp_path())?;
        let old = match fs::read(pending.destination()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        generate_diff(&String::from_utf8_lossy(&old), &String::from_utf8_lossy(&new))
    } else {
        None
    };

    Ok(StagedDocument {
        uri: pending.uri().to_string(),
        destination: pending.destination().to_path_buf(),
        diff,
    })
}

/// Generate a unified diff between old and new content.
fn generate_diff(old: &str, new: &str) -> Option<String> {
    if old == new {
        return None;
    }
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        output.push_str(&format!("{}{}", sign, change));
        if change.missing_newline() {
            output.push('\n');
        }
    }
    Some(output)
}
