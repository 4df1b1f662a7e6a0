use crate::engine::UpdateReport;
use crate::events::{DocumentEvent, ErrorInfo, Event, RunEnd, RunStart};
use crate::options::TransactionOptions;
use crate::transaction::InstallKind;
use std::io::{self, Write};

pub const SCHEMA_VERSION: &str = "1";

pub fn exit_code(report: &UpdateReport) -> i32 {
    if report.is_success() { 0 } else { 1 }
}

pub fn run_start(input_mode: &str, dry_run: bool, documents: usize, options: &TransactionOptions) -> RunStart {
    RunStart {
        schema_version: SCHEMA_VERSION.into(),
        tool_version: env!("CARGO_PKG_VERSION").into(),
        input_mode: input_mode.into(),
        dry_run,
        documents,
        options: options.clone(),
    }
}

/// Per-document events followed by the closing `run_end`.
pub fn events(report: &UpdateReport) -> Vec<Event> {
    let mut out = Vec::new();

    if report.committed {
        for doc in &report.installed {
            out.push(Event::Document(DocumentEvent::Committed {
                uri: doc.uri.clone(),
                destination: doc.destination.clone(),
                kind: doc.kind.clone(),
            }));
        }
    } else {
        for doc in &report.staged {
            let event = if report.dry_run && report.is_success() {
                DocumentEvent::Staged {
                    uri: doc.uri.clone(),
                    destination: doc.destination.clone(),
                    diff: doc.diff.clone(),
                }
            } else {
                DocumentEvent::Discarded {
                    uri: doc.uri.clone(),
                    destination: doc.destination.clone(),
                }
            };
            out.push(Event::Document(event));
        }
    }

    for refusal in &report.refused {
        out.push(Event::Document(DocumentEvent::Refused {
            uri: refusal.uri.clone(),
            reason: refusal.reason.clone(),
        }));
    }

    let rollback = report.rollback.unwrap_or_default();
    out.push(Event::RunEnd(RunEnd {
        total_documents: report.staged.len().max(report.installed.len()) + report.refused.len(),
        committed_documents: report.installed.len(),
        refused_documents: report.refused.len(),
        committed: report.committed,
        rolled_back: report.rollback.is_some(),
        rollback_failures: rollback.failures,
        error: match (&report.error, report.error_code) {
            (Some(message), code) => Some(ErrorInfo {
                code: code.unwrap_or("error").into(),
                message: message.clone(),
            }),
            (None, _) => None,
        },
        duration_ms: report.duration_ms,
        exit_code: exit_code(report),
    }));

    out
}

pub fn write_json<W: Write>(out: &mut W, start: RunStart, report: &UpdateReport) -> io::Result<()> {
    serde_json::to_writer(&mut *out, &Event::RunStart(start))?;
    writeln!(out)?;
    for event in events(report) {
        serde_json::to_writer(&mut *out, &event)?;
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_text<W: Write>(out: &mut W, report: &UpdateReport) -> io::Result<()> {
    if report.dry_run {
        writeln!(out, "DRY RUN: nothing was written")?;
    }

    if report.committed {
        for doc in &report.installed {
            match &doc.kind {
                InstallKind::Created => writeln!(out, "created   {}", doc.destination.display())?,
                InstallKind::Replaced { backup } => writeln!(
                    out,
                    "replaced  {} (backup {})",
                    doc.destination.display(),
                    backup.display()
                )?,
            }
        }
    } else if report.dry_run && report.is_success() {
        for doc in &report.staged {
            writeln!(out, "would write {}", doc.destination.display())?;
            if let Some(diff) = &doc.diff {
                write!(out, "{}", diff)?;
            }
        }
    }

    for refusal in &report.refused {
        writeln!(out, "refused   {}: {}", refusal.uri, refusal.reason)?;
    }

    if let Some(error) = &report.error {
        writeln!(out, "error: {}", error)?;
    }
    if let Some(rb) = report.rollback.filter(|_| !report.dry_run || !report.is_success()) {
        writeln!(out, "Rolled back ({} undo actions, {} failed)", rb.actions, rb.failures)?;
    }

    if report.committed {
        writeln!(
            out,
            "Committed {} result documents, refused {}",
            report.installed.len(),
            report.refused.len()
        )?;
    } else if report.dry_run && report.is_success() {
        writeln!(
            out,
            "Staged {} result documents, refused {}",
            report.staged.len(),
            report.refused.len()
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::Refusal;
    use crate::transaction::{InstalledDocument, RollbackSummary};

    fn committed_report() -> UpdateReport {
        UpdateReport {
            installed: vec![
                InstalledDocument {
                    uri: "file:///tmp/a.xml".into(),
                    destination: "/tmp/a.xml".into(),
                    kind: InstallKind::Replaced {
                        backup: "/tmp/a.xml.bak".into(),
                    },
                },
                InstalledDocument {
                    uri: "file:///tmp/b.xml".into(),
                    destination: "/tmp/b.xml".into(),
                    kind: InstallKind::Created,
                },
            ],
            refused: vec![Refusal {
                uri: "http://example.com/c.xml".into(),
                reason: "Result document URIs must use the 'file' URI scheme".into(),
            }],
            committed: true,
            ..Default::default()
        }
    }

    #[test]
    fn text_report_for_commit() {
        let mut out = Vec::new();
        write_text(&mut out, &committed_report()).unwrap();
        insta::assert_snapshot!(String::from_utf8(out).unwrap(), @r"
        replaced  /tmp/a.xml (backup /tmp/a.xml.bak)
        created   /tmp/b.xml
        refused   http://example.com/c.xml: Result document URIs must use the 'file' URI scheme
        Committed 2 result documents, refused 1
        ");
    }

    #[test]
    fn text_report_for_failure_mentions_rollback() {
        let report = UpdateReport {
            error: Some("Update aborted: boom".into()),
            error_code: Some("aborted"),
            rollback: Some(RollbackSummary { actions: 2, failures: 0 }),
            ..Default::default()
        };
        let mut out = Vec::new();
        write_text(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("error: Update aborted: boom"));
        assert!(text.contains("Rolled back (2 undo actions, 0 failed)"));
        assert_eq!(exit_code(&report), 1);
    }

    #[test]
    fn events_end_with_run_end() {
        let events = events(&committed_report());
        assert_eq!(events.len(), 4);
        match events.last().unwrap() {
            Event::RunEnd(end) => {
                assert_eq!(end.total_documents, 3);
                assert_eq!(end.committed_documents, 2);
                assert!(end.committed);
                assert!(!end.rolled_back);
                assert_eq!(end.exit_code, 0);
            }
            other => panic!("unexpected last event: {other:?}"),
        }
    }
}
