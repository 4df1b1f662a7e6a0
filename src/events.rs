use crate::options::TransactionOptions;
use crate::transaction::InstallKind;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    RunStart(RunStart),
    Document(DocumentEvent),
    RunEnd(RunEnd),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStart {
    pub schema_version: String,
    pub tool_version: String,
    pub input_mode: String, // "path" or "stdin"
    pub dry_run: bool,
    pub documents: usize,
    pub options: TransactionOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentEvent {
    Committed {
        uri: String,
        destination: PathBuf,
        #[serde(flatten)]
        kind: InstallKind,
    },
    Staged {
        uri: String,
        destination: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
    },
    Discarded {
        uri: String,
        destination: PathBuf,
    },
    Refused {
        uri: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEnd {
    pub total_documents: usize,
    pub committed_documents: usize,
    pub refused_documents: usize,
    pub committed: bool,
    pub rolled_back: bool,
    pub rollback_failures: usize,
    pub error: Option<ErrorInfo>,
    pub duration_ms: u64,
    pub exit_code: i32,
}
