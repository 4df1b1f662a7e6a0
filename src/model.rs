use crate::error::{Error, Result};
use crate::options::TransactionOptions;
use crate::sink::SerializationSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result documents an update produces, in production order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub documents: Vec<DocumentSpec>,
    /// Abort the update after this many documents have been produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_after: Option<usize>,
    #[serde(default)]
    pub options: TransactionOptions,
}

/// One result document. Exactly one of `text`, `base64` or `file` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DocumentSpec {
    /// Destination URI (`file:` scheme) or local path.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    /// Path of a file holding the content, relative to the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub settings: SerializationSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content<'a> {
    Text(&'a str),
    Base64(&'a str),
    File(&'a Path),
}

impl DocumentSpec {
    pub fn content(&self) -> Result<Content<'_>> {
        match (&self.text, &self.base64, &self.file) {
            (Some(t), None, None) => Ok(Content::Text(t)),
            (None, Some(b), None) => Ok(Content::Base64(b)),
            (None, None, Some(f)) => Ok(Content::File(f)),
            (None, None, None) => Err(Error::Validation(format!(
                "Document '{}' has no content (expected one of text, base64, file)",
                self.uri
            ))),
            _ => Err(Error::Validation(format!(
                "Document '{}' has more than one content source",
                self.uri
            ))),
        }
    }
}

impl Manifest {
    pub fn from_json(s: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(s)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        self.options.validate()?;
        for doc in &self.documents {
            if doc.uri.trim().is_empty() {
                return Err(Error::Validation("Document with empty uri".into()));
            }
            doc.content()?;
        }
        Ok(())
    }
}
