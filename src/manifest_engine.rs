//! An `UpdateEngine` driven by a manifest instead of a query: each manifest
//! entry is one result document with literal content.

use crate::destination;
use crate::engine::UpdateEngine;
use crate::error::{Error, Result};
use crate::model::{Content, DocumentSpec, Manifest};
use crate::transaction::ResultDocumentHandler;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

pub struct ManifestEngine {
    manifest: Manifest,
    base_dir: PathBuf,
}

impl ManifestEngine {
    pub fn new(manifest: Manifest, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            base_dir: base_dir.into(),
        }
    }

    /// Relative destinations resolve against the manifest's directory.
    fn destination_uri(&self, uri: &str) -> String {
        match destination::local_path(uri) {
            Ok(path) if path.is_relative() => self.base_dir.join(path).to_string_lossy().into_owned(),
            _ => uri.to_string(),
        }
    }

    fn content_bytes(&self, doc: &DocumentSpec) -> Result<Vec<u8>> {
        match doc.content()? {
            Content::Text(text) => Ok(text.as_bytes().to_vec()),
            Content::Base64(encoded) => STANDARD.decode(encoded.trim()).map_err(|e| {
                Error::Validation(format!("Invalid base64 content for '{}': {}", doc.uri, e))
            }),
            Content::File(path) => {
                let path = self.base_dir.join(path);
                fs::read(&path).map_err(|e| {
                    Error::Validation(format!("Cannot read content file '{}': {}", path.display(), e))
                })
            }
        }
    }

    fn abort(produced: usize) -> Error {
        Error::Aborted(format!("evaluation stopped after {} result documents", produced))
    }
}

impl UpdateEngine for ManifestEngine {
    fn evaluate_update(&mut self, handler: &mut dyn ResultDocumentHandler) -> Result<()> {
        let fail_after = self.manifest.fail_after;

        for (produced, doc) in self.manifest.documents.iter().enumerate() {
            if fail_after == Some(produced) {
                return Err(Self::abort(produced));
            }

            let bytes = self.content_bytes(doc)?;
            let uri = self.destination_uri(&doc.uri);
            let Some(mut sink) = handler.resolve(&uri, doc.settings.clone())? else {
                continue;
            };
            sink.write_all(&bytes)?;
            sink.close()?;
            debug!(uri = %uri, bytes = bytes.len(), "wrote result document");
        }

        match fail_after {
            Some(n) if n >= self.manifest.documents.len() => Err(Self::abort(self.manifest.documents.len())),
            _ => Ok(()),
        }
    }
}
