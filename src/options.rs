use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Settings for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct TransactionOptions {
    /// Appended to a destination's file name to form its backup path.
    pub backup_suffix: String,
    /// Prefix of generated temporary file names.
    pub temp_prefix: String,
    /// Suffix of generated temporary file names.
    pub temp_suffix: String,
    /// fsync each temporary file before it is installed.
    pub sync: bool,
    /// How many name collisions to tolerate when creating one temporary file.
    pub max_collision_retries: u32,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            backup_suffix: ".bak".into(),
            temp_prefix: ".".into(),
            temp_suffix: ".tmp".into(),
            sync: false,
            max_collision_retries: 1024,
        }
    }
}

impl TransactionOptions {
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::Error;
        if self.backup_suffix.is_empty() {
            return Err(Error::Validation("backup_suffix must not be empty".into()));
        }
        if self.backup_suffix.contains(['/', '\\']) {
            return Err(Error::Validation(format!(
                "backup_suffix '{}' must not contain path separators",
                self.backup_suffix
            )));
        }
        if self.temp_prefix.contains(['/', '\\']) || self.temp_suffix.contains(['/', '\\']) {
            return Err(Error::Validation(
                "temp_prefix and temp_suffix must not contain path separators".into(),
            ));
        }
        Ok(())
    }

    pub fn backup_path(&self, destination: &Path) -> PathBuf {
        let mut name = OsString::from(destination.as_os_str());
        name.push(&self.backup_suffix);
        PathBuf::from(name)
    }
}
