//! Filesystem primitives behind the transaction: temporary file allocation,
//! installing a temporary at its destination, and the undo operations.

use crate::error::{Error, Result};
use rand::Rng;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const NAME_LEN: usize = 12;

/// Source of candidate temporary file names.
pub trait NameGenerator: Send {
    fn next_name(&mut self) -> String;
}

/// Random names of the form `<prefix><12 lowercase alphanumerics><suffix>`.
#[derive(Debug, Clone)]
pub struct RandomNames {
    prefix: String,
    suffix: String,
}

impl RandomNames {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }
}

impl NameGenerator for RandomNames {
    fn next_name(&mut self) -> String {
        let mut rng = rand::rng();
        let random: String = (0..NAME_LEN)
            .map(|_| NAME_ALPHABET[rng.random_range(0..NAME_ALPHABET.len())] as char)
            .collect();
        format!("{}{}{}", self.prefix, random, self.suffix)
    }
}

/// Directory a destination lives in; `.` for bare file names.
pub(crate) fn parent_dir(destination: &Path) -> PathBuf {
    match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Exclusively create a new file in `dir`, retrying with a fresh name on collision.
pub(crate) fn create_temp_in(
    dir: &Path,
    names: &mut dyn NameGenerator,
    max_collision_retries: u32,
) -> Result<(File, PathBuf)> {
    let mut collisions = 0;
    loop {
        let candidate = dir.join(names.next_name());
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                collisions += 1;
                debug!(path = %candidate.display(), collisions, "temporary file name taken");
                if collisions > max_collision_retries {
                    return Err(Error::TempNameExhausted {
                        dir: dir.to_path_buf(),
                        attempts: collisions,
                    });
                }
            }
            Err(source) => {
                return Err(Error::TempFile {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        }
    }
}

pub(crate) fn sync_file(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

pub(crate) fn copy_permissions(from: &Path, to: &Path) -> io::Result<()> {
    let perms = fs::metadata(from)?.permissions();
    fs::set_permissions(to, perms)
}

/// Preserve the current contents of `destination` at `backup`, replacing any
/// stale backup. A hard link is tried first; copying is the fallback.
pub(crate) fn make_backup(destination: &Path, backup: &Path) -> io::Result<()> {
    if backup == destination {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("backup path '{}' is the destination itself", backup.display()),
        ));
    }
    remove_if_exists(backup)?;
    if let Err(e) = fs::hard_link(destination, backup) {
        debug!(error = %e, backup = %backup.display(), "hard link failed, copying");
        fs::copy(destination, backup)?;
    }
    Ok(())
}

/// Atomically rename `temp` over an existing destination.
pub(crate) fn replace(temp: TempPath, destination: &Path) -> io::Result<()> {
    temp.persist(destination).map_err(|e| e.error)
}

/// Atomically move `temp` to a destination that must not exist.
pub(crate) fn move_new(temp: TempPath, destination: &Path) -> io::Result<()> {
    temp.persist_noclobber(destination).map_err(|e| e.error)
}

pub(crate) fn restore_backup(backup: &Path, destination: &Path) -> io::Result<()> {
    fs::rename(backup, destination)
}

/// Remove a file, treating "already gone" as success. Returns whether a file was removed.
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
