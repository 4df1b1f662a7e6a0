use crate::cli::ApplyArgs;
use crate::error::{Error, Result};
use crate::model::Manifest;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq, Eq)]
pub enum InputMode {
    /// Read the manifest from a file.
    Path(PathBuf),
    /// Read the manifest from stdin (`-`, or no argument with stdin piped).
    Stdin,
}

impl InputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputMode::Path(_) => "path",
            InputMode::Stdin => "stdin",
        }
    }
}

/// A parsed manifest and the directory its relative paths resolve against.
#[derive(Debug)]
pub struct LoadedManifest {
    pub manifest: Manifest,
    pub base_dir: PathBuf,
}

pub fn resolve_input_mode(args: &ApplyArgs) -> Result<InputMode> {
    resolve_input_mode_with(args, atty::is(atty::Stream::Stdin))
}

fn resolve_input_mode_with(args: &ApplyArgs, stdin_is_tty: bool) -> Result<InputMode> {
    match &args.manifest {
        Some(p) if p.as_os_str() == "-" => Ok(InputMode::Stdin),
        Some(p) => Ok(InputMode::Path(p.clone())),
        // Reading a terminal would hang waiting for input nobody intends to type.
        None if stdin_is_tty => Err(Error::Validation(
            "No manifest specified. Usage: resdoc apply <manifest.json>".into(),
        )),
        None => Ok(InputMode::Stdin),
    }
}

pub fn load_manifest(mode: &InputMode) -> Result<LoadedManifest> {
    match mode {
        InputMode::Path(path) => {
            let text = fs::read_to_string(path).map_err(|e| {
                Error::Validation(format!("Cannot read manifest '{}': {}", path.display(), e))
            })?;
            Ok(LoadedManifest {
                manifest: Manifest::from_json(&text)?,
                base_dir: manifest_dir(path),
            })
        }
        InputMode::Stdin => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text).map_err(Error::Io)?;
            Ok(LoadedManifest {
                manifest: Manifest::from_json(&text)?,
                base_dir: std::env::current_dir()?,
            })
        }
    }
}

fn manifest_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(manifest: Option<&str>) -> ApplyArgs {
        ApplyArgs {
            manifest: manifest.map(PathBuf::from),
            ..Default::default()
        }
    }

    #[test]
    fn dash_means_stdin() {
        assert_eq!(resolve_input_mode_with(&args(Some("-")), true).unwrap(), InputMode::Stdin);
    }

    #[test]
    fn missing_manifest_on_tty_is_an_error() {
        let err = resolve_input_mode_with(&args(None), true).unwrap_err();
        assert!(err.to_string().contains("No manifest specified"));
        assert_eq!(resolve_input_mode_with(&args(None), false).unwrap(), InputMode::Stdin);
    }

    #[test]
    fn load_manifest_resolves_base_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.json");
        fs::write(&path, r#"{"documents": [{"uri": "a.xml", "text": "x"}]}"#).unwrap();

        let loaded = load_manifest(&InputMode::Path(path)).unwrap();
        assert_eq!(loaded.base_dir, dir.path());
        assert_eq!(loaded.manifest.documents.len(), 1);
    }

    #[test]
    fn unreadable_manifest_names_the_path() {
        let err = load_manifest(&InputMode::Path(PathBuf::from("/definitely/not/here.json"))).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
