//! Mapping of result-document URIs onto local filesystem paths.
//!
//! Only `file:` URIs (with an empty or `localhost` authority) and bare local
//! paths are accepted. Everything else is refused, which is not an error:
//! the refused document is simply not produced.

use iri_string::types::IriStr;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// A destination identifier that cannot be written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refusal {
    pub uri: String,
    pub reason: String,
}

impl Refusal {
    fn new(uri: &str, reason: impl Into<String>) -> Self {
        Self {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cannot create result document {}. {}", self.uri, self.reason)
    }
}

/// Interpret `identifier` as a local path.
pub fn local_path(identifier: &str) -> Result<PathBuf, Refusal> {
    if identifier.trim().is_empty() {
        return Err(Refusal::new(identifier, "Result document URI is empty"));
    }

    let scheme = match scheme_of(identifier) {
        // Bare path, or a Windows drive letter such as `C:\out.xml`.
        None => return Ok(PathBuf::from(identifier)),
        Some(s) if s.len() == 1 => return Ok(PathBuf::from(identifier)),
        Some(s) => s,
    };

    if !scheme.eq_ignore_ascii_case("file") {
        return Err(Refusal::new(
            identifier,
            "Result document URIs must use the 'file' URI scheme",
        ));
    }

    let iri = IriStr::new(identifier)
        .map_err(|e| Refusal::new(identifier, format!("Malformed file URI: {}", e)))?;

    match iri.authority_str() {
        None | Some("") => {}
        Some(host) if host.eq_ignore_ascii_case("localhost") => {}
        Some(host) => {
            return Err(Refusal::new(
                identifier,
                format!("Remote file URIs are not supported (host '{}')", host),
            ));
        }
    }

    let decoded = percent_decode(iri.path_str())
        .ok_or_else(|| Refusal::new(identifier, "Invalid percent-encoding in file URI"))?;
    if decoded.is_empty() {
        return Err(Refusal::new(identifier, "File URI has an empty path"));
    }

    platform_path(decoded)
        .ok_or_else(|| Refusal::new(identifier, "File URI path is not valid on this platform"))
}

fn scheme_of(s: &str) -> Option<&str> {
    let colon = s.find(':')?;
    let scheme = &s[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(scheme)
    } else {
        None
    }
}

/// Decode `%XX` escapes to raw bytes. The result need not be UTF-8.
fn percent_decode(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

#[cfg(unix)]
fn platform_path(decoded: Vec<u8>) -> Option<PathBuf> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    Some(PathBuf::from(OsString::from_vec(decoded)))
}

#[cfg(windows)]
fn platform_path(decoded: Vec<u8>) -> Option<PathBuf> {
    let decoded = String::from_utf8(decoded).ok()?;
    // file:///C:/dir/a.xml has the path "/C:/dir/a.xml"
    let b = decoded.as_bytes();
    if b.len() >= 3 && b[0] == b'/' && b[1].is_ascii_alphabetic() && b[2] == b':' {
        Some(PathBuf::from(&decoded[1..]))
    } else {
        Some(PathBuf::from(decoded))
    }
}

#[cfg(not(any(unix, windows)))]
fn platform_path(decoded: Vec<u8>) -> Option<PathBuf> {
    String::from_utf8(decoded).ok().map(PathBuf::from)
}
