use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Write handle shared between a sink and the transaction that created it,
/// so the transaction can close a handle the engine never closed.
pub(crate) type SharedHandle = Arc<Mutex<SinkState>>;

#[derive(Debug)]
pub(crate) enum SinkState {
    Open(BufWriter<File>),
    Closed,
    /// Flushing on close failed; the temp file is incomplete.
    Failed(io::Error),
}

impl SinkState {
    pub(crate) fn open(file: File) -> SharedHandle {
        Arc::new(Mutex::new(SinkState::Open(BufWriter::new(file))))
    }
}

fn replay(e: &io::Error) -> io::Error {
    io::Error::new(e.kind(), e.to_string())
}

/// Serialization settings supplied by the query engine for one result document.
///
/// The transaction manager does not interpret these; it hands them back on the
/// sink so the serializer writing into it can honor them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct SerializationSettings {
    pub encoding: String,
    pub indent: bool,
    pub omit_xml_declaration: bool,
    /// Closing the sink closes the underlying file. Always set by `resolve()`.
    #[serde(skip)]
    pub close_output: bool,
}

impl Default for SerializationSettings {
    fn default() -> Self {
        Self {
            encoding: "utf-8".into(),
            indent: false,
            omit_xml_declaration: false,
            close_output: false,
        }
    }
}

/// Writable sink for one result document, backed by a temporary file.
#[derive(Debug)]
pub struct ResultSink {
    handle: SharedHandle,
    settings: SerializationSettings,
    temp_path: PathBuf,
}

impl ResultSink {
    pub(crate) fn new(handle: SharedHandle, settings: SerializationSettings, temp_path: PathBuf) -> Self {
        Self {
            handle,
            settings,
            temp_path,
        }
    }

    pub fn settings(&self) -> &SerializationSettings {
        &self.settings
    }

    /// Path of the temporary file this sink writes to.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flush and close the underlying file.
    pub fn close(self) -> io::Result<()> {
        close_handle(&self.handle)
    }

    fn with_writer<T>(&self, f: impl FnOnce(&mut BufWriter<File>) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self
            .handle
            .lock()
            .map_err(|_| io::Error::other("result sink lock poisoned"))?;
        match &mut *guard {
            SinkState::Open(w) => f(w),
            SinkState::Closed => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("result document sink for '{}' is closed", self.temp_path.display()),
            )),
            SinkState::Failed(e) => Err(replay(e)),
        }
    }
}

impl Write for ResultSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_writer(|w| w.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_writer(|w| w.flush())
    }
}

impl Drop for ResultSink {
    fn drop(&mut self) {
        if self.settings.close_output {
            let _ = close_handle(&self.handle);
        }
    }
}

/// Flush and close the handle if it is still open. A failed flush is kept
/// in the handle and reported by every later close.
pub(crate) fn close_handle(handle: &SharedHandle) -> io::Result<()> {
    let mut guard = handle
        .lock()
        .map_err(|_| io::Error::other("result sink lock poisoned"))?;
    match mem::replace(&mut *guard, SinkState::Closed) {
        SinkState::Open(mut w) => {
            if let Err(e) = w.flush() {
                let err = replay(&e);
                let (_file, _unflushed) = w.into_parts();
                *guard = SinkState::Failed(e);
                return Err(err);
            }
            Ok(())
        }
        SinkState::Closed => Ok(()),
        SinkState::Failed(e) => {
            let err = replay(&e);
            *guard = SinkState::Failed(e);
            Err(err)
        }
    }
}

/// Close the handle without flushing buffered output.
pub(crate) fn discard_handle(handle: &SharedHandle) {
    let mut guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
    if let SinkState::Open(w) = mem::replace(&mut *guard, SinkState::Closed) {
        let (_file, _unflushed) = w.into_parts();
    }
}
