//! Turning reference-audio payloads into files a backend can open.
//!
//! Clients may send reference audio as a path, a base64 string or a data
//! URL. Backends only take paths, so encoded payloads are decoded into
//! request-scoped temporary files.

use crate::error::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

/// Temporary files owned by one request.
///
/// Every file is deleted when this value is dropped, on success and failure
/// alike.
#[derive(Debug, Default)]
pub struct ScratchFiles {
    files: Vec<TempPath>,
}

impl ScratchFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `bytes` to a fresh temporary file and track it for deletion.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or written.
    pub fn write(&mut self, bytes: &[u8], suffix: &str) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix("openlocal-")
            .suffix(suffix)
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        let path = file.into_temp_path();
        let owned = path.to_path_buf();
        self.files.push(path);
        Ok(owned)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|p| p.as_ref())
    }
}

/// Resolve a reference payload to something a backend can treat as a path.
///
/// 1. An existing filesystem path is returned unchanged.
/// 2. A `data:` URL loses everything up to and including its first comma.
/// 3. The remainder is decoded as strict base64 into a new `.wav` scratch
///    file, whose path is returned.
///
/// A string that is neither a path nor valid base64 is returned unchanged;
/// the backend decides whether it is usable.
///
/// # Errors
///
/// Only fails if a decoded payload cannot be written to disk.
pub fn materialize(value: &str, scratch: &mut ScratchFiles) -> Result<String> {
    if Path::new(value).exists() {
        return Ok(value.to_owned());
    }

    let payload = match value.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        Some((_, data)) => data,
        None => value,
    };

    match STANDARD.decode(payload) {
        Ok(bytes) => {
            let path = scratch.write(&bytes, ".wav")?;
            debug!(bytes = bytes.len(), "materialized reference audio to {}", path.display());
            Ok(path.to_string_lossy().into_owned())
        }
        Err(_) => Ok(value.to_owned()),
    }
}
