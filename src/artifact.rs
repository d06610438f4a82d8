//! Locating model artifacts on disk.

use crate::error::{GatewayError, Result};
use std::path::{Path, PathBuf};

/// Expand a leading `~` to the user's home directory.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

/// Resolve a configured location to exactly one model file.
///
/// `path` may name the file itself or a directory containing exactly one file
/// with the given extension.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] if the path does not exist, or if the
/// directory holds zero or several matching files.
pub fn resolve_model_file(path: &Path, extension: &str) -> Result<PathBuf> {
    let path = expand_home(path);
    if path.is_file() {
        if !has_extension(&path, extension) {
            return Err(GatewayError::Config(format!(
                "model file must be a .{extension} file, got: {}",
                path.display()
            )));
        }
        return Ok(path);
    }
    if !path.is_dir() {
        return Err(GatewayError::Config(format!(
            "model path does not exist: {}",
            path.display()
        )));
    }

    let mut matches: Vec<PathBuf> = std::fs::read_dir(&path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_extension(p, extension))
        .collect();
    matches.sort();

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(GatewayError::Config(format!(
            "no .{extension} file found in {}",
            path.display()
        ))),
        n => Err(GatewayError::Config(format!(
            "found {n} .{extension} files in {}; point the model path at one of them",
            path.display()
        ))),
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
}
