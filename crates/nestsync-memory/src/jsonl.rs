//! JSONL snapshots: one line per child row.
//!
//! The portable fixture/interchange format for a [`crate::MemoryTable`].
//! Every row is a single `{"id": .., "attributes": {..}}` JSON line.

use nestsync_core::ChildRecord;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors from JSONL operations.
#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("{context}: {message}")]
    Io { context: String, message: String },

    #[error("line {line}: invalid row: {message}")]
    Parse { line: usize, message: String },

    #[error("row {id}: {message}")]
    Serialize { id: String, message: String },

    #[error("corrupted snapshot {path}: {reason}")]
    Corrupt { path: String, reason: &'static str },
}

impl JsonlError {
    fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io {
            context: context.to_string(),
            message: err.to_string(),
        }
    }
}

/// Read rows from a JSONL reader. Blank lines and `#` comments are skipped.
pub fn read_rows(reader: impl BufRead) -> Result<Vec<ChildRecord>, JsonlError> {
    let mut rows = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| JsonlError::io(format_args!("line {line_no}"), e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        rows.push(
            serde_json::from_str(line).map_err(|e| JsonlError::Parse {
                line: line_no,
                message: e.to_string(),
            })?,
        );
    }
    Ok(rows)
}

/// Write rows to a JSONL writer.
pub fn write_rows(writer: &mut impl Write, rows: &[ChildRecord]) -> Result<(), JsonlError> {
    writer
        .write_all(render(rows)?.as_bytes())
        .map_err(|e| JsonlError::io("jsonl writer", e))
}

fn render(rows: &[ChildRecord]) -> Result<String, JsonlError> {
    let mut out = String::new();
    for row in rows {
        let line = serde_json::to_string(row).map_err(|e| JsonlError::Serialize {
            id: row.id.to_string(),
            message: e.to_string(),
        })?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Read a snapshot file, rejecting NUL bytes and invalid UTF-8 up front.
pub fn read_rows_from_path(path: impl AsRef<Path>) -> Result<Vec<ChildRecord>, JsonlError> {
    let path = path.as_ref();
    let corrupt = |reason| JsonlError::Corrupt {
        path: path.display().to_string(),
        reason,
    };
    let bytes = fs::read(path).map_err(|e| JsonlError::io(path.display(), e))?;
    if bytes.contains(&0) {
        return Err(corrupt("contains NUL byte(s)"));
    }
    let text = String::from_utf8(bytes).map_err(|_| corrupt("contains non-UTF-8 byte sequence(s)"))?;
    read_rows(text.as_bytes())
}

/// Replace the file at `path` with `rows`.
///
/// The snapshot is written and synced to a sibling staging file, then
/// renamed over `path`; readers never observe a partial snapshot.
pub fn write_rows_to_path(path: impl AsRef<Path>, rows: &[ChildRecord]) -> Result<(), JsonlError> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| JsonlError::io(dir.display(), e))?;
    }

    let contents = render(rows)?;
    let staging = staging_path(path);
    if let Err(err) = write_synced(&staging, contents.as_bytes()) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    fs::rename(&staging, path).map_err(|e| {
        let _ = fs::remove_file(&staging);
        JsonlError::io(format_args!("rename to {}", path.display()), e)
    })?;

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::File::open(dir)
            .and_then(|handle| handle.sync_all())
            .map_err(|e| JsonlError::io(dir.display(), e))?;
    }
    Ok(())
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<(), JsonlError> {
    let mut file = fs::File::create(path).map_err(|e| JsonlError::io(path.display(), e))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|e| JsonlError::io(path.display(), e))
}

// Unique per call: process id, wall-clock nanos and an in-process sequence.
fn staging_path(path: &Path) -> PathBuf {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(
        ".staging-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    path.with_file_name(name)
}
