//! Synchronous file persistence: atomic JSON records and append-only result logs.
//!
//! Every write here blocks the caller. The training loop relies on that: a record
//! is on disk before the next step starts, and a failed write surfaces as an
//! `io::Error` instead of being retried in the background.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Serialize `data` as pretty JSON and store it with [`atomic_write`].
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, &json)
}

/// Replace `path` with `data` in one rename.
///
/// Readers of `path` observe the old contents or the new ones. The staging file
/// is `<name>.tmp` next to the target; missing parents are created.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut staged = path.as_os_str().to_owned();
    staged.push(".tmp");
    std::fs::write(&staged, data)?;
    std::fs::rename(&staged, path)
}

/// Read a JSON record, `None` when nothing has been written yet.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Append one line to a log file, creating the file and its parents if needed.
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    file.flush()
}

/// Replace the contents of `path` with a single line.
pub fn write_line(path: &Path, line: &str) -> io::Result<()> {
    atomic_write(path, format!("{line}\n").as_bytes())
}
