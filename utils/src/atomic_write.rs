//! Crash-safe file writes.
//!
//! The bytes go to a temp file in the destination directory, which is then
//! renamed over the target. Readers see the old report or the new one.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Write `bytes` to `path`, creating missing parent directories.
pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Wrote file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::atomic_write;

    #[test]
    fn replaces_previous_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        atomic_write(&path, b"{\"run\":1}").unwrap();
        atomic_write(&path, b"{\"run\":2}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"run\":2}");
        // No temp files left next to it.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("nightly").join("report.json");

        atomic_write(&path, b"{}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }
}
