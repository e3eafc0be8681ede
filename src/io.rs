use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{InterfaceError, Result};

/// Writes to a hidden temporary file next to the target and persists it over
/// the target on commit.
///
/// Dropping the writer without committing removes the temporary file, so the
/// target path only ever holds a complete file.
pub struct AtomicWriter {
    target: PathBuf,
    w: BufWriter<NamedTempFile>,
}

impl AtomicWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let target = path.as_ref().to_path_buf();
        // Same directory as the target, so the final rename never crosses filesystems.
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = target.file_name().unwrap_or(target.as_os_str()).to_string_lossy();
        let tmp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| InterfaceError::io(dir, e))?;
        Ok(Self {
            target,
            w: BufWriter::new(tmp),
        })
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.w.write_all(s.as_bytes()).map_err(|e| InterfaceError::io(&self.target, e))
    }

    pub fn commit(self) -> Result<()> {
        let target = self.target;
        let tmp = self
            .w
            .into_inner()
            .map_err(|e| InterfaceError::io(&target, e.into_error()))?;
        tmp.as_file().sync_all().map_err(|e| InterfaceError::io(&target, e))?;
        // A failed persist hands the temp file back inside the error; dropping it deletes it.
        tmp.persist(&target).map_err(|e| InterfaceError::io(&target, e.error))?;
        Ok(())
    }
}

/// Publish `contents` at `path` in one step.
pub fn write_atomic(path: impl AsRef<Path>, contents: &str) -> Result<()> {
    let mut w = AtomicWriter::create(path)?;
    w.write_str(contents)?;
    w.commit()
}

pub fn read_to_string(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|e| InterfaceError::io(path, e))
}
