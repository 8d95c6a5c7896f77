//! Filesystem layout for uploads, corpora, and cache artifacts.
//!
//! ```text
//! <root>/<file_name>                   uploaded CSV
//! <root>/var/<file_name>/              per-file working directory
//!     <corpus_id>_docs.json            line-delimited documents
//!     <corpus_id>_info.json            corpus metadata sidecar
//!     <phash>.phras.<n>                phrase model, n >= 2
//! ```
//!
//! All writes that readers may race with go through [`write_atomic`] or
//! [`AtomicFile`]: content lands in a hidden temporary file in the same
//! directory and is renamed into place once complete.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Root of the upload storage tree.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every per-file working directory.
    pub fn var_root(&self) -> PathBuf {
        self.root.join("var")
    }

    /// Path of an uploaded CSV file.
    pub fn upload_location(&self, file_name: &str) -> Result<PathBuf> {
        check_name("file name", file_name)?;
        Ok(self.root.join(file_name))
    }

    /// Per-file working directory, created on first use.
    pub fn corpus_base_path(&self, file_name: &str) -> Result<PathBuf> {
        check_name("file name", file_name)?;
        let path = self.var_root().join(file_name);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        Ok(path)
    }

    pub fn docs_path(&self, file_name: &str, corpus_id: &str) -> Result<PathBuf> {
        check_name("corpus id", corpus_id)?;
        Ok(self
            .corpus_base_path(file_name)?
            .join(format!("{}_docs.json", corpus_id)))
    }

    pub fn info_path(&self, file_name: &str, corpus_id: &str) -> Result<PathBuf> {
        check_name("corpus id", corpus_id)?;
        Ok(self
            .corpus_base_path(file_name)?
            .join(format!("{}_info.json", corpus_id)))
    }

    /// Uploaded CSV files, sorted by name.
    pub fn available_documents(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.root.exists() {
            return Ok(names);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.to_ascii_lowercase().ends_with(".csv") {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

/// Names become path components, so they must stay inside their directory.
fn check_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        bail!("invalid {}: '{}'", what, name);
    }
    Ok(())
}

fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let dir = target
        .parent()
        .with_context(|| format!("Path has no parent directory: {}", target.display()))?;
    let name = target
        .file_name()
        .with_context(|| format!("Path has no file name: {}", target.display()))?
        .to_string_lossy();
    Ok(dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4())))
}

/// Write `bytes` to `path` so that readers see either nothing or the whole file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = AtomicFile::create(path)?;
    file.write_all(bytes)?;
    file.commit()
}

/// A file written under a temporary name and renamed into place on
/// [`commit`](AtomicFile::commit). Dropping it uncommitted removes the
/// temporary file.
pub struct AtomicFile {
    target: PathBuf,
    temp: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFile {
    pub fn create(target: &Path) -> Result<Self> {
        let temp = temp_path_for(target)?;
        let file = File::create(&temp)
            .with_context(|| format!("Failed to create temporary file: {}", temp.display()))?;
        Ok(Self {
            target: target.to_path_buf(),
            temp,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Flush, sync, and rename into place.
    pub fn commit(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| anyhow::anyhow!("Failed to flush {}: {}", self.temp.display(), e))?;
            file.sync_all()?;
        }
        std::fs::rename(&self.temp, &self.target).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                self.temp.display(),
                self.target.display()
            )
        })?;
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(std::io::Error::other("file already committed")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.writer = None;
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}
