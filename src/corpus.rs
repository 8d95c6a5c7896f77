//! Corpus materialization and storage.
//!
//! A corpus is the full output of a pipeline, persisted as two files in the
//! upload's working directory:
//!
//! - `<corpus_id>_docs.json`: one JSON document per line
//! - `<corpus_id>_info.json`: title, description, statistics, source column
//!   and build parameters
//!
//! Both files are written under temporary names and renamed into place, the
//! document file first. A corpus counts as present only when both exist.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::models::{CorpusInfo, Document, Metadata, Statistics, Step};
use crate::pipeline::{build_pipeline, PipelineContext};
use crate::progress::{ProgressEvent, ProgressReporter, REPORT_EVERY};
use crate::storage::{write_atomic, AtomicFile, Storage};
use crate::stream::DocStream;

/// Everything needed to build one corpus, apart from the pipeline itself.
#[derive(Debug, Clone)]
pub struct CorpusRequest {
    pub corpus_id: String,
    pub file_name: String,
    pub text_column: String,
    pub title: String,
    pub description: String,
    pub kw: Metadata,
}

/// Drain `content` into a line-delimited JSON file at `path`.
pub fn materialize(
    content: DocStream,
    path: &Path,
    corpus_id: &str,
    progress: &dyn ProgressReporter,
) -> Result<Statistics> {
    let mut out = AtomicFile::create(path)?;
    let mut docs = 0u64;
    for doc in content {
        serde_json::to_writer(&mut out, &doc)?;
        out.write_all(b"\n")?;
        docs += 1;
        if docs % REPORT_EVERY == 0 {
            progress.report(ProgressEvent::Building {
                corpus_id: corpus_id.to_string(),
                n: docs,
            });
        }
    }
    out.commit()?;
    progress.report(ProgressEvent::Done {
        corpus_id: corpus_id.to_string(),
        docs,
    });
    Ok(Statistics {
        docs,
        lang: "en".to_string(),
    })
}

pub fn save_corpus_metadata(
    storage: &Storage,
    request: &CorpusRequest,
    statistics: Statistics,
) -> Result<CorpusInfo> {
    let info = CorpusInfo {
        title: request.title.clone(),
        description: request.description.clone(),
        statistics,
        text_column: request.text_column.clone(),
        kw: request.kw.clone(),
    };
    let path = storage.info_path(&request.file_name, &request.corpus_id)?;
    write_atomic(&path, &serde_json::to_vec(&info)?)?;
    Ok(info)
}

/// Run `pipeline` in produce mode and persist its output as a corpus.
pub async fn build_corpus(
    ctx: &PipelineContext,
    pipeline: &[Step],
    request: &CorpusRequest,
    progress: Arc<dyn ProgressReporter>,
) -> Result<CorpusInfo> {
    let docs_path = ctx
        .storage
        .docs_path(&request.file_name, &request.corpus_id)?;
    tracing::info!(
        file = %request.file_name,
        corpus_id = %request.corpus_id,
        path = %docs_path.display(),
        "creating corpus"
    );

    let content = build_pipeline(
        ctx,
        &request.file_name,
        &request.text_column,
        pipeline,
        false,
    )
    .await?;

    let corpus_id = request.corpus_id.clone();
    let statistics = tokio::task::spawn_blocking(move || {
        materialize(content, &docs_path, &corpus_id, progress.as_ref())
    })
    .await??;

    let info = save_corpus_metadata(&ctx.storage, request, statistics)?;
    tracing::info!(corpus_id = %request.corpus_id, docs = info.statistics.docs, "corpus built");
    Ok(info)
}

pub fn read_corpus_info(path: &Path) -> Result<CorpusInfo> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read corpus info: {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Corrupt corpus info: {}", path.display()))
}

/// A corpus listed for an uploaded file.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusSummary {
    pub corpus_id: String,
    pub info: CorpusInfo,
}

/// Corpora with both files present, sorted by id.
pub fn available_corpora(storage: &Storage, file_name: &str) -> Result<Vec<CorpusSummary>> {
    let base = storage.corpus_base_path(file_name)?;
    let mut out = Vec::new();
    for entry in std::fs::read_dir(&base)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(corpus_id) = name.strip_suffix("_info.json") else {
            continue;
        };
        if corpus_id.is_empty() || corpus_id.starts_with('.') {
            continue;
        }
        if !base.join(format!("{}_docs.json", corpus_id)).is_file() {
            continue;
        }
        match read_corpus_info(&entry.path()) {
            Ok(info) => out.push(CorpusSummary {
                corpus_id: corpus_id.to_string(),
                info,
            }),
            Err(e) => tracing::warn!(corpus_id, error = %e, "skipping unreadable corpus"),
        }
    }
    out.sort_by(|a, b| a.corpus_id.cmp(&b.corpus_id));
    Ok(out)
}

/// Remove both corpus files. Returns `false` if neither existed.
pub fn delete_corpus(storage: &Storage, file_name: &str, corpus_id: &str) -> Result<bool> {
    let mut removed = false;
    for path in [
        storage.docs_path(file_name, corpus_id)?,
        storage.info_path(file_name, corpus_id)?,
    ] {
        match std::fs::remove_file(&path) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to delete {}", path.display()))
            }
        }
    }
    if removed {
        tracing::info!(file = file_name, corpus_id, "deleted corpus");
    }
    Ok(removed)
}

/// Open a corpus for reading. `None` unless both files exist.
pub fn load_corpus(storage: &Storage, file_name: &str, corpus_id: &str) -> Result<Option<CorpusReader>> {
    let docs = storage.docs_path(file_name, corpus_id)?;
    let info = storage.info_path(file_name, corpus_id)?;
    if !docs.is_file() || !info.is_file() {
        return Ok(None);
    }
    let info = read_corpus_info(&info)?;
    Ok(Some(CorpusReader::open(&docs, info)?))
}

/// Forward reader over a corpus document file.
///
/// Every document read from disk is kept in memory. Later passes are served
/// from that buffer and only fall back to the file for documents not read
/// yet, so each line is read from disk at most once.
pub struct CorpusReader {
    path: PathBuf,
    info: CorpusInfo,
    buffer: Vec<Document>,
    lines: Option<Lines<BufReader<File>>>,
    lines_read: u64,
}

impl CorpusReader {
    pub fn open(path: &Path, info: CorpusInfo) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open corpus: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            info,
            buffer: Vec::new(),
            lines: Some(BufReader::new(file).lines()),
            lines_read: 0,
        })
    }

    pub fn info(&self) -> &CorpusInfo {
        &self.info
    }

    /// Whether the whole file has been read into memory.
    pub fn is_exhausted(&self) -> bool {
        self.lines.is_none()
    }

    /// Lines read from disk so far.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Iterate from the first document.
    pub fn iter(&mut self) -> CorpusIter<'_> {
        CorpusIter {
            reader: self,
            pos: 0,
        }
    }

    /// Documents `page * per_page .. (page + 1) * per_page`, zero-based.
    pub fn page(&mut self, page: usize, per_page: usize) -> Vec<Document> {
        self.iter()
            .skip(page.saturating_mul(per_page))
            .take(per_page)
            .collect()
    }

    /// Total number of documents. Reads the rest of the file if needed.
    pub fn len(&mut self) -> usize {
        while self.fill_next() {}
        self.buffer.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Read one more document into the buffer. `false` at end of file.
    fn fill_next(&mut self) -> bool {
        loop {
            let Some(lines) = self.lines.as_mut() else {
                return false;
            };
            match lines.next() {
                None => {
                    self.lines = None;
                    return false;
                }
                Some(Err(e)) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "stopped reading corpus");
                    self.lines = None;
                    return false;
                }
                Some(Ok(line)) => {
                    self.lines_read += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Document>(&line) {
                        Ok(doc) => {
                            self.buffer.push(doc);
                            return true;
                        }
                        Err(e) => {
                            tracing::warn!(path = %self.path.display(), line = self.lines_read, error = %e, "skipping corrupt corpus line");
                        }
                    }
                }
            }
        }
    }
}

pub struct CorpusIter<'a> {
    reader: &'a mut CorpusReader,
    pos: usize,
}

impl Iterator for CorpusIter<'_> {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        if self.pos >= self.reader.buffer.len() && !self.reader.fill_next() {
            return None;
        }
        let doc = self.reader.buffer.get(self.pos).cloned();
        self.pos += 1;
        doc
    }
}

/// Modification time and size of a corpus document file.
type FileStamp = (Option<SystemTime>, u64);

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok(), meta.len()))
}

struct CachedReader {
    stamp: Option<FileStamp>,
    reader: Arc<Mutex<CorpusReader>>,
}

/// Open corpora, shared between requests.
///
/// A cached reader is dropped as soon as its document file on disk changes,
/// so a rebuilt corpus is never served from the previous build's buffer.
#[derive(Clone, Default)]
pub struct CorpusCache {
    readers: Arc<Mutex<HashMap<(String, String), CachedReader>>>,
}

impl CorpusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached reader for a corpus, opening it on first use or after the
    /// corpus was rebuilt.
    pub fn get(
        &self,
        storage: &Storage,
        file_name: &str,
        corpus_id: &str,
    ) -> Result<Option<Arc<Mutex<CorpusReader>>>> {
        let key = (file_name.to_string(), corpus_id.to_string());
        let stamp = file_stamp(&storage.docs_path(file_name, corpus_id)?);
        let mut readers = self
            .readers
            .lock()
            .map_err(|_| anyhow::anyhow!("corpus cache lock poisoned"))?;
        if let Some(cached) = readers.get(&key) {
            if cached.stamp.is_some() && cached.stamp == stamp {
                return Ok(Some(cached.reader.clone()));
            }
            tracing::debug!(file = file_name, corpus_id, "corpus changed on disk, reopening");
            readers.remove(&key);
        }
        let Some(reader) = load_corpus(storage, file_name, corpus_id)? else {
            return Ok(None);
        };
        let reader = Arc::new(Mutex::new(reader));
        readers.insert(
            key,
            CachedReader {
                stamp,
                reader: reader.clone(),
            },
        );
        Ok(Some(reader))
    }

    pub fn evict(&self, file_name: &str, corpus_id: &str) {
        if let Ok(mut readers) = self.readers.lock() {
            readers.remove(&(file_name.to_string(), corpus_id.to_string()));
        }
    }
}
