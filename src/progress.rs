//! Corpus build progress reporting.
//!
//! Materializing a corpus drains the whole pipeline, which can take a while
//! for large uploads. Progress goes to **stderr** so stdout stays parseable
//! (`corpus preview` prints documents there).

use std::io::Write;
use std::sync::Arc;

/// How often (in documents) a build reports progress.
pub const REPORT_EVERY: u64 = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// `n` documents written so far.
    Building { corpus_id: String, n: u64 },
    /// Build complete.
    Done { corpus_id: String, docs: u64 },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly lines: "Building corpus c1  12,000 documents".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Building { corpus_id, n } => {
                format!("Building corpus {}  {} documents\n", corpus_id, format_number(*n))
            }
            ProgressEvent::Done { corpus_id, docs } => {
                format!("Built corpus {}  {} documents\n", corpus_id, format_number(*docs))
            }
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Building { corpus_id, n } => serde_json::json!({
                "event": "progress",
                "corpus_id": corpus_id,
                "phase": "building",
                "n": n
            }),
            ProgressEvent::Done { corpus_id, docs } => serde_json::json!({
                "event": "progress",
                "corpus_id": corpus_id,
                "phase": "done",
                "n": docs
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_groups_thousands() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(12_345), "12,345");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
