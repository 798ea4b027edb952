//! Sync progress reporting.
//!
//! Reports observable progress during a sync pass so callers see which
//! phase is running and how much embedding work remains. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event emitted by the sync orchestrator.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Listing documents from the source. Total unknown.
    Fetching { source: String },
    /// Classifying documents against the committed state.
    Diffing { total: u64 },
    /// Chunking and embedding: n documents done out of total changed.
    Embedding { n: u64, total: u64 },
    /// Writing the final sync state.
    Committing,
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress: "sync filesystem  embedding  12 / 40 documents".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Fetching { source } => {
                format!("sync {}  fetching...\n", source)
            }
            SyncProgressEvent::Diffing { total } => {
                format!("sync  diffing  {} documents\n", format_number(*total))
            }
            SyncProgressEvent::Embedding { n, total } => format!(
                "sync  embedding  {} / {} documents\n",
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Committing => "sync  committing...\n".to_string(),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Fetching { source } => serde_json::json!({
                "event": "progress",
                "phase": "fetching",
                "source": source,
            }),
            SyncProgressEvent::Diffing { total } => serde_json::json!({
                "event": "progress",
                "phase": "diffing",
                "total": total,
            }),
            SyncProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total,
            }),
            SyncProgressEvent::Committing => serde_json::json!({
                "event": "progress",
                "phase": "committing",
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
