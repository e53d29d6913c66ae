//! Index build progress reporting.
//!
//! Building the index can take minutes on a large corpus with a local model,
//! so the CLI reports how many chunks have been embedded. Progress goes to
//! **stderr** so stdout stays clean for answers and scripts.

use std::io::Write;

/// A single progress event emitted by [`crate::index::VectorIndex::build`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexEvent {
    /// Documents loaded; chunking starts.
    Loaded { documents: usize },
    /// `done` of `total` chunks embedded.
    Embedding { done: usize, total: usize },
    /// Index ready for queries.
    Ready { chunks: usize },
}

/// Receives index build progress.
pub trait IndexProgress: Send + Sync {
    fn report(&self, event: IndexEvent);
}

/// Human-friendly progress on stderr: "index  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl IndexProgress for StderrProgress {
    fn report(&self, event: IndexEvent) {
        let line = match event {
            IndexEvent::Loaded { documents } => {
                format!("index  loaded {} documents\n", format_number(documents))
            }
            IndexEvent::Embedding { done, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(done),
                format_number(total)
            ),
            IndexEvent::Ready { chunks } => {
                format!("index  ready ({} chunks)\n", format_number(chunks))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgress for NoProgress {
    fn report(&self, _event: IndexEvent) {}
}

pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
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

    pub fn reporter(&self) -> Box<dyn IndexProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
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

    #[test]
    fn off_mode_is_silent() {
        ProgressMode::Off
            .reporter()
            .report(IndexEvent::Ready { chunks: 3 });
    }
}
