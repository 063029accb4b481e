//! Downloader progress-line parsing
//!
//! The downloader prints one line per progress tick. Only the video
//! stream's percentage is reported; the audio stream is small and the
//! merge step is a fixed 99%. Lines that match nothing are ignored.

use regex::Regex;
use std::sync::LazyLock;

static PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid progress pattern")
});

/// Download phase inferred from the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Video,
    Audio,
    Merge,
}

/// A progress change worth publishing
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: Option<f64>,
    pub message: String,
}

/// Stateful parser over the downloader's output lines
#[derive(Debug)]
pub struct ProgressParser {
    phase: Phase,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self { phase: Phase::Video }
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn feed(&mut self, line: &str) -> Option<ProgressUpdate> {
        let line = line.trim();
        if line.contains("Destination:")
            && (line.contains(".m4a") || line.to_lowercase().contains("audio"))
        {
            self.phase = Phase::Audio;
            return Some(ProgressUpdate {
                progress: None,
                message: "Audio...".to_string(),
            });
        }
        if line.contains("[Merger]") {
            self.phase = Phase::Merge;
            return Some(ProgressUpdate {
                progress: Some(99.0),
                message: "Merging...".to_string(),
            });
        }
        if self.phase != Phase::Video {
            return None;
        }
        let pct: f64 = PERCENT.captures(line)?.get(1)?.as_str().parse().ok()?;
        Some(ProgressUpdate {
            progress: Some(pct),
            message: format!("{:.0}%", pct),
        })
    }
}

/// Cut an error message to `max` characters
pub fn truncate_message(message: &str, max: usize) -> String {
    message.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases() {
        let mut parser = ProgressParser::new();
        assert_eq!(
            parser.feed("[download] Destination: downloads/abc.f137.mp4"),
            None
        );
        assert_eq!(
            parser.feed("[download]  42.4% of   10.00MiB at  1.00MiB/s ETA 00:05"),
            Some(ProgressUpdate {
                progress: Some(42.4),
                message: "42%".to_string()
            })
        );
        assert_eq!(parser.feed("[youtube] abc: Downloading webpage"), None);

        let update = parser
            .feed("[download] Destination: downloads/abc.f140.m4a")
            .unwrap();
        assert_eq!(update.progress, None);
        assert_eq!(parser.phase(), Phase::Audio);

        // Audio percentages do not move the bar
        assert_eq!(parser.feed("[download]  80.0% of 1.00MiB"), None);

        let update = parser
            .feed("[Merger] Merging formats into \"downloads/abc.mp4\"")
            .unwrap();
        assert_eq!(update.progress, Some(99.0));
        assert_eq!(parser.phase(), Phase::Merge);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let long = "é".repeat(150);
        assert_eq!(truncate_message(&long, 100).chars().count(), 100);
        assert_eq!(truncate_message("short", 100), "short");
    }
}
