//! Parsing of ffmpeg's textual status stream.
//!
//! Only two markers carry meaning: `Duration: HH:MM:SS` (once, from the input
//! header) and `time=HH:MM:SS` (on every progress line). Everything else is
//! opaque log text.

use regex::Regex;
use std::sync::LazyLock;

/// Words that mark a line as an advisory error
pub const ERROR_KEYWORDS: &[&str] = &["error", "invalid", "failed"];

/// Ordered substitutions that compact a progress line.
///
/// Order matters: the whitespace collapses run first so later patterns can
/// assume single spacing.
const STATUS_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("       ", " "),
    ("    ", " "),
    ("time=", ""),
    ("bitrate=  ", "br:"),
    ("speed", "rate"),
    ("size=", ""),
    ("frame", "f"),
    ("=", ":"),
];

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration:\s*(\d{2,}):(\d{2}):(\d{2})").unwrap());

static POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=\s*(\d{2,}):(\d{2}):(\d{2})").unwrap());

fn captured_seconds(re: &Regex, line: &str) -> Option<u64> {
    let caps = re.captures(line)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Total input duration in whole seconds, from a `Duration:` header line
pub fn parse_duration(line: &str) -> Option<u64> {
    captured_seconds(&DURATION_RE, line)
}

/// Current position in whole seconds, from a `time=` progress line
pub fn parse_position(line: &str) -> Option<u64> {
    captured_seconds(&POSITION_RE, line)
}

/// `floor(current * 100 / total)` clamped to 0..=100, None when total is unknown
pub fn percent(current: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = current.saturating_mul(100) / total;
    Some(pct.min(100) as u8)
}

/// Compact a progress line for display
pub fn clean_status_line(line: &str) -> String {
    let mut cleaned = line.to_string();
    for (from, to) in STATUS_SUBSTITUTIONS {
        cleaned = cleaned.replace(from, to);
    }
    cleaned.trim().to_string()
}

/// True when the line contains any advisory error keyword (case-insensitive)
pub fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    ERROR_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// One progress observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub status: String,
    pub position_secs: u64,
    /// None until a duration has been seen
    pub percent: Option<u8>,
}

/// Tracks duration discovery and progress across one invocation
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    duration: Option<u64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total duration, once observed
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    /// Feed one line; returns an update when the line carries a position
    pub fn observe(&mut self, line: &str) -> Option<ProgressUpdate> {
        if self.duration.is_none() {
            // A zero duration is as good as none
            self.duration = parse_duration(line).filter(|&d| d > 0);
        }

        let position = parse_position(line)?;
        Some(ProgressUpdate {
            status: clean_status_line(line),
            position_secs: position,
            percent: self.duration.and_then(|total| percent(position, total)),
        })
    }
}
