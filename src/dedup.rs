/// Short-window line deduplication.
///
/// Two game clients logging the same fight write the same event within a few
/// milliseconds, each with its own timestamp prefix:
///
///   "18:39:43,129 - [Information (combat)] Nemen-Arc: Affûtage (+20 Niv.)"
///   "18:39:43,131 - [Information (combat)] Nemen-Arc: Affûtage (+20 Niv.)"
///
/// The text before the first " - " is dropped before fingerprinting, so these
/// collapse to one line. Entries expire after the window (500 ms by default);
/// a repeat is never refreshed, so a genuine re-emission after the window is
/// processed again.
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

const TIMESTAMP_SEPARATOR: &str = " - ";

#[derive(Debug)]
pub struct LineDeduplicator {
    window: Duration,
    /// fingerprint -> first time seen inside the current window
    seen:   HashMap<u64, Instant>,
}

impl Default for LineDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl LineDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self { window, seen: HashMap::new() }
    }

    /// Returns true when an equivalent line was accepted less than one window ago.
    pub fn is_duplicate(&mut self, line: &str, now: Instant) -> bool {
        let window = self.window;
        self.seen.retain(|_, at| now.saturating_duration_since(*at) < window);

        let key = fingerprint(line);
        if self.seen.contains_key(&key) {
            return true;
        }
        self.seen.insert(key, now);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Line content with the leading timestamp token removed.
pub fn normalize(line: &str) -> &str {
    let trimmed = line.trim();
    match trimmed.split_once(TIMESTAMP_SEPARATOR) {
        Some((_, rest)) => rest,
        None            => trimmed,
    }
}

fn fingerprint(line: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize(line).hash(&mut hasher);
    hasher.finish()
}
