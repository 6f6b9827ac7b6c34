/// Incremental reader over the game's chat/combat log.
///
/// Owns a byte offset into the file and, on each poll, returns only the
/// complete lines appended since the previous poll. A trailing line without
/// its newline is left in the file and picked up once the writer finishes it.
///
/// Rotation handling: the game recreates the log between sessions. We detect
/// this by comparing the current file size to our last known position; if the
/// file shrank, we restart from byte 0.
use anyhow::Result;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Upper bound on lines handed out by one poll; a long backlog drains over
/// several polls instead of landing in a single batch.
pub const MAX_LINES_PER_POLL: usize = 2000;

const TAIL_CHUNK: u64 = 4096;

pub struct LogReader {
    path:     PathBuf,
    position: u64,
}

impl LogReader {
    /// Reader that replays the file from byte 0.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), position: 0 }
    }

    /// Reader positioned just after the last complete line, so history written
    /// before start-up is ignored while a line still being written is read
    /// whole once it is finished. A missing file starts at 0.
    pub fn at_end(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let position = end_of_last_line(&path).unwrap_or(0);
        Self { path, position }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Switch to another existing file and restart from byte 0. Returns false,
    /// leaving the reader untouched, when `path` does not exist.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if !path.is_file() {
            return false;
        }
        tracing::info!("Log path changed: {:?}", path);
        self.path = path;
        self.position = 0;
        true
    }

    /// Complete lines appended since the last call, in file order. Empty
    /// lines are skipped and invalid UTF-8 is replaced, never fatal.
    pub fn read_new_lines(&mut self) -> Result<Vec<String>> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(_) => return Ok(Vec::new()), // File doesn't exist yet, wait
        };
        let file_len = metadata.len();

        // Rotation: file shrank since our last read
        if file_len < self.position {
            tracing::info!("Log rotation detected, restarting from byte 0");
            self.position = 0;
        }

        if file_len == self.position {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.position))?;
        let mut reader = BufReader::new(file.take(file_len - self.position));

        let mut lines = Vec::new();
        let mut buf = Vec::new();
        while lines.len() < MAX_LINES_PER_POLL {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            // EOF, or a partial line that waits for its newline
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            self.position += n as u64;

            let text = String::from_utf8_lossy(&buf[..n - 1]);
            let line = text.trim_end_matches('\r');
            if !line.trim().is_empty() {
                lines.push(line.to_owned());
            }
        }
        Ok(lines)
    }
}

/// Byte offset just past the last `\n` in the file, scanning back from the end.
fn end_of_last_line(path: &Path) -> std::io::Result<u64> {
    let mut file = File::open(path)?;
    let mut end = file.metadata()?.len();
    let mut chunk = [0u8; TAIL_CHUNK as usize];

    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK);
        let len = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk[..len])?;
        if let Some(i) = chunk[..len].iter().rposition(|&b| b == b'\n') {
            return Ok(start + i as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}
