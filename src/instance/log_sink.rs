//! Log sink: per-instance append-only file sink with tail query and
//! size-based rotation.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use regex::Regex;

use crate::config::LogRotationConfiguration;
use crate::system::SinkPool;

fn ansi_regex() -> &'static Regex {
    static ANSI_REGEX: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    ANSI_REGEX.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]|\x1b\][^\x07]*\x07").unwrap())
}

/// Strip ANSI escape sequences (color codes, cursor control) that backends
/// commonly emit on stdout/stderr; the log file and tail queries should
/// hold plain text.
fn strip_ansi(data: &[u8]) -> Vec<u8> {
    if !data.contains(&0x1b) {
        return data.to_vec();
    }
    let text = String::from_utf8_lossy(data);
    ansi_regex().replace_all(&text, "").into_owned().into_bytes()
}

/// Append-only `<name>.log` file with broadcast fan-out for live tailing
/// and size-based rotation of historical segments.
pub struct LogSink {
    name: String,
    path: PathBuf,
    rotation: LogRotationConfiguration,
    file: Mutex<std::fs::File>,
    pool: SinkPool,
}

impl LogSink {
    pub fn open(dir: &Path, name: &str, rotation: LogRotationConfiguration) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.log"));
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;

        let sink = Self {
            name: name.to_string(),
            path,
            rotation,
            file: Mutex::new(file),
            pool: SinkPool::new(),
        };
        sink.banner("=== instance starting ===");
        Ok(sink)
    }

    fn banner(&self, text: &str) {
        let line = format!("[{}] {}\n", Utc::now().to_rfc3339(), text);
        self.write_raw(line.as_bytes());
    }

    /// Write a chunk of child stdout/stderr bytes, rotating first if the
    /// configured size threshold would be exceeded. A rotation failure is
    /// logged and the write proceeds against the current file.
    pub fn write(&self, data: &[u8]) {
        if self.rotation.enabled {
            if let Err(e) = self.rotate_if_needed() {
                tracing::warn!(instance = %self.name, error = %e, "log rotation failed, continuing on current file");
            }
        }
        self.write_raw(&strip_ansi(data));
    }

    fn write_raw(&self, data: &[u8]) {
        {
            let mut file = self.file.lock();
            if let Err(e) = file.write_all(data) {
                tracing::warn!(instance = %self.name, error = %e, "failed to write instance log");
            }
        }
        self.pool.push(data.to_vec());
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let metadata = std::fs::metadata(&self.path)?;
        let max_bytes = self.rotation.max_size_mb * 1024 * 1024;
        if metadata.len() < max_bytes {
            return Ok(());
        }

        let mut file = self.file.lock();

        // On POSIX, renaming or removing a file out from under an open
        // descriptor is safe: the descriptor keeps referring to the old
        // inode until it is closed, so the writer below doesn't need to
        // reopen until after the rotated file is in place.
        let index = self.next_rotation_index()?;
        if self.rotation.compress {
            let rolled = self.path.with_extension(format!("log.{index}.gz"));
            let input = std::fs::read(&self.path)?;
            let out = std::fs::File::create(&rolled)?;
            let mut encoder = GzEncoder::new(out, Compression::default());
            encoder.write_all(&input)?;
            encoder.finish()?;
            std::fs::remove_file(&self.path)?;
        } else {
            let rolled = self.path.with_extension(format!("log.{index}"));
            std::fs::rename(&self.path, &rolled)?;
        }

        *file = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    fn next_rotation_index(&self) -> std::io::Result<u32> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let prefix = format!("{}.log.", self.name);
        let mut max_index = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(rest) = file_name.strip_prefix(&prefix) {
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                if let Ok(n) = digits.parse::<u32>() {
                    max_index = max_index.max(n);
                }
            }
        }
        Ok(max_index + 1)
    }

    /// Return the last `n` lines of the current segment; `n <= 0` returns
    /// the full current segment.
    pub fn tail(&self, n: i64) -> Vec<String> {
        let content = std::fs::read_to_string(&self.path).unwrap_or_default();
        let lines: Vec<String> = content.lines().map(String::from).collect();
        if n <= 0 {
            return lines;
        }
        let n = n as usize;
        let mut deque: VecDeque<String> = VecDeque::with_capacity(n);
        for line in lines {
            if deque.len() == n {
                deque.pop_front();
            }
            deque.push_back(line);
        }
        deque.into_iter().collect()
    }

    /// Subscribe to live byte chunks as they are written.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Vec<u8>> {
        self.pool.subscribe()
    }

    /// Emit a shutdown banner and flush. The handle is released when the
    /// `LogSink` is dropped.
    pub fn close(&self) {
        self.banner("=== instance stopped ===");
        let _ = self.file.lock().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_and_tails() {
        let dir = tempdir().unwrap();
        let sink = LogSink::open(dir.path(), "alpha", LogRotationConfiguration::default()).unwrap();
        sink.write(b"line one\n");
        sink.write(b"line two\n");
        sink.close();

        let tail = sink.tail(1);
        assert_eq!(tail.last().map(String::as_str), Some("line two"));

        let full = sink.tail(0);
        assert!(full.iter().any(|l| l.contains("instance starting")));
        assert!(full.iter().any(|l| l.contains("instance stopped")));
    }

    #[test]
    fn strips_ansi_color_codes_before_storing() {
        let dir = tempdir().unwrap();
        let sink = LogSink::open(dir.path(), "gamma", LogRotationConfiguration::default()).unwrap();
        sink.write(b"\x1b[32mready\x1b[0m\n");
        sink.close();

        let full = sink.tail(0);
        assert!(full.iter().any(|l| l == "ready"));
    }

    #[test]
    fn subscribers_receive_live_writes() {
        let dir = tempdir().unwrap();
        let sink = LogSink::open(dir.path(), "beta", LogRotationConfiguration::default()).unwrap();
        let mut rx = sink.subscribe();
        sink.write(b"hello\n");
        let received = rx.try_recv().unwrap();
        assert_eq!(received, b"hello\n");
    }
}
