//! nginx access log parsing and tailing.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

/// One line of the `combined` log format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NginxAccessLog {
    pub remote_addr: String,
    pub time_local: String,
    pub request: String,
    pub status: u16,
    pub body_bytes_sent: u64,
    pub referer: String,
    pub user_agent: String,
    pub raw: String,
}

static COMBINED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(\S+) \S+ \S+ \[([^\]]+)\] "([^"]*)" (\d{3}) (\d+|-) "([^"]*)" "([^"]*)""#,
    )
    .expect("combined log pattern is valid")
});

impl NginxAccessLog {
    /// Parse a combined-format line. Returns `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let caps = COMBINED.captures(line)?;
        Some(Self {
            remote_addr: caps[1].to_string(),
            time_local: caps[2].to_string(),
            request: caps[3].to_string(),
            status: caps[4].parse().ok()?,
            body_bytes_sent: caps[5].parse().unwrap_or(0),
            referer: caps[6].to_string(),
            user_agent: caps[7].to_string(),
            raw: line.to_string(),
        })
    }
}

/// Follows a log file from its current end, surviving truncation
/// (logrotate `copytruncate`).
pub struct LogTail {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    partial: String,
    poll_interval: Duration,
}

impl LogTail {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let mut file = File::open(path).await?;
        let position = file.seek(SeekFrom::End(0)).await?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            position,
            partial: String::new(),
            poll_interval: Duration::from_millis(250),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Wait for the next complete line (without its newline).
    pub async fn next_line(&mut self) -> std::io::Result<String> {
        loop {
            let read = self.reader.read_line(&mut self.partial).await?;
            self.position += read as u64;

            if self.partial.ends_with('\n') {
                let line = std::mem::take(&mut self.partial);
                return Ok(line.trim_end_matches(['\r', '\n']).to_string());
            }

            if read == 0 {
                let len = tokio::fs::metadata(&self.path).await?.len();
                if len < self.position {
                    let mut file = File::open(&self.path).await?;
                    file.seek(SeekFrom::Start(0)).await?;
                    self.reader = BufReader::new(file);
                    self.position = 0;
                    self.partial.clear();
                    continue;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}
