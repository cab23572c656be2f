use crate::error::LogError;
use slurmit_remote::{Session, quote_path, shell_quote};
use slurmit_store::JobRecord;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// How often follow mode checks the log file for growth.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often [`LogTailer::wait_for_log`] looks for the log file.
const WAIT_INTERVAL: Duration = Duration::from_secs(2);

/// Which of a job's output streams to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogStream {
    #[default]
    Stdout,
    Stderr,
}

impl LogStream {
    fn extension(&self) -> &'static str {
        match self {
            Self::Stdout => "out",
            Self::Stderr => "err",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Log files found for a job. None means the file does not exist (yet).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPaths {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl LogPaths {
    pub fn get(&self, stream: LogStream) -> Option<&str> {
        match stream {
            LogStream::Stdout => self.stdout.as_deref(),
            LogStream::Stderr => self.stderr.as_deref(),
        }
    }
}

/// Log content as of one read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContent {
    pub stdout: String,
    pub stderr: String,
    pub paths: LogPaths,
}

/// Result of starting a tail.
pub enum TailOutcome<'a, S: Session> {
    /// The job has not produced this log file yet.
    NoLogFile,
    Streaming(LogTail<'a, S>),
}

/// Size of a remote file in bytes, or None if it cannot be determined.
///
/// Falls back to BSD `stat` syntax when GNU `stat` is not available.
pub async fn remote_file_size<S: Session>(session: &S, path: &str) -> Result<Option<u64>, LogError> {
    let quoted = quote_path(path);
    let result = session
        .run(
            &format!("stat -c %s {quoted} 2>/dev/null || stat -f %z {quoted}"),
            true,
        )
        .await?;
    if !result.ok {
        return Ok(None);
    }
    Ok(result.stdout.trim().parse().ok())
}

/// Read `len` bytes of a remote file starting at byte `offset`.
///
/// Returns the raw bytes; a range boundary may fall inside a UTF-8
/// character, see [`split_complete_utf8`].
pub async fn read_range<S: Session>(
    session: &S,
    path: &str,
    offset: u64,
    len: u64,
) -> Result<Option<Vec<u8>>, LogError> {
    let result = session
        .run(
            &format!("tail -c +{} {} | head -c {}", offset + 1, quote_path(path), len),
            true,
        )
        .await?;
    Ok(result.ok.then_some(result.stdout_bytes))
}

/// Length of the longest prefix of `bytes` that does not end inside a
/// multi-byte UTF-8 character.
fn complete_utf8_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if back < width { len - back } else { len };
    }
    len
}

/// Decode the complete characters of a chunk.
///
/// Returns the text and how many bytes it consumed. Bytes of a character
/// cut off at the end are left for the next read.
pub fn split_complete_utf8(bytes: &[u8]) -> (String, usize) {
    let end = complete_utf8_len(bytes);
    (String::from_utf8_lossy(&bytes[..end]).into_owned(), end)
}

/// Reads job logs through a borrowed session.
///
/// The tailer never closes the session; dropping a tail mid-follow leaves
/// the session usable.
pub struct LogTailer<'a, S: Session> {
    session: &'a S,
    poll_interval: Duration,
}

impl<'a, S: Session> LogTailer<'a, S> {
    pub fn new(session: &'a S) -> Self {
        Self {
            session,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn find_log(
        &self,
        log_dir: &str,
        job_id: Option<&str>,
        stream: LogStream,
    ) -> Result<Option<String>, LogError> {
        let id = job_id.map_or_else(|| "*".to_string(), shell_quote);
        let cmd = format!(
            "ls -1 {}/*{}*.{} 2>/dev/null | head -1",
            quote_path(log_dir),
            id,
            stream.extension()
        );
        let result = self.session.run(&cmd, true).await?;
        if !result.ok {
            return Ok(None);
        }
        let path = result.stdout.trim();
        Ok((!path.is_empty()).then(|| path.to_string()))
    }

    /// Locate the job's stdout and stderr files.
    pub async fn resolve_paths(&self, record: &JobRecord) -> Result<LogPaths, LogError> {
        let Some(log_dir) = record.log_dir.as_deref() else {
            return Ok(LogPaths::default());
        };
        let job_id = record.slurm_job_id.as_deref();
        Ok(LogPaths {
            stdout: self.find_log(log_dir, job_id, LogStream::Stdout).await?,
            stderr: self.find_log(log_dir, job_id, LogStream::Stderr).await?,
        })
    }

    async fn read_log(&self, path: Option<&str>, lines: Option<usize>) -> Result<String, LogError> {
        let Some(path) = path else {
            return Ok(String::new());
        };
        let cmd = match lines {
            Some(n) => format!("tail -n {} {}", n, quote_path(path)),
            None => format!("cat {}", quote_path(path)),
        };
        let result = self.session.run(&cmd, true).await?;
        if !result.ok {
            tracing::warn!("Failed to read {}: {}", path, result.stderr.trim());
            return Ok(String::new());
        }
        Ok(result.stdout)
    }

    /// Read both logs, the last `lines` lines of each or everything.
    pub async fn fetch(
        &self,
        record: &JobRecord,
        lines: Option<usize>,
    ) -> Result<LogContent, LogError> {
        if record.log_dir.is_none() {
            return Err(LogError::NotSubmitted(record.name.clone()));
        }
        let paths = self.resolve_paths(record).await?;
        Ok(LogContent {
            stdout: self.read_log(paths.stdout.as_deref(), lines).await?,
            stderr: self.read_log(paths.stderr.as_deref(), lines).await?,
            paths,
        })
    }

    /// Start reading one log stream.
    ///
    /// The tail first yields the last `lines` lines. With `follow` it then
    /// yields new bytes as the file grows, forever; without, it ends.
    pub async fn tail(
        &self,
        record: &JobRecord,
        stream: LogStream,
        follow: bool,
        lines: usize,
    ) -> Result<TailOutcome<'a, S>, LogError> {
        let paths = self.resolve_paths(record).await?;
        let Some(path) = paths.get(stream) else {
            return Ok(TailOutcome::NoLogFile);
        };
        Ok(TailOutcome::Streaming(LogTail {
            session: self.session,
            path: path.to_string(),
            follow,
            lines,
            poll_interval: self.poll_interval,
            offset: None,
            finished: false,
        }))
    }

    /// Poll until the job's stdout log exists. Returns false on timeout.
    pub async fn wait_for_log(&self, record: &JobRecord, timeout: Duration) -> Result<bool, LogError> {
        let Some(log_dir) = record.log_dir.as_deref() else {
            return Ok(false);
        };
        let deadline = Instant::now() + timeout;
        loop {
            let found = self
                .find_log(log_dir, record.slurm_job_id.as_deref(), LogStream::Stdout)
                .await?;
            if found.is_some() {
                return Ok(true);
            }
            if Instant::now() + WAIT_INTERVAL > deadline {
                return Ok(false);
            }
            sleep(WAIT_INTERVAL).await;
        }
    }
}

/// A single pass over a log file. Not restartable.
pub struct LogTail<'a, S: Session> {
    session: &'a S,
    path: String,
    follow: bool,
    lines: usize,
    poll_interval: Duration,
    /// Bytes already emitted; None before the initial read.
    offset: Option<u64>,
    finished: bool,
}

impl<S: Session> LogTail<'_, S> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next chunk of log text, or None when a non-follow tail is done.
    ///
    /// In follow mode this waits until the file grows, so the caller
    /// decides when to stop (typically by dropping the future on Ctrl-C).
    pub async fn next_chunk(&mut self) -> Result<Option<String>, LogError> {
        if self.finished {
            return Ok(None);
        }

        let Some(mut offset) = self.offset else {
            return self.initial_chunk().await.map(Some);
        };

        loop {
            sleep(self.poll_interval).await;

            let Some(size) = remote_file_size(self.session, &self.path).await? else {
                continue;
            };
            if size < offset {
                tracing::info!("{} was truncated; following from byte {}", self.path, size);
                offset = size;
                self.offset = Some(size);
                continue;
            }
            if size == offset {
                continue;
            }

            let Some(bytes) = read_range(self.session, &self.path, offset, size - offset).await?
            else {
                continue;
            };
            let (chunk, consumed) = split_complete_utf8(&bytes);
            offset += consumed as u64;
            self.offset = Some(offset);
            if !chunk.is_empty() {
                return Ok(Some(chunk));
            }
        }
    }

    /// Last lines of the file, anchored at the size observed just before
    /// reading so later deltas start exactly where this chunk ends.
    async fn initial_chunk(&mut self) -> Result<String, LogError> {
        if !self.follow {
            self.finished = true;
            let result = self
                .session
                .run(&format!("tail -n {} {}", self.lines, quote_path(&self.path)), true)
                .await?;
            return Ok(if result.ok { result.stdout } else { String::new() });
        }

        let size = remote_file_size(self.session, &self.path).await?.unwrap_or(0);
        self.offset = Some(size);
        if size == 0 {
            return Ok(String::new());
        }
        // The read ends at `size`; a character cut there is re-read by the
        // next delta.
        let result = self
            .session
            .run(
                &format!(
                    "head -c {} {} | tail -n {}",
                    size,
                    quote_path(&self.path),
                    self.lines
                ),
                true,
            )
            .await?;
        if !result.ok {
            return Ok(String::new());
        }
        let (text, consumed) = split_complete_utf8(&result.stdout_bytes);
        self.offset = Some(size - (result.stdout_bytes.len() - consumed) as u64);
        Ok(text)
    }
}
