//! File-backed sink for the process log, and the tail/follow support
//! `GET /admin/logs` needs. Rotation is delegated to `tracing-appender`
//! (daily-rolled `gordon.log` under `<data_dir>/logs/`); this module only
//! owns reading it back.

use std::{path::Path, time::Duration};

use futures::{stream, Stream};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, SeekFrom},
};
use tracing_appender::{non_blocking::WorkerGuard, rolling};

/// Initializes the rotating file appender at `<data_dir>/logs/gordon.log`.
/// The returned guard must be held for the process lifetime or buffered
/// writes are lost on exit — held by [`crate::kernel::Kernel`].
pub fn init_file_appender(data_dir: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let appender = rolling::daily(data_dir.join("logs"), "gordon.log");
    tracing_appender::non_blocking(appender)
}

/// The log file's path for a given `data_dir`, matching what
/// [`init_file_appender`] writes to today.
pub fn log_file_path(data_dir: &Path) -> std::path::PathBuf {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    data_dir.join("logs").join(format!("gordon.log.{today}"))
}

/// Returns the last `lines` lines of the file at `path` (or everything, if
/// `lines` is `None`).
pub async fn tail_lines(path: &Path, lines: Option<u32>) -> Vec<String> {
    let Ok(raw) = fs::read_to_string(path).await else {
        return Vec::new();
    };
    let all: Vec<String> = raw.lines().map(str::to_string).collect();
    match lines {
        Some(n) => all.into_iter().rev().take(n as usize).rev().collect(),
        None => all,
    }
}

/// Tailing state carried between polls of [`tail_stream`].
struct TailState {
    path: std::path::PathBuf,
    poll_interval: Duration,
    offset: u64,
    pending: std::collections::VecDeque<String>,
}

/// A lazy sequence of newly appended lines, polling `path` for growth.
/// Used by the admin SSE log stream; ends only when the caller drops it.
pub fn tail_stream(path: std::path::PathBuf, poll_interval: Duration) -> impl Stream<Item = String> {
    let state = TailState {
        path,
        poll_interval,
        offset: 0,
        pending: std::collections::VecDeque::new(),
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                return Some((line, state));
            }

            tokio::time::sleep(state.poll_interval).await;

            let Ok(mut file) = fs::File::open(&state.path).await else {
                continue;
            };
            let Ok(len) = file.metadata().await.map(|m| m.len()) else {
                continue;
            };
            if len < state.offset {
                state.offset = 0;
            }
            if len == state.offset {
                continue;
            }
            if file.seek(SeekFrom::Start(state.offset)).await.is_err() {
                continue;
            }
            let mut buf = String::new();
            if file.read_to_string(&mut buf).await.is_ok() {
                state.offset = len;
                state.pending.extend(buf.lines().map(str::to_string));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn tail_lines_returns_last_n_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gordon.log");
        fs::write(&path, "one\ntwo\nthree\nfour\n").await.unwrap();

        let tail = tail_lines(&path, Some(2)).await;
        assert_eq!(tail, vec!["three".to_string(), "four".to_string()]);
    }

    #[tokio::test]
    async fn tail_lines_on_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let tail = tail_lines(&dir.path().join("nope.log"), None).await;
        assert!(tail.is_empty());
    }

    #[tokio::test]
    async fn tail_stream_yields_appended_lines() {
        use tokio_stream::StreamExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("gordon.log");
        fs::write(&path, "").await.unwrap();

        let mut stream = Box::pin(tail_stream(path.clone(), Duration::from_millis(20)));

        let mut file = fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"hello\n").await.unwrap();
        file.flush().await.unwrap();

        let line = tokio::time::timeout(Duration::from_secs(2), stream.next()).await.unwrap();
        assert_eq!(line, Some("hello".to_string()));
    }
}
