//! Append-only per-command output log, rehydrated from disk on demand and
//! tail-paged for the log API.
//!
//! The buffer starts `Flushed` if a log file already exists on disk (a
//! restart picking up a command that already finished in a prior process),
//! `Unflushed` otherwise. Reading while `Flushed` kicks off an async
//! rehydration and returns an error the caller is expected to retry after;
//! this mirrors the source system's fire-and-forget goroutine exactly,
//! swapped for a spawned task.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// 10 KiB — the tail window returned by a non-full log read.
pub const SEGMENT_LEN: usize = 10 * 1024;

const UNFLUSHED: u8 = 0;
const FLUSHING: u8 = 1;
const FLUSHED: u8 = 2;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not loaded")]
    NotLoaded,
}

struct Inner {
    path: PathBuf,
    buf: Mutex<Vec<u8>>,
    flag: AtomicU8,
}

/// One command's log buffer.
#[derive(Clone)]
pub struct PayloadLog(Arc<Inner>);

impl PayloadLog {
    pub fn new(path: PathBuf) -> Self {
        let flag = if path.exists() { FLUSHED } else { UNFLUSHED };
        PayloadLog(Arc::new(Inner { path, buf: Mutex::new(Vec::new()), flag: AtomicU8::new(flag) }))
    }

    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.0.buf.lock().unwrap().extend_from_slice(bytes);
    }

    /// Return either the full buffer or its last `SEGMENT_LEN` bytes,
    /// aligned to the next newline so a partial line is never returned.
    /// `Ok((bytes, is_full))`.
    pub fn bytes(&self, full: bool) -> Result<(Vec<u8>, bool), PayloadError> {
        if self.0.flag.load(Ordering::SeqCst) == FLUSHED {
            self.0.flag.store(FLUSHING, Ordering::SeqCst);
            let inner = self.0.clone();
            tokio::spawn(async move {
                match tokio::fs::read(&inner.path).await {
                    Ok(bytes) => {
                        inner.buf.lock().unwrap().extend_from_slice(&bytes);
                        inner.flag.store(UNFLUSHED, Ordering::SeqCst);
                    }
                    Err(err) => {
                        tracing::warn!(?err, path = %inner.path.display(), "failed to rehydrate payload log");
                        inner.flag.store(FLUSHED, Ordering::SeqCst);
                    }
                }
            });
        }

        if self.0.flag.load(Ordering::SeqCst) != UNFLUSHED {
            return Err(PayloadError::NotLoaded);
        }

        let all = self.0.buf.lock().unwrap();
        if full || all.len() <= SEGMENT_LEN {
            return Ok((all.clone(), true));
        }

        let part = &all[all.len() - SEGMENT_LEN..];
        match part.iter().position(|&b| b == b'\n') {
            Some(i) if i < part.len() - 1 => Ok((part[i + 1..].to_vec(), false)),
            _ => Ok((part.to_vec(), false)),
        }
    }

    /// Write the current buffer to disk and clear it in memory, once the
    /// command reaches a terminal status.
    pub fn flush(&self) {
        if self.0.flag.load(Ordering::SeqCst) != UNFLUSHED {
            return;
        }
        self.0.flag.store(FLUSHING, Ordering::SeqCst);
        let inner = self.0.clone();
        tokio::spawn(async move {
            let bytes = inner.buf.lock().unwrap().clone();
            if let Some(parent) = inner.path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            match tokio::fs::write(&inner.path, &bytes).await {
                Ok(()) => inner.buf.lock().unwrap().clear(),
                Err(err) => tracing::warn!(?err, path = %inner.path.display(), "failed to flush payload log"),
            }
            inner.flag.store(FLUSHED, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unflushed_log_reads_back_what_was_written() {
        let dir = std::env::temp_dir().join(format!("bubble-payload-{}", bubble_env::next_id()));
        let log = PayloadLog::new(dir.join(".0.log"));
        log.write(b"line one\n");
        log.write(b"line two\n");
        let (bytes, full) = log.bytes(true).unwrap();
        assert!(full);
        assert_eq!(bytes, b"line one\nline two\n");
    }

    #[tokio::test]
    async fn tail_read_aligns_to_a_newline_boundary() {
        let dir = std::env::temp_dir().join(format!("bubble-payload-{}", bubble_env::next_id()));
        let log = PayloadLog::new(dir.join(".0.log"));
        let mut big = Vec::new();
        for i in 0..2000 {
            big.extend_from_slice(format!("line-{i:04}\n").as_bytes());
        }
        log.write(&big);
        let (tail, full) = log.bytes(false).unwrap();
        assert!(!full);
        assert!(tail.len() <= SEGMENT_LEN);
        assert_eq!(tail.first().copied(), big[big.len() - tail.len()..].first().copied());
        assert!(tail.starts_with(b"line-"));
    }
}
