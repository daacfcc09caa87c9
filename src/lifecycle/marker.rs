//! Completion marker.
//!
//! The completion writer creates a file at a well-known path when its
//! experiment finishes. Only the file's existence matters; its
//! modification time is reported for information.

use chrono::{DateTime, Local};
use log::{debug, info};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Shared flag that asks a waiting run to give up
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a wait for the completion marker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionMarker {
    path: PathBuf,
}

impl CompletionMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the marker of a previous run. A missing marker is fine.
    pub fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed stale completion marker {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// When the marker was last written, if it exists
    pub fn completed_at(&self) -> Option<DateTime<Local>> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        Some(DateTime::<Local>::from(modified))
    }

    /// Poll every `interval` until the marker appears, `timeout` elapses,
    /// or `cancel` fires.
    pub fn wait(
        &self,
        interval: Duration,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> WaitOutcome {
        let started = Instant::now();
        loop {
            if self.exists() {
                match self.completed_at() {
                    Some(at) => info!("Completion marker written at {}", at.format("%Y-%m-%d %H:%M:%S")),
                    None => info!("Completion marker found"),
                }
                return WaitOutcome::Completed;
            }
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }

            let mut pause = interval;
            if let Some(timeout) = timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return WaitOutcome::TimedOut;
                }
                pause = pause.min(timeout - elapsed);
            }
            debug!("Waiting for completion marker {:?}", self.path);
            thread::sleep(pause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn marker() -> (TempDir, CompletionMarker) {
        let dir = TempDir::new().unwrap();
        let marker = CompletionMarker::new(dir.path().join("done.log"));
        (dir, marker)
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (_dir, marker) = marker();
        std::fs::write(marker.path(), "Mon Oct 18\n").unwrap();
        assert!(marker.exists());
        assert!(marker.completed_at().is_some());

        marker.clear().unwrap();
        assert!(!marker.exists());
        marker.clear().unwrap();
    }

    #[test]
    fn test_wait_returns_when_marker_appears() {
        let (_dir, marker) = marker();
        let path = marker.path().to_path_buf();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            std::fs::write(path, "done").unwrap();
        });

        let outcome = marker.wait(Duration::from_millis(20), Some(Duration::from_secs(10)), &CancelToken::new());
        writer.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Completed);
    }

    #[test]
    fn test_wait_times_out() {
        let (_dir, marker) = marker();
        let started = Instant::now();
        let outcome = marker.wait(Duration::from_secs(5), Some(Duration::from_millis(50)), &CancelToken::new());
        assert_eq!(outcome, WaitOutcome::TimedOut);
        // The poll interval is cut short by the timeout
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_can_be_cancelled() {
        let (_dir, marker) = marker();
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let outcome = marker.wait(Duration::from_millis(10), None, &cancel);
        canceller.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }
}
