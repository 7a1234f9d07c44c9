//! Per-run log stream
//!
//! Every run appends timestamped lines to `{files_path}/{run_id}.log`. Lines
//! are mirrored to `tracing` with the run id attached so that they also show up
//! in the process log. The ingress tails the file for log queries.

use crate::error::StoreResult;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Log handle owned by a job and shared with its run
#[derive(Debug)]
pub struct RunLog {
    run_id: String,
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl RunLog {
    /// Create a log for `run_id` under `dir`; the file is opened lazily
    pub fn new(dir: impl AsRef<Path>, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let path = dir.as_ref().join(format!("{}.log", run_id));
        Self {
            run_id,
            path: Some(path),
            file: Mutex::new(None),
        }
    }

    /// A log that only forwards to `tracing`
    pub fn detached(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            path: None,
            file: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open (or create) the backing file
    pub fn open(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if let Ok(mut guard) = self.file.lock() {
            *guard = Some(file);
        }
        Ok(())
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(run_id = %self.run_id, "{}", message);
        self.append("INFO", message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(run_id = %self.run_id, "{}", message);
        self.append("WARN", message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(run_id = %self.run_id, "{}", message);
        self.append("ERROR", message);
    }

    fn append(&self, level: &str, message: &str) {
        if self.path.is_none() {
            return;
        }
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        if guard.is_none() {
            if let Some(path) = &self.path {
                *guard = OpenOptions::new().create(true).append(true).open(path).ok();
            }
        }
        if let Some(file) = guard.as_mut() {
            let line = format!(
                "{} {} {}\n",
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                level,
                message
            );
            if let Err(e) = file.write_all(line.as_bytes()) {
                warn!(run_id = %self.run_id, error = %e, "Failed to append to run log");
            }
        }
    }

    /// Read all lines written so far
    pub fn lines(&self) -> StoreResult<Vec<String>> {
        match &self.path {
            Some(path) => read_lines(path),
            None => Ok(Vec::new()),
        }
    }
}

/// Read a run log file; a missing file reads as empty
pub fn read_lines(path: &Path) -> StoreResult<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        lines.push(line?);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tracing::span::{Attributes, Id, Record};
    use tracing::{Event, Level, Metadata, Subscriber};

    /// Records the level of every event it sees
    #[derive(Clone, Default)]
    struct LevelRecorder(Arc<Mutex<Vec<Level>>>);

    impl Subscriber for LevelRecorder {
        fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
            true
        }
        fn new_span(&self, _span: &Attributes<'_>) -> Id {
            Id::from_u64(1)
        }
        fn record(&self, _span: &Id, _values: &Record<'_>) {}
        fn record_follows_from(&self, _span: &Id, _follows: &Id) {}
        fn event(&self, event: &Event<'_>) {
            self.0.lock().unwrap().push(*event.metadata().level());
        }
        fn enter(&self, _span: &Id) {}
        fn exit(&self, _span: &Id) {}
    }

    #[test]
    fn test_run_log_appends_lines() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::new(dir.path(), "run-1");
        log.open().unwrap();

        log.info("reserving cluster");
        log.warn("max clusters reached");

        let lines = log.lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO reserving cluster"));
        assert!(lines[1].contains("WARN max clusters reached"));
        assert_eq!(log.path().unwrap(), dir.path().join("run-1.log"));
    }

    #[test]
    fn test_run_log_opens_lazily() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::new(dir.path(), "run-2");

        log.error("boom");

        assert_eq!(log.lines().unwrap().len(), 1);
    }

    #[test]
    fn test_detached_log_has_no_lines() {
        let log = RunLog::detached("run-3");
        log.info("only traced");
        assert!(log.lines().unwrap().is_empty());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(read_lines(&dir.path().join("nope.log")).unwrap().is_empty());
    }

    #[test]
    fn test_levels_reach_tracing() {
        let recorder = LevelRecorder::default();
        let log = RunLog::detached("run-4");

        tracing::subscriber::with_default(recorder.clone(), || {
            log.info("reserving");
            log.warn("retrying");
            log.error("failed");
        });

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![Level::INFO, Level::WARN, Level::ERROR]
        );
    }
}
