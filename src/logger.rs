//! `[AMBIENT]` logging stack.
//!
//! Two sinks coexist, each with a narrower job, reconciling the teacher's
//! two independent logging mechanisms instead of picking one:
//!
//! - `init_structured_logging` wires the `log` crate facade to `simplelog`,
//!   for `log::info!`/`warn!`/`error!` tracing of loop transitions, retries,
//!   and compaction events throughout the kernel modules.
//! - `init_file_sink` installs a plain rotating append-log independent of
//!   the `log` crate, for callers that want a raw audit trail of arbitrary
//!   text without configuring a `log::Log` implementation.

use chrono::Local;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Initialize the `log`-crate-backed structured logger: terminal output at
/// `term_level`, plus an optional rotating file at `file_path` if given.
pub fn init_structured_logging(
    term_level: LevelFilter,
    file_path: Option<&Path>,
) -> Result<(), crate::error::AgentError> {
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![TermLogger::new(
        term_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = file_path {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| crate::error::AgentError::Config(e.to_string()))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }

    simplelog::CombinedLogger::init(loggers)
        .map_err(|e| crate::error::AgentError::Config(e.to_string()))
}

static FILE_SINK: OnceLock<SimpleLogger> = OnceLock::new();
const MAX_ENTRIES: usize = 5_000;

/// Install the raw audit-trail sink at `path`. Subsequent calls to
/// `audit_log` append to this path. Idempotent: only the first call's path
/// takes effect, matching the lazy-singleton shape of the original.
pub fn init_file_sink(path: impl Into<PathBuf>) {
    let _ = FILE_SINK.set(SimpleLogger::new(path.into(), MAX_ENTRIES));
}

/// Append a raw audit-trail entry with an automatic timestamp. If
/// `init_file_sink` was never called, this falls back to `app.log` in the
/// working directory, matching the teacher's original always-available
/// `log()` function.
pub fn audit_log(message: impl AsRef<str>) {
    FILE_SINK
        .get_or_init(|| SimpleLogger::new(PathBuf::from("app.log"), MAX_ENTRIES))
        .append(message.as_ref());
}

struct SimpleLogger {
    path: PathBuf,
    max_entries: usize,
    buffer: Mutex<VecDeque<String>>,
}

impl SimpleLogger {
    fn new(path: PathBuf, max_entries: usize) -> Self {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = fs::create_dir_all(parent) {
                    eprintln!("Logger: failed to create {}: {}", parent.display(), err);
                }
            }
        }

        let buffer = Self::read_existing(&path, max_entries).unwrap_or_else(|err| {
            eprintln!("Logger: failed to read existing log {}: {}", path.display(), err);
            VecDeque::with_capacity(max_entries)
        });

        Self { path, max_entries, buffer: Mutex::new(buffer) }
    }

    fn read_existing(path: &Path, max_entries: usize) -> io::Result<VecDeque<String>> {
        if !path.exists() {
            return Ok(VecDeque::with_capacity(max_entries));
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = VecDeque::with_capacity(max_entries);
        for line in reader.lines() {
            let line = line?;
            if lines.len() == max_entries {
                lines.pop_front();
            }
            lines.push_back(line);
        }
        Ok(lines)
    }

    fn append(&self, message: &str) {
        let now = Local::now();
        let timestamp = format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:04}",
            now.format("%Y"),
            now.format("%m"),
            now.format("%d"),
            now.format("%H"),
            now.format("%M"),
            now.format("%S"),
            now.timestamp_subsec_millis()
        );
        let entry = format!("{} - {}", timestamp, message);

        let mut buffer = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                eprintln!("Logger: mutex poisoned, recovering buffer");
                poisoned.into_inner()
            }
        };

        buffer.push_back(entry);
        if buffer.len() > self.max_entries {
            buffer.pop_front();
        }

        if let Err(err) = Self::write_all(&self.path, &buffer) {
            eprintln!("Logger: failed to write {}: {}", self.path.display(), err);
        }
    }

    fn write_all(path: &Path, lines: &VecDeque<String>) -> io::Result<()> {
        let mut file = File::create(path)?;
        for line in lines {
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}
