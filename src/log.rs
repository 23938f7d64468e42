//! File logging for the scheduler and the `lanework` binary.
//!
//! What goes where:
//! - ERROR: worker panics, a pool that cannot start or stop
//! - WARN: terminal task failures, failed repairs, degraded health
//! - INFO: pool start/stop, batch submission, health reports
//! - DEBUG: per-task transitions, diagnoses, repair attempts
//! - TRACE: lane scans, store evictions, handler plumbing
//!
//! Nothing is written until [`init_with_debug`] opens the log file, so a
//! library user who never initializes logging only pays for a level check.
//! `LANEWORK_LOG=<level>` picks a level explicitly; `LANEWORK_DEBUG=1` (or
//! `--debug`) is shorthand for `debug`.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

static SINK: OnceLock<Sink> = OnceLock::new();
static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

struct Sink {
    path: PathBuf,
    file: Mutex<File>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for LogLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| crate::Error::Validation(format!("unknown log level '{}'", s)))
    }
}

/// Level chosen from the environment, with `debug` forcing at least DEBUG.
fn level_from_env(debug: bool) -> LogLevel {
    let explicit = std::env::var("LANEWORK_LOG")
        .ok()
        .and_then(|v| v.parse::<LogLevel>().ok());
    let env_debug = std::env::var("LANEWORK_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let base = explicit.unwrap_or(LogLevel::Info);
    if debug || env_debug {
        base.max(LogLevel::Debug)
    } else {
        base
    }
}

/// Open `~/.lanework/lanework.log` (truncated) and set the level.
///
/// Later calls only adjust the level; the first file opened stays in use.
pub fn init_with_debug(debug: bool) {
    set_level(level_from_env(debug));

    let Some(dir) = dirs::home_dir().map(|h| h.join(".lanework")) else {
        return;
    };
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let path = dir.join("lanework.log");
    if let Ok(file) = File::create(&path) {
        let _ = SINK.set(Sink {
            path,
            file: Mutex::new(file),
        });
    }
}

/// Path of the open log file, if logging was initialized.
pub fn path() -> Option<PathBuf> {
    SINK.get().map(|sink| sink.path.clone())
}

pub fn set_level(level: LogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn level() -> LogLevel {
    LogLevel::ALL
        .get(MAX_LEVEL.load(Ordering::Relaxed) as usize)
        .copied()
        .unwrap_or(LogLevel::Trace)
}

pub fn enabled(level: LogLevel) -> bool {
    level <= self::level()
}

/// Write one line; the macros below are the usual entry point.
pub fn write(level: LogLevel, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let Some(sink) = SINK.get() else {
        return;
    };

    let thread = std::thread::current();
    let line = format!(
        "{} {:<5} [{}] {}\n",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        level,
        thread.name().unwrap_or("main"),
        args
    );
    let mut file = sink.file.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = file.write_all(line.as_bytes());
}

#[macro_export]
macro_rules! lw_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! lw_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! lw_info {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! lw_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! lw_trace {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Trace, format_args!($($arg)*))
    };
}
