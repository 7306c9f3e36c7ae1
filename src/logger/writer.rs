//! Log writer module
//!
//! Provides thread-safe log writing to files or stdout/stderr.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use super::format::{LogFormat, LogLevel, LogLine};

/// Global log writer instance
static LOG_WRITER: OnceLock<LogWriter> = OnceLock::new();

/// Log output target
enum LogTarget {
    Stdout,
    Stderr,
    File(Mutex<File>),
}

impl LogTarget {
    fn open(path: Option<&str>, fallback: Self) -> io::Result<Self> {
        match path {
            Some(p) => Ok(Self::File(Mutex::new(open_log_file(p)?))),
            None => Ok(fallback),
        }
    }

    fn write_line(&self, line: &str) {
        match self {
            Self::Stdout => println!("{line}"),
            Self::Stderr => eprintln!("{line}"),
            Self::File(file) => {
                if let Ok(mut f) = file.lock() {
                    let _ = writeln!(f, "{line}");
                }
            }
        }
    }
}

/// Thread-safe log writer
pub struct LogWriter {
    level: LogLevel,
    format: LogFormat,
    /// Debug and info lines
    info: LogTarget,
    /// Warning and error lines
    error: LogTarget,
}

impl LogWriter {
    pub fn new(
        level: LogLevel,
        format: LogFormat,
        log_file: Option<&str>,
        error_log_file: Option<&str>,
    ) -> io::Result<Self> {
        Ok(Self {
            level,
            format,
            info: LogTarget::open(log_file, LogTarget::Stdout)?,
            error: LogTarget::open(error_log_file, LogTarget::Stderr)?,
        })
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    pub fn write(&self, level: LogLevel, target: &str, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let line = LogLine::new(level, target, message).format(self.format);
        if level >= LogLevel::Warn {
            self.error.write_line(&line);
        } else {
            self.info.write_line(&line);
        }
    }
}

/// Open or create a log file for appending
fn open_log_file(path: &str) -> io::Result<File> {
    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    OpenOptions::new().create(true).append(true).open(path)
}

/// Initialize the global log writer
///
/// This should be called once at application startup.
/// Returns error if log files cannot be opened or the writer is already set.
pub fn init(writer: LogWriter) -> io::Result<()> {
    LOG_WRITER.set(writer).map_err(|_| {
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            "Log writer already initialized",
        )
    })
}

/// Get the global log writer, if initialized
pub fn get() -> Option<&'static LogWriter> {
    LOG_WRITER.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        let writer = LogWriter::new(LogLevel::Warn, LogFormat::Text, None, None)
            .expect("stdout targets always open");
        assert!(!writer.enabled(LogLevel::Debug));
        assert!(!writer.enabled(LogLevel::Info));
        assert!(writer.enabled(LogLevel::Warn));
        assert!(writer.enabled(LogLevel::Error));
    }

    #[test]
    fn test_file_target_appends() {
        let dir = std::env::temp_dir().join(format!("tcp-bootstrap-log-{}", std::process::id()));
        let path = dir.join("info.log");
        let path_str = path.to_string_lossy().to_string();

        let writer = LogWriter::new(LogLevel::Info, LogFormat::Text, Some(&path_str), None)
            .expect("log file should open");
        writer.write(LogLevel::Info, "bind", "bound on port 9999");
        writer.write(LogLevel::Debug, "bind", "filtered out");

        let contents = std::fs::read_to_string(&path).expect("log file readable");
        assert!(contents.contains("bound on port 9999"));
        assert!(!contents.contains("filtered out"));

        let _ = std::fs::remove_dir_all(dir);
    }
}
