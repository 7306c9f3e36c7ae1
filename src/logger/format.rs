//! Log line format module
//!
//! Supports two formats:
//! - `text` (`<timestamp> <LEVEL> [<target>] <message>`)
//! - `json` (one JSON object per line)

use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;

/// Severity of a log line, ordered from most to least verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the logger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// A single log record
#[derive(Debug, Clone)]
pub struct LogLine<'a> {
    pub time: DateTime<Local>,
    pub level: LogLevel,
    /// Subsystem that emitted the line (`bind`, `pool`, `conn`, ...)
    pub target: &'a str,
    pub message: &'a str,
}

impl<'a> LogLine<'a> {
    /// Create a new log line with current timestamp
    pub fn new(level: LogLevel, target: &'a str, message: &'a str) -> Self {
        Self {
            time: Local::now(),
            level,
            target,
            message,
        }
    }

    pub fn format(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Text => self.format_text(),
            LogFormat::Json => self.format_json(),
        }
    }

    fn format_text(&self) -> String {
        format!(
            "{} {:<5} [{}] {}",
            self.time.format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            self.level,
            self.target,
            self.message
        )
    }

    fn format_json(&self) -> String {
        serde_json::json!({
            "time": self.time.to_rfc3339(),
            "level": self.level.as_str(),
            "target": self.target,
            "message": self.message,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing_and_order() {
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_format_text() {
        let line = LogLine::new(LogLevel::Info, "bind", "bound on port 9999");
        let out = line.format(LogFormat::Text);
        assert!(out.contains("INFO"));
        assert!(out.contains("[bind] bound on port 9999"));
    }

    #[test]
    fn test_format_json_escapes() {
        let line = LogLine::new(LogLevel::Error, "conn", "bad \"payload\"\n");
        let out = line.format(LogFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&out).expect("valid json");
        assert_eq!(parsed["level"], "ERROR");
        assert_eq!(parsed["target"], "conn");
        assert_eq!(parsed["message"], "bad \"payload\"\n");
    }
}
