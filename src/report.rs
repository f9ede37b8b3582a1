//! Per-stage log returned to HTTP callers and printed by the CLI.

use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: Level,
    pub msg: String,
}

/// Collects info, warning and error entries; every entry is also emitted through `tracing`.
/// Debug messages go to `tracing` only.
#[derive(Clone, Debug, Default)]
pub struct StageLog {
    entries: Vec<LogEntry>,
}

impl StageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(&mut self, msg: impl Into<String>) {
        tracing::debug!("{}", msg.into());
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::info!("{}", msg);
        self.push(Level::Info, msg);
    }

    pub fn warning(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::warn!("{}", msg);
        self.push(Level::Warning, msg);
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::error!("{}", msg);
        self.push(Level::Error, msg);
    }

    fn push(&mut self, level: Level, msg: String) {
        self.entries.push(LogEntry { level, msg });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.level == Level::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_not_collected() {
        let mut log = StageLog::new();
        log.debug("query");
        log.info("Writing 'ogc.json' service config file");
        log.warning("Service 'mapViewer' not supported");
        assert_eq!(log.entries().len(), 2);
        assert!(!log.has_errors());
        log.error("ConfigDB unreachable");
        assert!(log.has_errors());
        assert_eq!(
            serde_json::to_value(&log.entries()[1]).unwrap(),
            serde_json::json!({ "level": "warning", "msg": "Service 'mapViewer' not supported" })
        );
    }

    #[test]
    fn level_honours_width() {
        assert_eq!(format!("{:<7}|", Level::Info), "INFO   |");
        assert_eq!(format!("{:<7}|", Level::Warning), "WARNING|");
    }
}
