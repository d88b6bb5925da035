//! Driver log configuration and the log entries forwarded to clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Driver log verbosity, ordered from least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Http,
    Verbose,
    Debug,
    Silly,
}

impl LogLevel {
    /// The numeric npm-style level reported to clients older than schema 3.
    pub fn numeric(self) -> u8 {
        match self {
            LogLevel::Error => 0,
            LogLevel::Warn => 1,
            LogLevel::Info => 2,
            LogLevel::Http => 3,
            LogLevel::Verbose => 4,
            LogLevel::Debug => 5,
            LogLevel::Silly => 6,
        }
    }
}

/// The driver's current log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    pub enabled: bool,
    pub level: LogLevel,
    pub log_to_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub force_console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
            log_to_file: false,
            filename: None,
            force_console: false,
        }
    }
}

/// Partial update accepted by `driver.update_log_config`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_to_file: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_console: Option<bool>,
}

impl LogConfig {
    /// Applies the fields present in `update`.
    pub fn apply(&mut self, update: &LogConfigUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(level) = update.level {
            self.level = level;
        }
        if let Some(log_to_file) = update.log_to_file {
            self.log_to_file = log_to_file;
        }
        if let Some(filename) = &update.filename {
            self.filename = Some(filename.clone());
        }
        if let Some(force_console) = update.force_console {
            self.force_console = force_console;
        }
    }
}

/// Context-field filter a client attaches to its log subscription.
///
/// An entry passes when every key in the filter is present in the entry's
/// context with an equal value.  An empty filter passes everything.
pub type LogFilter = BTreeMap<String, Value>;

/// One log line emitted by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub formatted_message: String,
    pub message: String,
    pub level: LogLevel,
    pub timestamp: String,
    pub label: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl LogEntry {
    pub fn matches(&self, filter: &LogFilter) -> bool {
        filter
            .iter()
            .all(|(key, expected)| self.context.get(key) == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_with_context(context: BTreeMap<String, Value>) -> LogEntry {
        LogEntry {
            formatted_message: "12:00:00 DRIVER hello".to_string(),
            message: "hello".to_string(),
            level: LogLevel::Info,
            timestamp: "2024-01-01T12:00:00Z".to_string(),
            label: "DRIVER".to_string(),
            context,
        }
    }

    #[test]
    fn test_numeric_levels_follow_npm_order() {
        assert_eq!(LogLevel::Error.numeric(), 0);
        assert_eq!(LogLevel::Info.numeric(), 2);
        assert_eq!(LogLevel::Silly.numeric(), 6);
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let mut config = LogConfig::default();
        config.apply(&LogConfigUpdate {
            level: Some(LogLevel::Debug),
            ..Default::default()
        });
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.enabled);
        assert!(!config.log_to_file);
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let entry = entry_with_context(BTreeMap::new());
        assert!(entry.matches(&LogFilter::new()));
    }

    #[test]
    fn test_filter_requires_equal_context_values() {
        let mut context = BTreeMap::new();
        context.insert("nodeId".to_string(), json!(5));
        context.insert("source".to_string(), json!("driver"));
        let entry = entry_with_context(context);

        let mut hit = LogFilter::new();
        hit.insert("nodeId".to_string(), json!(5));
        let mut miss = LogFilter::new();
        miss.insert("nodeId".to_string(), json!(6));
        let mut absent = LogFilter::new();
        absent.insert("endpoint".to_string(), json!(0));

        assert!(entry.matches(&hit));
        assert!(!entry.matches(&miss));
        assert!(!entry.matches(&absent));
    }
}
