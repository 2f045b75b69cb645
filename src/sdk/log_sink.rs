//! Forwarding of SDK log output into the `log` facade.

use serde::{Deserialize, Serialize};

/// Severity as reported by the SDK's own logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdkLogSeverity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl SdkLogSeverity {
    pub fn level(&self) -> log::Level {
        match self {
            SdkLogSeverity::Verbose => log::Level::Debug,
            SdkLogSeverity::Info => log::Level::Info,
            SdkLogSeverity::Warning => log::Level::Warn,
            SdkLogSeverity::Error => log::Level::Error,
        }
    }
}

/// Receives SDK log lines. Installed once per connector.
pub trait SdkLogSink: Send + Sync {
    fn on_log_message(&self, severity: SdkLogSeverity, message: &str);
}

pub const SDK_LOG_TARGET: &str = "crabsoup::sdk";

#[derive(Debug, Clone)]
pub struct LogForwarder {
    min_severity: SdkLogSeverity,
}

impl LogForwarder {
    pub fn new(min_severity: SdkLogSeverity) -> Self {
        Self { min_severity }
    }

    pub fn min_severity(&self) -> SdkLogSeverity {
        self.min_severity
    }

    pub fn accepts(&self, severity: SdkLogSeverity) -> bool {
        severity >= self.min_severity
    }
}

impl SdkLogSink for LogForwarder {
    fn on_log_message(&self, severity: SdkLogSeverity, message: &str) {
        if !self.accepts(severity) {
            return;
        }
        // SDK lines come with their own trailing newline
        log::log!(target: SDK_LOG_TARGET, severity.level(), "sdk: {}", message.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold() {
        let forwarder = LogForwarder::new(SdkLogSeverity::Warning);
        assert!(!forwarder.accepts(SdkLogSeverity::Verbose));
        assert!(!forwarder.accepts(SdkLogSeverity::Info));
        assert!(forwarder.accepts(SdkLogSeverity::Warning));
        assert!(forwarder.accepts(SdkLogSeverity::Error));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(SdkLogSeverity::Verbose.level(), log::Level::Debug);
        assert_eq!(SdkLogSeverity::Error.level(), log::Level::Error);
    }
}
