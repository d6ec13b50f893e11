//! Diagnostic sink for troubleshooting output.

use std::collections::BTreeMap;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::config::LogLevel;

/// Receives diagnostic records from the orchestrator.
pub trait DiagnosticSink: Send + Sync {
    fn log(
        &self,
        level: LogLevel,
        category: &str,
        message: &str,
        metadata: Option<&BTreeMap<String, String>>,
    );
}

/// Writes diagnostics through `tracing` under the `telly::diagnostics` target.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn log(
        &self,
        level: LogLevel,
        category: &str,
        message: &str,
        metadata: Option<&BTreeMap<String, String>>,
    ) {
        let metadata = metadata.map(format_metadata).unwrap_or_default();
        match level {
            LogLevel::Trace => {
                trace!(target: "telly::diagnostics", category, metadata = %metadata, "{}", message)
            }
            LogLevel::Debug => {
                debug!(target: "telly::diagnostics", category, metadata = %metadata, "{}", message)
            }
            LogLevel::Info => {
                info!(target: "telly::diagnostics", category, metadata = %metadata, "{}", message)
            }
            LogLevel::Warn => {
                warn!(target: "telly::diagnostics", category, metadata = %metadata, "{}", message)
            }
            LogLevel::Error => {
                error!(target: "telly::diagnostics", category, metadata = %metadata, "{}", message)
            }
        }
    }
}

/// `key=value` pairs in key order.
pub fn format_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}
