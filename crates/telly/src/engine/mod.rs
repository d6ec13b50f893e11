//! Automation: host power events in, TV actions out.

mod control;
mod debounce;
mod event;
mod orchestrator;

use std::time::Duration;

pub use control::TvControl;
pub use debounce::Debouncer;
pub use event::MediaKey;
pub use event::SequenceOutcome;
pub use orchestrator::Collaborators;
pub use orchestrator::Orchestrator;

/// Timings and switches for the orchestrator.
#[derive(Debug, Clone)]
pub struct AutomationSettings {
    /// Minimum gap between two sequences of the same kind
    pub debounce: Duration,
    /// Wait between the wake packet and connecting
    pub settle_delay: Duration,
    /// Auto-connect attempts at startup
    pub connect_attempts: u32,
    /// Backoff before retry `n` is `n * backoff_step`
    pub backoff_step: Duration,
    pub diagnostics_enabled: bool,
    /// Forward raw payloads to the sink and run periodic snapshots
    pub diagnostics_verbose: bool,
    pub diagnostics_interval: Duration,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(10),
            settle_delay: Duration::from_secs(3),
            connect_attempts: 3,
            backoff_step: Duration::from_secs(2),
            diagnostics_enabled: false,
            diagnostics_verbose: false,
            diagnostics_interval: Duration::from_secs(60),
        }
    }
}
