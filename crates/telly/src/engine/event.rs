use std::fmt;
use std::time::Duration;

use crate::webos::ForegroundSource;

/// How a wake or sleep sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Every step ran; best-effort steps may still have failed and been logged.
    Completed,
    /// A sequence of the same kind ran `elapsed` ago.
    Debounced { elapsed: Duration },
    /// No saved TV, or the automation flag for this event is off.
    Disabled,
    /// The event does not drive a sequence.
    Ignored,
    /// The TV is showing something other than the host's input.
    SkippedOtherSource(ForegroundSource),
    /// The wake packet or the connect failed.
    Aborted(String),
}

impl fmt::Display for SequenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceOutcome::Completed => f.write_str("completed"),
            SequenceOutcome::Debounced { elapsed } => {
                write!(f, "debounced ({:.1}s since last run)", elapsed.as_secs_f64())
            }
            SequenceOutcome::Disabled => f.write_str("disabled"),
            SequenceOutcome::Ignored => f.write_str("ignored"),
            SequenceOutcome::SkippedOtherSource(source) => write!(f, "skipped, TV is on {}", source),
            SequenceOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Media keys forwarded to the TV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKey {
    VolumeUp,
    VolumeDown,
    /// Toggles based on the last known mute state.
    Mute,
}
