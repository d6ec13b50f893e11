//! Host power lifecycle and permission checks.

mod signals;

use std::fmt;
use std::io;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use signals::DeviceAccess;
pub use signals::SignalPowerSource;

/// Power lifecycle notifications from the host computer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Sleep,
    Wake,
    ScreenSleep,
    ScreenWake,
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostEvent::Sleep => "sleep",
            HostEvent::Wake => "wake",
            HostEvent::ScreenSleep => "screen sleep",
            HostEvent::ScreenWake => "screen wake",
        })
    }
}

pub type HostEventSender = mpsc::UnboundedSender<HostEvent>;
pub type HostEventReceiver = mpsc::UnboundedReceiver<HostEvent>;

/// Handle for an active subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Delivers host power events, one per occurrence.
pub trait HostPowerSource: Send + Sync {
    fn subscribe(&self, events: HostEventSender) -> io::Result<Subscription>;
}

/// Whether the process may capture media keys.
pub trait AccessibilityCheck: Send + Sync {
    fn has_permission(&self) -> bool;
}
