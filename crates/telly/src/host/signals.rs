use std::fs::File;
use std::io;
use std::path::PathBuf;

use tracing::debug;
use tracing::info;

use super::AccessibilityCheck;
use super::HostEvent;
use super::HostEventSender;
use super::HostPowerSource;
use super::Subscription;

/// Host power events delivered as unix signals.
///
/// `SIGUSR1` means the host is about to sleep and `SIGUSR2` that it has woken,
/// which is what a systemd sleep hook can send with `kill`.
#[derive(Debug, Default, Clone)]
pub struct SignalPowerSource;

impl SignalPowerSource {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl HostPowerSource for SignalPowerSource {
    fn subscribe(&self, events: HostEventSender) -> io::Result<Subscription> {
        use tokio::signal::unix::signal;
        use tokio::signal::unix::SignalKind;

        let mut sleep = signal(SignalKind::user_defined1())?;
        let mut wake = signal(SignalKind::user_defined2())?;

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    Some(()) = sleep.recv() => HostEvent::Sleep,
                    Some(()) = wake.recv() => HostEvent::Wake,
                    else => break,
                };
                debug!(%event, "host power signal");
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        info!("listening for host power signals (SIGUSR1 sleep, SIGUSR2 wake)");
        Ok(Subscription::new(task))
    }
}

#[cfg(not(unix))]
impl HostPowerSource for SignalPowerSource {
    fn subscribe(&self, _events: HostEventSender) -> io::Result<Subscription> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "power signals need a unix host",
        ))
    }
}

/// Grants media-key capture when the configured input device node can be
/// opened for reading.
#[derive(Debug, Clone)]
pub struct DeviceAccess {
    device: Option<PathBuf>,
}

impl DeviceAccess {
    pub fn new(device: Option<PathBuf>) -> Self {
        Self { device }
    }
}

impl AccessibilityCheck for DeviceAccess {
    fn has_permission(&self) -> bool {
        let Some(device) = &self.device else {
            debug!("no media key device configured");
            return false;
        };
        match File::open(device) {
            Ok(_) => true,
            Err(e) => {
                debug!(device = %device.display(), error = %e, "media key device not readable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_device_access() {
        let device = NamedTempFile::new().unwrap();
        assert!(DeviceAccess::new(Some(device.path().to_path_buf())).has_permission());
        assert!(!DeviceAccess::new(Some(PathBuf::from("/nonexistent/event0"))).has_permission());
        assert!(!DeviceAccess::new(None).has_permission());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signals_become_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let subscription = SignalPowerSource::new().subscribe(tx).unwrap();

        let status = tokio::process::Command::new("kill")
            .args(["-USR2", &std::process::id().to_string()])
            .status()
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(rx.recv().await, Some(HostEvent::Wake));
        subscription.cancel();
    }
}
