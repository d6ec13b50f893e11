use std::time::Duration;

use tokio::time::Instant;

/// Rejects triggers that arrive within `window` of the last accepted one.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Accept a trigger at `now`, or return how long ago the last accepted
    /// trigger was. Rejected triggers do not move the window.
    pub fn check(&mut self, now: Instant) -> Result<(), Duration> {
        if let Some(last) = self.last {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.window {
                return Err(elapsed);
            }
        }
        self.last = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_secs(10));

        assert_eq!(debouncer.check(start), Ok(()));
        assert_eq!(
            debouncer.check(start + Duration::from_secs(4)),
            Err(Duration::from_secs(4))
        );
        // Measured from the accepted trigger, not the rejected one.
        assert_eq!(
            debouncer.check(start + Duration::from_secs(9)),
            Err(Duration::from_secs(9))
        );
        assert_eq!(debouncer.check(start + Duration::from_secs(10)), Ok(()));
    }
}
