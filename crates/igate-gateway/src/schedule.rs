//! Self-correcting transmit schedules
//!
//! Each periodic APRS transmission (beacon, status, telemetry definitions,
//! telemetry data) is tracked as elapsed-since-last-success rather than a
//! restarting timer, so a session teardown or reconnect does not reset the
//! cadence. A failed send simply leaves the schedule due; the next driver
//! tick retries it, which gives the "retry at the natural tick, no retry
//! storm" behavior.

use std::time::{Duration, Instant};

/// One elapsed-since-last transmit schedule
#[derive(Debug, Clone, Copy)]
pub struct ActionSchedule {
    interval: Duration,
    last_sent: Option<Instant>,
    forced: bool,
}

impl ActionSchedule {
    /// Create a schedule that is immediately due (nothing sent yet)
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            forced: false,
        }
    }

    /// Whether the action should fire now
    pub fn due(&self, now: Instant) -> bool {
        if self.forced {
            return true;
        }
        match self.last_sent {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    /// Record a successful send; the next due time is `interval` from `now`
    pub fn sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        self.forced = false;
    }

    /// Make the schedule due immediately regardless of elapsed time
    pub fn force(&mut self) {
        self.forced = true;
    }

    /// Whether the action has ever completed
    pub fn has_fired(&self) -> bool {
        self.last_sent.is_some()
    }

    /// Time of the last successful send
    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    /// Replace the interval, keeping the elapsed-since-last accounting
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_schedule_is_immediately_due() {
        let s = ActionSchedule::new(Duration::from_secs(60));
        assert!(s.due(Instant::now()));
        assert!(!s.has_fired());
    }

    #[test]
    fn due_follows_elapsed_time() {
        let start = Instant::now();
        let mut s = ActionSchedule::new(Duration::from_secs(60));
        s.sent(start);

        assert!(!s.due(start + Duration::from_secs(30)));
        assert!(s.due(start + Duration::from_secs(60)));
        assert!(s.due(start + Duration::from_secs(90)));
    }

    #[test]
    fn failed_send_stays_due() {
        // Not calling sent() after a failure leaves the schedule due, which
        // is exactly the retry-at-next-tick contract.
        let start = Instant::now();
        let mut s = ActionSchedule::new(Duration::from_secs(60));
        s.sent(start);

        let later = start + Duration::from_secs(61);
        assert!(s.due(later));
        assert!(s.due(later + Duration::from_secs(1)));
    }

    #[test]
    fn force_overrides_elapsed_time() {
        let start = Instant::now();
        let mut s = ActionSchedule::new(Duration::from_secs(3600));
        s.sent(start);
        assert!(!s.due(start + Duration::from_secs(1)));

        s.force();
        assert!(s.due(start + Duration::from_secs(1)));

        s.sent(start + Duration::from_secs(2));
        assert!(!s.due(start + Duration::from_secs(3)));
    }

    #[test]
    fn cadence_survives_interval_change() {
        let start = Instant::now();
        let mut s = ActionSchedule::new(Duration::from_secs(600));
        s.sent(start);

        s.set_interval(Duration::from_secs(60));
        assert!(s.due(start + Duration::from_secs(60)));
        assert!(!s.due(start + Duration::from_secs(30)));
    }
}
