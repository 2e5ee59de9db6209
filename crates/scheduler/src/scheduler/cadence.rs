use std::time::{Duration, Instant};

/// Monotonic time source, only used to pace completion checks.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Deadline for the next completion check while work is outstanding.
#[derive(Debug, Clone)]
pub struct CheckCadence {
    delay: Duration,
    next_check: Option<Instant>,
}

impl CheckCadence {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_check: None,
        }
    }

    /// Request a check `delay` after `now`. An earlier pending deadline wins.
    pub fn schedule(&mut self, now: Instant) {
        let deadline = now + self.delay;
        self.next_check = Some(match self.next_check {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        });
    }

    /// Replace any pending deadline with `now + delay`.
    pub fn reschedule(&mut self, now: Instant) {
        self.next_check = Some(now + self.delay);
    }

    pub fn clear(&mut self) {
        self.next_check = None;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.next_check, Some(deadline) if now >= deadline)
    }

    pub fn next_check(&self) -> Option<Instant> {
        self.next_check
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_cadence_is_never_due() {
        let cadence = CheckCadence::new(Duration::from_millis(6));
        assert!(!cadence.is_due(Instant::now() + Duration::from_secs(60)));
        assert!(cadence.next_check().is_none());
    }

    #[test]
    fn due_after_delay() {
        let start = Instant::now();
        let mut cadence = CheckCadence::new(Duration::from_millis(6));
        cadence.schedule(start);
        assert!(!cadence.is_due(start + Duration::from_millis(5)));
        assert!(cadence.is_due(start + Duration::from_millis(6)));
    }

    #[test]
    fn schedule_keeps_earlier_deadline() {
        let start = Instant::now();
        let mut cadence = CheckCadence::new(Duration::from_millis(10));
        cadence.schedule(start);
        cadence.schedule(start + Duration::from_millis(5));
        assert_eq!(cadence.next_check(), Some(start + Duration::from_millis(10)));

        cadence.reschedule(start + Duration::from_millis(5));
        assert_eq!(cadence.next_check(), Some(start + Duration::from_millis(15)));
    }

    #[test]
    fn clear_cancels_deadline() {
        let start = Instant::now();
        let mut cadence = CheckCadence::new(Duration::ZERO);
        cadence.schedule(start);
        assert!(cadence.is_due(start));
        cadence.clear();
        assert!(!cadence.is_due(start));
    }
}
