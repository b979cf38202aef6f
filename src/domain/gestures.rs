use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldEvent {
    /// Held past the threshold; reported once per hold
    Activated,
    /// Released before the threshold
    ShortPress,
    /// Released after activation
    Released,
}

/// Distinguishes a short press from a long hold of one button
pub struct HoldTracker {
    threshold: Duration,
    started: Option<Instant>,
    activated: bool,
}

impl HoldTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            started: None,
            activated: false,
        }
    }

    /// Feed the button's edges for one tick
    pub fn process(&mut self, pressed: bool, released: bool, now: Instant) -> Option<HoldEvent> {
        if pressed {
            self.start_hold(now);
            return None;
        }
        let start = self.started?;
        if released {
            return Some(self.end_hold());
        }
        self.update_hold(start, now)
    }

    /// Forget the hold in progress without reporting anything
    pub fn cancel(&mut self) {
        self.started = None;
        self.activated = false;
    }

    pub fn is_holding(&self) -> bool {
        self.started.is_some()
    }

    fn start_hold(&mut self, now: Instant) {
        self.started = Some(now);
        self.activated = false;
    }

    fn update_hold(&mut self, start: Instant, now: Instant) -> Option<HoldEvent> {
        if self.activated || now.saturating_duration_since(start) < self.threshold {
            return None;
        }
        self.activated = true;
        Some(HoldEvent::Activated)
    }

    fn end_hold(&mut self) -> HoldEvent {
        let event = if self.activated {
            HoldEvent::Released
        } else {
            HoldEvent::ShortPress
        };
        self.cancel();
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn test_long_hold_activates_once() {
        let mut tracker = HoldTracker::new(Duration::from_millis(2000));
        let start = Instant::now();

        assert_eq!(tracker.process(true, false, start), None);
        assert_eq!(tracker.process(false, false, ms(start, 1999)), None);
        assert_eq!(
            tracker.process(false, false, ms(start, 2000)),
            Some(HoldEvent::Activated)
        );
        assert_eq!(tracker.process(false, false, ms(start, 2500)), None);
        assert_eq!(tracker.process(false, false, ms(start, 5000)), None);
        assert_eq!(
            tracker.process(false, true, ms(start, 5100)),
            Some(HoldEvent::Released)
        );
        assert!(!tracker.is_holding());
    }

    #[test]
    fn test_short_press() {
        let mut tracker = HoldTracker::new(Duration::from_millis(2000));
        let start = Instant::now();

        tracker.process(true, false, start);
        assert_eq!(
            tracker.process(false, true, ms(start, 300)),
            Some(HoldEvent::ShortPress)
        );
        assert_eq!(tracker.process(false, false, ms(start, 2500)), None);
    }

    #[test]
    fn test_release_without_press_is_ignored() {
        let mut tracker = HoldTracker::new(Duration::from_millis(2000));
        assert_eq!(tracker.process(false, true, Instant::now()), None);

        let start = Instant::now();
        tracker.process(true, false, start);
        tracker.cancel();
        assert_eq!(tracker.process(false, true, ms(start, 100)), None);
    }
}
