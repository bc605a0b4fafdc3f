//! Turn Clock
//!
//! Countdown bound to the session machine's current deadline. Remaining
//! time is always derived from the deadline, never stored, so a suspended
//! client sees the right value when it wakes up.

use std::time::Duration;

use crate::core::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Armed {
    deadline: Timestamp,
    generation: u64,
}

/// Single-shot countdown.
///
/// Fires once per arming, carrying the generation it was armed with so
/// the receiver can tell a current firing from a stale one.
#[derive(Debug, Clone, Default)]
pub struct TurnClock {
    armed: Option<Armed>,
    fired: Option<u64>,
}

impl TurnClock {
    /// A stopped clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting down to `deadline`.
    pub fn arm(&mut self, deadline: Timestamp, generation: u64) {
        self.armed = Some(Armed { deadline, generation });
    }

    /// Stop without firing.
    pub fn cancel(&mut self) {
        self.armed = None;
    }

    /// Follow the machine's deadline: re-arm if it changed, stop if there
    /// is none. A generation that already fired is never armed again.
    pub fn sync(&mut self, deadline: Option<(Timestamp, u64)>) {
        match deadline {
            None => self.cancel(),
            Some((_, generation)) if self.fired == Some(generation) => self.cancel(),
            Some((deadline, generation)) => self.arm(deadline, generation),
        }
    }

    /// True while a firing is pending.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Deadline being counted down to.
    pub fn deadline(&self) -> Option<Timestamp> {
        self.armed.map(|a| a.deadline)
    }

    /// Time left, `None` when stopped.
    pub fn remaining(&self, now: Timestamp) -> Option<Duration> {
        self.armed.map(|a| now.until(a.deadline))
    }

    /// Fire if the deadline has been reached. Returns the generation once,
    /// then the clock is stopped until re-armed.
    pub fn poll(&mut self, now: Timestamp) -> Option<u64> {
        match self.armed {
            Some(a) if now >= a.deadline => {
                self.armed = None;
                self.fired = Some(a.generation);
                Some(a.generation)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_exactly_once() {
        let mut clock = TurnClock::new();
        clock.arm(Timestamp::from_secs(60), 1);

        assert_eq!(clock.poll(Timestamp::from_secs(59)), None);
        assert_eq!(clock.poll(Timestamp::from_secs(60)), Some(1));
        assert_eq!(clock.poll(Timestamp::from_secs(61)), None);
        assert!(!clock.is_armed());
    }

    #[test]
    fn test_remaining_is_derived() {
        let mut clock = TurnClock::new();
        assert_eq!(clock.remaining(Timestamp::ZERO), None);

        clock.arm(Timestamp::from_secs(60), 1);
        assert_eq!(clock.remaining(Timestamp::from_secs(15)), Some(Duration::from_secs(45)));
        // Past the deadline (e.g. after a suspend) reads as zero
        assert_eq!(clock.remaining(Timestamp::from_secs(500)), Some(Duration::ZERO));
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let mut clock = TurnClock::new();
        clock.arm(Timestamp::from_secs(10), 3);
        clock.cancel();
        assert_eq!(clock.poll(Timestamp::from_secs(100)), None);
    }

    #[test]
    fn test_sync_rearms_on_new_generation() {
        let mut clock = TurnClock::new();
        clock.sync(Some((Timestamp::from_secs(60), 1)));
        assert_eq!(clock.deadline(), Some(Timestamp::from_secs(60)));

        clock.sync(Some((Timestamp::from_secs(120), 2)));
        assert_eq!(clock.deadline(), Some(Timestamp::from_secs(120)));
        assert_eq!(clock.poll(Timestamp::from_secs(100)), None);
        assert_eq!(clock.poll(Timestamp::from_secs(120)), Some(2));
    }

    #[test]
    fn test_sync_does_not_rearm_fired_generation() {
        let mut clock = TurnClock::new();
        clock.sync(Some((Timestamp::from_secs(5), 7)));
        assert_eq!(clock.poll(Timestamp::from_secs(5)), Some(7));

        clock.sync(Some((Timestamp::from_secs(5), 7)));
        assert!(!clock.is_armed());
    }

    #[test]
    fn test_sync_without_deadline_cancels() {
        let mut clock = TurnClock::new();
        clock.arm(Timestamp::from_secs(5), 1);
        clock.sync(None);
        assert!(!clock.is_armed());
    }
}
