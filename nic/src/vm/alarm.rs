//! Polled alarm slots.
//!
//! Alarms are cooperative: the statement executor polls them between
//! statements, and a due slot with a callback suspends the running script
//! while the callback executes. A slot without a callback simply latches
//! until the script asks via `check`. Nothing here is preemptive.

/// Number of alarm slots available to a script.
pub const ALARM_SLOT_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
struct AlarmSlot {
    active: bool,
    period_ms: u32,
    last_start: u64,
    callback: Option<usize>,
}

impl AlarmSlot {
    fn elapsed(&self, now: u64) -> bool {
        self.active && now.saturating_sub(self.last_start) > u64::from(self.period_ms)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Alarms {
    slots: [AlarmSlot; ALARM_SLOT_COUNT],
    /// Set while a callback runs, so the callback's own statement polling
    /// cannot re-enter the dispatcher.
    dispatching: bool,
}

impl Alarms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the first free slot. Returns the slot index, or `None` when
    /// every slot is in use.
    pub fn set(&mut self, now: u64, period_ms: u32, callback: Option<usize>) -> Option<usize> {
        let index = self.slots.iter().position(|slot| !slot.active)?;
        self.slots[index] = AlarmSlot {
            active: true,
            period_ms,
            last_start: now,
            callback,
        };
        Some(index)
    }

    /// True when the slot's period has elapsed. A positive answer
    /// restarts the period. Out-of-range or inactive slots answer false.
    pub fn check(&mut self, now: u64, slot: i32) -> bool {
        if slot < 0 {
            return false;
        }
        match self.slots.get_mut(slot as usize) {
            Some(s) if s.elapsed(now) => {
                s.last_start = now;
                true
            }
            _ => false,
        }
    }

    /// First due slot that carries a callback, in slot order.
    pub fn next_due_callback(&self, now: u64) -> Option<(usize, usize)> {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, s)| s.elapsed(now) && s.callback.is_some())
            .and_then(|(i, s)| s.callback.map(|func| (i, func)))
    }

    /// Restart a slot's period after its callback returned.
    pub fn restart(&mut self, slot: usize, now: u64) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.last_start = now;
        }
    }

    pub fn reset_all(&mut self) {
        self.slots = [AlarmSlot::default(); ALARM_SLOT_COUNT];
        self.dispatching = false;
    }

    pub fn dispatching(&self) -> bool {
        self.dispatching
    }

    pub fn set_dispatching(&mut self, value: bool) {
        self.dispatching = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_claims_slots_in_order() {
        let mut alarms = Alarms::new();
        assert_eq!(alarms.set(0, 100, None), Some(0));
        assert_eq!(alarms.set(0, 200, None), Some(1));
    }

    #[test]
    fn test_set_fails_when_full() {
        let mut alarms = Alarms::new();
        for _ in 0..ALARM_SLOT_COUNT {
            assert!(alarms.set(0, 10, None).is_some());
        }
        assert_eq!(alarms.set(0, 10, None), None);
    }

    #[test]
    fn test_check_latches_and_restarts() {
        let mut alarms = Alarms::new();
        let slot = alarms.set(0, 100, None).unwrap() as i32;
        assert!(!alarms.check(50, slot));
        assert!(!alarms.check(100, slot));
        assert!(alarms.check(101, slot));
        // The period restarted at 101.
        assert!(!alarms.check(150, slot));
        assert!(alarms.check(202, slot));
    }

    #[test]
    fn test_check_invalid_slot_is_false() {
        let mut alarms = Alarms::new();
        assert!(!alarms.check(1000, -1));
        assert!(!alarms.check(1000, 3));
        assert!(!alarms.check(1000, 99));
    }

    #[test]
    fn test_callback_dispatch_order() {
        let mut alarms = Alarms::new();
        alarms.set(0, 100, Some(4));
        alarms.set(0, 50, Some(7));
        // Both due: slot order wins, not due-ness order.
        assert_eq!(alarms.next_due_callback(200), Some((0, 4)));
        alarms.restart(0, 200);
        assert_eq!(alarms.next_due_callback(200), Some((1, 7)));
    }

    #[test]
    fn test_reset_all_clears_everything() {
        let mut alarms = Alarms::new();
        let slot = alarms.set(0, 10, Some(1)).unwrap() as i32;
        alarms.reset_all();
        assert!(!alarms.check(1000, slot));
        assert_eq!(alarms.next_due_callback(1000), None);
        assert_eq!(alarms.set(0, 10, None), Some(0));
    }
}
