//! Termination bookkeeping for the blink phase.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Count of cells that still have blink work in the current tick.
///
/// A cell registers work when a notice wakes it from idle and completes it when it
/// goes idle with an empty queue. Both updates happen while the caller holds that
/// cell's mailbox lock, so a wake-up can never slip between a cell draining its
/// queue and reporting completion.
///
/// Every registration spawns a task onto the phase's scope, so the scope join is
/// the barrier; the count reads zero exactly when that join returns.
#[derive(Debug, Default)]
pub(crate) struct Quiescence {
    outstanding: Mutex<usize>,
}

impl Quiescence {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a phase with `active` busy cells.
    pub(crate) fn arm(&self, active: usize) {
        *self.lock() = active;
    }

    /// One more cell became busy.
    pub(crate) fn register(&self) {
        *self.lock() += 1;
    }

    /// A busy cell ran out of work.
    pub(crate) fn complete(&self) {
        let mut outstanding = self.lock();
        debug_assert!(*outstanding > 0, "quiescence counter underflow");
        *outstanding = outstanding.saturating_sub(1);
    }

    pub(crate) fn outstanding(&self) -> usize {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn count_returns_to_zero_once_every_cell_completes() {
        let quiescence = Quiescence::default();
        quiescence.arm(4);
        quiescence.register();
        assert_eq!(quiescence.outstanding(), 5);

        thread::scope(|scope| {
            for _ in 0..5 {
                scope.spawn(|| quiescence.complete());
            }
        });
        assert_eq!(quiescence.outstanding(), 0);
    }

    #[test]
    fn arming_replaces_stale_registrations() {
        let quiescence = Quiescence::default();
        quiescence.register();
        quiescence.arm(0);
        assert_eq!(quiescence.outstanding(), 0);
    }
}
