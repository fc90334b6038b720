//! Debounce state machine for the trigger loop.
//!
//! The machine owns no timer. The caller feeds it the current instant on
//! every signal and asks it for the next deadline, which keeps it testable
//! against a virtual clock.
//!
//! ```text
//!            signal                     deadline reached
//!  Idle ───────────────► Coalescing ───────────────────► Running
//!   ▲                      │    ▲                          │
//!   │                      └────┘ signal (re-arm)          │
//!   │            finish, no signal while running           │
//!   └──────────────────────────────────────────────────────┤
//!                 finish, signalled while running          │
//!             Coalescing ◄─────────────────────────────────┘
//! ```

use std::ops::Add;
use std::time::Duration;

/// Trigger loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState<I> {
    /// Nothing pending.
    Idle,

    /// At least one signal pending; a pass starts at `deadline` unless
    /// another signal pushes it back.
    Coalescing { deadline: I },

    /// A pass is in flight. `pending` records signals that arrived meanwhile.
    Running { pending: bool },
}

/// Coalesces bursts of signals into single reconciliation passes.
#[derive(Debug, Clone)]
pub struct Debouncer<I> {
    window: Duration,
    state: TriggerState<I>,
    passes: u64,
}

impl<I> Debouncer<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Create an idle debouncer with the given quiet window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: TriggerState::Idle,
            passes: 0,
        }
    }

    /// The quiet window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Current state.
    pub fn state(&self) -> TriggerState<I> {
        self.state
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Records a signal received at `now`, arming or re-arming the deadline.
    pub fn signal(&mut self, now: I) {
        self.state = match self.state {
            TriggerState::Idle | TriggerState::Coalescing { .. } => TriggerState::Coalescing {
                deadline: now + self.window,
            },
            TriggerState::Running { .. } => TriggerState::Running { pending: true },
        };
    }

    /// The instant at which the next pass is due, if one is pending.
    pub fn deadline(&self) -> Option<I> {
        match self.state {
            TriggerState::Coalescing { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Starts a pass if the deadline has been reached.
    ///
    /// Returns true when the caller should run a pass now; the machine is
    /// then `Running` until [`Debouncer::finish`] is called.
    pub fn fire(&mut self, now: I) -> bool {
        match self.state {
            TriggerState::Coalescing { deadline } if now >= deadline => {
                self.state = TriggerState::Running { pending: false };
                self.passes += 1;
                true
            }
            _ => false,
        }
    }

    /// Marks the in-flight pass as finished at `now`.
    pub fn finish(&mut self, now: I) {
        if let TriggerState::Running { pending } = self.state {
            self.state = if pending {
                TriggerState::Coalescing {
                    deadline: now + self.window,
                }
            } else {
                TriggerState::Idle
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(3);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_idle_until_signalled() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(WINDOW);
        assert_eq!(d.state(), TriggerState::Idle);
        assert_eq!(d.deadline(), None);
        assert!(!d.fire(t0 + Duration::from_secs(60)));
        assert_eq!(d.passes(), 0);
    }

    #[test]
    fn test_burst_coalesces_into_one_pass() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(WINDOW);

        // ten signals, each 1s apart: every one lands inside the window
        for i in 0..10 {
            let now = t0 + ms(i * 1000);
            assert!(!d.fire(now));
            d.signal(now);
        }
        let last = t0 + ms(9000);
        assert_eq!(d.deadline(), Some(last + WINDOW));

        assert!(!d.fire(last + ms(2999)));
        assert!(d.fire(last + WINDOW));
        d.finish(last + WINDOW + ms(10));

        assert_eq!(d.passes(), 1);
        assert_eq!(d.state(), TriggerState::Idle);
        assert!(!d.fire(last + Duration::from_secs(60)));
    }

    #[test]
    fn test_signals_further_apart_than_window_run_separately() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(WINDOW);

        d.signal(t0);
        assert!(d.fire(t0 + WINDOW));
        d.finish(t0 + WINDOW);

        let t1 = t0 + Duration::from_secs(10);
        d.signal(t1);
        assert!(d.fire(t1 + WINDOW));
        d.finish(t1 + WINDOW);

        assert_eq!(d.passes(), 2);
    }

    #[test]
    fn test_signal_during_run_schedules_follow_up() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(WINDOW);

        d.signal(t0);
        assert!(d.fire(t0 + WINDOW));
        d.signal(t0 + WINDOW + ms(100));
        assert_eq!(d.state(), TriggerState::Running { pending: true });
        assert!(!d.fire(t0 + WINDOW + ms(200)), "passes never overlap");

        let done = t0 + WINDOW + ms(500);
        d.finish(done);
        assert_eq!(d.deadline(), Some(done + WINDOW));
        assert!(d.fire(done + WINDOW));
        assert_eq!(d.passes(), 2);
    }

    #[test]
    fn test_finish_outside_run_is_ignored() {
        let t0 = Instant::now();
        let mut d: Debouncer<Instant> = Debouncer::new(WINDOW);
        d.finish(t0);
        assert_eq!(d.state(), TriggerState::Idle);
        d.signal(t0);
        d.finish(t0 + ms(1));
        assert_eq!(d.deadline(), Some(t0 + WINDOW));
    }
}
