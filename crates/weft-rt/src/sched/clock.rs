// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler time source.

use std::time::{Duration, Instant};

use crate::config::ClockMode;

use super::queue::Inbox;

/// Time as seen by sleeping tasks, measured from scheduler start.
#[derive(Debug)]
pub(crate) enum Clock {
    /// Jumps straight to the next timer deadline when nothing else is ready.
    Virtual { now: Duration },
    /// Wall clock. Waiting for a deadline still wakes early on inbox traffic.
    Real { origin: Instant },
}

impl Clock {
    pub fn new(mode: ClockMode) -> Self {
        match mode {
            ClockMode::Virtual => Clock::Virtual {
                now: Duration::ZERO,
            },
            ClockMode::Real => Clock::Real {
                origin: Instant::now(),
            },
        }
    }

    pub fn now(&self) -> Duration {
        match self {
            Clock::Virtual { now } => *now,
            Clock::Real { origin } => origin.elapsed(),
        }
    }

    /// Move toward `deadline`.
    pub fn advance_to(&mut self, deadline: Duration, inbox: &Inbox) {
        match self {
            Clock::Virtual { now } => {
                if deadline > *now {
                    *now = deadline;
                }
            }
            Clock::Real { origin } => {
                let elapsed = origin.elapsed();
                if deadline > elapsed {
                    inbox.wait(Some(deadline - elapsed));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_jumps_and_never_rewinds() {
        let inbox = Inbox::default();
        let mut clock = Clock::new(ClockMode::Virtual);
        clock.advance_to(Duration::from_millis(30), &inbox);
        assert_eq!(clock.now(), Duration::from_millis(30));
        clock.advance_to(Duration::from_millis(10), &inbox);
        assert_eq!(clock.now(), Duration::from_millis(30));
    }

    #[test]
    fn real_clock_waits_for_deadline() {
        let inbox = Inbox::default();
        let mut clock = Clock::new(ClockMode::Real);
        clock.advance_to(Duration::from_millis(15), &inbox);
        assert!(clock.now() >= Duration::from_millis(15));
    }
}
