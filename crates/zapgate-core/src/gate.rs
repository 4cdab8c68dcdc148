//! Cooldown gate
//!
//! Enforces the configured minimum interval between granted actions of
//! the same kind.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use zapgate_openshock::ActionKind;

/// Outcome of asking the gate for permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Permission granted and the deadline for this kind advanced.
    Granted,
    /// Still cooling down. `remaining_secs` is whole seconds, rounded down.
    Blocked { remaining_secs: u64 },
}

#[derive(Debug)]
struct Deadlines {
    shock: Instant,
    vibrate: Instant,
}

impl Deadlines {
    fn slot(&mut self, kind: ActionKind) -> &mut Instant {
        match kind {
            ActionKind::Shock => &mut self.shock,
            ActionKind::Vibrate => &mut self.vibrate,
        }
    }
}

/// Per-kind earliest-next-action deadlines behind one lock.
///
/// The check and the advance happen inside the same critical section, so
/// two concurrent requests of the same kind can never both observe a ready
/// gate. The lock is never held across an await point.
#[derive(Debug)]
pub struct CooldownGate {
    deadlines: Mutex<Deadlines>,
}

impl CooldownGate {
    /// Both kinds start ready so the first action of each kind is granted
    /// immediately.
    pub fn new(now: Instant) -> Self {
        Self {
            deadlines: Mutex::new(Deadlines {
                shock: now,
                vibrate: now,
            }),
        }
    }

    /// Grant if `now` has reached the deadline for `kind`, advancing the
    /// deadline to `now + cooldown`. A blocked query leaves the deadline
    /// untouched.
    pub async fn try_grant(
        &self,
        kind: ActionKind,
        cooldown: Duration,
        now: Instant,
    ) -> GateDecision {
        let mut deadlines = self.deadlines.lock().await;
        let slot = deadlines.slot(kind);
        if now >= *slot {
            *slot = now + cooldown;
            GateDecision::Granted
        } else {
            GateDecision::Blocked {
                remaining_secs: slot.duration_since(now).as_secs(),
            }
        }
    }
}
