//! Keepalive and dead peer detection scheduling
//!
//! The tracker watches the last receive/transmit instants and tells the
//! mainloop what probe, if any, is due: a keepalive when we have been
//! silent too long, a DPD echo when the peer has. DPD-dead means two
//! probe windows passed without a single inbound frame. Deadlines are
//! folded into the caller's timeout hint so the host can sleep exactly
//! until the next one.

use std::time::{Duration, Instant};

/// What the keepalive scheduler wants done this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KaAction {
    None,
    /// Send a keepalive probe (LCP Discard-Request)
    Keepalive,
    /// Send a dead-peer-detection probe (LCP Echo-Request)
    Dpd,
    /// Two DPD windows passed without a single inbound frame
    DpdDead,
    /// Transport rekey due; this engine treats it as a reconnect
    Rekey,
}

/// Liveness tracker for one tunnel transport
#[derive(Debug)]
pub struct Keepalive {
    /// Instant of the last successfully parsed inbound frame
    pub last_rx: Instant,
    /// Instant of the last write attempt
    pub last_tx: Instant,
    last_dpd: Instant,
    keepalive_interval: Option<Duration>,
    dpd_interval: Option<Duration>,
}

impl Keepalive {
    pub fn new(now: Instant, keepalive: Option<Duration>, dpd: Option<Duration>) -> Self {
        Self {
            last_rx: now,
            last_tx: now,
            last_dpd: now,
            keepalive_interval: keepalive,
            dpd_interval: dpd,
        }
    }

    /// Folds `deadline` into the timeout hint; true if it already passed
    pub fn check_deadline(timeout: &mut Duration, now: Instant, deadline: Instant) -> bool {
        if deadline <= now {
            return true;
        }
        *timeout = (*timeout).min(deadline - now);
        false
    }

    /// Full scheduling decision for an idle-or-flowing transport
    ///
    /// DPD outranks keepalive: a peer that stopped talking is more urgent
    /// than our own silence. Firing [`KaAction::Dpd`] arms a one-window
    /// cooldown so the probe is not repeated every tick while waiting for
    /// the reply.
    pub fn action(&mut self, now: Instant, timeout: &mut Duration) -> KaAction {
        if let Some(dpd) = self.dpd_interval {
            if Self::check_deadline(timeout, now, self.last_rx + 2 * dpd) {
                return KaAction::DpdDead;
            }
            let probe_at = self.last_rx.max(self.last_dpd) + dpd;
            if Self::check_deadline(timeout, now, probe_at) {
                self.last_dpd = now;
                return KaAction::Dpd;
            }
        }
        if let Some(ka) = self.keepalive_interval {
            if Self::check_deadline(timeout, now, self.last_tx + ka) {
                return KaAction::Keepalive;
            }
        }
        KaAction::None
    }

    /// Scheduling decision while a write is stalled
    ///
    /// No point queueing more probes behind a blocked transport; the only
    /// question is whether the stall has lasted long enough to declare the
    /// peer dead.
    pub fn stalled_action(&mut self, now: Instant, timeout: &mut Duration) -> KaAction {
        if let Some(dpd) = self.dpd_interval {
            if Self::check_deadline(timeout, now, self.last_rx + 2 * dpd) {
                return KaAction::DpdDead;
            }
        }
        KaAction::None
    }
}
