//! Bounded wait budgets.
//!
//! Every blocking operation on the link is a bounded busy-wait: a number of
//! poll rounds with a fixed per-round timeout, optionally retransmitting
//! every N rounds. [`RetryPolicy`] captures one such budget.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Round budget for one wait site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RetryPolicy {
    /// Number of poll rounds before giving up.
    pub max_rounds: u32,
    /// Poll timeout of one round, in milliseconds.
    pub round_timeout_ms: u64,
    /// Retransmit after every this many unanswered rounds; 0 never does.
    pub resend_every: u32,
}

impl RetryPolicy {
    /// Liveness handshake: 100 rounds of 10 ms, no retransmission.
    pub const HANDSHAKE: Self = Self {
        max_rounds: 100,
        round_timeout_ms: 10,
        resend_every: 0,
    };

    /// Reply wait: 16 rounds of 100 ms, re-request every 8 rounds.
    pub const REPLY: Self = Self {
        max_rounds: 16,
        round_timeout_ms: 100,
        resend_every: 8,
    };

    /// Send acknowledgement wait: 32 rounds of 100 ms, resend every 8 rounds.
    pub const SEND: Self = Self {
        max_rounds: 32,
        round_timeout_ms: 100,
        resend_every: 8,
    };

    /// Timeout of a single poll round.
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// Upper bound on the time this wait can take.
    pub fn ceiling(&self) -> Duration {
        self.round_timeout() * self.max_rounds
    }

    /// Whether a retransmission is due after the given zero-based round.
    pub fn resend_due(&self, round: u32) -> bool {
        self.resend_every != 0 && round % self.resend_every == self.resend_every - 1
    }
}

/// Wait budgets of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinkConfig {
    /// Liveness handshake budget.
    pub handshake: RetryPolicy,
    /// Budget for a reply to an outstanding request.
    pub reply: RetryPolicy,
    /// Budget for the link-level acknowledgement of a sent packet.
    pub send: RetryPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            handshake: RetryPolicy::HANDSHAKE,
            reply: RetryPolicy::REPLY,
            send: RetryPolicy::SEND,
        }
    }
}
