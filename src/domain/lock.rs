//! Lock ownership metadata
//!
//! Each loop directory carries two sidecar values: the owner token and the
//! last-activity timestamp. The owner is either nothing, a pending claim
//! written by `start`, or a confirmed session identifier.

use std::fmt;

use crate::id::PENDING_PREFIX;

/// A soft reservation written at loop creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingClaim {
    /// Unix seconds the token was issued; `None` if the token is malformed
    pub issued_at: Option<u64>,
    /// The raw token as persisted
    pub token: String,
}

impl PendingClaim {
    /// Seconds since issue; malformed tokens are treated as infinitely old
    pub fn age(&self, now: u64) -> u64 {
        match self.issued_at {
            Some(ts) => now.saturating_sub(ts),
            None => u64::MAX,
        }
    }
}

/// Current owner of a loop record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LockOwner {
    #[default]
    Unowned,
    Pending(PendingClaim),
    Session(String),
}

impl LockOwner {
    /// Parse a persisted owner value
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return LockOwner::Unowned;
        }
        if let Some(rest) = raw.strip_prefix(PENDING_PREFIX) {
            let issued_at = rest
                .split_once(':')
                .and_then(|(ts, nonce)| if nonce.is_empty() { None } else { ts.parse().ok() });
            return LockOwner::Pending(PendingClaim {
                issued_at,
                token: raw.to_string(),
            });
        }
        LockOwner::Session(raw.to_string())
    }

    /// Value to persist in the owner sidecar
    pub fn to_token(&self) -> String {
        match self {
            LockOwner::Unowned => String::new(),
            LockOwner::Pending(claim) => claim.token.clone(),
            LockOwner::Session(id) => id.clone(),
        }
    }

    /// True for a confirmed (non-pending) owner
    pub fn is_confirmed(&self) -> bool {
        matches!(self, LockOwner::Session(_))
    }

    pub fn is_session(&self, session: &str) -> bool {
        matches!(self, LockOwner::Session(id) if id == session)
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOwner::Unowned => write!(f, "(none)"),
            LockOwner::Pending(claim) => write!(f, "{}", claim.token),
            LockOwner::Session(id) => write!(f, "{}", id),
        }
    }
}

/// Owner plus last successful claim/renewal
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockState {
    pub owner: LockOwner,
    pub last_activity: Option<u64>,
}

impl LockState {
    /// Seconds since last activity, if known
    pub fn idle_secs(&self, now: u64) -> Option<u64> {
        self.last_activity.map(|ts| now.saturating_sub(ts))
    }
}
