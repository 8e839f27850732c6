//! States of a single turn-end pass.

use std::fmt;

/// Where a turn-end pass is, or where it ended up.
///
/// A pass starts at `NoLoop`, moves through `ClaimPending` or `Claimed` once a
/// record is selected, and ends in one of `NoLoop`, `Terminated`,
/// `WaitingExternal` or `Advancing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Nothing claimable for this session; the stop is allowed
    NoLoop,
    /// A fresh pending record is being upgraded to this session
    ClaimPending,
    /// The record is owned by this session
    Claimed,
    /// Checking the iteration budget
    BudgetCheck,
    /// Budget spent; completion emitted and record removed
    Terminated,
    /// A background engine job is still running
    WaitingExternal,
    /// Signals gathered, iteration advanced and the next prompt emitted
    Advancing,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::NoLoop => "no_loop",
            ControllerState::ClaimPending => "claim_pending",
            ControllerState::Claimed => "claimed",
            ControllerState::BudgetCheck => "budget_check",
            ControllerState::Terminated => "terminated",
            ControllerState::WaitingExternal => "waiting_external",
            ControllerState::Advancing => "advancing",
        }
    }

    /// Terminal states end a pass
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerState::NoLoop
                | ControllerState::Terminated
                | ControllerState::WaitingExternal
                | ControllerState::Advancing
        )
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
