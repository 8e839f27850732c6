//! Loop coordination module
//!
//! Implements the lock-owner protocol that gives each loop record a single
//! confirmed session without a real mutex.

pub mod lock;

pub use lock::{
    Claim, ClaimKind, ClaimResult, LockCandidate, LockPolicy, LockWarning, OrphanPolicy, OwnershipPolicy, resolve,
};
