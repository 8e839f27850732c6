//! Domain types for turnloop
//!
//! This module contains all core domain types:
//! - LoopRecord: persisted iteration state for one target set
//! - LockOwner / LockState: ownership metadata kept beside each record
//! - JobState: background engine job tracking
//! - Directive: the answer handed back to the host on turn-end

pub mod directive;
pub mod job;
pub mod lock;
pub mod loop_record;

pub use directive::Directive;
pub use job::JobState;
pub use lock::{LockOwner, LockState, PendingClaim};
pub use loop_record::{Hook, Hooks, InferenceMode, LoopRecord, TargetSet};
