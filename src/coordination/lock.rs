//! Session ownership resolution
//!
//! `resolve` decides which single loop record (if any) the calling session may
//! advance on this pass. It is a pure function of the candidates, the caller's
//! session id, the clock and the selected policy. Writing the resulting claim
//! is the caller's job.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::lock::{LockOwner, LockState};

/// What to do with a record that has no owner at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanPolicy {
    /// Never auto-claim; warn and skip
    #[default]
    Strict,
    /// Claim immediately
    Permissive,
}

/// What to do with a record confirmed by a different session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OwnershipPolicy {
    /// Never take over; report only
    #[default]
    Strict,
    /// Reassign once the owner has been idle past `stale_timeout_secs`
    StaleTakeover,
}

/// Tunables for ownership resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockPolicy {
    pub orphan_policy: OrphanPolicy,
    pub ownership: OwnershipPolicy,
    /// Pending tokens younger than this are upgraded
    pub pending_window_secs: u64,
    /// Confirmed re-entry after this much inactivity needs a restart; `None` disables
    pub resume_ceiling_secs: Option<u64>,
    /// Inactivity after which another session's loop may be taken over
    pub stale_timeout_secs: u64,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            orphan_policy: OrphanPolicy::Strict,
            ownership: OwnershipPolicy::Strict,
            pending_window_secs: 30,
            resume_ceiling_secs: Some(1800),
            stale_timeout_secs: 900,
        }
    }
}

/// One record as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockCandidate {
    pub slug: String,
    pub lock: LockState,
}

impl LockCandidate {
    pub fn new(slug: impl Into<String>, lock: LockState) -> Self {
        Self {
            slug: slug.into(),
            lock,
        }
    }
}

/// How a claim was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimKind {
    Orphan,
    PendingUpgrade,
    Reentry,
    StaleTakeover { previous: String },
}

/// The record this session may advance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub slug: String,
    pub kind: ClaimKind,
}

/// Why a candidate was skipped (or taken over)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockWarning {
    OrphanSkipped { slug: String },
    StalePending { slug: String, age_secs: Option<u64> },
    ResumeCeilingExceeded { slug: String, idle_secs: u64 },
    ForeignOwner { slug: String, owner: String },
    TakenOver { slug: String, previous: String, idle_secs: Option<u64> },
}

impl LockWarning {
    pub fn slug(&self) -> &str {
        match self {
            LockWarning::OrphanSkipped { slug }
            | LockWarning::StalePending { slug, .. }
            | LockWarning::ResumeCeilingExceeded { slug, .. }
            | LockWarning::ForeignOwner { slug, .. }
            | LockWarning::TakenOver { slug, .. } => slug,
        }
    }
}

impl fmt::Display for LockWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockWarning::OrphanSkipped { slug } => {
                write!(f, "loop {} has no owner; restart it to resume", slug)
            }
            LockWarning::StalePending { slug, age_secs: Some(age) } => {
                write!(f, "loop {} has a pending claim from {}s ago; left untouched", slug, age)
            }
            LockWarning::StalePending { slug, age_secs: None } => {
                write!(f, "loop {} has a malformed pending claim; left untouched", slug)
            }
            LockWarning::ResumeCeilingExceeded { slug, idle_secs } => write!(
                f,
                "loop {} has been inactive for {}s; restart it to resume",
                slug, idle_secs
            ),
            LockWarning::ForeignOwner { slug, owner } => {
                write!(f, "loop {} is owned by session {}; skipped", slug, owner)
            }
            LockWarning::TakenOver {
                slug,
                previous,
                idle_secs,
            } => match idle_secs {
                Some(idle) => write!(
                    f,
                    "loop {} taken over from session {} after {}s of inactivity",
                    slug, previous, idle
                ),
                None => write!(
                    f,
                    "loop {} taken over from session {} (no recorded activity)",
                    slug, previous
                ),
            },
        }
    }
}

/// Outcome of one resolution pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimResult {
    pub claim: Option<Claim>,
    pub warnings: Vec<LockWarning>,
}

impl ClaimResult {
    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }
}

/// Find the candidate `session` may advance.
///
/// A loop the session already owns is always preferred, so a fresh pending
/// token belonging to another session's start is never upgraded while the
/// caller has its own loop to resume. Otherwise candidates are evaluated in
/// the order given and the first claimable one wins. An empty session id
/// claims nothing.
pub fn resolve(candidates: &[LockCandidate], session: &str, now: u64, policy: &LockPolicy) -> ClaimResult {
    let mut result = ClaimResult::default();
    if session.trim().is_empty() {
        return result;
    }

    let (own, others): (Vec<&LockCandidate>, Vec<&LockCandidate>) = candidates
        .iter()
        .partition(|candidate| candidate.lock.owner.is_session(session));

    for candidate in own.into_iter().chain(others) {
        if let Some(kind) = classify(candidate, session, now, policy, &mut result.warnings) {
            result.claim = Some(Claim {
                slug: candidate.slug.clone(),
                kind,
            });
            break;
        }
    }

    result
}

fn classify(
    candidate: &LockCandidate,
    session: &str,
    now: u64,
    policy: &LockPolicy,
    warnings: &mut Vec<LockWarning>,
) -> Option<ClaimKind> {
    let slug = candidate.slug.clone();
    let idle = candidate.lock.idle_secs(now);

    match &candidate.lock.owner {
        LockOwner::Unowned => match policy.orphan_policy {
            OrphanPolicy::Permissive => Some(ClaimKind::Orphan),
            OrphanPolicy::Strict => {
                warnings.push(LockWarning::OrphanSkipped { slug });
                None
            }
        },
        LockOwner::Pending(claim) => {
            let age = claim.age(now);
            if age < policy.pending_window_secs {
                Some(ClaimKind::PendingUpgrade)
            } else {
                warnings.push(LockWarning::StalePending {
                    slug,
                    age_secs: claim.issued_at.map(|_| age),
                });
                None
            }
        }
        LockOwner::Session(owner) if owner == session => match (policy.resume_ceiling_secs, idle) {
            (Some(ceiling), Some(idle_secs)) if idle_secs >= ceiling => {
                warnings.push(LockWarning::ResumeCeilingExceeded { slug, idle_secs });
                None
            }
            _ => Some(ClaimKind::Reentry),
        },
        LockOwner::Session(owner) => {
            let stale = idle.is_none_or(|idle_secs| idle_secs > policy.stale_timeout_secs);
            if policy.ownership == OwnershipPolicy::StaleTakeover && stale {
                warnings.push(LockWarning::TakenOver {
                    slug,
                    previous: owner.clone(),
                    idle_secs: idle,
                });
                Some(ClaimKind::StaleTakeover {
                    previous: owner.clone(),
                })
            } else {
                warnings.push(LockWarning::ForeignOwner {
                    slug,
                    owner: owner.clone(),
                });
                None
            }
        }
    }
}
