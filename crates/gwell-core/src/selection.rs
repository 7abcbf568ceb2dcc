//! Relay selection policy.
//!
//! Ranking key, compared lexicographically:
//! 1. candidates that answered the quality probe before those that did not;
//! 2. lower round-trip time;
//! 3. lower server level;
//! 4. earlier first-seen index.
//!
//! No I/O and no clock reads: the same input always picks the same server.

use std::time::Duration;

use thiserror::Error;

use crate::domain::candidate::CandidateServer;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no candidate servers to select from")]
    NoCandidates,
}

/// Returns the best candidate according to the ranking key above.
///
/// Callers are expected to reject an empty candidate set before calling.
///
/// # Errors
///
/// Returns [`SelectionError::NoCandidates`] for an empty slice.
pub fn select_best(candidates: &[CandidateServer]) -> Result<CandidateServer, SelectionError> {
    candidates
        .iter()
        .min_by_key(|c| rank_key(c))
        .cloned()
        .ok_or(SelectionError::NoCandidates)
}

fn rank_key(c: &CandidateServer) -> (bool, Duration, u32, usize) {
    (
        !c.is_reachable(),
        c.rtt.unwrap_or(Duration::MAX),
        c.level,
        c.first_seen,
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
