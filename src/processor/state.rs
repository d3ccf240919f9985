//! Release state machine
//!
//! Pure transition functions: [`entry_check`] decides whether a release needs any
//! work at all, [`settle`] folds the per-link outcomes into the final disposition.

use crate::types::{Disposition, SkipReason};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Result of trying one candidate link
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The payload was organized into the library
    Succeeded(PathBuf),
    /// The transfer broke off on every retry
    Partial {
        /// Error code of the last attempt
        code: String,
    },
    /// A Mega link skipped without attempting it because the cooldown was active
    CooldownSkipped {
        /// Cooldown deadline
        until: DateTime<Utc>,
    },
    /// The host signalled throttling during the attempt
    RetryLater {
        /// Error code of the attempt
        code: String,
    },
    /// The link will not work
    Failed {
        /// Error code of the attempt
        code: String,
    },
}

impl LinkOutcome {
    /// Whether the release should wait for the cooldown instead of failing
    pub fn defers(&self) -> bool {
        matches!(
            self,
            LinkOutcome::CooldownSkipped { .. } | LinkOutcome::RetryLater { .. }
        )
    }

    fn code(&self) -> Option<&str> {
        match self {
            LinkOutcome::Partial { code }
            | LinkOutcome::RetryLater { code }
            | LinkOutcome::Failed { code } => Some(code),
            LinkOutcome::CooldownSkipped { .. } => Some("cooldown_active"),
            LinkOutcome::Succeeded(_) => None,
        }
    }
}

/// What is known about a release before any link is tried
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryFacts {
    /// The post id is in the completion ledger
    pub completed: bool,
    /// The band is in the failure ledger
    pub band_failed: bool,
    /// The canonical destination folder exists
    pub folder_exists: bool,
    /// The release lists at least one link
    pub has_links: bool,
}

/// Short-circuit disposition, if the release needs no link attempts
pub fn entry_check(facts: &EntryFacts) -> Option<Disposition> {
    let skip = |reason| Some(Disposition::AlreadyProcessed { reason });

    if facts.completed {
        skip(SkipReason::Completed)
    } else if facts.band_failed {
        skip(SkipReason::BandFailed)
    } else if facts.folder_exists {
        skip(SkipReason::FolderExists)
    } else if !facts.has_links {
        Some(Disposition::NoLinks)
    } else {
        None
    }
}

/// Final disposition once every link has been tried
///
/// The first success wins. A release where every attempt broke off mid-transfer is
/// `Partial`; one where a Mega link is waiting on the cooldown is `Deferred`;
/// anything else fails with the code of the last link.
pub fn settle(outcomes: &[LinkOutcome]) -> Disposition {
    if let Some(destination) = outcomes.iter().find_map(|o| match o {
        LinkOutcome::Succeeded(path) => Some(path.clone()),
        _ => None,
    }) {
        return Disposition::Succeeded { destination };
    }

    if outcomes.is_empty() {
        return Disposition::NoLinks;
    }

    if outcomes.iter().all(|o| matches!(o, LinkOutcome::Partial { .. })) {
        return Disposition::Partial;
    }

    if outcomes.iter().any(LinkOutcome::defers) {
        return Disposition::Deferred;
    }

    let reason = outcomes
        .iter()
        .rev()
        .find_map(LinkOutcome::code)
        .unwrap_or("links_exhausted")
        .to_string();
    Disposition::Failed { reason }
}
