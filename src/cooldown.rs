//! Process-wide Mega cooldown
//!
//! A single deadline, set when the Mega backend reports a quota condition or times
//! out, and read before every Mega attempt. Time comes from an injectable [`Clock`]
//! so tests can move it by hand. The deadline is persisted so that a restart does
//! not forget an active cooldown.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = add_saturating(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn add_saturating(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Serialize, Deserialize)]
struct CooldownState {
    until: DateTime<Utc>,
}

/// Cooldown deadline shared by the release processor and the Mega resolver
pub struct Cooldown {
    clock: Arc<dyn Clock>,
    length: Duration,
    deadline: Mutex<Option<DateTime<Utc>>>,
    state_path: Option<PathBuf>,
}

impl Cooldown {
    /// In-memory cooldown of the given length
    pub fn new(clock: Arc<dyn Clock>, length: Duration) -> Self {
        Self {
            clock,
            length,
            deadline: Mutex::new(None),
            state_path: None,
        }
    }

    /// Cooldown persisted at `path`, restoring any deadline stored there
    ///
    /// A missing file means no cooldown; an unreadable one is logged and ignored.
    pub fn with_state_file(clock: Arc<dyn Clock>, length: Duration, path: &Path) -> Self {
        let restored = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<CooldownState>(&content) {
                Ok(state) => Some(state.until),
                Err(e) => {
                    warn!(path = ?path, error = %e, "ignoring unreadable cooldown state");
                    None
                }
            },
            Err(_) => None,
        };

        if let Some(until) = restored {
            debug!(%until, "restored mega cooldown deadline");
        }

        Self {
            clock,
            length,
            deadline: Mutex::new(restored),
            state_path: Some(path.to_path_buf()),
        }
    }

    /// Current time according to the injected clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Active deadline, if the cooldown has not yet passed
    pub fn active_until(&self) -> Option<DateTime<Utc>> {
        let deadline = *self.deadline.lock().unwrap_or_else(|e| e.into_inner());
        deadline.filter(|until| *until > self.clock.now())
    }

    /// Whether Mega attempts are currently suppressed
    pub fn is_active(&self) -> bool {
        self.active_until().is_some()
    }

    /// Start (or extend) the cooldown from now; returns the new deadline
    ///
    /// An existing later deadline is never shortened.
    pub fn trigger(&self) -> DateTime<Utc> {
        let candidate = add_saturating(self.clock.now(), self.length);
        let until = {
            let mut deadline = self.deadline.lock().unwrap_or_else(|e| e.into_inner());
            let until = match *deadline {
                Some(existing) if existing > candidate => existing,
                _ => candidate,
            };
            *deadline = Some(until);
            until
        };

        info!(%until, "mega cooldown started");
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist mega cooldown");
        }
        until
    }

    /// Write the deadline to the state file; removes the file once the deadline passed
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };

        match self.active_until() {
            Some(until) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)?;
                }
                let content = serde_json::to_string(&CooldownState { until })?;
                std::fs::write(path, content)?;
            }
            None => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Cooldown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cooldown")
            .field("length", &self.length)
            .field("active_until", &self.active_until())
            .field("state_path", &self.state_path)
            .finish()
    }
}
