//! Picking the path to nominate.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::config::NominationPolicy;
use crate::core::PathId;

/// Applies a [`NominationPolicy`] to paths as they become ready.
#[derive(Debug)]
pub(crate) struct Nominator {
    policy: NominationPolicy,
    candidates: Vec<(PathId, Duration)>,
    deadline: Option<Instant>,
    requested: Option<PathId>,
}

impl Nominator {
    pub fn new(policy: NominationPolicy) -> Self {
        Self {
            policy,
            candidates: Vec::new(),
            deadline: None,
            requested: None,
        }
    }

    /// Record that `pid` is ready. Returns the path to nominate now, if any.
    ///
    /// At most one path is ever returned.
    pub fn on_ready(&mut self, pid: PathId, rtt: Duration, now: Instant) -> Option<PathId> {
        if self.requested.is_some() {
            return None;
        }
        match self.policy {
            NominationPolicy::Eager => self.request(pid),
            NominationPolicy::BestRtt { window } => {
                self.candidates.push((pid, rtt));
                if window.is_zero() {
                    return self.best(None);
                }
                if self.deadline.is_none() {
                    debug!(pid, window_ms = window.as_millis() as u64, "Collecting candidates");
                    self.deadline = Some(now + window);
                }
                None
            }
        }
    }

    /// When the collection window closes.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Close the window and pick the best candidate still in `live`.
    pub fn expire(&mut self, live: &[PathId]) -> Option<PathId> {
        self.deadline = None;
        self.best(Some(live))
    }

    /// The path nomination was requested for, if any.
    pub fn requested(&self) -> Option<PathId> {
        self.requested
    }

    fn best(&mut self, live: Option<&[PathId]>) -> Option<PathId> {
        let best = self
            .candidates
            .iter()
            .filter(|(pid, _)| live.is_none_or(|live| live.contains(pid)))
            .min_by_key(|(_, rtt)| *rtt)
            .map(|(pid, _)| *pid);
        self.candidates.clear();
        self.request(best?)
    }

    fn request(&mut self, pid: PathId) -> Option<PathId> {
        if self.requested.is_some() {
            return None;
        }
        self.requested = Some(pid);
        Some(pid)
    }
}
