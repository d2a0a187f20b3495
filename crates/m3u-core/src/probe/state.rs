use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::playlist::UrlStatus;

/// Lifecycle of a single probe.
///
/// `Pending` units move to `Dispatched` when a worker picks them up, or
/// straight to `Cancelled`/`TimedOut` when the batch stops before dispatch.
/// A dispatched unit ends in exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
    /// Scheme is not actively checked (`file`, `ftp`).
    Skipped,
}

impl ProbeState {
    pub fn can_transition_to(self, target: ProbeState) -> bool {
        matches!(
            (self, target),
            (ProbeState::Pending, ProbeState::Dispatched)
                | (ProbeState::Pending, ProbeState::Cancelled)
                | (ProbeState::Pending, ProbeState::TimedOut)
                | (ProbeState::Dispatched, ProbeState::Succeeded)
                | (ProbeState::Dispatched, ProbeState::Failed)
                | (ProbeState::Dispatched, ProbeState::TimedOut)
                | (ProbeState::Dispatched, ProbeState::Cancelled)
                | (ProbeState::Dispatched, ProbeState::Skipped)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ProbeState::Pending | ProbeState::Dispatched)
    }
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Terminal result of probing one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub url: String,
    pub state: ProbeState,
    /// Tri-state reachability applied to the owning channels.
    pub status: UrlStatus,
    /// Round-trip time of the request that decided the outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

impl ProbeOutcome {
    fn new(url: &str, state: ProbeState, status: UrlStatus, message: impl Into<String>) -> Self {
        debug_assert!(state.is_terminal());
        Self {
            url: url.to_string(),
            state,
            status,
            elapsed: None,
            status_code: None,
            message: message.into(),
            checked_at: Utc::now(),
        }
    }

    pub fn succeeded(url: &str, message: impl Into<String>) -> Self {
        Self::new(url, ProbeState::Succeeded, UrlStatus::Reachable, message)
    }

    pub fn failed(url: &str, message: impl Into<String>) -> Self {
        Self::new(url, ProbeState::Failed, UrlStatus::Unreachable, message)
    }

    pub fn timed_out(url: &str, message: impl Into<String>) -> Self {
        Self::new(url, ProbeState::TimedOut, UrlStatus::Unreachable, message)
    }

    /// Cancellation says nothing about the link, so the status stays unknown.
    pub fn cancelled(url: &str) -> Self {
        Self::new(url, ProbeState::Cancelled, UrlStatus::Unknown, "cancelled")
    }

    pub fn skipped(url: &str, message: impl Into<String>) -> Self {
        Self::new(url, ProbeState::Skipped, UrlStatus::Unknown, message)
    }

    /// A unit the batch deadline stopped; like cancellation, it says nothing
    /// about the link.
    pub fn deadline_reached(url: &str) -> Self {
        Self::new(
            url,
            ProbeState::TimedOut,
            UrlStatus::Unknown,
            "batch deadline reached before probe finished",
        )
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn is_reachable(&self) -> bool {
        self.status == UrlStatus::Reachable
    }

    /// Whether the outcome describes the link rather than the batch having
    /// been stopped.
    pub fn is_conclusive(&self) -> bool {
        match self.state {
            ProbeState::Cancelled => false,
            ProbeState::TimedOut => self.status != UrlStatus::Unknown,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        assert!(ProbeState::Pending.can_transition_to(ProbeState::Dispatched));
        assert!(ProbeState::Pending.can_transition_to(ProbeState::Cancelled));
        assert!(ProbeState::Dispatched.can_transition_to(ProbeState::TimedOut));
        assert!(ProbeState::Dispatched.can_transition_to(ProbeState::Skipped));
        assert!(!ProbeState::Pending.can_transition_to(ProbeState::Succeeded));
        assert!(!ProbeState::Pending.can_transition_to(ProbeState::Skipped));
        assert!(!ProbeState::Dispatched.can_transition_to(ProbeState::Pending));
        assert!(!ProbeState::Succeeded.can_transition_to(ProbeState::Failed));
        assert!(!ProbeState::Cancelled.can_transition_to(ProbeState::Dispatched));
    }

    #[test]
    fn terminal_states() {
        assert!(!ProbeState::Pending.is_terminal());
        assert!(!ProbeState::Dispatched.is_terminal());
        for s in [
            ProbeState::Succeeded,
            ProbeState::Failed,
            ProbeState::TimedOut,
            ProbeState::Cancelled,
            ProbeState::Skipped,
        ] {
            assert!(s.is_terminal(), "{s}");
        }
    }

    #[test]
    fn cancelled_outcome_is_inconclusive() {
        let o = ProbeOutcome::cancelled("http://a");
        assert_eq!(o.status, UrlStatus::Unknown);
        assert!(!o.is_conclusive());
        assert!(!ProbeOutcome::deadline_reached("http://a").is_conclusive());
        assert!(ProbeOutcome::timed_out("http://a", "timeout after 10s").is_conclusive());
        assert!(ProbeOutcome::failed("http://a", "refused").is_conclusive());
    }
}
