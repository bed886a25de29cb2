// Drydock
// Copyright (C) 2025 - Drydock Project Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// long with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Run outcomes — what a host workflow reports back to the scheduler.

use crate::api::types::{GuestKind, GuestStatus};
use crate::workflow::phase::{Phase, PhaseStatus};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Terminal state of one host's workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalState {
    Succeeded,
    Failed,
    Skipped,
    Aborted,
}

impl fmt::Display for FinalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinalState::Succeeded => "succeeded",
            FinalState::Failed => "failed",
            FinalState::Skipped => "skipped",
            FinalState::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// How a running guest was brought down during GUEST_DRAIN.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainMethod {
    Graceful,
    Forced,
    AlreadyStopped,
}

impl fmt::Display for DrainMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DrainMethod::Graceful => "graceful",
            DrainMethod::Forced => "force",
            DrainMethod::AlreadyStopped => "already-stopped",
        };
        write!(f, "{}", s)
    }
}

/// Result of one per-guest step (upgrade, drain, restart).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    NotAttempted,
    Succeeded,
    DryRan,
    Skipped,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::NotAttempted => write!(f, "not-attempted"),
            StepOutcome::Succeeded => write!(f, "succeeded"),
            StepOutcome::DryRan => write!(f, "dry-ran"),
            StepOutcome::Skipped => write!(f, "skipped"),
            StepOutcome::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Per-guest record accumulated across the workflow phases.
#[derive(Clone, Debug)]
pub struct GuestOutcome {
    pub vmid: u64,
    pub kind: GuestKind,
    pub name: Option<String>,
    /// Whether the manifest inventory marks this guest as managed
    pub managed: bool,
    /// Status observed at DISCOVER time
    pub pre_status: GuestStatus,
    pub upgrade: StepOutcome,
    pub drain: StepOutcome,
    pub drained_via: Option<DrainMethod>,
    pub restart: StepOutcome,
    /// True when the upgrade only succeeded with alternate credentials
    pub used_alternate_credentials: bool,
}

impl GuestOutcome {
    pub fn new(vmid: u64, kind: GuestKind, name: Option<String>, managed: bool, pre_status: GuestStatus) -> Self {
        Self {
            vmid,
            kind,
            name,
            managed,
            pre_status,
            upgrade: StepOutcome::NotAttempted,
            drain: StepOutcome::NotAttempted,
            drained_via: None,
            restart: StepOutcome::NotAttempted,
            used_alternate_credentials: false,
        }
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(n) => format!("{} {} ({})", self.kind, self.vmid, n),
            None => format!("{} {}", self.kind, self.vmid),
        }
    }

    pub fn has_failure(&self) -> bool {
        self.upgrade.is_failure() || self.drain.is_failure() || self.restart.is_failure()
    }
}

/// Everything one host workflow reports back to the scheduler.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub host: String,
    pub final_state: FinalState,
    pub phases: Vec<(Phase, PhaseStatus)>,
    pub guests: Vec<GuestOutcome>,
    /// Non-fatal problems tolerated by policy
    pub warnings: Vec<String>,
    /// Summary of the fatal error, if any
    pub error: Option<String>,
    /// Last phase entered; meaningful for FAILED and ABORTED
    pub last_phase: Option<Phase>,
    pub started: DateTime<Utc>,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn skipped(host: &str, reason: &str) -> Self {
        Self {
            host: host.to_string(),
            final_state: FinalState::Skipped,
            phases: Vec::new(),
            guests: Vec::new(),
            warnings: Vec::new(),
            error: Some(reason.to_string()),
            last_phase: None,
            started: Utc::now(),
            duration: Duration::from_secs(0),
        }
    }

    pub fn is_success(&self) -> bool {
        self.final_state == FinalState::Succeeded
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// One-line status for the recap table, e.g. "succeeded (2 warnings)".
    pub fn status_line(&self) -> String {
        if self.final_state == FinalState::Succeeded && self.has_warnings() {
            format!("succeeded ({} warnings)", self.warnings.len())
        } else {
            match &self.error {
                Some(e) if self.final_state != FinalState::Succeeded => {
                    format!("{}: {}", self.final_state, e)
                }
                _ => self.final_state.to_string(),
            }
        }
    }
}

/// Truncate captured remote output for reports so a noisy package manager
/// cannot flood the recap. Keeps the head, marks the cut.
pub fn truncate_output(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    let mut cut = cap;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated {} bytes]", &s[..cut], s.len() - cut)
}
