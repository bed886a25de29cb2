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

use std::fmt;

/// The phases of a single host's maintenance lifecycle, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Init,
    Preflight,
    Discover,
    GuestUpgrade,
    GuestDrain,
    HostUpgrade,
    HostReboot,
    Verify,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Preflight => "preflight",
            Phase::Discover => "discover",
            Phase::GuestUpgrade => "guest_upgrade",
            Phase::GuestDrain => "guest_drain",
            Phase::HostUpgrade => "host_upgrade",
            Phase::HostReboot => "host_reboot",
            Phase::Verify => "verify",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a phase ended for the run report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseStatus {
    Succeeded,
    Failed,
    Skipped,
    DryRan,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::DryRan => "dry-ran",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering_matches_lifecycle() {
        assert!(Phase::Discover < Phase::GuestUpgrade);
        assert!(Phase::GuestUpgrade < Phase::GuestDrain);
        assert!(Phase::GuestDrain < Phase::HostUpgrade);
        assert!(Phase::HostUpgrade < Phase::HostReboot);
        assert!(Phase::HostReboot < Phase::Verify);
        assert!(Phase::Verify < Phase::Done);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Phase::GuestDrain.to_string(), "guest_drain");
        assert_eq!(PhaseStatus::DryRan.to_string(), "dry-ran");
    }
}
