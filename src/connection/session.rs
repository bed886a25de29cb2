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

//! The session seam: one trait for running commands against a target, with
//! real SSH, nested (through-the-hypervisor) and dry-run implementations
//! behind a factory.

use crate::api::types::GuestDescriptor;
use crate::connection::command::CommandResult;
use crate::error::Result;
use crate::manifest::resolve::EffectiveHost;
use std::sync::Arc;
use std::time::Duration;

/// Resolved login for one guest: credential names replaced by values.
/// Never printed; `Debug` is intentionally not derived.
#[derive(Clone)]
pub struct GuestLogin {
    pub user: String,
    pub identity_file: Option<String>,
    pub extra_args: Vec<String>,
    pub password: Option<String>,
}

/// Executes shell commands on one named target. Implementations serialize
/// their own commands; no two commands run concurrently on one session.
pub trait Session: Send + Sync {
    /// Label for logs, e.g. "pve1" or "pve1/ct 203"
    fn target(&self) -> String;

    /// Default per-command timeout for this session.
    fn command_timeout(&self) -> Duration;

    /// The one required entry point: run `cmd`, optionally feeding `stdin`,
    /// within `timeout`.
    fn run_with_input(
        &self,
        cmd: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult>;

    fn run_with_timeout(&self, cmd: &str, timeout: Duration) -> Result<CommandResult> {
        self.run_with_input(cmd, None, timeout)
    }

    fn run(&self, cmd: &str) -> Result<CommandResult> {
        self.run_with_input(cmd, None, self.command_timeout())
    }

    /// Cheap reachability check (`true` on the remote side).
    fn probe(&self) -> Result<()>;

    /// Drop the transport. Safe to call more than once.
    fn close(&self);
}

/// Builds sessions for a host workflow. The dry-run factory substitutes
/// sessions that log intent and return synthetic success.
pub trait SessionFactory: Send + Sync {
    fn open_hypervisor(&self, host: &EffectiveHost) -> Result<Arc<dyn Session>>;

    /// Open a session into a guest. Containers always route through the
    /// hypervisor (`pct exec`); VMs connect directly when an address is
    /// known and fall back to a nested `ssh` from the hypervisor otherwise.
    fn open_guest(
        &self,
        host: &EffectiveHost,
        hypervisor: &Arc<dyn Session>,
        guest: &GuestDescriptor,
        login: &GuestLogin,
    ) -> Result<Arc<dyn Session>>;
}
