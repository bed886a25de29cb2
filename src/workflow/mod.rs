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

pub mod host;
pub mod outcome;
pub mod phase;

use crate::api::HttpProxmoxClient;
use crate::cancel::CancelToken;
use crate::connection::session_factory;
use crate::manifest::resolve::EffectiveHost;
use crate::output::OutputHandlerRef;
use chrono::Utc;
use indexmap::IndexMap;
use outcome::{FinalState, RunOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Secrets resolved at preflight for one host. Holds actual values, so this
/// type never derives Debug and never reaches a log line.
#[derive(Clone)]
pub struct ResolvedCredentials {
    pub token_id: String,
    pub token_secret: String,
    /// Default guest password, when the manifest references one
    pub guest_password: Option<String>,
    /// Per-guest password overrides from the inventory, keyed by vmid
    pub per_guest_passwords: IndexMap<u64, String>,
}

impl ResolvedCredentials {
    pub fn password_for(&self, vmid: u64) -> Option<String> {
        self.per_guest_passwords
            .get(&vmid)
            .cloned()
            .or_else(|| self.guest_password.clone())
    }
}

/// Build the production clients and run one host's workflow to completion.
pub fn run_host(
    host: &EffectiveHost,
    creds: ResolvedCredentials,
    output: OutputHandlerRef,
    cancel: CancelToken,
) -> RunOutcome {
    let client = match HttpProxmoxClient::new(
        host,
        &creds.token_id,
        &creds.token_secret,
        host.dry_run,
        Arc::clone(&output),
        cancel.clone(),
    ) {
        Ok(client) => client,
        Err(e) => {
            return RunOutcome {
                host: host.name.clone(),
                final_state: FinalState::Failed,
                phases: Vec::new(),
                guests: Vec::new(),
                warnings: Vec::new(),
                error: Some(e.to_string()),
                last_phase: None,
                started: Utc::now(),
                duration: Duration::from_secs(0),
            }
        }
    };
    let factory = session_factory(host.dry_run, Arc::clone(&output), cancel.clone());
    host::HostWorkflow::new(host.clone(), creds, Arc::new(client), factory, output, cancel).run()
}
