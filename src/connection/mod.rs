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

pub mod command;
pub mod dryrun;
pub mod session;
pub mod ssh;

use crate::cancel::CancelToken;
use crate::connection::dryrun::DryRunSessionFactory;
use crate::connection::session::SessionFactory;
use crate::connection::ssh::SshSessionFactory;
use crate::output::OutputHandlerRef;
use std::sync::Arc;

/// Pick the session factory for a run.
pub fn session_factory(
    dry_run: bool,
    output: OutputHandlerRef,
    cancel: CancelToken,
) -> Arc<dyn SessionFactory> {
    if dry_run {
        Arc::new(DryRunSessionFactory::new(output))
    } else {
        Arc::new(SshSessionFactory::new(output, cancel))
    }
}
