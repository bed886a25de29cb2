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

pub mod api;
pub mod cancel;
pub mod cli;
pub mod connection;
pub mod error;
pub mod manifest;
pub mod output;
pub mod scheduler;
pub mod secrets;
pub mod upgrade;
pub mod util;
pub mod workflow;

// Re-export commonly used types for library users
pub use cancel::CancelToken;
pub use error::{DrydockError, Result};
pub use manifest::loading::{load_manifest, parse_manifest, save_manifest};
pub use manifest::resolve::{effective_hosts, resolve_host, EffectiveHost};
pub use manifest::Manifest;
pub use output::{NullOutputHandler, OutputHandler, OutputHandlerRef, TerminalOutputHandler};
pub use scheduler::{FleetReport, FleetScheduler, SchedulerOptions};
pub use secrets::{EnvSecrets, SecretSource, StaticSecrets};
pub use workflow::outcome::{FinalState, RunOutcome};
