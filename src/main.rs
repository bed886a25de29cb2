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

use drydock::cancel::{install_ctrl_c_handler, CancelToken};
use drydock::cli::parser::{
    CliParser, CLI_MODE_BATCH, CLI_MODE_INVENTORY, CLI_MODE_MAINTENANCE, CLI_MODE_WIZARD,
};
use drydock::error::DrydockError;
use drydock::manifest::loading::load_manifest;
use drydock::output::{OutputHandlerRef, TerminalOutputHandler};
use drydock::scheduler::{FleetScheduler, SchedulerOptions};
use drydock::secrets::EnvSecrets;
use std::process;
use std::sync::Arc;

fn main() {
    process::exit(liftoff());
}

fn liftoff() -> i32 {
    let mut parser = CliParser::new();
    if let Err(e) = parser.parse() {
        eprintln!("{}", e);
        return 64;
    }

    if parser.needs_help {
        parser.show_help();
        return 0;
    }
    if parser.needs_version {
        parser.show_version();
        return 0;
    }

    match parser.mode {
        CLI_MODE_MAINTENANCE | CLI_MODE_BATCH => run_maintenance(&parser),
        CLI_MODE_WIZARD => exec_collaborator("drydock-wizard", &parser),
        CLI_MODE_INVENTORY => exec_collaborator("drydock-inventory", &parser),
        _ => {
            parser.show_help();
            64
        }
    }
}

fn run_maintenance(parser: &CliParser) -> i32 {
    let cancel = CancelToken::new();
    install_ctrl_c_handler(&cancel);
    let output: OutputHandlerRef = Arc::new(TerminalOutputHandler::new(parser.verbosity));

    let manifest = match load_manifest(&parser.manifest_path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            return exit_code_for(&e);
        }
    };

    let scheduler = FleetScheduler::new(manifest, Arc::new(EnvSecrets), output, cancel);
    let options = SchedulerOptions {
        hosts: if parser.hosts.is_empty() {
            None
        } else {
            Some(parser.hosts.clone())
        },
        dry_run: parser.dry_run,
        max_parallel: parser.max_parallel,
    };

    match scheduler.run(&options) {
        Ok(report) => report.exit_code(),
        Err(e) => {
            eprintln!("{}", e);
            exit_code_for(&e)
        }
    }
}

/// The interactive editor and the discovery wizard live outside this binary;
/// hand the manifest path over and mirror their exit status.
fn exec_collaborator(program: &str, parser: &CliParser) -> i32 {
    let mut command = process::Command::new(program);
    command.arg("--manifest").arg(&parser.manifest_path);
    for host in parser.hosts.iter() {
        command.arg("--host").arg(host);
    }
    match command.status() {
        Ok(status) => status.code().unwrap_or(2),
        Err(_) => {
            eprintln!("external tool '{}' not found on PATH", program);
            2
        }
    }
}

fn exit_code_for(e: &DrydockError) -> i32 {
    match e {
        DrydockError::ManifestNotFound(_) => 65,
        DrydockError::ManifestSyntax(_)
        | DrydockError::ManifestInvalid(_)
        | DrydockError::ForbiddenOverride { .. }
        | DrydockError::Config(_) => 64,
        DrydockError::Cancelled => 130,
        _ => 2,
    }
}
