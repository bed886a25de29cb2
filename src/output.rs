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

use crate::workflow::outcome::{FinalState, GuestOutcome, RunOutcome};
use crate::workflow::phase::{Phase, PhaseStatus};
use inline_colorization::{color_green, color_red, color_reset, color_yellow};
use std::sync::Arc;

/// Trait for handling output from drydock operations.
///
/// Secret values must never be passed through any of these hooks.
pub trait OutputHandler: Send + Sync {
    fn on_run_start(&self, host_count: usize, dry_run: bool);
    fn on_host_start(&self, host: &str);
    fn on_phase_start(&self, host: &str, phase: Phase);
    fn on_phase_end(&self, host: &str, phase: Phase, status: PhaseStatus);
    fn on_guest_result(&self, host: &str, guest: &GuestOutcome);
    fn on_host_done(&self, outcome: &RunOutcome);
    fn on_recap(&self, outcomes: &[RunOutcome]);

    /// Dry-run trace: a state-changing operation that was suppressed.
    fn would_execute(&self, target: &str, operation: &str);

    fn log(&self, level: LogLevel, message: &str);
    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }
    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

#[derive(Debug, Clone)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// A no-op output handler for when output is not needed
pub struct NullOutputHandler;

impl OutputHandler for NullOutputHandler {
    fn on_run_start(&self, _host_count: usize, _dry_run: bool) {}
    fn on_host_start(&self, _host: &str) {}
    fn on_phase_start(&self, _host: &str, _phase: Phase) {}
    fn on_phase_end(&self, _host: &str, _phase: Phase, _status: PhaseStatus) {}
    fn on_guest_result(&self, _host: &str, _guest: &GuestOutcome) {}
    fn on_host_done(&self, _outcome: &RunOutcome) {}
    fn on_recap(&self, _outcomes: &[RunOutcome]) {}
    fn would_execute(&self, _target: &str, _operation: &str) {}
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Standard terminal output handler for the CLI
pub struct TerminalOutputHandler {
    pub verbosity: u32,
}

impl TerminalOutputHandler {
    pub fn new(verbosity: u32) -> Self {
        Self { verbosity }
    }

    fn colorize_status(&self, status: PhaseStatus) -> String {
        match status {
            PhaseStatus::Succeeded => format!("{color_green}{}{color_reset}", status),
            PhaseStatus::Failed => format!("{color_red}{}{color_reset}", status),
            PhaseStatus::Skipped | PhaseStatus::DryRan => {
                format!("{color_yellow}{}{color_reset}", status)
            }
        }
    }
}

impl OutputHandler for TerminalOutputHandler {
    fn on_run_start(&self, host_count: usize, dry_run: bool) {
        let mode = if dry_run { " (dry-run)" } else { "" };
        crate::util::terminal::banner(&format!("MAINTENANCE: {} host(s){}", host_count, mode));
    }

    fn on_host_start(&self, host: &str) {
        println!();
        crate::util::terminal::banner(&format!("HOST: {}", host));
    }

    fn on_phase_start(&self, host: &str, phase: Phase) {
        if self.verbosity >= 1 {
            println!("{} => entering {}", host, phase);
        }
    }

    fn on_phase_end(&self, host: &str, phase: Phase, status: PhaseStatus) {
        println!("{} => {} {}", host, phase, self.colorize_status(status));
    }

    fn on_guest_result(&self, host: &str, guest: &GuestOutcome) {
        let status = if guest.has_failure() {
            format!("{color_red}FAILED{color_reset}")
        } else {
            format!("{color_green}OK{color_reset}")
        };
        println!("{} => {} {}", host, guest.label(), status);
        if self.verbosity > 0 || guest.has_failure() {
            println!(
                "  upgrade={} drain={} restart={}",
                guest.upgrade, guest.drain, guest.restart
            );
        }
    }

    fn on_host_done(&self, outcome: &RunOutcome) {
        let colored = match outcome.final_state {
            FinalState::Succeeded => format!("{color_green}{}{color_reset}", outcome.status_line()),
            FinalState::Skipped => format!("{color_yellow}{}{color_reset}", outcome.status_line()),
            _ => format!("{color_red}{}{color_reset}", outcome.status_line()),
        };
        println!("{} => {}", outcome.host, colored);
    }

    fn on_recap(&self, outcomes: &[RunOutcome]) {
        println!();
        crate::util::terminal::banner("RECAP");
        let elements: Vec<(String, String)> = outcomes
            .iter()
            .map(|o| {
                (
                    o.host.clone(),
                    format!("{} ({}s)", o.status_line(), o.duration.as_secs()),
                )
            })
            .collect();
        crate::util::terminal::two_column_table("host", "outcome", &elements);
    }

    fn would_execute(&self, target: &str, operation: &str) {
        println!("{color_yellow}DRY-RUN{color_reset} {} => {}", target, operation);
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug if self.verbosity >= 3 => println!("DEBUG: {}", message),
            LogLevel::Info if self.verbosity >= 1 => println!("INFO: {}", message),
            LogLevel::Warning => println!("WARNING: {}", message),
            LogLevel::Error => eprintln!("ERROR: {}", message),
            _ => {}
        }
    }
}

/// Thread-safe wrapper for output handlers
pub type OutputHandlerRef = Arc<dyn OutputHandler>;
