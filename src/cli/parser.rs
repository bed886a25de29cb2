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

use crate::error::{DrydockError, Result};
use crate::manifest::DEFAULT_MANIFEST_PATH;
use crate::util::terminal::{banner, markdown_print};
use std::env;
use std::path::PathBuf;

pub const CLI_MODE_NONE: u32 = 0;
pub const CLI_MODE_MAINTENANCE: u32 = 1;
pub const CLI_MODE_BATCH: u32 = 2;
pub const CLI_MODE_WIZARD: u32 = 3;
pub const CLI_MODE_INVENTORY: u32 = 4;

/// Hand-rolled argv parser for the drydock CLI.
pub struct CliParser {
    pub mode: u32,
    pub manifest_path: PathBuf,
    pub hosts: Vec<String>,
    pub dry_run: bool,
    pub max_parallel: Option<u64>,
    pub verbosity: u32,
    pub needs_help: bool,
    pub needs_version: bool,
}

impl Default for CliParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CliParser {
    pub fn new() -> Self {
        Self {
            mode: CLI_MODE_NONE,
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_PATH),
            hosts: Vec::new(),
            dry_run: false,
            max_parallel: None,
            verbosity: 0,
            needs_help: false,
            needs_version: false,
        }
    }

    pub fn parse(&mut self) -> Result<()> {
        let args: Vec<String> = env::args().skip(1).collect();
        self.parse_args(args)
    }

    pub fn parse_args(&mut self, args: Vec<String>) -> Result<()> {
        if args.is_empty() {
            self.needs_help = true;
            return Ok(());
        }

        let mut iter = args.into_iter().peekable();

        // command + verb
        match iter.peek().map(|s| s.as_str()) {
            Some("--help") | Some("-h") => {
                self.needs_help = true;
                return Ok(());
            }
            Some("--version") => {
                self.needs_version = true;
                return Ok(());
            }
            _ => {}
        }

        let command = iter.next().unwrap_or_default();
        let verb = iter.next().unwrap_or_default();
        self.mode = match (command.as_str(), verb.as_str()) {
            ("maintenance", "run") => CLI_MODE_MAINTENANCE,
            ("batch", "run") => CLI_MODE_BATCH,
            ("wizard", "run") => CLI_MODE_WIZARD,
            ("inventory", "configure") => CLI_MODE_INVENTORY,
            _ => {
                return Err(DrydockError::Config(format!(
                    "unknown command '{} {}', try --help",
                    command, verb
                )))
            }
        };

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => {
                    self.needs_help = true;
                    return Ok(());
                }
                "--manifest" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| DrydockError::Config("--manifest requires a path".into()))?;
                    self.manifest_path = PathBuf::from(value);
                }
                "--host" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| DrydockError::Config("--host requires a name".into()))?;
                    self.hosts.push(value);
                }
                "--dry-run" => {
                    self.dry_run = true;
                }
                "--max-parallel" => {
                    let value = iter.next().ok_or_else(|| {
                        DrydockError::Config("--max-parallel requires a number".into())
                    })?;
                    let n: u64 = value.parse().map_err(|_| {
                        DrydockError::Config(format!("--max-parallel: '{}' is not a number", value))
                    })?;
                    if n < 1 {
                        return Err(DrydockError::Config("--max-parallel must be >= 1".into()));
                    }
                    self.max_parallel = Some(n);
                }
                "-v" => self.verbosity += 1,
                "-vv" => self.verbosity += 2,
                "-vvv" => self.verbosity += 3,
                other => {
                    return Err(DrydockError::Config(format!(
                        "unknown argument '{}', try --help",
                        other
                    )))
                }
            }
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        match self.mode {
            CLI_MODE_MAINTENANCE => {
                if self.hosts.len() != 1 {
                    return Err(DrydockError::Config(
                        "maintenance run requires exactly one --host".into(),
                    ));
                }
                if self.max_parallel.is_some() {
                    return Err(DrydockError::Config(
                        "--max-parallel only applies to batch run".into(),
                    ));
                }
            }
            CLI_MODE_INVENTORY => {
                if self.hosts.len() > 1 {
                    return Err(DrydockError::Config(
                        "inventory configure accepts at most one --host".into(),
                    ));
                }
            }
            CLI_MODE_WIZARD => {
                if !self.hosts.is_empty() {
                    return Err(DrydockError::Config("wizard run takes no --host".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn show_help(&self) {
        banner("drydock - rolling maintenance for Proxmox fleets");
        let usage = "\n\
|:-|:-\n\
|command|what it does\n\
|-|-\n\
|maintenance run --host NAME [--manifest PATH] [--dry-run]|run one host through the full lifecycle\n\
|-|-\n\
|batch run [--manifest PATH] [--host NAME]... [--dry-run] [--max-parallel N]|run the fleet with bounded parallelism\n\
|-|-\n\
|wizard run [--manifest PATH]|edit the manifest interactively (external tool)\n\
|-|-\n\
|inventory configure [--manifest PATH] [--host NAME]|discover and record guests (external tool)\n\
|-|-\n";
        markdown_print(usage);
        println!("manifest defaults to {}; secrets come from the environment", DEFAULT_MANIFEST_PATH);
    }

    pub fn show_version(&self) {
        println!("drydock {}", env!("CARGO_PKG_VERSION"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliParser> {
        let mut p = CliParser::new();
        p.parse_args(args.iter().map(|s| s.to_string()).collect())?;
        Ok(p)
    }

    #[test]
    fn test_maintenance_run() {
        let p = parse(&["maintenance", "run", "--host", "pve1", "--dry-run"]).unwrap();
        assert_eq!(p.mode, CLI_MODE_MAINTENANCE);
        assert_eq!(p.hosts, vec!["pve1"]);
        assert!(p.dry_run);
        assert_eq!(p.manifest_path, PathBuf::from(DEFAULT_MANIFEST_PATH));
    }

    #[test]
    fn test_maintenance_requires_one_host() {
        assert!(parse(&["maintenance", "run"]).is_err());
        assert!(parse(&["maintenance", "run", "--host", "a", "--host", "b"]).is_err());
    }

    #[test]
    fn test_batch_run_with_flags() {
        let p = parse(&[
            "batch",
            "run",
            "--manifest",
            "/etc/drydock/fleet.toml",
            "--host",
            "a",
            "--host",
            "b",
            "--max-parallel",
            "4",
        ])
        .unwrap();
        assert_eq!(p.mode, CLI_MODE_BATCH);
        assert_eq!(p.hosts, vec!["a", "b"]);
        assert_eq!(p.max_parallel, Some(4));
        assert_eq!(p.manifest_path, PathBuf::from("/etc/drydock/fleet.toml"));
    }

    #[test]
    fn test_batch_run_no_hosts_means_all() {
        let p = parse(&["batch", "run"]).unwrap();
        assert!(p.hosts.is_empty());
    }

    #[test]
    fn test_max_parallel_validation() {
        assert!(parse(&["batch", "run", "--max-parallel", "0"]).is_err());
        assert!(parse(&["batch", "run", "--max-parallel", "abc"]).is_err());
        assert!(parse(&["maintenance", "run", "--host", "a", "--max-parallel", "2"]).is_err());
    }

    #[test]
    fn test_wizard_and_inventory_modes() {
        let p = parse(&["wizard", "run"]).unwrap();
        assert_eq!(p.mode, CLI_MODE_WIZARD);
        let p = parse(&["inventory", "configure", "--host", "a"]).unwrap();
        assert_eq!(p.mode, CLI_MODE_INVENTORY);
        assert!(parse(&["wizard", "run", "--host", "a"]).is_err());
    }

    #[test]
    fn test_unknown_command_and_flag() {
        assert!(parse(&["frobnicate", "run"]).is_err());
        assert!(parse(&["batch", "run", "--frobnicate"]).is_err());
    }

    #[test]
    fn test_help_and_version() {
        let p = parse(&["--help"]).unwrap();
        assert!(p.needs_help);
        let p = parse(&["--version"]).unwrap();
        assert!(p.needs_version);
        let p = parse(&[]).unwrap();
        assert!(p.needs_help);
    }

    #[test]
    fn test_verbosity_accumulates() {
        let p = parse(&["batch", "run", "-v", "-v"]).unwrap();
        assert_eq!(p.verbosity, 2);
        let p = parse(&["batch", "run", "-vv"]).unwrap();
        assert_eq!(p.verbosity, 2);
    }
}
