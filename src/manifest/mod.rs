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

//! The fleet manifest: a TOML document describing defaults and hosts.
//!
//! Every table carries a flattened map of unknown keys so documents written
//! by newer tools (or hand-edited) round-trip without loss. Unknown keys are
//! preserved verbatim and never interpreted.

pub mod edit;
pub mod loading;
pub mod resolve;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Conventional manifest location, relative to the working directory.
pub const DEFAULT_MANIFEST_PATH: &str = "./proxmox-hosts.toml";

pub const DEFAULT_SHUTDOWN_DEADLINE_S: u64 = 120;
pub const DEFAULT_REBOOT_DEADLINE_S: u64 = 600;
pub const DEFAULT_VERIFY_DEADLINE_S: u64 = 180;
pub const DEFAULT_HOST_DEADLINE_S: u64 = 3600;
pub const DEFAULT_STDERR_CAP_BYTES: usize = 2000;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT_S: u64 = 10;
pub const DEFAULT_COMMAND_TIMEOUT_S: u64 = 600;

/// Keys captured from the document but not part of the schema.
pub type UnknownKeys = IndexMap<String, toml::Value>;

/// SSH connection options shared by hypervisor and guest profiles.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SshBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_s: Option<u64>,
    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

impl SshBlock {
    pub fn is_empty(&self) -> bool {
        self.extra_args.is_none()
            && self.port.is_none()
            && self.connect_timeout_s.is_none()
            && self.command_timeout_s.is_none()
            && self.unknown.is_empty()
    }
}

/// Guest login settings: defaults-level credentials or a per-guest override.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct GuestBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    /// Secret name holding the guest password, resolved at preflight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(default, skip_serializing_if = "SshBlock::is_empty")]
    pub ssh: SshBlock,
    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

impl GuestBlock {
    pub fn is_empty(&self) -> bool {
        self.user.is_none()
            && self.identity_file.is_none()
            && self.password_env.is_none()
            && self.ssh.is_empty()
            && self.unknown.is_empty()
    }
}

/// An API token id is either a literal string or a reference to a secret.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum TokenRef {
    Literal(String),
    Env { env: String },
}

/// Per-host Proxmox API credentials.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ApiBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<TokenRef>,
    /// Secret name holding the token secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_tls: Option<bool>,
    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

/// Guest identifier as written in the manifest: numeric id or string form.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum GuestIdent {
    Int(i64),
    Str(String),
}

impl GuestIdent {
    pub fn as_vmid(&self) -> Option<u64> {
        match self {
            GuestIdent::Int(i) if *i > 0 => Some(*i as u64),
            GuestIdent::Int(_) => None,
            GuestIdent::Str(s) => s.trim().parse::<u64>().ok().filter(|v| *v > 0),
        }
    }
}

/// One `[[hosts.guest_inventory]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GuestInventoryEntry {
    pub identifier: GuestIdent,
    /// "vm" or "container"; validated schematically
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "GuestBlock::is_empty")]
    pub guest: GuestBlock,
    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

impl GuestInventoryEntry {
    pub fn is_managed(&self) -> bool {
        self.managed.unwrap_or(true)
    }
}

/// The `[defaults]` table. Host entries inherit from here; four fields may
/// only ever live here (see `resolve::FORBIDDEN_OVERRIDES`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct DefaultsBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    #[serde(default, skip_serializing_if = "SshBlock::is_empty")]
    pub ssh: SshBlock,
    #[serde(default, skip_serializing_if = "GuestBlock::is_empty")]
    pub guest: GuestBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_parallel: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_deadline_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reboot_deadline_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_deadline_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_deadline_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_cap_bytes: Option<usize>,
    /// "continue" (default) or "abort": what a guest upgrade failure does to
    /// the host workflow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_guest_failure: Option<String>,
    /// Per-guest policy map, vmid -> "continue" | "abort"
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub guest_policy: IndexMap<String, String>,
    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

/// One `[[hosts]]` entry. Overridable fields mirror `DefaultsBlock`; the
/// forbidden four are intentionally absent from this struct, so if a
/// document sets them here they land in `unknown`/sub-block fields where
/// validation can reject them.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HostEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub api: ApiBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "SshBlock::is_empty")]
    pub ssh: SshBlock,
    #[serde(default, skip_serializing_if = "GuestBlock::is_empty")]
    pub guest: GuestBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_parallel: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_deadline_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reboot_deadline_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_deadline_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_guest_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guest_inventory: Vec<GuestInventoryEntry>,
    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

impl Default for HostEntry {
    fn default() -> Self {
        Self {
            name: None,
            host: None,
            api: ApiBlock::default(),
            user: None,
            ssh: SshBlock::default(),
            guest: GuestBlock::default(),
            max_parallel: None,
            guest_parallel: None,
            dry_run: None,
            shutdown_deadline_s: None,
            reboot_deadline_s: None,
            verify_deadline_s: None,
            on_guest_failure: None,
            guest_inventory: Vec::new(),
            unknown: UnknownKeys::new(),
        }
    }
}

impl HostEntry {
    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// The whole parsed document: defaults, ordered hosts, preserved extras.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "defaults_is_empty")]
    pub defaults: DefaultsBlock,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<HostEntry>,
    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

fn defaults_is_empty(d: &DefaultsBlock) -> bool {
    *d == DefaultsBlock::default()
}

impl Manifest {
    pub fn host(&self, name: &str) -> Option<&HostEntry> {
        self.hosts.iter().find(|h| h.name_or_empty() == name)
    }

    pub fn host_names(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.name_or_empty().to_string()).collect()
    }

    pub fn max_parallel(&self) -> u64 {
        self.defaults.max_parallel.unwrap_or(1).max(1)
    }

    pub fn dry_run(&self) -> bool {
        self.defaults.dry_run.unwrap_or(false)
    }
}
