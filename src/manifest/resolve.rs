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

//! Inheritance resolution: defaults plus one host entry become the
//! `EffectiveHost` view the workflow runs from. Host values win for every
//! field except the forbidden four, which only defaults may set. Secret
//! names are carried as names here; preflight resolves them.

use crate::api::types::GuestKind;
use crate::error::{DrydockError, Result};
use crate::manifest::{
    GuestBlock, HostEntry, Manifest, TokenRef, DEFAULT_COMMAND_TIMEOUT_S,
    DEFAULT_CONNECT_TIMEOUT_S, DEFAULT_HOST_DEADLINE_S, DEFAULT_REBOOT_DEADLINE_S,
    DEFAULT_SSH_PORT, DEFAULT_SHUTDOWN_DEADLINE_S, DEFAULT_STDERR_CAP_BYTES,
    DEFAULT_VERIFY_DEADLINE_S,
};
use indexmap::IndexMap;
use std::time::Duration;

/// Fields a host entry may never set; they live in [defaults] only.
pub const FORBIDDEN_OVERRIDES: [&str; 4] = [
    "identity_file",
    "ssh.extra_args",
    "guest.user",
    "guest.identity_file",
];

#[derive(Clone, Debug)]
pub struct SshProfile {
    pub user: String,
    pub identity_file: Option<String>,
    pub extra_args: Vec<String>,
    pub port: u16,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct GuestCredentials {
    pub user: String,
    pub identity_file: Option<String>,
    pub extra_args: Vec<String>,
    /// Secret name; the value is resolved at preflight, never stored here
    pub password_env: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ApiCredentials {
    pub node: String,
    pub token_id: TokenRef,
    pub secret_env: String,
    pub verify_tls: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestFailurePolicy {
    Continue,
    Abort,
}

impl GuestFailurePolicy {
    fn parse(s: Option<&str>) -> Self {
        match s {
            Some("abort") => GuestFailurePolicy::Abort,
            _ => GuestFailurePolicy::Continue,
        }
    }
}

/// Per-guest credential override from the inventory.
#[derive(Clone, Debug, Default)]
pub struct GuestOverride {
    pub user: Option<String>,
    pub identity_file: Option<String>,
    pub password_env: Option<String>,
}

impl GuestOverride {
    fn from_block(block: &GuestBlock) -> Option<Self> {
        if block.is_empty() {
            return None;
        }
        Some(Self {
            user: block.user.clone(),
            identity_file: block.identity_file.clone(),
            password_env: block.password_env.clone(),
        })
    }

    pub fn is_some(&self) -> bool {
        self.user.is_some() || self.identity_file.is_some() || self.password_env.is_some()
    }
}

/// A manifest inventory entry with its identifier normalized.
#[derive(Clone, Debug)]
pub struct InventoryEntry {
    pub vmid: u64,
    pub kind: GuestKind,
    pub managed: bool,
    pub notes: Option<String>,
    pub overrides: Option<GuestOverride>,
}

/// Everything the host workflow needs, fully inherited.
///
/// Invariants (upheld by validation + resolution): `api.node`,
/// `api.token_id`, `api.secret_env` present; `ssh.user` non-empty;
/// `max_parallel >= 1`.
#[derive(Clone, Debug)]
pub struct EffectiveHost {
    pub name: String,
    pub address: String,
    pub ssh: SshProfile,
    pub guest: GuestCredentials,
    pub api: ApiCredentials,
    pub max_parallel: u64,
    pub guest_parallel: u64,
    pub dry_run: bool,
    pub shutdown_deadline: Duration,
    pub reboot_deadline: Duration,
    pub verify_deadline: Duration,
    pub host_deadline: Duration,
    pub stderr_cap: usize,
    pub on_guest_failure: GuestFailurePolicy,
    pub guest_policy: IndexMap<u64, GuestFailurePolicy>,
    pub inventory: Vec<InventoryEntry>,
}

impl EffectiveHost {
    /// Policy for one guest: the per-guest map wins over the host default.
    pub fn policy_for(&self, vmid: u64) -> GuestFailurePolicy {
        self.guest_policy
            .get(&vmid)
            .copied()
            .unwrap_or(self.on_guest_failure)
    }
}

fn expand_identity_file(path: Option<&str>) -> Option<String> {
    let p = path?;
    match expanduser::expanduser(p) {
        Ok(expanded) => Some(expanded.display().to_string()),
        Err(_) => Some(p.to_string()),
    }
}

/// Resolve one host entry against the manifest defaults.
pub fn resolve_host(manifest: &Manifest, host: &HostEntry) -> Result<EffectiveHost> {
    let d = &manifest.defaults;
    let name = host
        .name
        .clone()
        .ok_or_else(|| DrydockError::ManifestInvalid(vec!["host without a name".into()]))?;
    let address = host
        .host
        .clone()
        .ok_or_else(|| DrydockError::ManifestInvalid(vec![format!("host '{}' has no address", name)]))?;

    let user = host
        .user
        .clone()
        .or_else(|| d.user.clone())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            DrydockError::ManifestInvalid(vec![format!("host '{}' has no SSH user", name)])
        })?;

    let ssh = SshProfile {
        user,
        // identity_file and extra_args come from defaults only
        identity_file: expand_identity_file(d.identity_file.as_deref()),
        extra_args: d.ssh.extra_args.clone().unwrap_or_default(),
        port: host.ssh.port.or(d.ssh.port).unwrap_or(DEFAULT_SSH_PORT),
        connect_timeout: Duration::from_secs(
            host.ssh
                .connect_timeout_s
                .or(d.ssh.connect_timeout_s)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_S),
        ),
        command_timeout: Duration::from_secs(
            host.ssh
                .command_timeout_s
                .or(d.ssh.command_timeout_s)
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_S),
        ),
    };

    // Guest credentials inherit from defaults wholesale; per-host guest.user
    // and guest.identity_file are rejected by validation before we get here.
    let guest = GuestCredentials {
        user: d.guest.user.clone().unwrap_or_else(|| String::from("root")),
        identity_file: expand_identity_file(d.guest.identity_file.as_deref()),
        extra_args: d.guest.ssh.extra_args.clone().unwrap_or_default(),
        password_env: host
            .guest
            .password_env
            .clone()
            .or_else(|| d.guest.password_env.clone()),
    };

    let api_block = &host.api;
    let api = ApiCredentials {
        node: api_block
            .node
            .clone()
            .ok_or_else(|| DrydockError::ManifestInvalid(vec![format!("host '{}' missing api.node", name)]))?,
        token_id: api_block
            .token_id
            .clone()
            .ok_or_else(|| DrydockError::ManifestInvalid(vec![format!("host '{}' missing api.token_id", name)]))?,
        secret_env: api_block
            .secret_env
            .clone()
            .ok_or_else(|| DrydockError::ManifestInvalid(vec![format!("host '{}' missing api.secret_env", name)]))?,
        verify_tls: api_block.verify_tls.unwrap_or(true),
    };

    let mut guest_policy = IndexMap::new();
    for (key, value) in d.guest_policy.iter() {
        if let Ok(vmid) = key.parse::<u64>() {
            guest_policy.insert(vmid, GuestFailurePolicy::parse(Some(value.as_str())));
        }
    }

    let mut inventory = Vec::new();
    for entry in host.guest_inventory.iter() {
        let vmid = entry.identifier.as_vmid().ok_or_else(|| {
            DrydockError::ManifestInvalid(vec![format!(
                "host '{}': bad guest identifier in inventory",
                name
            )])
        })?;
        let kind = match entry.kind.as_deref() {
            Some("container") => GuestKind::Container,
            _ => GuestKind::Vm,
        };
        inventory.push(InventoryEntry {
            vmid,
            kind,
            managed: entry.is_managed(),
            notes: entry.notes.clone(),
            overrides: GuestOverride::from_block(&entry.guest),
        });
    }

    Ok(EffectiveHost {
        name,
        address,
        ssh,
        guest,
        api,
        max_parallel: host.max_parallel.or(d.max_parallel).unwrap_or(1).max(1),
        guest_parallel: host.guest_parallel.or(d.guest_parallel).unwrap_or(1).max(1),
        dry_run: host.dry_run.or(d.dry_run).unwrap_or(false),
        shutdown_deadline: Duration::from_secs(
            host.shutdown_deadline_s
                .or(d.shutdown_deadline_s)
                .unwrap_or(DEFAULT_SHUTDOWN_DEADLINE_S),
        ),
        reboot_deadline: Duration::from_secs(
            host.reboot_deadline_s
                .or(d.reboot_deadline_s)
                .unwrap_or(DEFAULT_REBOOT_DEADLINE_S),
        ),
        verify_deadline: Duration::from_secs(
            host.verify_deadline_s
                .or(d.verify_deadline_s)
                .unwrap_or(DEFAULT_VERIFY_DEADLINE_S),
        ),
        host_deadline: Duration::from_secs(
            d.host_deadline_s.unwrap_or(DEFAULT_HOST_DEADLINE_S),
        ),
        stderr_cap: d.stderr_cap_bytes.unwrap_or(DEFAULT_STDERR_CAP_BYTES),
        on_guest_failure: GuestFailurePolicy::parse(
            host.on_guest_failure
                .as_deref()
                .or(d.on_guest_failure.as_deref()),
        ),
        guest_policy,
        inventory,
    })
}

/// Resolve every host in manifest order.
pub fn effective_hosts(manifest: &Manifest) -> Result<Vec<EffectiveHost>> {
    manifest
        .hosts
        .iter()
        .map(|h| resolve_host(manifest, h))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::loading::parse_manifest;

    const DOC: &str = r#"
[defaults]
user = "root"
identity_file = "/keys/default_id"
max_parallel = 4
guest_parallel = 2
dry_run = false
shutdown_deadline_s = 90

[defaults.ssh]
extra_args = ["-o", "StrictHostKeyChecking=no"]

[defaults.guest]
user = "admin"
identity_file = "/keys/guest_id"

[[hosts]]
name = "inherits"
host = "10.0.0.10"
[hosts.api]
node = "n1"
token_id = "root@pam!a"
secret_env = "S1"

[[hosts]]
name = "overrides"
host = "10.0.0.11"
user = "ops"
max_parallel = 8
dry_run = true
shutdown_deadline_s = 30
[hosts.api]
node = "n2"
token_id = { env = "T2" }
secret_env = "S2"
verify_tls = false

[[hosts.guest_inventory]]
identifier = 100
kind = "vm"

[[hosts.guest_inventory]]
identifier = "203"
kind = "container"
managed = false
notes = "appliance, leave alone"
"#;

    #[test]
    fn test_inheritance_defaults_apply_when_host_silent() {
        let m = parse_manifest(DOC).unwrap();
        let e = resolve_host(&m, m.host("inherits").unwrap()).unwrap();
        assert_eq!(e.ssh.user, "root");
        assert_eq!(e.max_parallel, 4);
        assert_eq!(e.guest_parallel, 2);
        assert!(!e.dry_run);
        assert_eq!(e.shutdown_deadline, Duration::from_secs(90));
        assert_eq!(e.reboot_deadline, Duration::from_secs(600));
        assert_eq!(e.verify_deadline, Duration::from_secs(180));
        assert!(e.api.verify_tls);
    }

    #[test]
    fn test_inheritance_host_values_win_for_allowed_fields() {
        let m = parse_manifest(DOC).unwrap();
        let e = resolve_host(&m, m.host("overrides").unwrap()).unwrap();
        assert_eq!(e.ssh.user, "ops");
        assert_eq!(e.max_parallel, 8);
        assert!(e.dry_run);
        assert_eq!(e.shutdown_deadline, Duration::from_secs(30));
        assert!(!e.api.verify_tls);
        assert_eq!(e.api.node, "n2");
    }

    #[test]
    fn test_forbidden_fields_always_come_from_defaults() {
        let m = parse_manifest(DOC).unwrap();
        for host in ["inherits", "overrides"] {
            let e = resolve_host(&m, m.host(host).unwrap()).unwrap();
            assert_eq!(e.ssh.identity_file.as_deref(), Some("/keys/default_id"));
            assert_eq!(e.ssh.extra_args, vec!["-o", "StrictHostKeyChecking=no"]);
            assert_eq!(e.guest.user, "admin");
            assert_eq!(e.guest.identity_file.as_deref(), Some("/keys/guest_id"));
        }
    }

    #[test]
    fn test_inventory_entries_resolved() {
        let m = parse_manifest(DOC).unwrap();
        let e = resolve_host(&m, m.host("overrides").unwrap()).unwrap();
        assert_eq!(e.inventory.len(), 2);
        assert_eq!(e.inventory[0].vmid, 100);
        assert_eq!(e.inventory[0].kind, GuestKind::Vm);
        assert!(e.inventory[0].managed);
        assert_eq!(e.inventory[1].vmid, 203);
        assert_eq!(e.inventory[1].kind, GuestKind::Container);
        assert!(!e.inventory[1].managed);
        assert_eq!(e.inventory[1].notes.as_deref(), Some("appliance, leave alone"));
    }

    #[test]
    fn test_tilde_expansion_of_identity_file() {
        let doc = r#"
[defaults]
user = "root"
identity_file = "~/.ssh/id_ed25519"

[[hosts]]
name = "a"
host = "h"
[hosts.api]
node = "a"
token_id = "t"
secret_env = "S"
"#;
        let m = parse_manifest(doc).unwrap();
        let e = resolve_host(&m, m.host("a").unwrap()).unwrap();
        let id = e.ssh.identity_file.unwrap();
        assert!(!id.starts_with('~'), "expected expansion, got {}", id);
        assert!(id.ends_with(".ssh/id_ed25519"));
    }

    #[test]
    fn test_guest_policy_lookup() {
        let doc = r#"
[defaults]
user = "root"
on_guest_failure = "continue"

[defaults.guest_policy]
100 = "abort"

[[hosts]]
name = "a"
host = "h"
[hosts.api]
node = "a"
token_id = "t"
secret_env = "S"
"#;
        let m = parse_manifest(doc).unwrap();
        let e = resolve_host(&m, m.host("a").unwrap()).unwrap();
        assert_eq!(e.policy_for(100), GuestFailurePolicy::Abort);
        assert_eq!(e.policy_for(101), GuestFailurePolicy::Continue);
    }

    #[test]
    fn test_max_parallel_floor_is_one() {
        let doc = r#"
[defaults]
user = "root"

[[hosts]]
name = "a"
host = "h"
[hosts.api]
node = "a"
token_id = "t"
secret_env = "S"
"#;
        let m = parse_manifest(doc).unwrap();
        let e = resolve_host(&m, m.host("a").unwrap()).unwrap();
        assert_eq!(e.max_parallel, 1);
        assert_eq!(e.guest_parallel, 1);
    }
}
