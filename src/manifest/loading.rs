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

//! Manifest parsing in two passes: syntax first, then schema with every
//! problem collected before reporting.

use crate::error::{DrydockError, Result};
use crate::manifest::{GuestInventoryEntry, HostEntry, Manifest};
use crate::util::io::{read_local_file, write_local_file};
use std::collections::HashSet;
use std::path::Path;

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    if !path.exists() {
        return Err(DrydockError::ManifestNotFound(path.display().to_string()));
    }
    let text = read_local_file(path)?;
    parse_manifest(&text)
}

pub fn parse_manifest(text: &str) -> Result<Manifest> {
    // Pass 1: syntax. Anything that is not a well-formed document stops here.
    let value: toml::Value =
        toml::from_str(text).map_err(|e| DrydockError::ManifestSyntax(e.to_string()))?;

    // Typed shape. Going through toml::Value keeps untagged enums and
    // flattened unknown-key maps working.
    let manifest: Manifest = value
        .try_into()
        .map_err(|e: toml::de::Error| DrydockError::ManifestInvalid(vec![e.to_string()]))?;

    // Pass 2: schema. All problems are collected, not just the first.
    validate_manifest(&manifest)?;
    Ok(manifest)
}

pub fn render_manifest(manifest: &Manifest) -> Result<String> {
    let value = toml::Value::try_from(manifest)
        .map_err(|e| DrydockError::Config(format!("manifest serialization failed: {}", e)))?;
    toml::to_string_pretty(&value)
        .map_err(|e| DrydockError::Config(format!("manifest serialization failed: {}", e)))
}

pub fn save_manifest(manifest: &Manifest, path: &Path) -> Result<()> {
    let text = render_manifest(manifest)?;
    write_local_file(path, &text)
}

/// Schema validation. Forbidden overrides take precedence because they have
/// their own error kind; everything else is accumulated into
/// `ManifestInvalid`.
pub fn validate_manifest(manifest: &Manifest) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();

    if let Some(forbidden) = find_forbidden_override(manifest) {
        return Err(forbidden);
    }

    validate_defaults(manifest, &mut problems);

    let mut seen_names: HashSet<String> = HashSet::new();
    for (idx, host) in manifest.hosts.iter().enumerate() {
        validate_host(manifest, idx, host, &mut seen_names, &mut problems);
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(DrydockError::ManifestInvalid(problems))
    }
}

/// The four fields that must live in [defaults]. `identity_file` has no
/// field on `HostEntry` so it surfaces in the unknown-key map; the other
/// three are regular fields on the host's sub-blocks.
fn find_forbidden_override(manifest: &Manifest) -> Option<DrydockError> {
    for host in manifest.hosts.iter() {
        let name = || host.name_or_empty().to_string();
        if host.unknown.contains_key("identity_file") {
            return Some(DrydockError::ForbiddenOverride {
                host: name(),
                field: "identity_file".into(),
            });
        }
        if host.ssh.extra_args.is_some() {
            return Some(DrydockError::ForbiddenOverride {
                host: name(),
                field: "ssh.extra_args".into(),
            });
        }
        if host.guest.user.is_some() {
            return Some(DrydockError::ForbiddenOverride {
                host: name(),
                field: "guest.user".into(),
            });
        }
        if host.guest.identity_file.is_some() {
            return Some(DrydockError::ForbiddenOverride {
                host: name(),
                field: "guest.identity_file".into(),
            });
        }
    }
    None
}

fn validate_policy_value(context: &str, value: &str, problems: &mut Vec<String>) {
    if value != "continue" && value != "abort" {
        problems.push(format!(
            "{}: policy must be 'continue' or 'abort', got '{}'",
            context, value
        ));
    }
}

fn validate_defaults(manifest: &Manifest, problems: &mut Vec<String>) {
    let d = &manifest.defaults;
    if let Some(0) = d.max_parallel {
        problems.push("defaults.max_parallel must be >= 1".into());
    }
    if let Some(0) = d.guest_parallel {
        problems.push("defaults.guest_parallel must be >= 1".into());
    }
    if let Some(ref p) = d.on_guest_failure {
        validate_policy_value("defaults.on_guest_failure", p, problems);
    }
    for (vmid, policy) in d.guest_policy.iter() {
        if vmid.parse::<u64>().is_err() {
            problems.push(format!(
                "defaults.guest_policy: '{}' is not a guest id",
                vmid
            ));
        }
        validate_policy_value(&format!("defaults.guest_policy.{}", vmid), policy, problems);
    }
}

fn validate_host(
    manifest: &Manifest,
    idx: usize,
    host: &HostEntry,
    seen_names: &mut HashSet<String>,
    problems: &mut Vec<String>,
) {
    let label = match host.name.as_deref() {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => {
            problems.push(format!("hosts[{}]: 'name' is required and non-empty", idx));
            format!("hosts[{}]", idx)
        }
    };

    if let Some(ref n) = host.name {
        if !n.is_empty() && !seen_names.insert(n.clone()) {
            problems.push(format!("host '{}': duplicate name", n));
        }
    }

    match host.host.as_deref() {
        Some(a) if !a.is_empty() => {}
        _ => problems.push(format!("host '{}': 'host' address is required", label)),
    }

    match host.api.node.as_deref() {
        Some(n) if !n.is_empty() => {}
        _ => problems.push(format!("host '{}': 'api.node' is required", label)),
    }

    match &host.api.token_id {
        Some(crate::manifest::TokenRef::Literal(s)) if !s.is_empty() => {}
        Some(crate::manifest::TokenRef::Env { env }) if !env.is_empty() => {}
        Some(_) => problems.push(format!("host '{}': 'api.token_id' is empty", label)),
        None => problems.push(format!("host '{}': 'api.token_id' is required", label)),
    }

    match host.api.secret_env.as_deref() {
        Some(s) if !s.is_empty() => {}
        _ => problems.push(format!("host '{}': 'api.secret_env' is required", label)),
    }

    // The workflow needs a non-empty SSH user from somewhere.
    let user = host.user.as_deref().or(manifest.defaults.user.as_deref());
    match user {
        Some(u) if !u.is_empty() => {}
        _ => problems.push(format!(
            "host '{}': no SSH user (set defaults.user or hosts.user)",
            label
        )),
    }

    if let Some(0) = host.max_parallel {
        problems.push(format!("host '{}': max_parallel must be >= 1", label));
    }
    if let Some(0) = host.guest_parallel {
        problems.push(format!("host '{}': guest_parallel must be >= 1", label));
    }
    if let Some(ref p) = host.on_guest_failure {
        validate_policy_value(&format!("host '{}': on_guest_failure", label), p, problems);
    }

    for (gidx, entry) in host.guest_inventory.iter().enumerate() {
        validate_inventory_entry(&label, gidx, entry, problems);
    }
}

fn validate_inventory_entry(
    host_label: &str,
    idx: usize,
    entry: &GuestInventoryEntry,
    problems: &mut Vec<String>,
) {
    if entry.identifier.as_vmid().is_none() {
        problems.push(format!(
            "host '{}' guest_inventory[{}]: identifier must be a positive guest id",
            host_label, idx
        ));
    }
    match entry.kind.as_deref() {
        Some("vm") | Some("container") => {}
        Some(other) => problems.push(format!(
            "host '{}' guest_inventory[{}]: kind must be 'vm' or 'container', got '{}'",
            host_label, idx, other
        )),
        None => problems.push(format!(
            "host '{}' guest_inventory[{}]: 'kind' is required",
            host_label, idx
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOOD: &str = r#"
[defaults]
user = "root"
identity_file = "~/.ssh/id_ed25519"
max_parallel = 2
shutdown_deadline_s = 120
reboot_deadline_s = 600

[[hosts]]
name = "pve1"
host = "10.0.0.10"
[hosts.api]
node = "pve1"
token_id = "root@pam!drydock"
secret_env = "PVE1_TOKEN_SECRET"

[[hosts]]
name = "pve2"
host = "10.0.0.11"
dry_run = true
[hosts.api]
node = "pve2"
token_id = { env = "PVE2_TOKEN_ID" }
secret_env = "PVE2_TOKEN_SECRET"
"#;

    #[test]
    fn test_good_manifest_parses() {
        let m = parse_manifest(GOOD).unwrap();
        assert_eq!(m.hosts.len(), 2);
    }

    #[test]
    fn test_syntax_error_is_manifest_syntax() {
        let r = parse_manifest("[defaults\nuser = ");
        assert!(matches!(r, Err(DrydockError::ManifestSyntax(_))));
    }

    #[test]
    fn test_schema_problems_are_collected_together() {
        let doc = r#"
[defaults]
max_parallel = 0

[[hosts]]
name = "a"
[hosts.api]
verify_tls = true
"#;
        match parse_manifest(doc) {
            Err(DrydockError::ManifestInvalid(problems)) => {
                // max_parallel, missing host address, missing api.node,
                // missing token_id, missing secret_env, missing user
                assert!(problems.len() >= 5, "expected many problems, got {:?}", problems);
                assert!(problems.iter().any(|p| p.contains("max_parallel")));
                assert!(problems.iter().any(|p| p.contains("api.node")));
                assert!(problems.iter().any(|p| p.contains("SSH user")));
            }
            other => panic!("expected ManifestInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_host_names_rejected() {
        let doc = r#"
[defaults]
user = "root"

[[hosts]]
name = "a"
host = "h1"
[hosts.api]
node = "a"
token_id = "t"
secret_env = "S"

[[hosts]]
name = "a"
host = "h2"
[hosts.api]
node = "a"
token_id = "t"
secret_env = "S"
"#;
        match parse_manifest(doc) {
            Err(DrydockError::ManifestInvalid(problems)) => {
                assert!(problems.iter().any(|p| p.contains("duplicate")));
            }
            other => panic!("expected ManifestInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_forbidden_override_identity_file() {
        let doc = r#"
[defaults]
user = "root"

[[hosts]]
name = "prod-a"
host = "h"
identity_file = "/root/.ssh/id"
[hosts.api]
node = "a"
token_id = "t"
secret_env = "S"
"#;
        match parse_manifest(doc) {
            Err(DrydockError::ForbiddenOverride { host, field }) => {
                assert_eq!(host, "prod-a");
                assert_eq!(field, "identity_file");
            }
            other => panic!("expected ForbiddenOverride, got {:?}", other),
        }
    }

    #[test]
    fn test_forbidden_override_guest_user_and_ssh_args() {
        for (snippet, field) in [
            ("[hosts.guest]\nuser = \"root\"", "guest.user"),
            ("[hosts.guest]\nidentity_file = \"/x\"", "guest.identity_file"),
            ("[hosts.ssh]\nextra_args = [\"-4\"]", "ssh.extra_args"),
        ] {
            let doc = format!(
                r#"
[defaults]
user = "root"

[[hosts]]
name = "a"
host = "h"
[hosts.api]
node = "a"
token_id = "t"
secret_env = "S"
{}
"#,
                snippet
            );
            match parse_manifest(&doc) {
                Err(DrydockError::ForbiddenOverride { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected ForbiddenOverride for {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_invalid_inventory_kind_rejected() {
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

[[hosts.guest_inventory]]
identifier = 100
kind = "jail"
"#;
        match parse_manifest(doc) {
            Err(DrydockError::ManifestInvalid(problems)) => {
                assert!(problems.iter().any(|p| p.contains("jail")));
            }
            other => panic!("expected ManifestInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let r = load_manifest(Path::new("/definitely/not/here.toml"));
        assert!(matches!(r, Err(DrydockError::ManifestNotFound(_))));
    }

    #[test]
    fn test_round_trip_preserves_unknown_keys() {
        let doc = r#"
wizard_version = 3

[defaults]
user = "root"
favorite_color = "teal"

[[hosts]]
name = "a"
host = "h"
rack = "r12"
[hosts.api]
node = "a"
token_id = "t"
secret_env = "S"

[[hosts.guest_inventory]]
identifier = 100
kind = "vm"
sticker = "gold"
"#;
        let m1 = parse_manifest(doc).unwrap();
        let rendered = render_manifest(&m1).unwrap();
        let m2 = parse_manifest(&rendered).unwrap();
        assert_eq!(m1, m2);
        assert_eq!(
            m2.unknown.get("wizard_version").and_then(|v| v.as_integer()),
            Some(3)
        );
        assert_eq!(
            m2.defaults.unknown.get("favorite_color").and_then(|v| v.as_str()),
            Some("teal")
        );
        assert_eq!(
            m2.hosts[0].unknown.get("rack").and_then(|v| v.as_str()),
            Some("r12")
        );
        assert_eq!(
            m2.hosts[0].guest_inventory[0]
                .unknown
                .get("sticker")
                .and_then(|v| v.as_str()),
            Some("gold")
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxmox-hosts.toml");
        let m1 = parse_manifest(GOOD).unwrap();
        save_manifest(&m1, &path).unwrap();
        let m2 = load_manifest(&path).unwrap();
        assert_eq!(m1, m2);
    }
}
