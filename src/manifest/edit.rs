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

//! Pure manifest mutation for external editors. Every function returns a new
//! `Manifest` value; unknown keys flow through untouched. The interactive
//! wizard lives outside this crate and drives these through the library
//! surface.

use crate::error::{DrydockError, Result};
use crate::manifest::{GuestInventoryEntry, HostEntry, Manifest};

/// Append a host entry. The name must be present and not collide.
pub fn add_host(manifest: &Manifest, entry: HostEntry) -> Result<Manifest> {
    let name = entry
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| DrydockError::Config("host entry needs a non-empty name".into()))?;
    if manifest.host(name).is_some() {
        return Err(DrydockError::Config(format!(
            "host '{}' already exists in the manifest",
            name
        )));
    }
    let mut next = manifest.clone();
    next.hosts.push(entry);
    Ok(next)
}

/// Remove a host by name.
pub fn remove_host(manifest: &Manifest, name: &str) -> Result<Manifest> {
    if manifest.host(name).is_none() {
        return Err(DrydockError::Config(format!(
            "host '{}' is not in the manifest",
            name
        )));
    }
    let mut next = manifest.clone();
    next.hosts.retain(|h| h.name_or_empty() != name);
    Ok(next)
}

/// Set one `[defaults]` key. Known keys are set in their typed fields;
/// anything else is preserved in the unknown-key map for round-tripping.
pub fn set_default(manifest: &Manifest, key: &str, value: toml::Value) -> Result<Manifest> {
    let mut next = manifest.clone();
    let d = &mut next.defaults;

    let type_err = |want: &str| {
        DrydockError::Config(format!("defaults.{} expects a {}", key, want))
    };

    match key {
        "user" => d.user = Some(value.as_str().ok_or_else(|| type_err("string"))?.to_string()),
        "identity_file" => {
            d.identity_file = Some(value.as_str().ok_or_else(|| type_err("string"))?.to_string())
        }
        "max_parallel" => {
            let n = value.as_integer().ok_or_else(|| type_err("integer"))?;
            if n < 1 {
                return Err(DrydockError::Config("defaults.max_parallel must be >= 1".into()));
            }
            d.max_parallel = Some(n as u64);
        }
        "guest_parallel" => {
            let n = value.as_integer().ok_or_else(|| type_err("integer"))?;
            if n < 1 {
                return Err(DrydockError::Config("defaults.guest_parallel must be >= 1".into()));
            }
            d.guest_parallel = Some(n as u64);
        }
        "dry_run" => d.dry_run = Some(value.as_bool().ok_or_else(|| type_err("boolean"))?),
        "shutdown_deadline_s" => {
            d.shutdown_deadline_s =
                Some(value.as_integer().ok_or_else(|| type_err("integer"))? as u64)
        }
        "reboot_deadline_s" => {
            d.reboot_deadline_s =
                Some(value.as_integer().ok_or_else(|| type_err("integer"))? as u64)
        }
        "verify_deadline_s" => {
            d.verify_deadline_s =
                Some(value.as_integer().ok_or_else(|| type_err("integer"))? as u64)
        }
        "host_deadline_s" => {
            d.host_deadline_s =
                Some(value.as_integer().ok_or_else(|| type_err("integer"))? as u64)
        }
        "on_guest_failure" => {
            let s = value.as_str().ok_or_else(|| type_err("string"))?;
            if s != "continue" && s != "abort" {
                return Err(DrydockError::Config(
                    "defaults.on_guest_failure must be 'continue' or 'abort'".into(),
                ));
            }
            d.on_guest_failure = Some(s.to_string());
        }
        _ => {
            d.unknown.insert(key.to_string(), value);
        }
    }
    Ok(next)
}

/// Upsert a guest inventory entry on a host, keyed by identifier.
pub fn set_guest_inventory_entry(
    manifest: &Manifest,
    host_name: &str,
    entry: GuestInventoryEntry,
) -> Result<Manifest> {
    let vmid = entry
        .identifier
        .as_vmid()
        .ok_or_else(|| DrydockError::Config("inventory entry needs a positive guest id".into()))?;

    let mut next = manifest.clone();
    let host = next
        .hosts
        .iter_mut()
        .find(|h| h.name_or_empty() == host_name)
        .ok_or_else(|| DrydockError::Config(format!("host '{}' is not in the manifest", host_name)))?;

    match host
        .guest_inventory
        .iter_mut()
        .find(|e| e.identifier.as_vmid() == Some(vmid))
    {
        Some(existing) => *existing = entry,
        None => host.guest_inventory.push(entry),
    }
    Ok(next)
}
