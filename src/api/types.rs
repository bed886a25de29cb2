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

//! Wire and domain types for the Proxmox API client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard Proxmox API response wrapper.
/// All Proxmox API responses wrap data in a `data` field.
#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
}

/// VM/LXC entry as returned by the qemu/lxc list endpoints.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GuestListItem {
    pub vmid: u64,
    pub status: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub guest_type: Option<String>,
}

/// Task status from /nodes/{node}/tasks/{upid}/status.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskStatusData {
    pub status: String,
    pub exitstatus: Option<String>,
}

/// The two guest flavors Proxmox manages; selects the API path segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Vm,
    Container,
}

impl GuestKind {
    pub fn api_path(&self) -> &'static str {
        match self {
            GuestKind::Vm => "qemu",
            GuestKind::Container => "lxc",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GuestKind::Vm => "vm",
            GuestKind::Container => "container",
        };
        write!(f, "{}", s)
    }
}

/// Guest power state as drydock understands it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestStatus {
    Running,
    Stopped,
    Paused,
    Unknown,
}

impl GuestStatus {
    pub fn from_api(s: &str) -> Self {
        match s {
            "running" => GuestStatus::Running,
            "stopped" => GuestStatus::Stopped,
            "paused" | "suspended" => GuestStatus::Paused,
            _ => GuestStatus::Unknown,
        }
    }
}

impl fmt::Display for GuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GuestStatus::Running => "running",
            GuestStatus::Stopped => "stopped",
            GuestStatus::Paused => "paused",
            GuestStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A guest as discovered from the API at workflow start, refreshed only at
/// explicit checkpoints.
#[derive(Clone, Debug)]
pub struct GuestDescriptor {
    pub vmid: u64,
    pub kind: GuestKind,
    pub name: Option<String>,
    pub status: GuestStatus,
    pub addresses: Vec<String>,
    pub boot_on_start: Option<bool>,
}

impl GuestDescriptor {
    pub fn from_list_item(item: &GuestListItem, kind: GuestKind) -> Self {
        Self {
            vmid: item.vmid,
            kind,
            name: item.name.clone(),
            status: GuestStatus::from_api(&item.status),
            addresses: Vec::new(),
            boot_on_start: None,
        }
    }
}

/// Handle for an asynchronous Proxmox task (UPID).
#[derive(Clone, Debug)]
pub struct TaskHandle {
    pub node: String,
    pub upid: String,
}

impl TaskHandle {
    /// Synthetic handle returned by mutating calls in dry-run mode.
    pub fn dry_run(node: &str) -> Self {
        Self {
            node: node.to_string(),
            upid: String::from("DRY-RUN"),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.upid == "DRY-RUN"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_status_from_api() {
        assert_eq!(GuestStatus::from_api("running"), GuestStatus::Running);
        assert_eq!(GuestStatus::from_api("stopped"), GuestStatus::Stopped);
        assert_eq!(GuestStatus::from_api("suspended"), GuestStatus::Paused);
        assert_eq!(GuestStatus::from_api("weird"), GuestStatus::Unknown);
    }

    #[test]
    fn test_kind_api_paths() {
        assert_eq!(GuestKind::Vm.api_path(), "qemu");
        assert_eq!(GuestKind::Container.api_path(), "lxc");
    }

    #[test]
    fn test_list_item_parse() {
        let json = r#"{"vmid": 100, "status": "running", "name": "web1"}"#;
        let item: GuestListItem = serde_json::from_str(json).unwrap();
        let d = GuestDescriptor::from_list_item(&item, GuestKind::Vm);
        assert_eq!(d.vmid, 100);
        assert_eq!(d.status, GuestStatus::Running);
        assert_eq!(d.name.as_deref(), Some("web1"));
    }

    #[test]
    fn test_dry_run_handle() {
        let h = TaskHandle::dry_run("pve");
        assert!(h.is_dry_run());
    }
}
