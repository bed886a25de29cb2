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

//! Typed, authenticated client for the Proxmox HTTPS API.
//!
//! Transient transport faults are retried here with capped exponential
//! backoff; auth failures and domain errors never are. Higher layers do not
//! retry transport faults themselves.

pub mod types;

use crate::cancel::CancelToken;
use crate::error::{DrydockError, Result};
use crate::manifest::resolve::EffectiveHost;
use crate::output::OutputHandlerRef;
use crate::workflow::outcome::DrainMethod;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use types::{ApiResponse, GuestDescriptor, GuestKind, GuestListItem, GuestStatus, TaskHandle, TaskStatusData};

const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(8);
const RETRY_ATTEMPTS: u32 = 4;
const TASK_POLL_INTERVAL: Duration = Duration::from_secs(2);
const FORCE_STOP_DEADLINE: Duration = Duration::from_secs(120);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before retry `attempt` (1-based): 500ms, 1s, 2s, ... capped at 8s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    RETRY_BASE.saturating_mul(factor).min(RETRY_CAP)
}

/// The operations the host workflow needs from a hypervisor's API. The node
/// is bound at construction.
pub trait ProxmoxApi: Send + Sync {
    fn list_vms(&self) -> Result<Vec<GuestDescriptor>>;
    fn list_containers(&self) -> Result<Vec<GuestDescriptor>>;
    fn guest_status(&self, vmid: u64, kind: GuestKind) -> Result<GuestDescriptor>;

    /// Request a stop. `graceful` asks the guest OS to shut down; otherwise
    /// the guest is halted outright.
    fn stop_guest(&self, vmid: u64, kind: GuestKind, graceful: bool) -> Result<TaskHandle>;
    fn start_guest(&self, vmid: u64, kind: GuestKind) -> Result<TaskHandle>;

    /// Block until the task finishes or the deadline passes.
    fn wait_task(&self, handle: &TaskHandle, deadline: Duration) -> Result<()>;

    /// Stop policy: graceful shutdown first, forced stop once the deadline
    /// elapses with the guest still up. Same policy for both kinds.
    fn drain_guest(&self, vmid: u64, kind: GuestKind, shutdown_deadline: Duration) -> Result<DrainMethod> {
        let handle = self.stop_guest(vmid, kind, true)?;
        match self.wait_task(&handle, shutdown_deadline) {
            Ok(()) => {
                if handle.is_dry_run() {
                    return Ok(DrainMethod::Graceful);
                }
                let status = self.guest_status(vmid, kind)?;
                if status.status == GuestStatus::Stopped {
                    return Ok(DrainMethod::Graceful);
                }
            }
            Err(DrydockError::Timeout(_)) | Err(DrydockError::TaskFailed(_)) => {}
            Err(e) => return Err(e),
        }
        let handle = self.stop_guest(vmid, kind, false)?;
        self.wait_task(&handle, FORCE_STOP_DEADLINE)?;
        Ok(DrainMethod::Forced)
    }
}

/// What a 404 means for the request being made.
#[derive(Clone, Copy)]
enum NotFoundKind {
    Node,
    Guest(u64),
}

#[derive(Deserialize)]
struct CurrentStatusData {
    status: String,
    name: Option<String>,
}

/// reqwest-backed client with a sync facade over an embedded current-thread
/// runtime. Owned exclusively by one host workflow.
pub struct HttpProxmoxClient {
    api_host: String,
    node: String,
    auth_header: String,
    dry_run: bool,
    output: OutputHandlerRef,
    cancel: CancelToken,
    runtime: Mutex<Runtime>,
    http: reqwest::Client,
}

impl HttpProxmoxClient {
    /// Build a client from the effective host view plus resolved secrets.
    /// The auth header value is held privately and never logged.
    pub fn new(
        host: &EffectiveHost,
        token_id: &str,
        token_secret: &str,
        dry_run: bool,
        output: OutputHandlerRef,
        cancel: CancelToken,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DrydockError::Transport(format!("failed to create async runtime: {}", e)))?;
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!host.api.verify_tls)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DrydockError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            api_host: host.address.clone(),
            node: host.api.node.clone(),
            auth_header: format!("PVEAPIToken={}={}", token_id, token_secret),
            dry_run,
            output,
            cancel,
            runtime: Mutex::new(runtime),
            http,
        })
    }

    fn api_url(&self, path: &str) -> String {
        if self.api_host.contains(':') {
            format!("https://{}/api2/json{}", self.api_host, path)
        } else {
            format!("https://{}:8006/api2/json{}", self.api_host, path)
        }
    }

    fn status_to_error(&self, status: reqwest::StatusCode, body: &str, not_found: NotFoundKind) -> DrydockError {
        match status.as_u16() {
            401 | 403 => DrydockError::AuthFailed(format!("API returned {}", status)),
            404 => match not_found {
                NotFoundKind::Node => DrydockError::NodeUnknown(self.node.clone()),
                NotFoundKind::Guest(vmid) => {
                    DrydockError::GuestUnknown(format!("{} on node {}", vmid, self.node))
                }
            },
            400..=499 => DrydockError::TaskFailed(format!("API returned {}: {}", status, body)),
            _ => DrydockError::Transport(format!("API returned {}: {}", status, body)),
        }
    }

    fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        form: Option<&[(&str, String)]>,
        not_found: NotFoundKind,
    ) -> Result<ApiResponse<T>> {
        let url = self.api_url(path);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.cancel.check()?;

            let result = self.single_request::<T>(&url, method.clone(), form, not_found);
            match result {
                Err(ref e) if e.is_transient() && attempt < RETRY_ATTEMPTS => {
                    self.output.debug(&format!(
                        "transient API fault on {} (attempt {}/{}): {}",
                        path, attempt, RETRY_ATTEMPTS, e
                    ));
                    self.cancel.sleep(backoff_delay(attempt))?;
                }
                other => return other,
            }
        }
    }

    fn single_request<T: DeserializeOwned>(
        &self,
        url: &str,
        method: reqwest::Method,
        form: Option<&[(&str, String)]>,
        not_found: NotFoundKind,
    ) -> Result<ApiResponse<T>> {
        let runtime = self.runtime.lock().unwrap();
        runtime.block_on(async {
            let mut builder = self
                .http
                .request(method, url)
                .header("Authorization", &self.auth_header);
            if let Some(params) = form {
                builder = builder.form(params);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| DrydockError::Transport(format!("API request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(self.status_to_error(status, &body, not_found));
            }

            response
                .json::<ApiResponse<T>>()
                .await
                .map_err(|e| DrydockError::Transport(format!("failed to parse API response: {}", e)))
        })
    }

    fn guest_path(&self, vmid: u64, kind: GuestKind, tail: &str) -> String {
        format!("/nodes/{}/{}/{}{}", self.node, kind.api_path(), vmid, tail)
    }

    fn list(&self, kind: GuestKind) -> Result<Vec<GuestDescriptor>> {
        let path = format!("/nodes/{}/{}", self.node, kind.api_path());
        let response: ApiResponse<Vec<GuestListItem>> =
            self.request_json(reqwest::Method::GET, &path, None, NotFoundKind::Node)?;
        let mut guests: Vec<GuestDescriptor> = response
            .data
            .unwrap_or_default()
            .iter()
            .map(|item| GuestDescriptor::from_list_item(item, kind))
            .collect();
        guests.sort_by_key(|g| g.vmid);
        Ok(guests)
    }

    fn post_status_change(&self, vmid: u64, kind: GuestKind, action: &str) -> Result<TaskHandle> {
        if self.dry_run {
            self.output.would_execute(
                &format!("{} api", self.node),
                &format!("POST {}", self.guest_path(vmid, kind, &format!("/status/{}", action))),
            );
            return Ok(TaskHandle::dry_run(&self.node));
        }
        let path = self.guest_path(vmid, kind, &format!("/status/{}", action));
        let response: ApiResponse<String> = self.request_json(
            reqwest::Method::POST,
            &path,
            Some(&[]),
            NotFoundKind::Guest(vmid),
        )?;
        let upid = response.data.ok_or_else(|| {
            DrydockError::TaskFailed(format!("{} accepted but no task UPID returned", action))
        })?;
        Ok(TaskHandle {
            node: self.node.clone(),
            upid,
        })
    }
}

impl ProxmoxApi for HttpProxmoxClient {
    fn list_vms(&self) -> Result<Vec<GuestDescriptor>> {
        self.list(GuestKind::Vm)
    }

    fn list_containers(&self) -> Result<Vec<GuestDescriptor>> {
        self.list(GuestKind::Container)
    }

    fn guest_status(&self, vmid: u64, kind: GuestKind) -> Result<GuestDescriptor> {
        let path = self.guest_path(vmid, kind, "/status/current");
        let response: ApiResponse<CurrentStatusData> =
            self.request_json(reqwest::Method::GET, &path, None, NotFoundKind::Guest(vmid))?;
        let data = response
            .data
            .ok_or_else(|| DrydockError::GuestUnknown(format!("{} on node {}", vmid, self.node)))?;
        Ok(GuestDescriptor {
            vmid,
            kind,
            name: data.name,
            status: GuestStatus::from_api(&data.status),
            addresses: Vec::new(),
            boot_on_start: None,
        })
    }

    fn stop_guest(&self, vmid: u64, kind: GuestKind, graceful: bool) -> Result<TaskHandle> {
        let action = if graceful { "shutdown" } else { "stop" };
        self.post_status_change(vmid, kind, action)
    }

    fn start_guest(&self, vmid: u64, kind: GuestKind) -> Result<TaskHandle> {
        self.post_status_change(vmid, kind, "start")
    }

    fn wait_task(&self, handle: &TaskHandle, deadline: Duration) -> Result<()> {
        if handle.is_dry_run() {
            return Ok(());
        }
        let path = format!("/nodes/{}/tasks/{}/status", handle.node, handle.upid);
        let start = Instant::now();
        loop {
            self.cancel.check()?;
            if start.elapsed() > deadline {
                return Err(DrydockError::Timeout(format!(
                    "task {} still running after {}s",
                    handle.upid,
                    deadline.as_secs()
                )));
            }

            let response: ApiResponse<TaskStatusData> =
                self.request_json(reqwest::Method::GET, &path, None, NotFoundKind::Node)?;
            if let Some(task) = response.data {
                match task.status.as_str() {
                    "stopped" => {
                        return match task.exitstatus.as_deref() {
                            Some("OK") | None => Ok(()),
                            Some(exit) => Err(DrydockError::TaskFailed(format!(
                                "task {} exited with status: {}",
                                handle.upid, exit
                            ))),
                        };
                    }
                    "running" => {
                        self.cancel.sleep(TASK_POLL_INTERVAL)?;
                    }
                    other => {
                        return Err(DrydockError::TaskFailed(format!(
                            "unexpected task status: {}",
                            other
                        )));
                    }
                }
            } else {
                return Err(DrydockError::TaskFailed(format!(
                    "no status returned for task {}",
                    handle.upid
                )));
            }
        }
    }
}
