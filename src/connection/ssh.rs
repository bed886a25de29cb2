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

use crate::api::types::{GuestDescriptor, GuestKind};
use crate::cancel::CancelToken;
use crate::connection::command::{trim_newlines, CommandResult};
use crate::connection::session::{GuestLogin, Session, SessionFactory};
use crate::error::{DrydockError, Result};
use crate::manifest::resolve::EffectiveHost;
use crate::output::OutputHandlerRef;
use russh::client::{self, AuthResult};
use russh::ChannelMsg;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

// Minimal handler for russh client — accepts all host keys
struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One authenticated SSH transport with a sync interface over an embedded
/// current-thread runtime. Commands are serialized by the runtime lock.
pub struct SshSession {
    label: String,
    hostname: String,
    port: u16,
    username: String,
    command_timeout: Duration,
    cancel: CancelToken,
    runtime: Mutex<Runtime>,
    handle: Mutex<Option<client::Handle<SshHandler>>>,
}

impl SshSession {
    /// Connect and authenticate. Auth order: password if given, then the
    /// identity file, then any key the local agent offers.
    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        label: &str,
        hostname: &str,
        port: u16,
        username: &str,
        identity_file: Option<&str>,
        password: Option<&str>,
        connect_timeout: Duration,
        command_timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Self> {
        cancel.check()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DrydockError::Transport(format!("failed to create async runtime: {}", e)))?;

        let connect_str = format!("{}:{}", hostname, port);
        let addr = connect_str
            .to_socket_addrs()
            .map_err(|_| DrydockError::Unreachable(format!("unable to resolve {}", connect_str)))?
            .next()
            .ok_or_else(|| DrydockError::Unreachable(format!("unable to resolve {}", connect_str)))?;

        let username_owned = username.to_string();
        let password_owned = password.map(|p| p.to_string());
        let identity_owned = identity_file.map(|p| p.to_string());
        let connect_str_err = connect_str.clone();

        let handle = runtime.block_on(async {
            let config = Arc::new(client::Config::default());

            let mut handle = tokio::time::timeout(
                connect_timeout,
                client::connect(config, addr, SshHandler),
            )
            .await
            .map_err(|_| {
                DrydockError::Unreachable(format!(
                    "SSH connection attempt failed for {}: timeout",
                    connect_str_err
                ))
            })?
            .map_err(|e| {
                DrydockError::Unreachable(format!(
                    "SSH connection attempt failed for {}: {}",
                    connect_str_err, e
                ))
            })?;

            if let Some(ref password) = password_owned {
                let result = handle
                    .authenticate_password(&username_owned, password)
                    .await
                    .map_err(|e| {
                        DrydockError::AuthFailed(format!(
                            "SSH password authentication failed for user {}: {}",
                            username_owned, e
                        ))
                    })?;
                if !matches!(result, AuthResult::Success) {
                    return Err(DrydockError::AuthFailed(format!(
                        "SSH password authentication failed for user {}",
                        username_owned
                    )));
                }
            } else if let Some(ref key_file) = identity_owned {
                let path = Path::new(key_file);
                if !path.exists() {
                    return Err(DrydockError::AuthFailed(format!(
                        "cannot find designated keyfile {}",
                        key_file
                    )));
                }
                let secret_key = russh::keys::load_secret_key(path, None).map_err(|e| {
                    DrydockError::AuthFailed(format!("SSH key load failed for {}: {}", key_file, e))
                })?;
                let key_with_alg =
                    russh::keys::PrivateKeyWithHashAlg::new(Arc::new(secret_key), None);
                let result = handle
                    .authenticate_publickey(&username_owned, key_with_alg)
                    .await
                    .map_err(|e| {
                        DrydockError::AuthFailed(format!(
                            "SSH key authentication failed for user {} with key {}: {}",
                            username_owned, key_file, e
                        ))
                    })?;
                if !matches!(result, AuthResult::Success) {
                    return Err(DrydockError::AuthFailed(format!(
                        "SSH key authentication failed for user {} with key {}",
                        username_owned, key_file
                    )));
                }
            } else {
                // Use any key from the SSH agent
                let ssh_auth_sock = std::env::var("SSH_AUTH_SOCK").map_err(|_| {
                    DrydockError::AuthFailed(String::from(
                        "SSH cannot connect to agent: SSH_AUTH_SOCK not set",
                    ))
                })?;
                let stream = tokio::net::UnixStream::connect(&ssh_auth_sock)
                    .await
                    .map_err(|e| {
                        DrydockError::AuthFailed(format!("SSH cannot connect to agent: {}", e))
                    })?;
                let mut agent = russh::keys::agent::client::AgentClient::connect(stream);
                let identities = agent.request_identities().await.map_err(|e| {
                    DrydockError::AuthFailed(format!("SSH agent failed to list identities: {}", e))
                })?;

                let mut authenticated = false;
                for identity in &identities {
                    match handle
                        .authenticate_publickey_with(
                            &username_owned,
                            identity.public_key().into_owned(),
                            None,
                            &mut agent,
                        )
                        .await
                    {
                        Ok(AuthResult::Success) => {
                            authenticated = true;
                            break;
                        }
                        _ => continue,
                    }
                }
                if !authenticated {
                    return Err(DrydockError::AuthFailed(format!(
                        "SSH agent authentication failed for user {}",
                        username_owned
                    )));
                }
            }

            Ok::<_, DrydockError>(handle)
        })?;

        let session = Self {
            label: label.to_string(),
            hostname: hostname.to_string(),
            port,
            username: username.to_string(),
            command_timeout,
            cancel: cancel.clone(),
            runtime: Mutex::new(runtime),
            handle: Mutex::new(Some(handle)),
        };

        // Maintenance commands here assume a Linux target; refuse anything else
        let uname = session.run_with_timeout("uname -s", Duration::from_secs(15))?;
        if !uname.out.starts_with("Linux") {
            return Err(DrydockError::Transport(format!(
                "target {} is not Linux: uname says '{}'",
                session.label, uname.out
            )));
        }

        Ok(session)
    }

    pub fn remote_endpoint(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }
}

impl Session for SshSession {
    fn target(&self) -> String {
        self.label.clone()
    }

    fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    fn run_with_input(
        &self,
        cmd: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult> {
        self.cancel.check()?;

        let runtime = self.runtime.lock().unwrap();
        let handle_guard = self.handle.lock().unwrap();
        let handle = handle_guard
            .as_ref()
            .ok_or_else(|| DrydockError::Transport(format!("session {} is closed", self.label)))?;

        let actual_cmd = format!("LANG=C {}", cmd);
        let stdin_bytes = stdin.map(|s| s.as_bytes().to_vec());
        let started = Instant::now();

        let (rc, out, err) = runtime.block_on(async {
            let work = async {
                let mut channel = handle.channel_open_session().await.map_err(|e| {
                    DrydockError::Transport(format!("channel session failed: {:?}", e))
                })?;
                channel
                    .exec(true, actual_cmd.as_bytes())
                    .await
                    .map_err(|e| DrydockError::Transport(e.to_string()))?;

                if let Some(ref data) = stdin_bytes {
                    channel
                        .data(&data[..])
                        .await
                        .map_err(|e| DrydockError::Transport(e.to_string()))?;
                    channel
                        .eof()
                        .await
                        .map_err(|e| DrydockError::Transport(e.to_string()))?;
                }

                let mut stdout: Vec<u8> = Vec::new();
                let mut stderr: Vec<u8> = Vec::new();
                let mut exit_code: Option<u32> = None;

                loop {
                    match channel.wait().await {
                        Some(ChannelMsg::Data { ref data }) => {
                            stdout.extend_from_slice(data);
                        }
                        Some(ChannelMsg::ExtendedData { ref data, ext }) => {
                            if ext == 1 {
                                stderr.extend_from_slice(data);
                            } else {
                                stdout.extend_from_slice(data);
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            exit_code = Some(exit_status);
                        }
                        Some(ChannelMsg::Eof) => {}
                        None => break,
                        _ => {}
                    }
                }

                let mut out = String::from_utf8_lossy(&stdout).to_string();
                let mut err = String::from_utf8_lossy(&stderr).to_string();
                trim_newlines(&mut out);
                trim_newlines(&mut err);
                Ok::<_, DrydockError>((exit_code.unwrap_or(0) as i32, out, err))
            };

            tokio::time::timeout(timeout, work).await.map_err(|_| {
                DrydockError::Timeout(format!(
                    "command on {} exceeded {}s",
                    self.label,
                    timeout.as_secs()
                ))
            })?
        })?;

        Ok(CommandResult {
            cmd: cmd.to_string(),
            rc,
            out,
            err,
            duration: started.elapsed(),
        })
    }

    fn probe(&self) -> Result<()> {
        let result = self.run_with_timeout("true", Duration::from_secs(15))?;
        if result.success() {
            Ok(())
        } else {
            Err(DrydockError::Transport(format!(
                "probe on {} exited {}",
                self.label, result.rc
            )))
        }
    }

    fn close(&self) {
        let runtime = self.runtime.lock().unwrap();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = runtime.block_on(async {
                handle
                    .disconnect(russh::Disconnect::ByApplication, "", "en")
                    .await
            });
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// How a nested command reaches its guest from the hypervisor shell.
enum NestedExec {
    PctExec { vmid: u64 },
    Ssh { user: String, target: String, port: u16, extra_args: Vec<String> },
}

/// A guest session that forwards through the hypervisor's shell, propagating
/// exit codes from the inner command.
pub struct NestedSession {
    label: String,
    hypervisor: Arc<dyn Session>,
    exec: NestedExec,
}

impl NestedSession {
    pub fn for_container(hypervisor: Arc<dyn Session>, vmid: u64) -> Self {
        let label = format!("{}/ct {}", hypervisor.target(), vmid);
        Self {
            label,
            hypervisor,
            exec: NestedExec::PctExec { vmid },
        }
    }

    pub fn for_vm_via_hypervisor(
        hypervisor: Arc<dyn Session>,
        target: &str,
        login: &GuestLogin,
        port: u16,
    ) -> Self {
        let label = format!("{}/vm {}", hypervisor.target(), target);
        Self {
            label,
            hypervisor,
            exec: NestedExec::Ssh {
                user: login.user.clone(),
                target: target.to_string(),
                port,
                extra_args: login.extra_args.clone(),
            },
        }
    }

    fn wrap(&self, cmd: &str) -> Result<String> {
        let quoted = shlex::try_quote(cmd)
            .map_err(|_| DrydockError::Transport(format!("cannot quote command for {}", self.label)))?;
        match &self.exec {
            NestedExec::PctExec { vmid } => {
                Ok(format!("pct exec {} -- /bin/sh -c {}", vmid, quoted))
            }
            NestedExec::Ssh {
                user,
                target,
                port,
                extra_args,
            } => {
                let mut parts: Vec<String> = vec![
                    String::from("ssh"),
                    String::from("-o"),
                    String::from("BatchMode=yes"),
                    String::from("-p"),
                    port.to_string(),
                    String::from("-l"),
                    user.clone(),
                ];
                parts.extend(extra_args.iter().cloned());
                parts.push(target.clone());
                parts.push(quoted.into_owned());
                Ok(parts.join(" "))
            }
        }
    }
}

impl Session for NestedSession {
    fn target(&self) -> String {
        self.label.clone()
    }

    fn command_timeout(&self) -> Duration {
        self.hypervisor.command_timeout()
    }

    fn run_with_input(
        &self,
        cmd: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let wrapped = self.wrap(cmd)?;
        let mut result = self.hypervisor.run_with_input(&wrapped, stdin, timeout)?;
        // Report the caller's command, not the wrapper
        result.cmd = cmd.to_string();
        Ok(result)
    }

    fn probe(&self) -> Result<()> {
        let result = self.run_with_timeout("true", Duration::from_secs(30))?;
        if result.success() {
            Ok(())
        } else {
            Err(DrydockError::Transport(format!(
                "probe on {} exited {}",
                self.label, result.rc
            )))
        }
    }

    fn close(&self) {
        // The hypervisor session is shared; its owner closes it.
    }
}

/// Production factory: real SSH everywhere.
pub struct SshSessionFactory {
    output: OutputHandlerRef,
    cancel: CancelToken,
}

impl SshSessionFactory {
    pub fn new(output: OutputHandlerRef, cancel: CancelToken) -> Self {
        Self { output, cancel }
    }
}

impl SessionFactory for SshSessionFactory {
    fn open_hypervisor(&self, host: &EffectiveHost) -> Result<Arc<dyn Session>> {
        self.output
            .debug(&format!("opening SSH session to hypervisor {}", host.name));
        let session = SshSession::connect(
            &host.name,
            &host.address,
            host.ssh.port,
            &host.ssh.user,
            host.ssh.identity_file.as_deref(),
            None,
            host.ssh.connect_timeout,
            host.ssh.command_timeout,
            &self.cancel,
        )?;
        Ok(Arc::new(session))
    }

    fn open_guest(
        &self,
        host: &EffectiveHost,
        hypervisor: &Arc<dyn Session>,
        guest: &GuestDescriptor,
        login: &GuestLogin,
    ) -> Result<Arc<dyn Session>> {
        match guest.kind {
            GuestKind::Container => Ok(Arc::new(NestedSession::for_container(
                Arc::clone(hypervisor),
                guest.vmid,
            ))),
            GuestKind::Vm => {
                if let Some(address) = guest.addresses.first() {
                    self.output.debug(&format!(
                        "opening direct SSH session to vm {} at {}",
                        guest.vmid, address
                    ));
                    let label = format!("{}/vm {}", host.name, guest.vmid);
                    let session = SshSession::connect(
                        &label,
                        address,
                        host.ssh.port,
                        &login.user,
                        login.identity_file.as_deref(),
                        login.password.as_deref(),
                        host.ssh.connect_timeout,
                        host.ssh.command_timeout,
                        &self.cancel,
                    )?;
                    Ok(Arc::new(session))
                } else {
                    // No address known; hop through the hypervisor and let
                    // its resolver find the guest by name.
                    let target = guest
                        .name
                        .clone()
                        .ok_or_else(|| {
                            DrydockError::Unreachable(format!(
                                "vm {} has neither address nor name to dial",
                                guest.vmid
                            ))
                        })?;
                    Ok(Arc::new(NestedSession::for_vm_via_hypervisor(
                        Arc::clone(hypervisor),
                        &target,
                        login,
                        host.ssh.port,
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::NullOutputHandler;

    struct FakeHypervisor;

    impl Session for FakeHypervisor {
        fn target(&self) -> String {
            String::from("pve1")
        }
        fn command_timeout(&self) -> Duration {
            Duration::from_secs(60)
        }
        fn run_with_input(
            &self,
            cmd: &str,
            _stdin: Option<&str>,
            _timeout: Duration,
        ) -> Result<CommandResult> {
            // Echo the wrapped command back so tests can inspect it
            Ok(CommandResult {
                cmd: cmd.to_string(),
                rc: 0,
                out: cmd.to_string(),
                err: String::new(),
                duration: Duration::from_secs(0),
            })
        }
        fn probe(&self) -> Result<()> {
            Ok(())
        }
        fn close(&self) {}
    }

    #[test]
    fn test_container_commands_wrap_in_pct_exec() {
        let hyp: Arc<dyn Session> = Arc::new(FakeHypervisor);
        let nested = NestedSession::for_container(hyp, 203);
        let result = nested.run("apt-get -y upgrade").unwrap();
        assert!(result.out.starts_with("pct exec 203 -- /bin/sh -c "));
        assert!(result.out.contains("apt-get -y upgrade"));
        // caller-facing cmd is the inner command
        assert_eq!(result.cmd, "apt-get -y upgrade");
    }

    #[test]
    fn test_vm_via_hypervisor_wraps_in_ssh() {
        let hyp: Arc<dyn Session> = Arc::new(FakeHypervisor);
        let login = GuestLogin {
            user: String::from("admin"),
            identity_file: None,
            extra_args: vec![String::from("-o"), String::from("ConnectTimeout=5")],
            password: None,
        };
        let nested = NestedSession::for_vm_via_hypervisor(hyp, "web1", &login, 22);
        let result = nested.run("dnf -y upgrade --refresh").unwrap();
        assert!(result.out.starts_with("ssh -o BatchMode=yes -p 22 -l admin"));
        assert!(result.out.contains("-o ConnectTimeout=5"));
        assert!(result.out.contains("web1"));
    }

    #[test]
    fn test_quoting_protects_shell_metacharacters() {
        let hyp: Arc<dyn Session> = Arc::new(FakeHypervisor);
        let nested = NestedSession::for_container(hyp, 100);
        let result = nested.run("echo 'a b' && id").unwrap();
        // The inner command must arrive as a single sh -c argument
        assert!(result.out.contains("/bin/sh -c"));
        assert!(!result.out.ends_with("&& id"));
    }

    #[test]
    fn test_nested_labels() {
        let hyp: Arc<dyn Session> = Arc::new(FakeHypervisor);
        let nested = NestedSession::for_container(hyp, 9);
        assert_eq!(nested.target(), "pve1/ct 9");
    }

    #[test]
    fn test_factory_builds_nested_for_containers() {
        use crate::api::types::GuestStatus;
        let factory = SshSessionFactory::new(Arc::new(NullOutputHandler), CancelToken::new());
        let host = crate::manifest::resolve::EffectiveHost {
            name: "pve1".into(),
            address: "10.0.0.10".into(),
            ssh: crate::manifest::resolve::SshProfile {
                user: "root".into(),
                identity_file: None,
                extra_args: vec![],
                port: 22,
                connect_timeout: Duration::from_secs(10),
                command_timeout: Duration::from_secs(60),
            },
            guest: crate::manifest::resolve::GuestCredentials {
                user: "root".into(),
                identity_file: None,
                extra_args: vec![],
                password_env: None,
            },
            api: crate::manifest::resolve::ApiCredentials {
                node: "pve1".into(),
                token_id: crate::manifest::TokenRef::Literal("t".into()),
                secret_env: "S".into(),
                verify_tls: true,
            },
            max_parallel: 1,
            guest_parallel: 1,
            dry_run: false,
            shutdown_deadline: Duration::from_secs(120),
            reboot_deadline: Duration::from_secs(600),
            verify_deadline: Duration::from_secs(180),
            host_deadline: Duration::from_secs(3600),
            stderr_cap: 2000,
            on_guest_failure: crate::manifest::resolve::GuestFailurePolicy::Continue,
            guest_policy: Default::default(),
            inventory: vec![],
        };
        let hyp: Arc<dyn Session> = Arc::new(FakeHypervisor);
        let guest = GuestDescriptor {
            vmid: 203,
            kind: GuestKind::Container,
            name: Some("ct203".into()),
            status: GuestStatus::Running,
            addresses: vec![],
            boot_on_start: None,
        };
        let login = GuestLogin {
            user: "root".into(),
            identity_file: None,
            extra_args: vec![],
            password: None,
        };
        let session = factory.open_guest(&host, &hyp, &guest, &login).unwrap();
        assert_eq!(session.target(), "pve1/ct 203");
    }
}
