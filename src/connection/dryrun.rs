// Drydock
// Copyright (C) 2025 - Drydock Project Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Dry-run sessions: every command becomes a structured would-execute event
//! and returns synthetic success, so a dry run produces a complete,
//! self-consistent trace with zero side effects.

use crate::api::types::GuestDescriptor;
use crate::connection::command::CommandResult;
use crate::connection::session::{GuestLogin, Session, SessionFactory};
use crate::error::Result;
use crate::manifest::resolve::EffectiveHost;
use crate::output::OutputHandlerRef;
use std::sync::Arc;
use std::time::Duration;

pub struct DryRunSession {
    label: String,
    output: OutputHandlerRef,
}

impl DryRunSession {
    pub fn new(label: &str, output: OutputHandlerRef) -> Self {
        Self {
            label: label.to_string(),
            output,
        }
    }
}

impl Session for DryRunSession {
    fn target(&self) -> String {
        self.label.clone()
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(0)
    }

    fn run_with_input(
        &self,
        cmd: &str,
        _stdin: Option<&str>,
        _timeout: Duration,
    ) -> Result<CommandResult> {
        self.output.would_execute(&self.label, cmd);
        Ok(CommandResult::synthetic(cmd))
    }

    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}
}

pub struct DryRunSessionFactory {
    output: OutputHandlerRef,
}

impl DryRunSessionFactory {
    pub fn new(output: OutputHandlerRef) -> Self {
        Self { output }
    }
}

impl SessionFactory for DryRunSessionFactory {
    fn open_hypervisor(&self, host: &EffectiveHost) -> Result<Arc<dyn Session>> {
        Ok(Arc::new(DryRunSession::new(&host.name, Arc::clone(&self.output))))
    }

    fn open_guest(
        &self,
        host: &EffectiveHost,
        _hypervisor: &Arc<dyn Session>,
        guest: &GuestDescriptor,
        _login: &GuestLogin,
    ) -> Result<Arc<dyn Session>> {
        let label = format!("{}/{} {}", host.name, guest.kind, guest.vmid);
        Ok(Arc::new(DryRunSession::new(&label, Arc::clone(&self.output))))
    }
}
