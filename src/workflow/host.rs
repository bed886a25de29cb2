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

//! The per-host maintenance state machine:
//!
//! INIT -> PREFLIGHT -> DISCOVER -> GUEST_UPGRADE -> GUEST_DRAIN ->
//! HOST_UPGRADE -> HOST_REBOOT -> VERIFY -> DONE
//!
//! Any fatal error moves to FAILED, cancellation to ABORTED. Phases are
//! strictly sequential; errors are caught at phase boundaries; partial
//! progress inside a phase is recorded in the outcome.

use crate::api::types::{GuestDescriptor, GuestStatus};
use crate::api::ProxmoxApi;
use crate::cancel::CancelToken;
use crate::connection::session::{GuestLogin, Session, SessionFactory};
use crate::error::{DrydockError, Result};
use crate::manifest::resolve::{EffectiveHost, GuestFailurePolicy, GuestOverride};
use crate::output::OutputHandlerRef;
use crate::upgrade;
use crate::workflow::outcome::{DrainMethod, FinalState, GuestOutcome, RunOutcome, StepOutcome};
use crate::workflow::phase::{Phase, PhaseStatus};
use crate::workflow::ResolvedCredentials;
use chrono::Utc;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

const REBOOT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const REBOOT_PROBE_DELAY_START: Duration = Duration::from_secs(2);
const REBOOT_PROBE_DELAY_CAP: Duration = Duration::from_secs(30);
const VERIFY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Working record for one discovered guest.
struct GuestWork {
    descriptor: GuestDescriptor,
    overrides: Option<GuestOverride>,
    outcome: GuestOutcome,
}

pub struct HostWorkflow {
    host: EffectiveHost,
    creds: ResolvedCredentials,
    api: Arc<dyn ProxmoxApi>,
    factory: Arc<dyn SessionFactory>,
    output: OutputHandlerRef,
    cancel: CancelToken,
}

impl HostWorkflow {
    pub fn new(
        host: EffectiveHost,
        creds: ResolvedCredentials,
        api: Arc<dyn ProxmoxApi>,
        factory: Arc<dyn SessionFactory>,
        output: OutputHandlerRef,
        cancel: CancelToken,
    ) -> Self {
        Self {
            host,
            creds,
            api,
            factory,
            output,
            cancel,
        }
    }

    /// Drive the host through the whole lifecycle and report the outcome.
    /// This never panics out; every exit path produces a RunOutcome.
    pub fn run(self) -> RunOutcome {
        let started = Utc::now();
        let clock = Instant::now();
        let mut phases: Vec<(Phase, PhaseStatus)> = Vec::new();
        let mut work: Vec<GuestWork> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut last_phase: Option<Phase> = None;
        let mut hypervisor: Option<Arc<dyn Session>> = None;

        self.output.on_host_start(&self.host.name);
        let result = self.drive(
            clock,
            &mut phases,
            &mut work,
            &mut warnings,
            &mut last_phase,
            &mut hypervisor,
        );

        if let Some(session) = hypervisor.take() {
            session.close();
        }

        let (final_state, error) = match result {
            Ok(()) => (FinalState::Succeeded, None),
            Err(DrydockError::Cancelled) => {
                (FinalState::Aborted, Some(String::from("cancelled")))
            }
            Err(e) => {
                if let Some(phase) = last_phase {
                    if phases.last().map(|(p, _)| *p) != Some(phase) {
                        phases.push((phase, PhaseStatus::Failed));
                        self.output.on_phase_end(&self.host.name, phase, PhaseStatus::Failed);
                    }
                }
                (FinalState::Failed, Some(e.to_string()))
            }
        };

        for w in work.iter() {
            self.output.on_guest_result(&self.host.name, &w.outcome);
        }

        let outcome = RunOutcome {
            host: self.host.name.clone(),
            final_state,
            phases,
            guests: work.into_iter().map(|w| w.outcome).collect(),
            warnings,
            error,
            last_phase,
            started,
            duration: clock.elapsed(),
        };
        self.output.on_host_done(&outcome);
        outcome
    }

    fn drive(
        &self,
        clock: Instant,
        phases: &mut Vec<(Phase, PhaseStatus)>,
        work: &mut Vec<GuestWork>,
        warnings: &mut Vec<String>,
        last_phase: &mut Option<Phase>,
        hypervisor: &mut Option<Arc<dyn Session>>,
    ) -> Result<()> {
        let dry = self.host.dry_run;
        let plain = |acted: bool| {
            if dry {
                PhaseStatus::DryRan
            } else if acted {
                PhaseStatus::Succeeded
            } else {
                PhaseStatus::Skipped
            }
        };
        let ok = plain(true);

        self.enter(clock, Phase::Init, last_phase)?;
        *hypervisor = Some(self.factory.open_hypervisor(&self.host)?);
        self.finish(phases, Phase::Init, ok);

        self.enter(clock, Phase::Preflight, last_phase)?;
        let discovered = self.preflight(hypervisor.as_ref().unwrap())?;
        self.finish(phases, Phase::Preflight, ok);

        self.enter(clock, Phase::Discover, last_phase)?;
        *work = self.discover(discovered)?;
        self.finish(phases, Phase::Discover, ok);

        self.enter(clock, Phase::GuestUpgrade, last_phase)?;
        let acted = self.guest_upgrade(hypervisor.as_ref().unwrap(), work, warnings)?;
        self.finish(phases, Phase::GuestUpgrade, plain(acted));

        self.enter(clock, Phase::GuestDrain, last_phase)?;
        let acted = self.guest_drain(work)?;
        self.finish(phases, Phase::GuestDrain, plain(acted));

        self.enter(clock, Phase::HostUpgrade, last_phase)?;
        self.host_upgrade(hypervisor.as_ref().unwrap())?;
        self.finish(phases, Phase::HostUpgrade, ok);

        self.enter(clock, Phase::HostReboot, last_phase)?;
        self.host_reboot(hypervisor)?;
        self.finish(phases, Phase::HostReboot, ok);

        self.enter(clock, Phase::Verify, last_phase)?;
        let acted = self.verify(work, warnings)?;
        self.finish(phases, Phase::Verify, plain(acted));

        self.enter(clock, Phase::Done, last_phase)?;
        self.finish(phases, Phase::Done, ok);
        Ok(())
    }

    fn enter(&self, clock: Instant, phase: Phase, last_phase: &mut Option<Phase>) -> Result<()> {
        *last_phase = Some(phase);
        self.cancel.check()?;
        if clock.elapsed() > self.host.host_deadline {
            return Err(DrydockError::HostDeadlineExceeded(format!(
                "host {} exceeded its {}s budget entering {}",
                self.host.name,
                self.host.host_deadline.as_secs(),
                phase
            )));
        }
        self.output.on_phase_start(&self.host.name, phase);
        Ok(())
    }

    fn finish(&self, phases: &mut Vec<(Phase, PhaseStatus)>, phase: Phase, status: PhaseStatus) {
        phases.push((phase, status));
        self.output.on_phase_end(&self.host.name, phase, status);
    }

    /// API and SSH must both answer before anything state-changing happens.
    fn preflight(&self, hypervisor: &Arc<dyn Session>) -> Result<Vec<GuestDescriptor>> {
        let vms = self
            .api
            .list_vms()
            .map_err(|e| DrydockError::PreflightFailed(format!("list_vms: {}", e)))?;
        let containers = self
            .api
            .list_containers()
            .map_err(|e| DrydockError::PreflightFailed(format!("list_containers: {}", e)))?;
        hypervisor
            .probe()
            .map_err(|e| DrydockError::PreflightFailed(format!("SSH probe: {}", e)))?;

        let mut all = vms;
        all.extend(containers);
        Ok(all)
    }

    /// Materialize guest records, intersecting with the manifest inventory
    /// when one is present. Guests absent from the inventory are recorded
    /// but never touched.
    fn discover(&self, discovered: Vec<GuestDescriptor>) -> Result<Vec<GuestWork>> {
        let inventory = &self.host.inventory;
        let mut work: Vec<GuestWork> = Vec::new();

        for descriptor in discovered {
            let (managed, overrides) = if inventory.is_empty() {
                (true, None)
            } else {
                match inventory.iter().find(|e| e.vmid == descriptor.vmid) {
                    Some(entry) => (entry.managed, entry.overrides.clone()),
                    None => (false, None),
                }
            };
            let outcome = GuestOutcome::new(
                descriptor.vmid,
                descriptor.kind,
                descriptor.name.clone(),
                managed,
                descriptor.status,
            );
            self.output.debug(&format!(
                "{} discovered {} ({}, managed={})",
                self.host.name,
                outcome.label(),
                descriptor.status,
                managed
            ));
            work.push(GuestWork {
                descriptor,
                overrides,
                outcome,
            });
        }

        for entry in inventory.iter() {
            if !work.iter().any(|w| w.descriptor.vmid == entry.vmid) {
                if entry.managed {
                    return Err(DrydockError::GuestUnknown(format!(
                        "{} listed in inventory but missing from node {}",
                        entry.vmid, self.host.api.node
                    )));
                }
                self.output.info(&format!(
                    "inventory guest {} not present on {}; unmanaged, ignoring",
                    entry.vmid, self.host.name
                ));
            }
        }

        Ok(work)
    }

    fn login_for(&self, work: &GuestWork) -> GuestLogin {
        let overrides = work.overrides.clone().unwrap_or_default();
        GuestLogin {
            user: overrides.user.unwrap_or_else(|| self.host.guest.user.clone()),
            identity_file: overrides
                .identity_file
                .or_else(|| self.host.guest.identity_file.clone()),
            extra_args: self.host.guest.extra_args.clone(),
            password: self.creds.password_for(work.descriptor.vmid),
        }
    }

    fn alternate_login(&self, primary: &GuestLogin) -> Option<GuestLogin> {
        if primary.user == "root" {
            return None;
        }
        let mut alt = primary.clone();
        alt.user = String::from("root");
        Some(alt)
    }

    /// Upgrade packages in every managed, currently-running guest. Failures
    /// are tolerated or fatal per host/guest policy.
    fn guest_upgrade(
        &self,
        hypervisor: &Arc<dyn Session>,
        work: &mut [GuestWork],
        warnings: &mut Vec<String>,
    ) -> Result<bool> {
        let targets: Vec<usize> = work
            .iter()
            .enumerate()
            .filter(|(_, w)| w.outcome.managed && w.outcome.pre_status == GuestStatus::Running)
            .map(|(i, _)| i)
            .collect();
        if targets.is_empty() {
            return Ok(false);
        }

        if self.host.dry_run {
            for &idx in targets.iter() {
                self.output.would_execute(
                    &format!("{}/{}", self.host.name, work[idx].outcome.label()),
                    "detect OS family and run package upgrade",
                );
                work[idx].outcome.upgrade = StepOutcome::DryRan;
            }
            return Ok(true);
        }

        let workers = (self.host.guest_parallel as usize).min(targets.len());
        let results: Vec<(usize, StepOutcome, bool)> = if workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| DrydockError::Config(format!("failed to build guest pool: {}", e)))?;
            let shared: &[GuestWork] = work;
            pool.install(|| {
                targets
                    .par_iter()
                    .map(|&idx| {
                        let (outcome, used_alt) = self.upgrade_one(hypervisor, &shared[idx]);
                        (idx, outcome, used_alt)
                    })
                    .collect()
            })
        } else {
            let mut out = Vec::new();
            for &idx in targets.iter() {
                self.cancel.check()?;
                let (outcome, used_alt) = self.upgrade_one(hypervisor, &work[idx]);
                out.push((idx, outcome, used_alt));
            }
            out
        };

        for (idx, step, used_alt) in results {
            self.cancel.check()?;
            let vmid = work[idx].descriptor.vmid;
            work[idx].outcome.used_alternate_credentials = used_alt;
            work[idx].outcome.upgrade = step;
            if let StepOutcome::Failed(ref msg) = work[idx].outcome.upgrade {
                match self.host.policy_for(vmid) {
                    GuestFailurePolicy::Abort => {
                        return Err(DrydockError::UpgradeFailed {
                            step: format!("guest {}", vmid),
                            stderr: msg.clone(),
                        });
                    }
                    GuestFailurePolicy::Continue => {
                        warnings.push(format!("guest {} upgrade failed: {}", vmid, msg));
                    }
                }
            }
        }
        Ok(true)
    }

    fn upgrade_one(&self, hypervisor: &Arc<dyn Session>, work: &GuestWork) -> (StepOutcome, bool) {
        if self.cancel.is_cancelled() {
            return (StepOutcome::Skipped, false);
        }

        let login = self.login_for(work);
        let session = match self
            .factory
            .open_guest(&self.host, hypervisor, &work.descriptor, &login)
        {
            Ok(s) => s,
            Err(e) => return (StepOutcome::Failed(format!("session: {}", e)), false),
        };

        let alt_login = self.alternate_login(&login);
        let factory = Arc::clone(&self.factory);
        let host = self.host.clone();
        let hyp = Arc::clone(hypervisor);
        let descriptor = work.descriptor.clone();
        let alternate = move || -> Option<Arc<dyn Session>> {
            let login = alt_login?;
            factory.open_guest(&host, &hyp, &descriptor, &login).ok()
        };

        let result = upgrade::upgrade(
            session.as_ref(),
            &self.output,
            self.host.stderr_cap,
            alternate,
        );
        session.close();
        match result {
            Ok(report) => (StepOutcome::Succeeded, report.used_alternate_credentials),
            Err(e) => (StepOutcome::Failed(e.to_string()), false),
        }
    }

    /// Bring every managed guest that was running at DISCOVER to a stop.
    /// A guest that stopped on its own since discovery is left alone.
    fn guest_drain(&self, work: &mut [GuestWork]) -> Result<bool> {
        let mut acted = false;
        for w in work.iter_mut() {
            if !(w.outcome.managed && w.outcome.pre_status == GuestStatus::Running) {
                continue;
            }
            self.cancel.check()?;
            acted = true;
            let vmid = w.descriptor.vmid;
            let kind = w.descriptor.kind;

            if self.host.dry_run {
                self.api.drain_guest(vmid, kind, self.host.shutdown_deadline)?;
                w.outcome.drain = StepOutcome::DryRan;
                continue;
            }

            let current = self.api.guest_status(vmid, kind)?;
            if current.status == GuestStatus::Stopped {
                w.outcome.drain = StepOutcome::Skipped;
                w.outcome.drained_via = Some(DrainMethod::AlreadyStopped);
                continue;
            }

            match self.api.drain_guest(vmid, kind, self.host.shutdown_deadline) {
                Ok(method) => {
                    w.outcome.drain = StepOutcome::Succeeded;
                    w.outcome.drained_via = Some(method);
                }
                Err(e) => {
                    // An undrained guest makes the reboot unsafe
                    w.outcome.drain = StepOutcome::Failed(e.to_string());
                    return Err(e);
                }
            }
        }
        Ok(acted)
    }

    /// The hypervisor gets the same family-table treatment as its guests.
    /// Failure here is always fatal to the workflow.
    fn host_upgrade(&self, hypervisor: &Arc<dyn Session>) -> Result<()> {
        if self.host.dry_run {
            self.output.would_execute(
                &self.host.name,
                "detect OS family and run package upgrade",
            );
            return Ok(());
        }
        upgrade::upgrade(
            hypervisor.as_ref(),
            &self.output,
            self.host.stderr_cap,
            || None,
        )
        .map(|_| ())
    }

    /// Reboot is always issued (unless dry-run); the session dropping is the
    /// expected shape of success. Then wait for SSH plus one API answer.
    fn host_reboot(&self, hypervisor: &mut Option<Arc<dyn Session>>) -> Result<()> {
        let session = hypervisor
            .take()
            .ok_or_else(|| DrydockError::Transport("no hypervisor session open".into()))?;

        match session.run_with_timeout("reboot", REBOOT_COMMAND_TIMEOUT) {
            Ok(_) => {}
            Err(DrydockError::Timeout(_))
            | Err(DrydockError::Transport(_))
            | Err(DrydockError::Unreachable(_)) => {
                // the transport dying under a reboot is normal
            }
            Err(e) => return Err(e),
        }
        session.close();

        if self.host.dry_run {
            *hypervisor = Some(session);
            return Ok(());
        }
        drop(session);

        let waited = Instant::now();
        let grace = (self.host.reboot_deadline / 4).min(Duration::from_secs(5));
        self.cancel.sleep(grace)?;

        let mut delay = REBOOT_PROBE_DELAY_START;
        loop {
            if waited.elapsed() >= self.host.reboot_deadline {
                return Err(DrydockError::HostDeadlineExceeded(format!(
                    "hypervisor {} did not return within {}s of reboot",
                    self.host.name,
                    self.host.reboot_deadline.as_secs()
                )));
            }
            self.cancel.check()?;

            match self.factory.open_hypervisor(&self.host) {
                Ok(session) => {
                    if session.probe().is_ok() && self.api.list_vms().is_ok() {
                        self.output.info(&format!(
                            "{} is back after {}s",
                            self.host.name,
                            waited.elapsed().as_secs()
                        ));
                        *hypervisor = Some(session);
                        return Ok(());
                    }
                    session.close();
                }
                Err(DrydockError::Cancelled) => return Err(DrydockError::Cancelled),
                Err(_) => {}
            }

            self.cancel.sleep(delay)?;
            delay = (delay * 2).min(REBOOT_PROBE_DELAY_CAP);
        }
    }

    /// Restart every guest that was running at DISCOVER and confirm it
    /// reaches `running`. Guests stopped before the run stay stopped.
    fn verify(&self, work: &mut [GuestWork], warnings: &mut Vec<String>) -> Result<bool> {
        let mut acted = false;
        for w in work.iter_mut() {
            if w.outcome.pre_status != GuestStatus::Running {
                continue;
            }
            self.cancel.check()?;
            acted = true;
            let vmid = w.descriptor.vmid;
            let kind = w.descriptor.kind;

            if self.host.dry_run {
                let handle = self.api.start_guest(vmid, kind)?;
                self.api.wait_task(&handle, self.host.verify_deadline)?;
                w.outcome.restart = StepOutcome::DryRan;
                continue;
            }

            match self.restart_guest(vmid, kind) {
                Ok(()) => w.outcome.restart = StepOutcome::Succeeded,
                Err(DrydockError::Cancelled) => return Err(DrydockError::Cancelled),
                Err(e) => {
                    w.outcome.restart = StepOutcome::Failed(e.to_string());
                    warnings.push(format!("guest {} failed verification: {}", vmid, e));
                }
            }
        }
        Ok(acted)
    }

    fn restart_guest(&self, vmid: u64, kind: crate::api::types::GuestKind) -> Result<()> {
        // A guest with onboot set may already be up; starting it again
        // would be an error, so look first.
        let current = self.api.guest_status(vmid, kind)?;
        if current.status == GuestStatus::Running {
            return Ok(());
        }

        let handle = self.api.start_guest(vmid, kind)?;
        self.api.wait_task(&handle, self.host.verify_deadline)?;

        let waited = Instant::now();
        loop {
            if self.api.guest_status(vmid, kind)?.status == GuestStatus::Running {
                return Ok(());
            }
            if waited.elapsed() >= self.host.verify_deadline {
                return Err(DrydockError::Timeout(format!(
                    "guest {} not running {}s after start",
                    vmid,
                    self.host.verify_deadline.as_secs()
                )));
            }
            self.cancel.sleep(VERIFY_POLL_INTERVAL)?;
        }
    }
}
