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

//! The fleet scheduler: credential preflight, bounded dispatch of host
//! workflows, outcome aggregation and exit-status derivation.

use crate::cancel::CancelToken;
use crate::error::{DrydockError, Result};
use crate::manifest::resolve::{effective_hosts, EffectiveHost};
use crate::manifest::{Manifest, TokenRef};
use crate::output::OutputHandlerRef;
use crate::secrets::SecretSource;
use crate::workflow::outcome::{FinalState, RunOutcome};
use crate::workflow::{run_host, ResolvedCredentials};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::sync::Arc;

/// Per-run knobs from the CLI. `None` leaves the manifest value in charge.
#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Restrict to these host names, manifest order preserved
    pub hosts: Option<Vec<String>>,
    /// Force dry-run on regardless of manifest values
    pub dry_run: bool,
    /// Upper bound on worker count, on top of the manifest's max_parallel
    pub max_parallel: Option<u64>,
}

pub type HostRunner = dyn Fn(&EffectiveHost, ResolvedCredentials) -> RunOutcome + Send + Sync;

pub struct FleetScheduler {
    manifest: Manifest,
    secrets: Arc<dyn SecretSource>,
    output: OutputHandlerRef,
    cancel: CancelToken,
    runner: Box<HostRunner>,
}

/// Aggregated result of one fleet run.
pub struct FleetReport {
    pub outcomes: Vec<RunOutcome>,
    pub cancelled: bool,
}

impl FleetReport {
    /// 0 all green (warnings allowed), 2 any failure, 3 everything skipped,
    /// 130 external cancellation.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            return 130;
        }
        if self
            .outcomes
            .iter()
            .any(|o| matches!(o.final_state, FinalState::Failed | FinalState::Aborted))
        {
            return 2;
        }
        if self.outcomes.iter().any(|o| o.is_success()) {
            return 0;
        }
        3
    }
}

impl FleetScheduler {
    pub fn new(
        manifest: Manifest,
        secrets: Arc<dyn SecretSource>,
        output: OutputHandlerRef,
        cancel: CancelToken,
    ) -> Self {
        let runner_output = Arc::clone(&output);
        let runner_cancel = cancel.clone();
        Self {
            manifest,
            secrets,
            output,
            cancel,
            runner: Box::new(move |host, creds| {
                run_host(host, creds, Arc::clone(&runner_output), runner_cancel.clone())
            }),
        }
    }

    /// Swap the per-host runner; the harness for scheduler tests.
    pub fn with_runner(
        manifest: Manifest,
        secrets: Arc<dyn SecretSource>,
        output: OutputHandlerRef,
        cancel: CancelToken,
        runner: Box<HostRunner>,
    ) -> Self {
        Self {
            manifest,
            secrets,
            output,
            cancel,
            runner,
        }
    }

    pub fn run(&self, options: &SchedulerOptions) -> Result<FleetReport> {
        let mut selected = self.select_hosts(options)?;

        if options.dry_run {
            for host in selected.iter_mut() {
                host.dry_run = true;
            }
        }

        self.output
            .on_run_start(selected.len(), selected.iter().all(|h| h.dry_run) && !selected.is_empty());

        // Preflight: every referenced secret must resolve before a host is
        // scheduled. Hosts with gaps are skipped, never partially run.
        let mut runnable: Vec<(usize, EffectiveHost, ResolvedCredentials)> = Vec::new();
        let mut outcomes: Vec<(usize, RunOutcome)> = Vec::new();
        for (idx, host) in selected.into_iter().enumerate() {
            match self.preflight_credentials(&host) {
                Ok(creds) => runnable.push((idx, host, creds)),
                Err(e @ DrydockError::CredentialMissing(_)) => {
                    self.output
                        .warning(&format!("skipping host {}: {}", host.name, e));
                    outcomes.push((idx, RunOutcome::skipped(&host.name, &e.to_string())));
                }
                Err(e) => return Err(e),
            }
        }

        let workers = self.worker_count(options, runnable.len());
        if !runnable.is_empty() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| DrydockError::Config(format!("failed to build worker pool: {}", e)))?;
            let runner = &self.runner;
            let ran: Vec<(usize, RunOutcome)> = pool.install(|| {
                runnable
                    .par_iter()
                    .map(|(idx, host, creds)| (*idx, runner(host, creds.clone())))
                    .collect()
            });
            outcomes.extend(ran);
        }

        outcomes.sort_by_key(|(idx, _)| *idx);
        let outcomes: Vec<RunOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();
        self.output.on_recap(&outcomes);

        Ok(FleetReport {
            outcomes,
            cancelled: self.cancel.is_cancelled(),
        })
    }

    fn select_hosts(&self, options: &SchedulerOptions) -> Result<Vec<EffectiveHost>> {
        let all = effective_hosts(&self.manifest)?;
        match &options.hosts {
            None => Ok(all),
            Some(names) => {
                for name in names.iter() {
                    if !all.iter().any(|h| &h.name == name) {
                        return Err(DrydockError::Config(format!(
                            "host '{}' is not in the manifest",
                            name
                        )));
                    }
                }
                Ok(all
                    .into_iter()
                    .filter(|h| names.iter().any(|n| n == &h.name))
                    .collect())
            }
        }
    }

    fn worker_count(&self, options: &SchedulerOptions, n_hosts: usize) -> usize {
        let manifest_cap = self.manifest.max_parallel();
        let scheduler_cap = options.max_parallel.unwrap_or(u64::MAX).max(1);
        manifest_cap.min(scheduler_cap).min(n_hosts.max(1) as u64) as usize
    }

    /// Resolve every secret the host references. Values go straight into the
    /// credentials bundle and nowhere else.
    fn preflight_credentials(&self, host: &EffectiveHost) -> Result<ResolvedCredentials> {
        let token_id = match &host.api.token_id {
            TokenRef::Literal(s) => s.clone(),
            TokenRef::Env { env } => self.secrets.resolve(env)?,
        };
        let token_secret = self.secrets.resolve(&host.api.secret_env)?;

        let guest_password = match &host.guest.password_env {
            Some(name) => Some(self.secrets.resolve(name)?),
            None => None,
        };

        let mut per_guest_passwords = IndexMap::new();
        for entry in host.inventory.iter() {
            if let Some(overrides) = &entry.overrides {
                if let Some(name) = &overrides.password_env {
                    per_guest_passwords.insert(entry.vmid, self.secrets.resolve(name)?);
                }
            }
        }

        Ok(ResolvedCredentials {
            token_id,
            token_secret,
            guest_password,
            per_guest_passwords,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::loading::parse_manifest;
    use crate::output::NullOutputHandler;
    use crate::secrets::StaticSecrets;
    use crate::workflow::phase::{Phase, PhaseStatus};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const FLEET: &str = r#"
[defaults]
user = "root"
max_parallel = 2

[[hosts]]
name = "a"
host = "10.0.0.1"
[hosts.api]
node = "a"
token_id = "root@pam!t"
secret_env = "A_SECRET"

[[hosts]]
name = "b"
host = "10.0.0.2"
[hosts.api]
node = "b"
token_id = "root@pam!t"
secret_env = "B_SECRET"

[[hosts]]
name = "c"
host = "10.0.0.3"
[hosts.api]
node = "c"
token_id = "root@pam!t"
secret_env = "C_SECRET"
"#;

    fn all_secrets() -> Arc<StaticSecrets> {
        Arc::new(StaticSecrets::from_pairs(&[
            ("A_SECRET", "sa"),
            ("B_SECRET", "sb"),
            ("C_SECRET", "sc"),
        ]))
    }

    fn succeeding_outcome(host: &str) -> RunOutcome {
        RunOutcome {
            host: host.to_string(),
            final_state: FinalState::Succeeded,
            phases: vec![(Phase::Done, PhaseStatus::Succeeded)],
            guests: vec![],
            warnings: vec![],
            error: None,
            last_phase: Some(Phase::Done),
            started: Utc::now(),
            duration: Duration::from_secs(1),
        }
    }

    fn scheduler_with(
        manifest_text: &str,
        secrets: Arc<StaticSecrets>,
        runner: Box<HostRunner>,
    ) -> FleetScheduler {
        FleetScheduler::with_runner(
            parse_manifest(manifest_text).unwrap(),
            secrets,
            Arc::new(NullOutputHandler),
            CancelToken::new(),
            runner,
        )
    }

    #[test]
    fn test_all_hosts_succeed_exit_zero() {
        let scheduler = scheduler_with(
            FLEET,
            all_secrets(),
            Box::new(|host, _| succeeding_outcome(&host.name)),
        );
        let report = scheduler.run(&SchedulerOptions::default()).unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.exit_code(), 0);
        // manifest order preserved in the recap
        let names: Vec<&str> = report.outcomes.iter().map(|o| o.host.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_one_failure_exit_two() {
        let scheduler = scheduler_with(
            FLEET,
            all_secrets(),
            Box::new(|host, _| {
                let mut o = succeeding_outcome(&host.name);
                if host.name == "b" {
                    o.final_state = FinalState::Failed;
                    o.error = Some("boom".into());
                }
                o
            }),
        );
        let report = scheduler.run(&SchedulerOptions::default()).unwrap();
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_missing_secret_skips_host_only() {
        let secrets = Arc::new(StaticSecrets::from_pairs(&[
            ("A_SECRET", "sa"),
            ("C_SECRET", "sc"),
        ]));
        let ran: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let ran_clone = Arc::clone(&ran);
        let scheduler = scheduler_with(
            FLEET,
            secrets,
            Box::new(move |host, _| {
                ran_clone.lock().unwrap().push(host.name.clone());
                succeeding_outcome(&host.name)
            }),
        );
        let report = scheduler.run(&SchedulerOptions::default()).unwrap();

        let b = report.outcomes.iter().find(|o| o.host == "b").unwrap();
        assert_eq!(b.final_state, FinalState::Skipped);
        assert!(b.error.as_deref().unwrap().contains("B_SECRET"));
        // the skipped host never reached the runner
        assert!(!ran.lock().unwrap().contains(&"b".to_string()));
        // others succeeded, so the run is still green
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_single_host_missing_secret_exit_three() {
        let secrets = Arc::new(StaticSecrets::from_pairs(&[]));
        let scheduler = scheduler_with(
            FLEET,
            secrets,
            Box::new(|host, _| succeeding_outcome(&host.name)),
        );
        let report = scheduler.run(&SchedulerOptions::default()).unwrap();
        assert!(report.outcomes.iter().all(|o| o.final_state == FinalState::Skipped));
        assert_eq!(report.exit_code(), 3);
    }

    #[test]
    fn test_host_filter_selects_subset() {
        let ran: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let ran_clone = Arc::clone(&ran);
        let scheduler = scheduler_with(
            FLEET,
            all_secrets(),
            Box::new(move |host, _| {
                ran_clone.lock().unwrap().push(host.name.clone());
                succeeding_outcome(&host.name)
            }),
        );
        let options = SchedulerOptions {
            hosts: Some(vec!["c".into(), "a".into()]),
            ..Default::default()
        };
        let report = scheduler.run(&options).unwrap();
        assert_eq!(report.outcomes.len(), 2);
        let mut names = ran.lock().unwrap().clone();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_unknown_host_filter_is_config_error() {
        let scheduler = scheduler_with(
            FLEET,
            all_secrets(),
            Box::new(|host, _| succeeding_outcome(&host.name)),
        );
        let options = SchedulerOptions {
            hosts: Some(vec!["nope".into()]),
            ..Default::default()
        };
        assert!(matches!(
            scheduler.run(&options),
            Err(DrydockError::Config(_))
        ));
    }

    #[test]
    fn test_concurrency_bound_never_exceeded() {
        // three hosts, manifest max_parallel = 2: two may run at once, never three
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let current_c = Arc::clone(&current);
        let peak_c = Arc::clone(&peak);
        let scheduler = scheduler_with(
            FLEET,
            all_secrets(),
            Box::new(move |host, _| {
                let now = current_c.fetch_add(1, Ordering::SeqCst) + 1;
                peak_c.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(150));
                current_c.fetch_sub(1, Ordering::SeqCst);
                succeeding_outcome(&host.name)
            }),
        );
        let report = scheduler.run(&SchedulerOptions::default()).unwrap();
        assert_eq!(report.exit_code(), 0);
        assert_eq!(peak.load(Ordering::SeqCst), 2, "expected exactly two in flight at peak");
    }

    #[test]
    fn test_scheduler_cap_tightens_manifest_parallelism() {
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let peak_c = Arc::clone(&peak);
        let current_c = Arc::clone(&current);
        let scheduler = scheduler_with(
            FLEET,
            all_secrets(),
            Box::new(move |host, _| {
                let now = current_c.fetch_add(1, Ordering::SeqCst) + 1;
                peak_c.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                current_c.fetch_sub(1, Ordering::SeqCst);
                succeeding_outcome(&host.name)
            }),
        );
        let options = SchedulerOptions {
            max_parallel: Some(1),
            ..Default::default()
        };
        scheduler.run(&options).unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dry_run_override_reaches_every_host() {
        let saw_dry: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let saw_clone = Arc::clone(&saw_dry);
        let scheduler = scheduler_with(
            FLEET,
            all_secrets(),
            Box::new(move |host, _| {
                saw_clone.lock().unwrap().push(host.dry_run);
                succeeding_outcome(&host.name)
            }),
        );
        let options = SchedulerOptions {
            dry_run: true,
            ..Default::default()
        };
        scheduler.run(&options).unwrap();
        assert!(saw_dry.lock().unwrap().iter().all(|d| *d));
    }

    #[test]
    fn test_cancelled_run_exits_130() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let scheduler = FleetScheduler::with_runner(
            parse_manifest(FLEET).unwrap(),
            all_secrets(),
            Arc::new(NullOutputHandler),
            cancel,
            Box::new(|host, _| {
                let mut o = succeeding_outcome(&host.name);
                o.final_state = FinalState::Aborted;
                o
            }),
        );
        let report = scheduler.run(&SchedulerOptions::default()).unwrap();
        assert_eq!(report.exit_code(), 130);
    }

    #[test]
    fn test_credentials_resolved_from_env_token_ref() {
        let doc = r#"
[defaults]
user = "root"

[[hosts]]
name = "a"
host = "10.0.0.1"
[hosts.api]
node = "a"
token_id = { env = "A_TOKEN_ID" }
secret_env = "A_SECRET"
"#;
        let secrets = Arc::new(StaticSecrets::from_pairs(&[
            ("A_TOKEN_ID", "root@pam!fromenv"),
            ("A_SECRET", "sa"),
        ]));
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let scheduler = scheduler_with(
            doc,
            secrets,
            Box::new(move |host, creds| {
                seen_clone.lock().unwrap().push(creds.token_id.clone());
                succeeding_outcome(&host.name)
            }),
        );
        scheduler.run(&SchedulerOptions::default()).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["root@pam!fromenv".to_string()]);
    }
}
