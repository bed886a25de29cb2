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

//! OS family detection and package upgrades over a session.
//!
//! Detection is a pure function from the parsed /etc/os-release map to a sum
//! type; each family maps to a fixed non-interactive command sequence. The
//! same table is used for guests and for the hypervisor itself.

use crate::connection::command::CommandResult;
use crate::connection::session::Session;
use crate::error::{DrydockError, Result};
use crate::output::OutputHandlerRef;
use crate::workflow::outcome::truncate_output;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

static PERMISSION_DENIED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)permission denied|operation not permitted|are you root|must be run as root|superuser")
        .unwrap()
});

/// Parse /etc/os-release into a key=value map. Quotes are stripped, comments
/// and malformed lines ignored.
pub fn parse_os_release(text: &str) -> IndexMap<String, String> {
    let mut map = IndexMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            map.insert(key.trim().to_string(), value.to_string());
        }
    }
    map
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsFamily {
    Debian,
    Fedora,
    OpenSuse,
    Arch,
    Alpine,
    Unknown,
}

impl OsFamily {
    /// Classify by ID and ID_LIKE; first match in table order wins.
    pub fn classify(os_release: &IndexMap<String, String>) -> OsFamily {
        let id = os_release.get("ID").map(|s| s.as_str()).unwrap_or("");
        let id_like = os_release.get("ID_LIKE").map(|s| s.as_str()).unwrap_or("");
        let like_has = |needle: &str| id_like.split_whitespace().any(|w| w == needle);

        if matches!(id, "debian" | "ubuntu" | "pika") || like_has("debian") {
            OsFamily::Debian
        } else if id == "fedora" || like_has("fedora") {
            OsFamily::Fedora
        } else if id.contains("opensuse") || like_has("suse") || id_like.contains("suse") {
            OsFamily::OpenSuse
        } else if id == "arch" || like_has("arch") {
            OsFamily::Arch
        } else if id == "alpine" {
            OsFamily::Alpine
        } else {
            OsFamily::Unknown
        }
    }

    /// Non-interactive, assume-yes upgrade sequence for this family.
    pub fn upgrade_commands(&self) -> &'static [&'static str] {
        match self {
            OsFamily::Debian => &["apt-get update", "apt-get -y upgrade"],
            OsFamily::Fedora => &["dnf -y upgrade --refresh"],
            OsFamily::OpenSuse => &[
                "zypper --non-interactive refresh",
                "zypper --non-interactive update",
            ],
            OsFamily::Arch => &["pacman -Syu --noconfirm"],
            OsFamily::Alpine => &["apk update", "apk upgrade"],
            OsFamily::Unknown => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OsFamily::Debian => "debian",
            OsFamily::Fedora => "fedora",
            OsFamily::OpenSuse => "opensuse",
            OsFamily::Arch => "arch",
            OsFamily::Alpine => "alpine",
            OsFamily::Unknown => "unknown",
        }
    }
}

/// True when stderr of a failed step looks like a privileges problem; drives
/// the single alternate-credential retry.
pub fn is_permission_denied(rc: i32, stderr: &str) -> bool {
    rc == 1 && PERMISSION_DENIED_RE.is_match(stderr)
}

/// Outcome detail from a completed upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    pub family: OsFamily,
    pub used_alternate_credentials: bool,
}

/// Read and classify the target's OS.
pub fn detect_family(session: &dyn Session) -> Result<OsFamily> {
    let result = session.run("cat /etc/os-release")?;
    if !result.success() {
        return Err(DrydockError::OsDetectionFailed(format!(
            "/etc/os-release unreadable on {} (rc={})",
            session.target(),
            result.rc
        )));
    }
    let family = OsFamily::classify(&parse_os_release(&result.out));
    if family == OsFamily::Unknown {
        return Err(DrydockError::OsDetectionFailed(format!(
            "unsupported OS family on {}",
            session.target()
        )));
    }
    Ok(family)
}

fn run_sequence(
    session: &dyn Session,
    family: OsFamily,
    output: &OutputHandlerRef,
    stderr_cap: usize,
) -> std::result::Result<(), (String, CommandResult)> {
    for step in family.upgrade_commands() {
        output.debug(&format!("{} => {}", session.target(), step));
        match session.run(step) {
            Ok(result) if result.success() => {}
            Ok(result) => return Err((step.to_string(), result)),
            Err(e) => {
                let result = CommandResult {
                    cmd: step.to_string(),
                    rc: -1,
                    out: String::new(),
                    err: truncate_output(&e.to_string(), stderr_cap),
                    duration: std::time::Duration::from_secs(0),
                };
                return Err((step.to_string(), result));
            }
        }
    }
    Ok(())
}

/// Upgrade the OS behind `session`. If the failing step looks like a
/// permission problem and `alternate` supplies a session under different
/// credentials, the whole sequence is retried there once.
pub fn upgrade<F>(
    session: &dyn Session,
    output: &OutputHandlerRef,
    stderr_cap: usize,
    alternate: F,
) -> Result<UpgradeReport>
where
    F: FnOnce() -> Option<std::sync::Arc<dyn Session>>,
{
    let family = detect_family(session)?;

    match run_sequence(session, family, output, stderr_cap) {
        Ok(()) => Ok(UpgradeReport {
            family,
            used_alternate_credentials: false,
        }),
        Err((step, result)) if is_permission_denied(result.rc, &result.err) => {
            let Some(alt) = alternate() else {
                return Err(DrydockError::UpgradeFailed {
                    step,
                    stderr: truncate_output(&result.err, stderr_cap),
                });
            };
            output.info(&format!(
                "{} => permission denied on '{}', retrying with alternate credentials",
                session.target(),
                step
            ));
            match run_sequence(alt.as_ref(), family, output, stderr_cap) {
                Ok(()) => Ok(UpgradeReport {
                    family,
                    used_alternate_credentials: true,
                }),
                Err((step, result)) => Err(DrydockError::UpgradeFailed {
                    step,
                    stderr: truncate_output(&result.err, stderr_cap),
                }),
            }
        }
        Err((step, result)) => Err(DrydockError::UpgradeFailed {
            step,
            stderr: truncate_output(&result.err, stderr_cap),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::command::CommandResult;
    use crate::output::NullOutputHandler;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn os_release(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_os_release_strips_quotes_and_comments() {
        let text = "# comment\nID=debian\nPRETTY_NAME=\"Debian GNU/Linux 12\"\nID_LIKE='debian'\n\nBROKEN\n";
        let map = parse_os_release(text);
        assert_eq!(map.get("ID").unwrap(), "debian");
        assert_eq!(map.get("PRETTY_NAME").unwrap(), "Debian GNU/Linux 12");
        assert_eq!(map.get("ID_LIKE").unwrap(), "debian");
        assert!(!map.contains_key("BROKEN"));
    }

    #[test]
    fn test_classify_debian_family() {
        for id in ["debian", "ubuntu", "pika"] {
            assert_eq!(OsFamily::classify(&os_release(&[("ID", id)])), OsFamily::Debian);
        }
        // ID_LIKE pulls derivatives in
        assert_eq!(
            OsFamily::classify(&os_release(&[("ID", "linuxmint"), ("ID_LIKE", "ubuntu debian")])),
            OsFamily::Debian
        );
    }

    #[test]
    fn test_classify_other_families() {
        assert_eq!(OsFamily::classify(&os_release(&[("ID", "fedora")])), OsFamily::Fedora);
        assert_eq!(
            OsFamily::classify(&os_release(&[("ID", "centos"), ("ID_LIKE", "rhel fedora")])),
            OsFamily::Fedora
        );
        assert_eq!(
            OsFamily::classify(&os_release(&[("ID", "opensuse-tumbleweed")])),
            OsFamily::OpenSuse
        );
        assert_eq!(
            OsFamily::classify(&os_release(&[("ID", "sles"), ("ID_LIKE", "suse")])),
            OsFamily::OpenSuse
        );
        assert_eq!(OsFamily::classify(&os_release(&[("ID", "arch")])), OsFamily::Arch);
        assert_eq!(
            OsFamily::classify(&os_release(&[("ID", "manjaro"), ("ID_LIKE", "arch")])),
            OsFamily::Arch
        );
        assert_eq!(OsFamily::classify(&os_release(&[("ID", "alpine")])), OsFamily::Alpine);
        assert_eq!(OsFamily::classify(&os_release(&[("ID", "plan9")])), OsFamily::Unknown);
    }

    #[test]
    fn test_first_match_wins() {
        // debian row precedes arch row in the table
        let map = os_release(&[("ID", "weird"), ("ID_LIKE", "debian arch")]);
        assert_eq!(OsFamily::classify(&map), OsFamily::Debian);
    }

    #[test]
    fn test_command_table() {
        assert_eq!(
            OsFamily::Debian.upgrade_commands(),
            &["apt-get update", "apt-get -y upgrade"]
        );
        assert_eq!(OsFamily::Fedora.upgrade_commands(), &["dnf -y upgrade --refresh"]);
        assert_eq!(OsFamily::Arch.upgrade_commands(), &["pacman -Syu --noconfirm"]);
        assert_eq!(OsFamily::Alpine.upgrade_commands(), &["apk update", "apk upgrade"]);
        assert_eq!(OsFamily::OpenSuse.upgrade_commands().len(), 2);
        assert!(OsFamily::Unknown.upgrade_commands().is_empty());
    }

    #[test]
    fn test_permission_denied_pattern() {
        assert!(is_permission_denied(1, "E: Could not open lock file - Permission denied"));
        assert!(is_permission_denied(1, "error: you cannot perform this operation unless you are root"));
        assert!(!is_permission_denied(0, "Permission denied"));
        assert!(!is_permission_denied(1, "dependency problems"));
        assert!(!is_permission_denied(100, "Permission denied"));
    }

    /// Scripted session: maps command -> (rc, stdout, stderr).
    struct ScriptedSession {
        label: String,
        responses: HashMap<String, (i32, String, String)>,
        ran: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedSession {
        fn new(label: &str, entries: &[(&str, i32, &str, &str)]) -> Self {
            Self {
                label: label.to_string(),
                responses: entries
                    .iter()
                    .map(|(cmd, rc, out, err)| {
                        (cmd.to_string(), (*rc, out.to_string(), err.to_string()))
                    })
                    .collect(),
                ran: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Session for ScriptedSession {
        fn target(&self) -> String {
            self.label.clone()
        }
        fn command_timeout(&self) -> Duration {
            Duration::from_secs(60)
        }
        fn run_with_input(
            &self,
            cmd: &str,
            _stdin: Option<&str>,
            _timeout: Duration,
        ) -> crate::error::Result<CommandResult> {
            self.ran.lock().unwrap().push(cmd.to_string());
            let (rc, out, err) = self
                .responses
                .get(cmd)
                .cloned()
                .unwrap_or((0, String::new(), String::new()));
            Ok(CommandResult {
                cmd: cmd.to_string(),
                rc,
                out,
                err,
                duration: Duration::from_secs(0),
            })
        }
        fn probe(&self) -> crate::error::Result<()> {
            Ok(())
        }
        fn close(&self) {}
    }

    const DEBIAN_RELEASE: &str = "ID=debian\nVERSION_ID=\"12\"";

    #[test]
    fn test_upgrade_happy_path() {
        let session = ScriptedSession::new(
            "ct 100",
            &[("cat /etc/os-release", 0, DEBIAN_RELEASE, "")],
        );
        let output: OutputHandlerRef = Arc::new(NullOutputHandler);
        let report = upgrade(&session, &output, 2000, || None).unwrap();
        assert_eq!(report.family, OsFamily::Debian);
        assert!(!report.used_alternate_credentials);
        let ran = session.ran.lock().unwrap();
        assert_eq!(
            *ran,
            vec!["cat /etc/os-release", "apt-get update", "apt-get -y upgrade"]
        );
    }

    #[test]
    fn test_upgrade_unreadable_os_release() {
        let session = ScriptedSession::new(
            "ct 100",
            &[("cat /etc/os-release", 1, "", "No such file or directory")],
        );
        let output: OutputHandlerRef = Arc::new(NullOutputHandler);
        let err = upgrade(&session, &output, 2000, || None).unwrap_err();
        assert!(matches!(err, DrydockError::OsDetectionFailed(_)));
    }

    #[test]
    fn test_upgrade_failure_names_step_and_stderr() {
        let session = ScriptedSession::new(
            "ct 100",
            &[
                ("cat /etc/os-release", 0, DEBIAN_RELEASE, ""),
                ("apt-get -y upgrade", 100, "", "E: broken packages"),
            ],
        );
        let output: OutputHandlerRef = Arc::new(NullOutputHandler);
        match upgrade(&session, &output, 2000, || None) {
            Err(DrydockError::UpgradeFailed { step, stderr }) => {
                assert_eq!(step, "apt-get -y upgrade");
                assert!(stderr.contains("broken packages"));
            }
            other => panic!("expected UpgradeFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_alternate_credentials_retry_once() {
        let primary = ScriptedSession::new(
            "vm 100 (admin)",
            &[
                ("cat /etc/os-release", 0, DEBIAN_RELEASE, ""),
                ("apt-get update", 1, "", "Permission denied"),
            ],
        );
        let alt = Arc::new(ScriptedSession::new(
            "vm 100 (root)",
            &[("cat /etc/os-release", 0, DEBIAN_RELEASE, "")],
        ));
        let alt_ran = Arc::clone(&alt.ran);
        let output: OutputHandlerRef = Arc::new(NullOutputHandler);
        let alt_session: Arc<dyn Session> = alt;
        let report = upgrade(&primary, &output, 2000, move || Some(alt_session)).unwrap();
        assert!(report.used_alternate_credentials);
        let ran = alt_ran.lock().unwrap();
        assert_eq!(*ran, vec!["apt-get update", "apt-get -y upgrade"]);
    }

    #[test]
    fn test_permission_denied_without_alternate_fails() {
        let primary = ScriptedSession::new(
            "vm 100",
            &[
                ("cat /etc/os-release", 0, DEBIAN_RELEASE, ""),
                ("apt-get update", 1, "", "Permission denied"),
            ],
        );
        let output: OutputHandlerRef = Arc::new(NullOutputHandler);
        let err = upgrade(&primary, &output, 2000, || None).unwrap_err();
        assert!(matches!(err, DrydockError::UpgradeFailed { .. }));
    }

    #[test]
    fn test_non_permission_failure_does_not_retry() {
        let primary = ScriptedSession::new(
            "vm 100",
            &[
                ("cat /etc/os-release", 0, DEBIAN_RELEASE, ""),
                ("apt-get update", 2, "", "network unreachable"),
            ],
        );
        let called = Arc::new(Mutex::new(false));
        let called_clone = Arc::clone(&called);
        let output: OutputHandlerRef = Arc::new(NullOutputHandler);
        let result = upgrade(&primary, &output, 2000, move || {
            *called_clone.lock().unwrap() = true;
            None
        });
        assert!(result.is_err());
        assert!(!*called.lock().unwrap(), "alternate must not be consulted");
    }
}
