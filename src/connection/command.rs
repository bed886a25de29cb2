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

use std::time::Duration;

/// Result of one remote command. A non-zero exit code is data, not an error;
/// only transport faults surface as errors from the session layer.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub cmd: String,
    pub rc: i32,
    pub out: String,
    pub err: String,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.rc == 0
    }

    /// Synthetic success, used by dry-run sessions.
    pub fn synthetic(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            rc: 0,
            out: String::new(),
            err: String::new(),
            duration: Duration::from_secs(0),
        }
    }
}

pub fn trim_newlines(s: &mut String) {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_rc_zero() {
        assert!(CommandResult::synthetic("true").success());
        let r = CommandResult {
            cmd: "false".into(),
            rc: 1,
            out: String::new(),
            err: String::new(),
            duration: Duration::from_secs(0),
        };
        assert!(!r.success());
    }

    #[test]
    fn test_trim_newlines() {
        let mut s = String::from("out\r\n");
        trim_newlines(&mut s);
        assert_eq!(s, "out");
        let mut s = String::from("no-trailer");
        trim_newlines(&mut s);
        assert_eq!(s, "no-trailer");
    }
}
