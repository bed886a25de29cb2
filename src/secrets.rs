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

//! Secret resolution. Names come from the manifest, values from the process
//! environment, looked up once during scheduler preflight. Values are never
//! logged and never appear in outcomes or error messages.

use crate::error::{DrydockError, Result};
use std::collections::HashMap;

pub trait SecretSource: Send + Sync {
    /// Resolve a secret name to its value. A name that cannot be resolved is
    /// a `CredentialMissing` error naming the secret, never the value.
    fn resolve(&self, name: &str) -> Result<String>;
}

/// Reads secrets from the process environment. An unset or empty variable is
/// treated as missing.
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn resolve(&self, name: &str) -> Result<String> {
        match std::env::var(name) {
            Ok(v) if !v.is_empty() => Ok(v),
            _ => Err(DrydockError::CredentialMissing(name.to_string())),
        }
    }
}

/// Fixed in-memory source, used by tests and embedders.
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl SecretSource for StaticSecrets {
    fn resolve(&self, name: &str) -> Result<String> {
        match self.values.get(name) {
            Some(v) => Ok(v.clone()),
            None => Err(DrydockError::CredentialMissing(name.to_string())),
        }
    }
}
