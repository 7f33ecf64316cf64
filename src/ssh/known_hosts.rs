// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Server host key verification against `known_hosts`.

use directories::BaseDirs;
use russh::client::Handler;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use super::error::SshError;

/// Get the default known_hosts file path
pub fn get_default_known_hosts_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

/// Mode for host key checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrictHostKeyChecking {
    /// Always verify host keys (fail on unknown/changed)
    #[serde(alias = "true")]
    Yes,
    /// Never verify host keys (accept all)
    #[serde(alias = "false")]
    No,
    /// Verify known hosts, add new ones automatically (TOFU)
    #[default]
    #[serde(alias = "tofu")]
    AcceptNew,
}

impl FromStr for StrictHostKeyChecking {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "yes" | "true" => Self::Yes,
            "no" | "false" => Self::No,
            _ => Self::AcceptNew,
        })
    }
}

/// Handler verifying the server key of one connection.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    port: u16,
    mode: StrictHostKeyChecking,
    known_hosts: Option<PathBuf>,
}

impl ClientHandler {
    pub fn new(hostname: impl Into<String>, port: u16, mode: StrictHostKeyChecking) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            mode,
            known_hosts: get_default_known_hosts_path(),
        }
    }

    /// Verify against `path` instead of `~/.ssh/known_hosts`.
    pub fn with_known_hosts(mut self, path: PathBuf) -> Self {
        self.known_hosts = Some(path);
        self
    }

    /// `Ok(true)` when the key is recorded, `Ok(false)` when the host is
    /// unknown, an error when a different key is recorded.
    fn is_known(&self, key: &russh::keys::PublicKey) -> Result<bool, SshError> {
        let Some(path) = &self.known_hosts else {
            return Ok(false);
        };
        russh::keys::check_known_hosts_path(&self.hostname, self.port, key, path).map_err(|_| {
            SshError::HostKeyMismatch {
                host: self.hostname.clone(),
            }
        })
    }

    fn learn(&self, key: &russh::keys::PublicKey) {
        let Some(path) = &self.known_hosts else {
            return;
        };
        if let Some(ssh_dir) = path.parent() {
            let _ = std::fs::create_dir_all(ssh_dir);
        }
        match russh::keys::known_hosts::learn_known_hosts_path(
            &self.hostname,
            self.port,
            key,
            path,
        ) {
            Ok(()) => tracing::info!("Added {} to {:?}", self.hostname, path),
            Err(e) => tracing::warn!("Could not record host key for {}: {}", self.hostname, e),
        }
    }
}

impl Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.mode {
            StrictHostKeyChecking::No => Ok(true),
            StrictHostKeyChecking::Yes => {
                let known = self.is_known(server_public_key)?;
                if !known {
                    tracing::warn!("Host key for {} is not in known_hosts", self.hostname);
                }
                Ok(known)
            }
            StrictHostKeyChecking::AcceptNew => {
                if !self.is_known(server_public_key)? {
                    self.learn(server_public_key);
                }
                Ok(true)
            }
        }
    }
}
