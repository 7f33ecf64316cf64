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

use std::io;
use thiserror::Error;

/// Failures inside the SSH layer. Callers see them wrapped in
/// [`FleetError::Connection`](crate::error::FleetError::Connection) or
/// [`FleetError::Transfer`](crate::error::FleetError::Transfer).
#[derive(Debug, Error)]
pub enum SshError {
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("invalid key: {0}")]
    KeyInvalid(#[from] russh::keys::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("could not resolve {0}")]
    AddressInvalid(String),

    #[error("authentication as {user} was rejected")]
    AuthFailed { user: String },

    #[error("no SSH agent reachable through SSH_AUTH_SOCK")]
    AgentConnectionFailed,

    #[error("the SSH agent holds no identities")]
    AgentNoIdentities,

    #[error("no authentication method available: {0}")]
    NoAuthMethod(String),

    /// The server key differs from the one recorded in known_hosts
    #[error("host key for {host} does not match known_hosts")]
    HostKeyMismatch { host: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
