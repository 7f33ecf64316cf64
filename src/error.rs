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

//! Error taxonomy for fleet operations.
//!
//! Transport and protocol failures abort the current call and are never
//! retried. [`FleetError::CommandFailure`] carries everything an operator
//! needs to diagnose a non-zero exit without re-running the command.

use std::io;
use thiserror::Error;

/// Errors raised by hosts, registries and the transport layer.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Connecting to a host (directly or through a gateway) failed
    #[error("connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    /// The exit status marker never appeared in the command output
    #[error("no exit status received from {host} for command: {command}")]
    Protocol { host: String, command: String },

    /// Command exited non-zero while status checking was enabled
    #[error("{host}: `{command}` exited with non-zero status {code}\nSTDERR:\n{stderr}\nSTDOUT:\n{stdout}")]
    CommandFailure {
        host: String,
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("{host}:{path} does not exist")]
    FileNotFound { host: String, path: String },

    #[error("{host}:{path} has unknown file type '{output}'")]
    UnknownFileType {
        host: String,
        path: String,
        output: String,
    },

    #[error("no task named '{name}' in {scope}")]
    TaskNotFound { name: String, scope: String },

    /// Bare identifier did not resolve to a group, host, role or task
    #[error("could not resolve '{name}' as a group, host, role or task")]
    NameResolution { name: String },

    /// A task that needs a host was run without one
    #[error("task '{task}' requires a host to run on")]
    UnboundTask { task: String },

    #[error("task '{task}' has no body")]
    EmptyTask { task: String },

    /// The remote channel went away before an input operation completed
    #[error("channel to {host} is closed")]
    ChannelClosed { host: String },

    #[error("file transfer with {host} failed: {reason}")]
    Transfer { host: String, reason: String },

    /// A fleet file could not be read or applied
    #[error("fleet file {path}: {reason}")]
    Script { path: String, reason: String },

    /// The orchestrator owning this entity has been dropped
    #[error("'{name}' is no longer attached to an orchestrator")]
    Detached { name: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FleetError {
    pub fn connection(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transfer(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transfer {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    /// Exit code of a failed command, if this is a command failure.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailure { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for the errors filesystem probes turn into `false`.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Self::FileNotFound { .. } | Self::UnknownFileType { .. })
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
