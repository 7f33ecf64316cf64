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

//! Per-host log messages and the subscription hook UIs attach to.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;

/// Severity of a host log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Debug,
    Info,
    /// Output the remote command wrote to standard error
    Stderr,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Stderr => "stderr",
            Severity::Warn => "warn",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

/// A single line logged by a host.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub severity: Severity,
    pub text: String,
    pub time: DateTime<Local>,
}

impl LogMessage {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            time: Local::now(),
        }
    }
}

/// Receiver for host log messages. The default sink discards everything.
pub type LogHandler = Arc<dyn Fn(&LogMessage) + Send + Sync>;

pub(crate) fn null_handler() -> LogHandler {
    Arc::new(|_| {})
}
