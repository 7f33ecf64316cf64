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

//! Boundary between the fleet core and the secure-shell transport.
//!
//! The core only needs four things from a transport: a connection per
//! host, a tunnel per gateway, a duplex command channel per command and
//! file transfer. [`crate::ssh::SshTransport`] implements this on russh;
//! [`mock::MockTransport`] scripts it in memory for tests.

pub mod mock;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{FleetError, Result};

/// Capacity of the event queue between a transport and a channel reader.
const CHANNEL_EVENT_CAPACITY: usize = 64;

/// Something that happened on a remote command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Standard output bytes
    Data(Vec<u8>),
    /// Extended data; stream type 1 is standard error
    ExtendedData { ext: u32, data: Vec<u8> },
    /// Exit status reported by the SSH server, when it sends one
    ExitStatus(u32),
    /// Remote side finished writing
    Eof,
}

/// Operation requested on the input side of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Data(Vec<u8>),
    Eof,
    Close,
}

/// Write half of a command channel. Cheap to clone; every clone talks to
/// the same remote process.
#[derive(Debug, Clone)]
pub struct ChannelInput {
    host: String,
    tx: mpsc::UnboundedSender<InputCommand>,
}

impl ChannelInput {
    /// Write bytes to the remote process' standard input.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.push(InputCommand::Data(data.into()))
    }

    /// Close the remote process' standard input.
    pub fn eof(&self) -> Result<()> {
        self.push(InputCommand::Eof)
    }

    /// Close the whole channel, stopping the remote process.
    pub fn close(&self) -> Result<()> {
        self.push(InputCommand::Close)
    }

    fn push(&self, command: InputCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| FleetError::ChannelClosed {
                host: self.host.clone(),
            })
    }
}

/// Read half of a command channel plus its input handle.
///
/// The event stream ends when the remote channel is closed.
#[derive(Debug)]
pub struct ExecChannel {
    pub events: mpsc::Receiver<ChannelEvent>,
    pub input: ChannelInput,
}

/// Transport-side ends of an [`ExecChannel`].
#[derive(Debug)]
pub struct ChannelEndpoint {
    pub events: mpsc::Sender<ChannelEvent>,
    pub input: mpsc::UnboundedReceiver<InputCommand>,
}

impl ExecChannel {
    /// Create a connected channel/endpoint pair for `host`.
    pub fn pair(host: impl Into<String>) -> (ExecChannel, ChannelEndpoint) {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_EVENT_CAPACITY);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        (
            ExecChannel {
                events: event_rx,
                input: ChannelInput {
                    host: host.into(),
                    tx: input_tx,
                },
            },
            ChannelEndpoint {
                events: event_tx,
                input: input_rx,
            },
        )
    }
}

/// An authenticated session with one host.
#[async_trait]
pub trait Connection: Send + Sync {
    fn is_closed(&self) -> bool;

    /// Start `command` and return its duplex channel.
    async fn open_channel(&self, command: &str) -> Result<ExecChannel>;

    async fn upload(&self, local: &Path, remote: &str) -> Result<()>;

    async fn download(&self, remote: &str, local: &Path) -> Result<()>;
}

/// A forwarding session through a gateway, shared by every host behind it.
#[async_trait]
pub trait Tunnel: Send + Sync {
    async fn connect(&self, host: &str, user: &str) -> Result<Arc<dyn Connection>>;
}

/// Factory for direct connections and gateway tunnels.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, host: &str, user: &str) -> Result<Arc<dyn Connection>>;

    async fn open_tunnel(&self, gateway: &str, user: &str) -> Result<Arc<dyn Tunnel>>;
}
