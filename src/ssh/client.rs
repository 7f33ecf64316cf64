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

//! An authenticated SSH session and the channel driver behind
//! [`ExecChannel`].

use async_trait::async_trait;
use russh::client::{Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::{client::SftpSession, protocol::OpenFlags};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use super::auth::{authenticate, AuthMethod};
use super::error::SshError;
use super::known_hosts::{ClientHandler, StrictHostKeyChecking};
use crate::error::{FleetError, Result};
use crate::transport::{ChannelEndpoint, ChannelEvent, Connection, ExecChannel, InputCommand};

/// An authenticated session with one server.
#[derive(Clone)]
pub struct SshClient {
    handle: Arc<Handle<ClientHandler>>,
    host: String,
    username: String,
}

impl SshClient {
    /// Connect over TCP and authenticate.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        auth: AuthMethod,
        strict: StrictHostKeyChecking,
        config: Arc<Config>,
    ) -> std::result::Result<Self, SshError> {
        let handler = ClientHandler::new(host, port, strict);
        let mut handle = russh::client::connect(config, (host, port), handler).await?;
        authenticate(&mut handle, username, auth).await?;
        Ok(Self::from_handle(handle, host, username))
    }

    /// Connect to `host` through a `direct-tcpip` channel of this session.
    pub async fn connect_via(
        &self,
        host: &str,
        port: u16,
        username: &str,
        auth: AuthMethod,
        strict: StrictHostKeyChecking,
        config: Arc<Config>,
    ) -> std::result::Result<Self, SshError> {
        debug!("Opening tunnel from {} to {}:{}", self.host, host, port);
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 22)
            .await?;
        let handler = ClientHandler::new(host, port, strict);
        let mut handle = russh::client::connect_stream(config, channel.into_stream(), handler).await?;
        authenticate(&mut handle, username, auth).await?;
        Ok(Self::from_handle(handle, host, username))
    }

    fn from_handle(handle: Handle<ClientHandler>, host: &str, username: &str) -> Self {
        Self {
            handle: Arc::new(handle),
            host: host.to_string(),
            username: username.to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn disconnect(&self) -> std::result::Result<(), SshError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "")
            .await
            .map_err(SshError::Ssh)
    }

    async fn sftp(&self) -> std::result::Result<SftpSession, SshError> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        Ok(SftpSession::new(channel.into_stream()).await?)
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> std::result::Result<(), SshError> {
        let sftp = self.sftp().await?;
        let contents = tokio::fs::read(local).await?;
        let mut file = sftp
            .open_with_flags(
                remote,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await?;
        file.write_all(&contents).await?;
        file.flush().await?;
        file.shutdown().await?;
        Ok(())
    }

    async fn download_file(&self, remote: &str, local: &Path) -> std::result::Result<(), SshError> {
        let sftp = self.sftp().await?;
        let mut file = sftp.open_with_flags(remote, OpenFlags::READ).await?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        tokio::fs::write(local, contents).await?;
        Ok(())
    }
}

/// Pump input commands into `channel` and channel messages out to the
/// caller until the remote side closes.
async fn drive_channel(host: String, mut channel: Channel<Msg>, mut endpoint: ChannelEndpoint) {
    let mut input_open = true;
    loop {
        tokio::select! {
            command = endpoint.input.recv(), if input_open => match command {
                Some(InputCommand::Data(data)) => {
                    if let Err(e) = channel.data(&data[..]).await {
                        debug!(host = %host, "write to channel failed: {e}");
                    }
                }
                Some(InputCommand::Eof) => {
                    let _ = channel.eof().await;
                    input_open = false;
                }
                Some(InputCommand::Close) => {
                    let _ = channel.close().await;
                    input_open = false;
                }
                None => input_open = false,
            },
            message = channel.wait() => {
                let event = match message {
                    None | Some(ChannelMsg::Close) => break,
                    Some(ChannelMsg::Data { data }) => ChannelEvent::Data(data.to_vec()),
                    Some(ChannelMsg::ExtendedData { data, ext }) => ChannelEvent::ExtendedData {
                        ext,
                        data: data.to_vec(),
                    },
                    Some(ChannelMsg::ExitStatus { exit_status }) => ChannelEvent::ExitStatus(exit_status),
                    Some(ChannelMsg::Eof) => ChannelEvent::Eof,
                    Some(other) => {
                        trace!(host = %host, "ignoring channel message {other:?}");
                        continue;
                    }
                };
                if endpoint.events.send(event).await.is_err() {
                    let _ = channel.close().await;
                    break;
                }
            }
        }
    }
    trace!(host = %host, "channel closed");
}

#[async_trait]
impl Connection for SshClient {
    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn open_channel(&self, command: &str) -> Result<ExecChannel> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| FleetError::connection(&self.host, e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| FleetError::connection(&self.host, e))?;

        let (exec, endpoint) = ExecChannel::pair(self.host.clone());
        tokio::spawn(drive_channel(self.host.clone(), channel, endpoint));
        Ok(exec)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        self.upload_file(local, remote)
            .await
            .map_err(|e| FleetError::transfer(&self.host, e))
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        self.download_file(remote, local)
            .await
            .map_err(|e| FleetError::transfer(&self.host, e))
    }
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish()
    }
}
