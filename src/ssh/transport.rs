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

use async_trait::async_trait;
use russh::client::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use zeroize::Zeroizing;

use super::auth::{AuthContext, AuthMethod};
use super::client::SshClient;
use super::error::SshError;
use super::known_hosts::StrictHostKeyChecking;
use crate::error::{FleetError, Result};
use crate::transport::{Connection, Transport, Tunnel};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Connection settings shared by every host of a fleet.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub key_passphrase: Option<Zeroizing<String>>,
    pub use_agent: bool,
    pub password: Option<Zeroizing<String>>,
    pub strict_host_key_checking: StrictHostKeyChecking,
    /// Interval between keepalive packets; `None` disables them
    pub keepalive: Option<Duration>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            identity_file: None,
            key_passphrase: None,
            use_agent: true,
            password: None,
            strict_host_key_checking: StrictHostKeyChecking::default(),
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl SshOptions {
    fn auth_method(&self) -> std::result::Result<AuthMethod, SshError> {
        AuthContext {
            key_path: self.identity_file.clone(),
            key_passphrase: self.key_passphrase.clone(),
            use_agent: self.use_agent,
            password: self.password.clone(),
        }
        .determine_method()
    }

    fn russh_config(&self) -> Arc<Config> {
        Arc::new(Config {
            keepalive_interval: self.keepalive,
            ..Config::default()
        })
    }
}

/// [`Transport`] over real SSH connections.
pub struct SshTransport {
    options: SshOptions,
    config: Arc<Config>,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        let config = options.russh_config();
        Self { options, config }
    }

    async fn open(&self, host: &str, user: &str) -> std::result::Result<SshClient, SshError> {
        SshClient::connect(
            host,
            self.options.port,
            user,
            self.options.auth_method()?,
            self.options.strict_host_key_checking,
            Arc::clone(&self.config),
        )
        .await
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&self, host: &str, user: &str) -> Result<Arc<dyn Connection>> {
        let client = self
            .open(host, user)
            .await
            .map_err(|e| FleetError::connection(host, e))?;
        info!("Connected to {}@{}", user, host);
        Ok(Arc::new(client))
    }

    async fn open_tunnel(&self, gateway: &str, user: &str) -> Result<Arc<dyn Tunnel>> {
        let client = self
            .open(gateway, user)
            .await
            .map_err(|e| FleetError::connection(gateway, e))?;
        info!("Opened gateway session to {}@{}", user, gateway);
        Ok(Arc::new(SshTunnel {
            gateway: client,
            options: self.options.clone(),
            config: Arc::clone(&self.config),
        }))
    }
}

/// Hosts reached through one gateway session.
struct SshTunnel {
    gateway: SshClient,
    options: SshOptions,
    config: Arc<Config>,
}

#[async_trait]
impl Tunnel for SshTunnel {
    async fn connect(&self, host: &str, user: &str) -> Result<Arc<dyn Connection>> {
        let auth = self
            .options
            .auth_method()
            .map_err(|e| FleetError::connection(host, e))?;
        let client = self
            .gateway
            .connect_via(
                host,
                self.options.port,
                user,
                auth,
                self.options.strict_host_key_checking,
                Arc::clone(&self.config),
            )
            .await
            .map_err(|e| {
                FleetError::connection(host, format!("via {}: {e}", self.gateway.host()))
            })?;
        info!("Connected to {}@{} via {}", user, host, self.gateway.host());
        Ok(Arc::new(client))
    }
}
